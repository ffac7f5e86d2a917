use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WorldError;

pub const USER_JOIN: &str = "user_join";
pub const USER_LEAVE: &str = "user_leave";
pub const USER_MESSAGE: &str = "user_message";

/// Clients may identify users by number or by string; the two are never equal.
/// Integers above `i64::MAX` land in `UInt`, so every JSON integer is accepted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserId {
    Int(i64),
    UInt(u64),
    Str(String),
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserId::Int(id) => write!(f, "{id}"),
            UserId::UInt(id) => write!(f, "{id}"),
            UserId::Str(id) => f.write_str(id),
        }
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        UserId::Int(id)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        UserId::Str(id.to_owned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
}

impl User {
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub user: User,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresencePayload {
    pub user: User,
    pub world_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub message: Message,
    pub world_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Event {
    UserJoin(PresencePayload),
    UserLeave(PresencePayload),
    UserMessage(MessagePayload),
}

impl Event {
    pub fn user_join(user: User, world_name: &str) -> Self {
        Event::UserJoin(PresencePayload {
            user,
            world_name: world_name.to_owned(),
        })
    }

    pub fn user_leave(user: User, world_name: &str) -> Self {
        Event::UserLeave(PresencePayload {
            user,
            world_name: world_name.to_owned(),
        })
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Event::UserJoin(_) => USER_JOIN,
            Event::UserLeave(_) => USER_LEAVE,
            Event::UserMessage(_) => USER_MESSAGE,
        }
    }

    pub fn world_name(&self) -> &str {
        match self {
            Event::UserJoin(p) | Event::UserLeave(p) => &p.world_name,
            Event::UserMessage(p) => &p.world_name,
        }
    }

    /// Decodes one inbound text frame.
    ///
    /// The tag is checked before the payload is looked at, so an unknown
    /// `type` is reported as such even when the payload is absent.
    pub fn decode(text: &str) -> Result<Self, WorldError> {
        let Shell { type_, payload: value } = serde_json::from_str(text)?;
        match type_.as_str() {
            USER_JOIN => Ok(Event::UserJoin(payload(&type_, value)?)),
            USER_LEAVE => Ok(Event::UserLeave(payload(&type_, value)?)),
            USER_MESSAGE => Ok(Event::UserMessage(payload(&type_, value)?)),
            other => Err(WorldError::UnsupportedEventType(other.to_owned())),
        }
    }
}

#[derive(Deserialize)]
struct Shell {
    #[serde(rename = "type")]
    type_: String,
    #[serde(default)]
    payload: Value,
}

fn payload<T: DeserializeOwned>(type_: &str, value: Value) -> Result<T, WorldError> {
    if value.is_null() {
        return Err(WorldError::MalformedPayload(format!("missing payload for {type_}")));
    }
    Ok(serde_json::from_value(value)?)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorPayload {
    pub kind: String,
    pub code: u16,
    pub message: String,
}

/// Error frame sent back to the connection whose request failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ErrorReply {
    Error(ErrorPayload),
}

impl From<&WorldError> for ErrorReply {
    fn from(err: &WorldError) -> Self {
        ErrorReply::Error(ErrorPayload {
            kind: err.kind().to_owned(),
            code: err.code(),
            message: err.to_string(),
        })
    }
}
