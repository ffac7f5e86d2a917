use crate::event::UserId;

/// Per-request failures. None of these affect other connections or the
/// shared world state; the router reports them back to the sender only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    #[error("world not found: {0}")]
    WorldNotFound(String),

    #[error("user {user} is already in world {world}")]
    AlreadyInWorld { user: UserId, world: String },

    #[error("user {user} is not in world {world}")]
    NotInWorld { user: UserId, world: String },

    #[error("unsupported event type: {0}")]
    UnsupportedEventType(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

impl WorldError {
    /// Stable identifier used in error replies.
    pub fn kind(&self) -> &'static str {
        match self {
            WorldError::WorldNotFound(_) => "world_not_found",
            WorldError::AlreadyInWorld { .. } => "already_in_world",
            WorldError::NotInWorld { .. } => "not_in_world",
            WorldError::UnsupportedEventType(_) => "unsupported_event_type",
            WorldError::MalformedPayload(_) => "malformed_payload",
        }
    }

    /// HTTP-style status code, so the same error can back a REST response.
    pub fn code(&self) -> u16 {
        match self {
            WorldError::WorldNotFound(_) => 404,
            WorldError::AlreadyInWorld { .. } | WorldError::NotInWorld { .. } => 403,
            WorldError::UnsupportedEventType(_) | WorldError::MalformedPayload(_) => 422,
        }
    }
}

impl From<serde_json::Error> for WorldError {
    fn from(err: serde_json::Error) -> Self {
        WorldError::MalformedPayload(err.to_string())
    }
}
