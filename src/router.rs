use std::sync::Arc;

use futures_channel::mpsc::UnboundedSender;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, warn};

use crate::connection::{Connection, ConnectionId};
use crate::error::WorldError;
use crate::event::{ErrorReply, Event, MessagePayload, UserId};
use crate::world::{World, WorldRegistry};

/// Decodes inbound frames and dispatches them against the registry.
#[derive(Clone, Debug)]
pub struct EventRouter {
    registry: Arc<WorldRegistry>,
}

impl EventRouter {
    pub fn new(registry: Arc<WorldRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &WorldRegistry {
        &self.registry
    }

    fn world(&self, name: &str) -> Result<Arc<World>, WorldError> {
        self.registry
            .get_world(name)
            .ok_or_else(|| WorldError::WorldNotFound(name.to_owned()))
    }

    /// Handles one text frame for `session`. Failures are answered on the
    /// session's own channel and never end the receive loop.
    pub async fn handle_text(&self, session: &mut Session, text: &str) {
        if let Err(err) = self.dispatch(session, text).await {
            debug!(conn = %session.id, kind = err.kind(), error = %err, "request rejected");
            session.reply_error(&err);
        }
    }

    /// Binary frames carry the same JSON, just without the text opcode.
    pub async fn handle_binary(&self, session: &mut Session, bytes: &[u8]) {
        match std::str::from_utf8(bytes) {
            Ok(text) => self.handle_text(session, text).await,
            Err(e) => session.reply_error(&WorldError::MalformedPayload(e.to_string())),
        }
    }

    async fn dispatch(&self, session: &mut Session, text: &str) -> Result<(), WorldError> {
        match Event::decode(text)? {
            Event::UserJoin(payload) => {
                let world = self.world(&payload.world_name)?;
                let user_id = payload.user.id.clone();
                let conn = Connection::new(session.id, payload.user, session.tx.clone());
                world.user_join(conn).await?;
                debug!(conn = %session.id, world = world.name(), "membership recorded");
                session.forget(&world, &user_id);
                session.memberships.push((world, user_id));
            }
            Event::UserLeave(payload) => {
                let world = self.world(&payload.world_name)?;
                world.user_leave(&payload.user.id).await?;
                debug!(conn = %session.id, world = world.name(), "membership dropped");
                session.forget(&world, &payload.user.id);
            }
            Event::UserMessage(payload) => self.post_message(payload).await?,
        }
        Ok(())
    }

    /// Entry point shared by the websocket path and the HTTP `POST message`
    /// adapter.
    pub async fn post_message(&self, payload: MessagePayload) -> Result<(), WorldError> {
        let world = self.world(&payload.world_name)?;
        world.user_message(payload.message).await
    }
}

/// Per-socket state: the outbound queue plus every (world, user) this
/// socket joined and has not yet left.
#[derive(Debug)]
pub struct Session {
    id: ConnectionId,
    tx: UnboundedSender<WsMessage>,
    memberships: Vec<(Arc<World>, UserId)>,
}

impl Session {
    pub fn new(id: ConnectionId, tx: UnboundedSender<WsMessage>) -> Self {
        Self {
            id,
            tx,
            memberships: Vec::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn membership_count(&self) -> usize {
        self.memberships.len()
    }

    fn forget(&mut self, world: &Arc<World>, user_id: &UserId) {
        self.memberships
            .retain(|(w, u)| !(Arc::ptr_eq(w, world) && u == user_id));
    }

    fn reply_error(&self, err: &WorldError) {
        match serde_json::to_string(&ErrorReply::from(err)) {
            Ok(text) => {
                if self.tx.unbounded_send(WsMessage::Text(text)).is_err() {
                    debug!(conn = %self.id, "error reply dropped, socket closed");
                }
            }
            Err(e) => error!(conn = %self.id, error = %e, "failed to serialize error reply"),
        }
    }

    /// Leaves every world this socket still holds a membership in.
    pub async fn close(mut self) {
        let memberships = std::mem::take(&mut self.memberships);
        release_all(self.id, memberships).await;
    }
}

impl Drop for Session {
    // Reached with memberships left only when `close` never ran, e.g. the
    // task was cancelled or panicked.
    fn drop(&mut self) {
        if self.memberships.is_empty() {
            return;
        }
        let memberships = std::mem::take(&mut self.memberships);
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(release_all(id, memberships));
            }
            Err(_) => warn!(conn = %id, "no runtime to release memberships on drop"),
        }
    }
}

async fn release_all(id: ConnectionId, memberships: Vec<(Arc<World>, UserId)>) {
    for (world, user_id) in memberships {
        world.release(&user_id, id).await;
    }
}
