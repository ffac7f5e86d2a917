use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_channel::mpsc::UnboundedSender;
use tokio_tungstenite::tungstenite::Message;

use crate::event::{User, UserId};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one accepted socket for its whole lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A user joined to a world through one socket's outbound queue.
#[derive(Clone, Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub user: User,
    pub tx: UnboundedSender<Message>,
}

impl Connection {
    pub fn new(id: ConnectionId, user: User, tx: UnboundedSender<Message>) -> Self {
        Self { id, user, tx }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user.id
    }

    /// Queues a frame for the writer half. Fails only once the socket is gone.
    pub fn send(&self, msg: Message) -> Result<(), Message> {
        self.tx.unbounded_send(msg).map_err(|err| err.into_inner())
    }
}
