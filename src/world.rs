use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use crate::connection::{Connection, ConnectionId};
use crate::error::WorldError;
use crate::event::{Event, Message, MessagePayload, User, UserId};

pub const DEFAULT_WORLD: &str = "SpicyMackerel";

type ConnectionMap = IndexMap<UserId, Connection>;

/// A named room. Membership changes and broadcasts for one world are
/// serialized by `connections`; separate worlds never contend.
#[derive(Debug)]
pub struct World {
    name: String,
    connections: Mutex<ConnectionMap>,
}

impl World {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connections: Mutex::new(IndexMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn user_in_world(&self, user_id: &UserId) -> bool {
        self.connections.lock().await.contains_key(user_id)
    }

    pub async fn member_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Current members in broadcast order.
    pub async fn members(&self) -> Vec<User> {
        self.connections
            .lock()
            .await
            .values()
            .map(|conn| conn.user.clone())
            .collect()
    }

    /// Adds `connection` and announces it to every member, the joiner included.
    pub async fn user_join(&self, connection: Connection) -> Result<(), WorldError> {
        let mut conns = self.connections.lock().await;
        if conns.contains_key(connection.user_id()) {
            return Err(WorldError::AlreadyInWorld {
                user: connection.user.id.clone(),
                world: self.name.clone(),
            });
        }
        let user = connection.user.clone();
        info!(world = %self.name, user_id = %user.id, conn = %connection.id, "user joined");
        conns.insert(user.id.clone(), connection);
        self.fan_out(&mut conns, Event::user_join(user, &self.name), None);
        Ok(())
    }

    /// Removes the user and announces the departure to those who remain.
    pub async fn user_leave(&self, user_id: &UserId) -> Result<User, WorldError> {
        let mut conns = self.connections.lock().await;
        let conn = conns
            .shift_remove(user_id)
            .ok_or_else(|| WorldError::NotInWorld {
                user: user_id.clone(),
                world: self.name.clone(),
            })?;
        info!(world = %self.name, user_id = %user_id, conn = %conn.id, "user left");
        self.fan_out(&mut conns, Event::user_leave(conn.user.clone(), &self.name), None);
        Ok(conn.user)
    }

    /// Disconnect cleanup. Only removes the entry if it still belongs to
    /// `connection_id`, so a closed socket cannot evict a later rejoin.
    pub async fn release(&self, user_id: &UserId, connection_id: ConnectionId) -> Option<User> {
        let mut conns = self.connections.lock().await;
        match conns.get(user_id) {
            Some(conn) if conn.id == connection_id => {}
            _ => return None,
        }
        let conn = conns.shift_remove(user_id)?;
        info!(world = %self.name, user_id = %user_id, conn = %connection_id, "released on disconnect");
        self.fan_out(&mut conns, Event::user_leave(conn.user.clone(), &self.name), None);
        Some(conn.user)
    }

    /// Delivers a pre-built `event` to every current member, its author
    /// included. Events addressed to another world are dropped.
    ///
    /// Chat goes through [`World::user_message`] instead, which checks the
    /// sender's membership under the same lock and skips the echo; both
    /// share one fan-out.
    pub async fn send_event(&self, event: &Event) -> bool {
        if event.world_name() != self.name {
            warn!(world = %self.name, target = event.world_name(), "event addressed to another world");
            return false;
        }
        let mut conns = self.connections.lock().await;
        self.fan_out(&mut conns, event.clone(), None);
        true
    }

    /// Broadcasts a chat message from a member. The sender gets no echo.
    pub async fn user_message(&self, message: Message) -> Result<(), WorldError> {
        let mut conns = self.connections.lock().await;
        let sender = message.user.id.clone();
        if !conns.contains_key(&sender) {
            return Err(WorldError::NotInWorld {
                user: sender,
                world: self.name.clone(),
            });
        }
        let event = Event::UserMessage(MessagePayload {
            message,
            world_name: self.name.clone(),
        });
        self.fan_out(&mut conns, event, Some(sender));
        Ok(())
    }

    // Sends never block, so the lock is held across the whole fan-out.
    // Members whose queue is closed are dropped and their leave is
    // announced to the rest, which may in turn surface more dead members.
    fn fan_out(&self, conns: &mut ConnectionMap, event: Event, skip: Option<UserId>) {
        let mut pending = VecDeque::from([(event, skip)]);
        while let Some((event, skip)) = pending.pop_front() {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!(world = %self.name, event_type = event.type_name(), error = %e, "failed to serialize event");
                    continue;
                }
            };
            let mut failed = Vec::new();
            let mut recipients = 0u32;
            for (user_id, conn) in conns.iter() {
                if skip.as_ref() == Some(user_id) {
                    continue;
                }
                recipients += 1;
                if conn.send(WsMessage::Text(text.clone())).is_err() {
                    warn!(world = %self.name, user_id = %user_id, conn = %conn.id, "send failed, dropping member");
                    failed.push(user_id.clone());
                }
            }
            debug!(world = %self.name, event_type = event.type_name(), recipients, "broadcast event");
            for user_id in failed {
                if let Some(conn) = conns.shift_remove(&user_id) {
                    pending.push_back((Event::user_leave(conn.user, &self.name), None));
                }
            }
        }
    }
}

/// Fixed name → world mapping, built once at startup and shared by handle.
#[derive(Debug)]
pub struct WorldRegistry {
    worlds: HashMap<String, Arc<World>>,
}

impl WorldRegistry {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut worlds = HashMap::new();
        for name in names {
            let name = name.into();
            worlds
                .entry(name.clone())
                .or_insert_with(|| Arc::new(World::new(name)));
        }
        Self { worlds }
    }

    pub fn get_world(&self, name: &str) -> Option<Arc<World>> {
        self.worlds.get(name).cloned()
    }

    pub fn world_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.worlds.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for WorldRegistry {
    fn default() -> Self {
        Self::new([DEFAULT_WORLD])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_channel::mpsc::{unbounded, UnboundedReceiver};

    fn make_connection(id: i64, name: &str) -> (Connection, UnboundedReceiver<WsMessage>) {
        let (tx, rx) = unbounded();
        let conn = Connection::new(ConnectionId::next(), User::new(id, name), tx);
        (conn, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<WsMessage>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(Some(msg)) = rx.try_next() {
            if let WsMessage::Text(text) = msg {
                events.push(serde_json::from_str(&text).unwrap());
            }
        }
        events
    }

    fn chat(id: i64, name: &str, content: &str) -> Message {
        Message {
            user: User::new(id, name),
            content: content.into(),
        }
    }

    #[tokio::test]
    async fn join_echoes_to_joiner_and_existing_members() {
        let world = World::new(DEFAULT_WORLD);
        let (a, mut rx_a) = make_connection(1, "A");
        let (b, mut rx_b) = make_connection(2, "B");

        world.user_join(a).await.unwrap();
        assert_eq!(drain(&mut rx_a), vec![Event::user_join(User::new(1, "A"), DEFAULT_WORLD)]);

        world.user_join(b).await.unwrap();
        let join_b = Event::user_join(User::new(2, "B"), DEFAULT_WORLD);
        assert_eq!(drain(&mut rx_a), vec![join_b.clone()]);
        assert_eq!(drain(&mut rx_b), vec![join_b]);
    }

    #[tokio::test]
    async fn duplicate_join_is_rejected_without_change() {
        let world = World::new(DEFAULT_WORLD);
        let (a, mut rx_a) = make_connection(1, "A");
        let (again, mut rx_again) = make_connection(1, "A");

        world.user_join(a).await.unwrap();
        drain(&mut rx_a);

        let err = world.user_join(again).await.unwrap_err();
        assert_eq!(
            err,
            WorldError::AlreadyInWorld {
                user: UserId::Int(1),
                world: DEFAULT_WORLD.into()
            }
        );
        assert_eq!(world.member_count().await, 1);
        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_again).is_empty());
    }

    #[tokio::test]
    async fn leaver_gets_no_leave_event() {
        let world = World::new(DEFAULT_WORLD);
        let (a, mut rx_a) = make_connection(1, "A");
        let (b, mut rx_b) = make_connection(2, "B");
        let (c, mut rx_c) = make_connection(3, "C");
        world.user_join(a).await.unwrap();
        world.user_join(b).await.unwrap();
        world.user_join(c).await.unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);
        drain(&mut rx_c);

        let left = world.user_leave(&UserId::Int(1)).await.unwrap();
        assert_eq!(left, User::new(1, "A"));
        let leave_a = Event::user_leave(User::new(1, "A"), DEFAULT_WORLD);
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b), vec![leave_a.clone()]);
        assert_eq!(drain(&mut rx_c), vec![leave_a]);
        assert!(!world.user_in_world(&UserId::Int(1)).await);
    }

    #[tokio::test]
    async fn leave_when_absent_fails_and_does_not_mutate() {
        let world = World::new(DEFAULT_WORLD);
        let (b, mut rx_b) = make_connection(2, "B");
        world.user_join(b).await.unwrap();
        drain(&mut rx_b);

        for _ in 0..2 {
            let err = world.user_leave(&UserId::Int(1)).await.unwrap_err();
            assert_eq!(err.kind(), "not_in_world");
            assert_eq!(world.members().await, vec![User::new(2, "B")]);
        }
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn membership_toggles_with_join_leave_parity() {
        let world = World::new(DEFAULT_WORLD);
        let mut receivers = Vec::new();
        let mut completed: HashMap<i64, u32> = HashMap::new();
        // (user, join?) in a fixed interleaving with repeats of both kinds.
        let ops = [
            (1, true), (1, true), (2, false), (2, true), (1, false), (1, false),
            (2, true), (3, true), (2, false), (1, true), (3, false), (3, false),
        ];
        for (id, join) in ops {
            let result = if join {
                let (conn, rx) = make_connection(id, "u");
                receivers.push(rx);
                world.user_join(conn).await
            } else {
                world.user_leave(&UserId::Int(id)).await.map(|_| ())
            };
            if result.is_ok() {
                *completed.entry(id).or_default() += 1;
            }
            for user in 1..=3 {
                let odd = completed.get(&user).copied().unwrap_or(0) % 2 == 1;
                assert_eq!(world.user_in_world(&UserId::Int(user)).await, odd);
            }
        }
    }

    #[tokio::test]
    async fn message_skips_sender() {
        let world = World::new(DEFAULT_WORLD);
        let (a, mut rx_a) = make_connection(1, "A");
        let (b, mut rx_b) = make_connection(2, "B");
        world.user_join(a).await.unwrap();
        world.user_join(b).await.unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        world.user_message(chat(1, "A", "hi")).await.unwrap();
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(
            drain(&mut rx_b),
            vec![Event::UserMessage(MessagePayload {
                message: chat(1, "A", "hi"),
                world_name: DEFAULT_WORLD.into(),
            })]
        );
    }

    #[tokio::test]
    async fn message_from_non_member_is_rejected() {
        let world = World::new(DEFAULT_WORLD);
        let (b, mut rx_b) = make_connection(2, "B");
        world.user_join(b).await.unwrap();
        drain(&mut rx_b);

        let err = world.user_message(chat(9, "Z", "hello?")).await.unwrap_err();
        assert_eq!(err.kind(), "not_in_world");
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn send_event_reaches_everyone_in_join_order() {
        let world = World::new(DEFAULT_WORLD);
        let (a, mut rx_a) = make_connection(1, "A");
        let (b, mut rx_b) = make_connection(2, "B");
        world.user_join(b).await.unwrap();
        world.user_join(a).await.unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        let event = Event::UserMessage(MessagePayload {
            message: chat(2, "B", "announce"),
            world_name: DEFAULT_WORLD.into(),
        });
        assert!(world.send_event(&event).await);
        assert_eq!(drain(&mut rx_a), vec![event.clone()]);
        assert_eq!(drain(&mut rx_b), vec![event]);
        assert_eq!(world.members().await, vec![User::new(2, "B"), User::new(1, "A")]);
    }

    #[tokio::test]
    async fn send_event_refuses_other_worlds_events() {
        let world = World::new(DEFAULT_WORLD);
        let (a, mut rx_a) = make_connection(1, "A");
        world.user_join(a).await.unwrap();
        drain(&mut rx_a);

        let stray = Event::user_join(User::new(5, "E"), "Atlantis");
        assert_eq!(stray.world_name(), "Atlantis");
        assert!(!world.send_event(&stray).await);
        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn failed_send_removes_member_and_announces_leave() {
        let world = World::new(DEFAULT_WORLD);
        let (a, mut rx_a) = make_connection(1, "A");
        let (b, rx_b) = make_connection(2, "B");
        let (c, mut rx_c) = make_connection(3, "C");
        world.user_join(a).await.unwrap();
        world.user_join(b).await.unwrap();
        world.user_join(c).await.unwrap();
        drain(&mut rx_a);
        drain(&mut rx_c);
        drop(rx_b);

        world.user_message(chat(1, "A", "anyone?")).await.unwrap();

        assert!(!world.user_in_world(&UserId::Int(2)).await);
        let leave_b = Event::user_leave(User::new(2, "B"), DEFAULT_WORLD);
        assert_eq!(drain(&mut rx_a), vec![leave_b.clone()]);
        let got_c = drain(&mut rx_c);
        assert_eq!(got_c.len(), 2);
        assert_eq!(got_c[0].type_name(), "user_message");
        assert_eq!(got_c[1], leave_b);
    }

    #[tokio::test]
    async fn release_ignores_other_connection() {
        let world = World::new(DEFAULT_WORLD);
        let (a, mut rx_a) = make_connection(1, "A");
        let stale = ConnectionId::next();
        world.user_join(a).await.unwrap();
        drain(&mut rx_a);

        assert_eq!(world.release(&UserId::Int(1), stale).await, None);
        assert!(world.user_in_world(&UserId::Int(1)).await);
    }

    #[tokio::test]
    async fn release_by_owner_announces_leave() {
        let world = World::new(DEFAULT_WORLD);
        let (a, _rx_a) = make_connection(1, "A");
        let (b, mut rx_b) = make_connection(2, "B");
        let owner = a.id;
        world.user_join(a).await.unwrap();
        world.user_join(b).await.unwrap();
        drain(&mut rx_b);

        assert_eq!(world.release(&UserId::Int(1), owner).await, Some(User::new(1, "A")));
        assert_eq!(drain(&mut rx_b), vec![Event::user_leave(User::new(1, "A"), DEFAULT_WORLD)]);
    }

    #[tokio::test]
    async fn concurrent_joins_of_same_user_admit_one() {
        let world = Arc::new(World::new(DEFAULT_WORLD));
        let mut handles = Vec::new();
        let mut receivers = Vec::new();
        for _ in 0..16 {
            let (conn, rx) = make_connection(7, "G");
            receivers.push(rx);
            let world = Arc::clone(&world);
            handles.push(tokio::spawn(async move { world.user_join(conn).await }));
        }
        let mut ok = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(world.member_count().await, 1);
    }

    #[test]
    fn registry_lookup() {
        let registry = WorldRegistry::default();
        assert_eq!(registry.world_names(), vec![DEFAULT_WORLD]);
        assert_eq!(registry.get_world(DEFAULT_WORLD).unwrap().name(), DEFAULT_WORLD);
        assert!(registry.get_world("Atlantis").is_none());

        let registry = WorldRegistry::new(["b", "a", "b"]);
        assert_eq!(registry.world_names(), vec!["a", "b"]);
    }
}
