use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use uuid::Uuid;

use corral_types::events::GatewayEvent;

/// One live transport session. A user may hold several connections
/// (multi-device); each gets its own id and outbound channel.
struct ConnectionHandle {
    user_id: Uuid,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

/// Transient room membership for real-time fan-out.
///
/// Constructed once at process start and handed to the gateway; never a
/// module-level singleton. Purely in-memory: nothing survives a
/// restart, clients rejoin their rooms after reconnecting. All
/// operations are synchronous and never suspend.
#[derive(Clone)]
pub struct RoomRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    /// conn_id -> connection handle
    connections: RwLock<HashMap<Uuid, ConnectionHandle>>,
    /// conversation_id -> joined conn_ids
    rooms: RwLock<HashMap<Uuid, HashSet<Uuid>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                connections: RwLock::new(HashMap::new()),
                rooms: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register a connection for an authenticated user. Returns the
    /// connection id and the receiving end of its outbound channel.
    pub fn register(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .connections
            .write()
            .expect("connections lock poisoned")
            .insert(conn_id, ConnectionHandle { user_id, tx });
        (conn_id, rx)
    }

    /// Drop a connection and every room membership it holds. Called on
    /// disconnect whether or not the client sent leave-room first.
    pub fn unregister(&self, conn_id: Uuid) {
        self.inner
            .connections
            .write()
            .expect("connections lock poisoned")
            .remove(&conn_id);

        let mut rooms = self.inner.rooms.write().expect("rooms lock poisoned");
        rooms.retain(|_, members| {
            members.remove(&conn_id);
            !members.is_empty()
        });
    }

    /// Add a connection to a room. Idempotent.
    pub fn join(&self, conn_id: Uuid, conversation_id: Uuid) {
        self.inner
            .rooms
            .write()
            .expect("rooms lock poisoned")
            .entry(conversation_id)
            .or_default()
            .insert(conn_id);
    }

    /// Remove a connection from a room. Idempotent.
    pub fn leave(&self, conn_id: Uuid, conversation_id: Uuid) {
        let mut rooms = self.inner.rooms.write().expect("rooms lock poisoned");
        if let Some(members) = rooms.get_mut(&conversation_id) {
            members.remove(&conn_id);
            if members.is_empty() {
                rooms.remove(&conversation_id);
            }
        }
    }

    /// Current member set for a room; empty if nobody is joined.
    pub fn members_of(&self, conversation_id: Uuid) -> HashSet<Uuid> {
        self.inner
            .rooms
            .read()
            .expect("rooms lock poisoned")
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Fan an event out to every room member except the sending
    /// connection. Best-effort: an empty room or a closed channel is
    /// silently zero recipients.
    pub fn broadcast_to_room(&self, conversation_id: Uuid, sender_conn: Uuid, event: GatewayEvent) {
        let members = self.members_of(conversation_id);
        if members.is_empty() {
            return;
        }

        let connections = self
            .inner
            .connections
            .read()
            .expect("connections lock poisoned");
        for conn_id in members {
            if conn_id == sender_conn {
                continue;
            }
            if let Some(handle) = connections.get(&conn_id) {
                let _ = handle.tx.send(event.clone());
            }
        }
    }

    /// The authenticated user behind a connection, if still registered.
    pub fn user_of(&self, conn_id: Uuid) -> Option<Uuid> {
        self.inner
            .connections
            .read()
            .expect("connections lock poisoned")
            .get(&conn_id)
            .map(|h| h.user_id)
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(user_id: Uuid) -> GatewayEvent {
        GatewayEvent::Ready { user_id }
    }

    #[test]
    fn join_and_leave_are_idempotent() {
        let registry = RoomRegistry::new();
        let (conn, _rx) = registry.register(Uuid::new_v4());
        let room = Uuid::new_v4();

        registry.join(conn, room);
        registry.join(conn, room);
        assert_eq!(registry.members_of(room).len(), 1);

        registry.leave(conn, room);
        registry.leave(conn, room);
        assert!(registry.members_of(room).is_empty());
    }

    #[test]
    fn unregister_clears_all_memberships() {
        let registry = RoomRegistry::new();
        let user = Uuid::new_v4();
        let (conn, _rx) = registry.register(user);
        let room_a = Uuid::new_v4();
        let room_b = Uuid::new_v4();

        registry.join(conn, room_a);
        registry.join(conn, room_b);
        assert_eq!(registry.user_of(conn), Some(user));

        registry.unregister(conn);
        assert!(registry.members_of(room_a).is_empty());
        assert!(registry.members_of(room_b).is_empty());
        assert_eq!(registry.user_of(conn), None);
    }

    #[test]
    fn members_of_unknown_room_is_empty() {
        let registry = RoomRegistry::new();
        assert!(registry.members_of(Uuid::new_v4()).is_empty());
    }

    #[test]
    fn broadcast_skips_sender_and_reaches_others() {
        let registry = RoomRegistry::new();
        let room = Uuid::new_v4();

        let (sender, mut sender_rx) = registry.register(Uuid::new_v4());
        let (peer_a, mut peer_a_rx) = registry.register(Uuid::new_v4());
        let (peer_b, mut peer_b_rx) = registry.register(Uuid::new_v4());
        registry.join(sender, room);
        registry.join(peer_a, room);
        registry.join(peer_b, room);

        registry.broadcast_to_room(room, sender, ready(Uuid::new_v4()));

        assert!(peer_a_rx.try_recv().is_ok());
        assert!(peer_b_rx.try_recv().is_ok());
        assert!(sender_rx.try_recv().is_err());
    }

    #[test]
    fn broadcast_to_empty_room_is_silent() {
        let registry = RoomRegistry::new();
        let (sender, _rx) = registry.register(Uuid::new_v4());

        // Nobody joined; nothing to deliver, nothing to fail.
        registry.broadcast_to_room(Uuid::new_v4(), sender, ready(Uuid::new_v4()));
    }

    #[test]
    fn broadcast_only_reaches_joined_connections() {
        let registry = RoomRegistry::new();
        let room = Uuid::new_v4();

        let (sender, _srx) = registry.register(Uuid::new_v4());
        let (joined, mut joined_rx) = registry.register(Uuid::new_v4());
        let (bystander, mut bystander_rx) = registry.register(Uuid::new_v4());
        registry.join(sender, room);
        registry.join(joined, room);

        registry.broadcast_to_room(room, sender, ready(Uuid::new_v4()));

        assert!(joined_rx.try_recv().is_ok());
        assert!(bystander_rx.try_recv().is_err());
        let _ = bystander;
    }
}
