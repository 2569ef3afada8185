use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, Notify, RwLock, mpsc};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use tracker_types::events::ControlFrame;
use tracker_types::rooms::RoomKey;

/// Serialized frames queued for one socket.
pub type Outbox = mpsc::UnboundedSender<Arc<str>>;

/// Returned by [`ConnectionRegistry::register`]. The receiver feeds the
/// connection's socket writer; `tx` lets the connection queue its own
/// control frames behind room deliveries. `closed` fires when the server
/// drops the connection on its own.
pub struct ConnectionHandle {
    pub id: Uuid,
    pub tx: Outbox,
    pub rx: mpsc::UnboundedReceiver<Arc<str>>,
    pub closed: Arc<Notify>,
}

struct Connection {
    tx: Outbox,
    closed: Arc<Notify>,
    state: Mutex<ConnectionState>,
}

#[derive(Default)]
struct ConnectionState {
    user_id: Option<i64>,
    rooms: HashSet<RoomKey>,
    /// Set once the entry has left the map; joins after that are refused.
    removed: bool,
}

/// Outcome of one fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub sent: usize,
    pub dropped: usize,
}

/// Live connections and the rooms each one has joined.
///
/// Lock order is `connections`, then one connection's state, then `rooms`.
/// Room membership changes hold only the map read lock, so joins on
/// different connections do not serialize.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    connections: RwLock<HashMap<Uuid, Arc<Connection>>>,

    /// Explicit rooms only; the no-key room is every connection.
    rooms: RwLock<HashMap<RoomKey, HashSet<Uuid>>>,
}

impl RegistryInner {
    async fn connection(&self, id: Uuid) -> Option<Arc<Connection>> {
        self.connections.read().await.get(&id).cloned()
    }

    async fn snapshot(&self) -> Vec<(Uuid, Arc<Connection>)> {
        self.connections
            .read()
            .await
            .iter()
            .map(|(id, conn)| (*id, conn.clone()))
            .collect()
    }

    async fn drop_membership(&self, id: Uuid, room: RoomKey) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(&room) {
            members.remove(&id);
            if members.is_empty() {
                rooms.remove(&room);
            }
        }
    }
}

fn control_frame(frame: &ControlFrame) -> Option<Arc<str>> {
    match serde_json::to_string(frame) {
        Ok(json) => Some(json.into()),
        Err(e) => {
            warn!("Failed to serialize control frame: {}", e);
            None
        }
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self) -> ConnectionHandle {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let closed = Arc::new(Notify::new());
        self.inner.connections.write().await.insert(
            id,
            Arc::new(Connection {
                tx: tx.clone(),
                closed: closed.clone(),
                state: Mutex::new(ConnectionState::default()),
            }),
        );
        debug!("Connection {} registered", id);
        ConnectionHandle { id, tx, rx, closed }
    }

    /// Binds the connection to a user. Returns false for unknown connections.
    pub async fn authenticate(&self, id: Uuid, user_id: i64) -> bool {
        let Some(conn) = self.inner.connection(id).await else {
            return false;
        };
        let mut state = conn.state.lock().await;
        if state.removed {
            return false;
        }
        state.user_id = Some(user_id);
        true
    }

    pub async fn user_of(&self, id: Uuid) -> Option<i64> {
        let conn = self.inner.connection(id).await?;
        let state = conn.state.lock().await;
        state.user_id
    }

    /// Returns false when the connection is gone. Joining the no-key room
    /// is a no-op since every connection is already in it.
    pub async fn join(&self, id: Uuid, room: RoomKey) -> bool {
        let Some(conn) = self.inner.connection(id).await else {
            return false;
        };
        let mut state = conn.state.lock().await;
        if state.removed {
            return false;
        }
        if room == RoomKey::Global {
            return true;
        }

        state.rooms.insert(room);
        self.inner
            .rooms
            .write()
            .await
            .entry(room)
            .or_default()
            .insert(id);
        trace!("Connection {} joined {}", id, room);
        true
    }

    /// Returns whether the connection was in the room.
    pub async fn leave(&self, id: Uuid, room: RoomKey) -> bool {
        let Some(conn) = self.inner.connection(id).await else {
            return false;
        };
        let mut state = conn.state.lock().await;
        if !state.rooms.remove(&room) {
            return false;
        }
        self.inner.drop_membership(id, room).await;
        true
    }

    pub async fn members_of(&self, room: RoomKey) -> HashSet<Uuid> {
        match room {
            RoomKey::Global => self.inner.connections.read().await.keys().copied().collect(),
            room => self
                .inner
                .rooms
                .read()
                .await
                .get(&room)
                .cloned()
                .unwrap_or_default(),
        }
    }

    pub async fn rooms_of(&self, id: Uuid) -> HashSet<RoomKey> {
        let Some(conn) = self.inner.connection(id).await else {
            return HashSet::new();
        };
        let state = conn.state.lock().await;
        state.rooms.clone()
    }

    /// Every room any of the user's connections is in.
    pub async fn rooms_of_user(&self, user_id: i64) -> HashSet<RoomKey> {
        let mut out = HashSet::new();
        for (_, conn) in self.inner.snapshot().await {
            let state = conn.state.lock().await;
            if state.user_id == Some(user_id) {
                out.extend(state.rooms.iter().copied());
            }
        }
        out
    }

    /// Pulls every connection of `user_id` out of `room` and tells each one
    /// with a `left` frame. Returns how many were removed.
    pub async fn evict_user(&self, user_id: i64, room: RoomKey) -> usize {
        let frame = control_frame(&ControlFrame::Left { room });
        let mut evicted = 0;
        for (id, conn) in self.inner.snapshot().await {
            let mut state = conn.state.lock().await;
            if state.user_id != Some(user_id) || !state.rooms.remove(&room) {
                continue;
            }
            self.inner.drop_membership(id, room).await;
            drop(state);

            if let Some(frame) = &frame {
                let _ = conn.tx.send(frame.clone());
            }
            evicted += 1;
        }
        if evicted > 0 {
            debug!("User {} evicted from {} ({} connections)", user_id, room, evicted);
        }
        evicted
    }

    /// Deregisters every connection of `user_id` and signals each socket to
    /// close once its queued frames are flushed.
    pub async fn disconnect_user(&self, user_id: i64) -> usize {
        let mut targets = Vec::new();
        for (id, conn) in self.inner.snapshot().await {
            let owner = conn.state.lock().await.user_id;
            if owner == Some(user_id) {
                targets.push(id);
            }
        }

        let mut closed = 0;
        for id in targets {
            if let Some(conn) = self.remove(id).await {
                conn.closed.notify_one();
                closed += 1;
            }
        }
        if closed > 0 {
            debug!("User {} disconnected ({} connections)", user_id, closed);
        }
        closed
    }

    /// Removes the connection and every membership it held.
    pub async fn deregister(&self, id: Uuid) {
        self.remove(id).await;
    }

    async fn remove(&self, id: Uuid) -> Option<Arc<Connection>> {
        let conn = self.inner.connections.write().await.remove(&id)?;

        let mut state = conn.state.lock().await;
        state.removed = true;
        let held = std::mem::take(&mut state.rooms);
        for room in &held {
            self.inner.drop_membership(id, *room).await;
        }
        drop(state);

        debug!("Connection {} deregistered ({} rooms)", id, held.len());
        Some(conn)
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.connections.read().await.len()
    }

    /// Queues `payload` once for every connection in the union of `rooms`.
    /// A closed outbox means the socket is mid-disconnect; that send is
    /// counted as dropped and otherwise ignored.
    pub async fn deliver(&self, rooms: &[RoomKey], payload: Arc<str>) -> Delivery {
        let connections = self.inner.connections.read().await;

        let targets: HashSet<Uuid> = if rooms.contains(&RoomKey::Global) {
            connections.keys().copied().collect()
        } else {
            let room_map = self.inner.rooms.read().await;
            rooms
                .iter()
                .filter_map(|room| room_map.get(room))
                .flatten()
                .copied()
                .collect()
        };

        let mut delivery = Delivery::default();
        for id in targets {
            match connections.get(&id) {
                Some(conn) if conn.tx.send(payload.clone()).is_ok() => delivery.sent += 1,
                _ => delivery.dropped += 1,
            }
        }
        delivery
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_and_members() {
        let registry = ConnectionRegistry::new();
        let a = registry.register().await;
        let b = registry.register().await;

        assert!(registry.join(a.id, RoomKey::Project(7)).await);
        assert!(registry.join(b.id, RoomKey::Project(8)).await);

        let members = registry.members_of(RoomKey::Project(7)).await;
        assert_eq!(members, HashSet::from([a.id]));
        assert_eq!(registry.members_of(RoomKey::Global).await.len(), 2);
        assert!(registry.members_of(RoomKey::Issue(1)).await.is_empty());
    }

    #[tokio::test]
    async fn deregister_clears_every_room() {
        let registry = ConnectionRegistry::new();
        let a = registry.register().await;
        for room in [RoomKey::Project(1), RoomKey::Issue(2), RoomKey::User(3)] {
            registry.join(a.id, room).await;
        }

        registry.deregister(a.id).await;

        for room in [RoomKey::Project(1), RoomKey::Issue(2), RoomKey::User(3), RoomKey::Global] {
            assert!(registry.members_of(room).await.is_empty(), "ghost member in {}", room);
        }
        assert!(registry.rooms_of(a.id).await.is_empty());
        assert!(!registry.join(a.id, RoomKey::Project(1)).await);
    }

    #[tokio::test]
    async fn leave_only_affects_one_room() {
        let registry = ConnectionRegistry::new();
        let a = registry.register().await;
        registry.join(a.id, RoomKey::Project(1)).await;
        registry.join(a.id, RoomKey::Issue(2)).await;

        assert!(registry.leave(a.id, RoomKey::Issue(2)).await);
        assert!(!registry.leave(a.id, RoomKey::Issue(2)).await);
        assert_eq!(registry.rooms_of(a.id).await, HashSet::from([RoomKey::Project(1)]));
    }

    #[tokio::test]
    async fn deliver_dedups_across_rooms() {
        let registry = ConnectionRegistry::new();
        let mut a = registry.register().await;
        registry.join(a.id, RoomKey::Project(1)).await;
        registry.join(a.id, RoomKey::Issue(2)).await;

        let delivery = registry
            .deliver(&[RoomKey::Project(1), RoomKey::Issue(2)], Arc::from("x"))
            .await;
        assert_eq!(delivery, Delivery { sent: 1, dropped: 0 });
        assert_eq!(&*a.rx.try_recv().unwrap(), "x");
        assert!(a.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_outbox_counts_as_dropped() {
        let registry = ConnectionRegistry::new();
        let a = registry.register().await;
        registry.join(a.id, RoomKey::Project(1)).await;
        let ConnectionHandle { rx, .. } = a;
        drop(rx);

        let delivery = registry.deliver(&[RoomKey::Project(1)], Arc::from("x")).await;
        assert_eq!(delivery, Delivery { sent: 0, dropped: 1 });
    }

    #[tokio::test]
    async fn concurrent_joins_do_not_lose_members() {
        let registry = ConnectionRegistry::new();
        let mut tasks = Vec::new();
        for _ in 0..32 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let handle = registry.register().await;
                registry.join(handle.id, RoomKey::Project(5)).await;
                handle.id
            }));
        }
        let mut ids = HashSet::new();
        for task in tasks {
            ids.insert(task.await.unwrap());
        }

        assert_eq!(registry.members_of(RoomKey::Project(5)).await, ids);
    }

    #[tokio::test]
    async fn authenticate_binds_user() {
        let registry = ConnectionRegistry::new();
        let a = registry.register().await;
        assert_eq!(registry.user_of(a.id).await, None);
        assert!(registry.authenticate(a.id, 9).await);
        assert_eq!(registry.user_of(a.id).await, Some(9));
    }

    #[tokio::test]
    async fn evict_removes_only_that_users_connections() {
        let registry = ConnectionRegistry::new();
        let mut dev_phone = registry.register().await;
        let mut dev_laptop = registry.register().await;
        let lead = registry.register().await;
        for (conn, user) in [(&dev_phone, 2), (&dev_laptop, 2), (&lead, 1)] {
            registry.authenticate(conn.id, user).await;
            registry.join(conn.id, RoomKey::Project(1)).await;
        }
        registry.join(dev_phone.id, RoomKey::Issue(4)).await;

        assert_eq!(
            registry.rooms_of_user(2).await,
            HashSet::from([RoomKey::Project(1), RoomKey::Issue(4)])
        );
        assert_eq!(registry.evict_user(2, RoomKey::Project(1)).await, 2);
        assert_eq!(registry.evict_user(2, RoomKey::Project(1)).await, 0);

        assert_eq!(registry.members_of(RoomKey::Project(1)).await, HashSet::from([lead.id]));
        assert_eq!(registry.rooms_of(dev_phone.id).await, HashSet::from([RoomKey::Issue(4)]));

        let left = r#"{"type":"left","data":{"room":"project:1"}}"#;
        assert_eq!(&*dev_phone.rx.try_recv().unwrap(), left);
        assert_eq!(&*dev_laptop.rx.try_recv().unwrap(), left);

        let delivery = registry.deliver(&[RoomKey::Project(1)], Arc::from("x")).await;
        assert_eq!(delivery.sent, 1);
        assert!(dev_phone.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_user_closes_every_socket_of_that_user() {
        let registry = ConnectionRegistry::new();
        let a = registry.register().await;
        let b = registry.register().await;
        let other = registry.register().await;
        registry.authenticate(a.id, 5).await;
        registry.authenticate(b.id, 5).await;
        registry.authenticate(other.id, 6).await;
        registry.join(a.id, RoomKey::Project(1)).await;
        registry.join(b.id, RoomKey::User(5)).await;

        assert_eq!(registry.disconnect_user(5).await, 2);

        assert_eq!(registry.connection_count().await, 1);
        assert!(registry.members_of(RoomKey::Project(1)).await.is_empty());
        assert!(registry.members_of(RoomKey::User(5)).await.is_empty());
        assert!(!registry.join(a.id, RoomKey::Project(1)).await);
        assert!(!registry.authenticate(b.id, 5).await);

        // Permit is stored, so a later wait returns at once
        tokio::time::timeout(std::time::Duration::from_secs(1), a.closed.notified())
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn join_racing_deregister_leaves_no_ghosts() {
        let registry = ConnectionRegistry::new();
        let mut tasks = Vec::new();
        for i in 0..64 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let id = registry.register().await.id;
                let joiner = {
                    let registry = registry.clone();
                    tokio::spawn(async move {
                        for room in [RoomKey::Project(i % 4), RoomKey::Issue(i)] {
                            registry.join(id, room).await;
                        }
                    })
                };
                registry.deregister(id).await;
                joiner.await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(registry.connection_count().await, 0);
        for room in (0..4).map(RoomKey::Project).chain((0..64).map(RoomKey::Issue)) {
            assert!(registry.members_of(room).await.is_empty(), "ghost member in {}", room);
        }
    }
}

