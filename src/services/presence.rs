use crate::repository::ConversationRepository;
use crate::services::fanout::FanoutService;
use crate::websocket::events::{PresenceStatus, ServerEvent};
use crate::websocket::ConnectionId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Default)]
struct PresenceState {
    by_user: HashMap<Uuid, HashSet<ConnectionId>>,
    last_seen: HashMap<ConnectionId, (Uuid, Instant)>,
}

/// Reference-counted online status.
///
/// A user is online while at least one connection is registered. Contacts
/// hear about the offline/online edge only, never about extra devices.
pub struct PresenceTracker {
    conversations: Arc<dyn ConversationRepository>,
    fanout: Arc<FanoutService>,
    // held across the broadcast so transitions reach contacts in order
    state: Mutex<PresenceState>,
}

impl PresenceTracker {
    pub fn new(conversations: Arc<dyn ConversationRepository>, fanout: Arc<FanoutService>) -> Self {
        Self {
            conversations,
            fanout,
            state: Mutex::new(PresenceState::default()),
        }
    }

    /// Returns true when the user just came online.
    pub async fn on_connect(&self, user_id: Uuid, connection_id: ConnectionId) -> bool {
        let mut state = self.state.lock().await;
        state
            .last_seen
            .insert(connection_id, (user_id, Instant::now()));
        let connections = state.by_user.entry(user_id).or_default();
        let came_online = connections.is_empty();
        connections.insert(connection_id);

        if came_online {
            tracing::info!(user_id = %user_id, "user online");
            self.broadcast(user_id, PresenceStatus::Online).await;
        }
        came_online
    }

    /// Returns true when the user just went offline.
    pub async fn on_disconnect(&self, user_id: Uuid, connection_id: ConnectionId) -> bool {
        let mut state = self.state.lock().await;
        let went_offline = Self::detach(&mut state, user_id, connection_id);
        if went_offline {
            tracing::info!(user_id = %user_id, "user offline");
            self.broadcast(user_id, PresenceStatus::Offline).await;
        }
        went_offline
    }

    /// Heartbeat from a connection
    pub async fn touch(&self, connection_id: ConnectionId) {
        let mut state = self.state.lock().await;
        if let Some((_, seen)) = state.last_seen.get_mut(&connection_id) {
            *seen = Instant::now();
        }
    }

    /// Disconnect every connection silent for at least `timeout`.
    pub async fn expire_stale(&self, timeout: Duration) -> Vec<(Uuid, ConnectionId)> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let stale: Vec<(Uuid, ConnectionId)> = state
            .last_seen
            .iter()
            .filter(|(_, (_, seen))| now.duration_since(*seen) >= timeout)
            .map(|(conn, (user, _))| (*user, *conn))
            .collect();

        for (user_id, connection_id) in &stale {
            tracing::warn!(
                user_id = %user_id,
                connection_id = %connection_id,
                "heartbeat timed out"
            );
            self.fanout
                .registry()
                .remove_connection(*user_id, *connection_id)
                .await;
            if Self::detach(&mut state, *user_id, *connection_id) {
                self.broadcast(*user_id, PresenceStatus::Offline).await;
            }
        }
        stale
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.state.lock().await.by_user.contains_key(&user_id)
    }

    pub async fn online_users(&self) -> Vec<Uuid> {
        let mut users: Vec<Uuid> = self.state.lock().await.by_user.keys().copied().collect();
        users.sort();
        users
    }

    fn detach(state: &mut PresenceState, user_id: Uuid, connection_id: ConnectionId) -> bool {
        state.last_seen.remove(&connection_id);
        let Some(connections) = state.by_user.get_mut(&user_id) else {
            return false;
        };
        if !connections.remove(&connection_id) {
            return false;
        }
        if connections.is_empty() {
            state.by_user.remove(&user_id);
            return true;
        }
        false
    }

    async fn broadcast(&self, user_id: Uuid, status: PresenceStatus) {
        let contacts = match self.conversations.contacts_of(user_id).await {
            Ok(contacts) => contacts,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "presence contacts lookup failed");
                return;
            }
        };
        let event = ServerEvent::PresenceChanged { user_id, status };
        self.fanout.notify_users(&contacts, &event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Conversation;
    use crate::repository::MemoryStore;
    use crate::websocket::ConnectionRegistry;
    use chrono::Utc;

    struct Harness {
        tracker: PresenceTracker,
        registry: ConnectionRegistry,
        alice: Uuid,
        bob: Uuid,
    }

    async fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let (conv, members) = Conversation::new_direct(alice, bob, Utc::now()).unwrap();
        store.insert_direct(conv, members).await.unwrap();

        let registry = ConnectionRegistry::new();
        let fanout = Arc::new(FanoutService::new(store.clone(), registry.clone()));
        Harness {
            tracker: PresenceTracker::new(store, fanout),
            registry,
            alice,
            bob,
        }
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn test_second_device_does_not_rebroadcast() {
        let h = harness().await;
        let (_, mut bob_rx) = h.registry.add_connection(h.bob).await;

        assert!(h.tracker.on_connect(h.alice, ConnectionId::new()).await);
        assert!(!h.tracker.on_connect(h.alice, ConnectionId::new()).await);

        let frames = drain(&mut bob_rx);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains("\"online\""));
    }

    #[tokio::test]
    async fn test_offline_only_after_last_connection() {
        let h = harness().await;
        let (_, mut bob_rx) = h.registry.add_connection(h.bob).await;
        let phone = ConnectionId::new();
        let laptop = ConnectionId::new();

        h.tracker.on_connect(h.alice, phone).await;
        h.tracker.on_connect(h.alice, laptop).await;
        drain(&mut bob_rx);

        assert!(!h.tracker.on_disconnect(h.alice, phone).await);
        assert!(h.tracker.is_online(h.alice).await);
        assert!(drain(&mut bob_rx).is_empty());

        assert!(h.tracker.on_disconnect(h.alice, laptop).await);
        assert!(!h.tracker.is_online(h.alice).await);
        let frames = drain(&mut bob_rx);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains("\"offline\""));

        // unknown connection is ignored
        assert!(!h.tracker.on_disconnect(h.alice, laptop).await);
    }

    #[tokio::test]
    async fn test_expire_stale_disconnects_silent_connections() {
        let h = harness().await;
        let (conn, _rx) = h.registry.add_connection(h.alice).await;
        h.tracker.on_connect(h.alice, conn).await;

        assert!(h.tracker.expire_stale(Duration::from_secs(3600)).await.is_empty());
        let expired = h.tracker.expire_stale(Duration::ZERO).await;
        assert_eq!(expired, vec![(h.alice, conn)]);
        assert!(!h.tracker.is_online(h.alice).await);
        assert!(!h.registry.is_connected(h.alice).await);
        assert!(h.tracker.online_users().await.is_empty());
    }
}
