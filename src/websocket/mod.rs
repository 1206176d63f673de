use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

pub mod events;
pub mod pubsub;
pub mod session;

/// Unique identifier of one live socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Connection {
    id: ConnectionId,
    sender: UnboundedSender<String>,
}

/// Outcome of pushing one payload to every socket of one user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserDelivery {
    pub delivered: usize,
    pub failed: usize,
}

/// Live sockets per user.
///
/// A user may hold several connections (devices, tabs); each gets its own
/// unbounded queue drained by the session actor, so pushing never blocks.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    // user_id -> live connections
    inner: Arc<RwLock<HashMap<Uuid, Vec<Connection>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new socket for `user_id` and hand back its receiving end.
    pub async fn add_connection(&self, user_id: Uuid) -> (ConnectionId, UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        let connection_id = ConnectionId::new();

        let mut guard = self.inner.write().await;
        guard.entry(user_id).or_default().push(Connection {
            id: connection_id,
            sender: tx,
        });

        tracing::debug!(
            user_id = %user_id,
            connection_id = %connection_id,
            connections = guard.get(&user_id).map(|v| v.len()).unwrap_or(0),
            "connection registered"
        );

        (connection_id, rx)
    }

    /// Drop one socket. Returns true when it was the user's last one.
    pub async fn remove_connection(&self, user_id: Uuid, connection_id: ConnectionId) -> bool {
        let mut guard = self.inner.write().await;
        let Some(connections) = guard.get_mut(&user_id) else {
            return true;
        };
        connections.retain(|c| c.id != connection_id);
        if connections.is_empty() {
            guard.remove(&user_id);
            tracing::debug!(user_id = %user_id, "last connection removed");
            return true;
        }
        false
    }

    /// Push `payload` to every socket of `user_id`; dead senders are dropped.
    pub async fn send_to_user(&self, user_id: Uuid, payload: &str) -> UserDelivery {
        let mut guard = self.inner.write().await;
        let Some(connections) = guard.get_mut(&user_id) else {
            return UserDelivery::default();
        };

        let before = connections.len();
        connections.retain(|c| c.sender.send(payload.to_string()).is_ok());
        let delivered = connections.len();

        if delivered != before {
            tracing::warn!(
                user_id = %user_id,
                dead = before - delivered,
                "unregistered closed connections during push"
            );
        }
        if connections.is_empty() {
            guard.remove(&user_id);
        }

        UserDelivery {
            delivered,
            failed: before - delivered,
        }
    }

    pub async fn is_connected(&self, user_id: Uuid) -> bool {
        self.inner.read().await.contains_key(&user_id)
    }

    pub async fn connection_count(&self, user_id: Uuid) -> usize {
        let guard = self.inner.read().await;
        guard.get(&user_id).map(|v| v.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_push_reaches_every_device() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (_, mut phone) = registry.add_connection(user).await;
        let (_, mut laptop) = registry.add_connection(user).await;

        let outcome = registry.send_to_user(user, "hello").await;
        assert_eq!(outcome.delivered, 2);
        assert_eq!(phone.recv().await.as_deref(), Some("hello"));
        assert_eq!(laptop.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_dead_connection_is_unregistered() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (_, live) = registry.add_connection(user).await;
        let (_, dead) = registry.add_connection(user).await;
        drop(dead);

        let outcome = registry.send_to_user(user, "x").await;
        assert_eq!(outcome, UserDelivery { delivered: 1, failed: 1 });
        assert_eq!(registry.connection_count(user).await, 1);
        drop(live);
    }

    #[tokio::test]
    async fn test_remove_reports_last_connection() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (first, _rx1) = registry.add_connection(user).await;
        let (second, _rx2) = registry.add_connection(user).await;

        assert!(!registry.remove_connection(user, first).await);
        assert!(registry.is_connected(user).await);
        assert!(registry.remove_connection(user, second).await);
        assert!(!registry.is_connected(user).await);
    }
}
