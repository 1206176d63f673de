//! Cross-instance relay over Redis pub/sub.
//!
//! Each instance pushes to its own sockets first, then publishes the same
//! payload with the target user list. Peers deliver it to whichever of those
//! users are connected locally and ignore envelopes they published themselves.

use crate::websocket::ConnectionRegistry;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use uuid::Uuid;

const CHANNEL_PREFIX: &str = "delivery:";
const CONVERSATION_PATTERN: &str = "delivery:*";

pub fn channel_for_conversation(id: Uuid) -> String {
    format!("{CHANNEL_PREFIX}conversation:{id}")
}

pub fn channel_for_users() -> String {
    format!("{CHANNEL_PREFIX}users")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    pub origin: String,
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
    pub targets: Vec<Uuid>,
    pub payload: String,
}

/// Ordered, non-blocking handle onto a single publisher task
#[derive(Clone)]
pub struct RelayPublisher {
    instance_id: String,
    tx: UnboundedSender<RelayEnvelope>,
}

impl RelayPublisher {
    /// Spawn the publisher task. Envelopes are published in enqueue order.
    pub fn spawn(client: Client, instance_id: String) -> Self {
        let (tx, mut rx) = unbounded_channel::<RelayEnvelope>();

        tokio::spawn(async move {
            let mut manager: Option<ConnectionManager> = None;
            while let Some(envelope) = rx.recv().await {
                if manager.is_none() {
                    match ConnectionManager::new(client.clone()).await {
                        Ok(m) => manager = Some(m),
                        Err(e) => {
                            tracing::warn!(error = %e, "relay connection unavailable, dropping event");
                            continue;
                        }
                    }
                }
                let Some(conn) = manager.as_mut() else {
                    continue;
                };

                let channel = envelope
                    .conversation_id
                    .map(channel_for_conversation)
                    .unwrap_or_else(channel_for_users);
                let body = match serde_json::to_string(&envelope) {
                    Ok(body) => body,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to encode relay envelope");
                        continue;
                    }
                };
                if let Err(e) = conn.publish::<_, _, ()>(channel, body).await {
                    tracing::warn!(error = %e, "relay publish failed");
                }
            }
            tracing::debug!("relay publisher stopped");
        });

        Self { instance_id, tx }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn publish(&self, conversation_id: Option<Uuid>, targets: Vec<Uuid>, payload: String) {
        let envelope = RelayEnvelope {
            origin: self.instance_id.clone(),
            conversation_id,
            targets,
            payload,
        };
        if self.tx.send(envelope).is_err() {
            tracing::warn!("relay publisher is gone");
        }
    }
}

/// Deliver a peer's envelope to local sockets; returns connections reached.
pub async fn deliver_envelope(
    registry: &ConnectionRegistry,
    instance_id: &str,
    envelope: &RelayEnvelope,
) -> usize {
    if envelope.origin == instance_id {
        return 0;
    }
    let mut delivered = 0;
    for user_id in &envelope.targets {
        delivered += registry.send_to_user(*user_id, &envelope.payload).await.delivered;
    }
    delivered
}

pub async fn start_relay_listener(
    client: Client,
    instance_id: String,
    registry: ConnectionRegistry,
) -> redis::RedisResult<()> {
    // PubSub requires a dedicated connection, not multiplexed
    #[allow(deprecated)]
    let conn = client.get_async_connection().await?;
    let mut pubsub = conn.into_pubsub();
    pubsub.psubscribe(CONVERSATION_PATTERN).await?;
    let mut stream = pubsub.on_message();

    tracing::info!(instance_id = %instance_id, "relay listener subscribed");

    while let Some(msg) = stream.next().await {
        let payload: String = match msg.get_payload() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "unreadable relay payload");
                continue;
            }
        };
        match serde_json::from_str::<RelayEnvelope>(&payload) {
            Ok(envelope) => {
                deliver_envelope(&registry, &instance_id, &envelope).await;
            }
            Err(e) => tracing::warn!(error = %e, "malformed relay envelope"),
        }
    }
    Ok(())
}
