use crate::repository::ConversationRepository;
use crate::websocket::events::ServerEvent;
use crate::websocket::pubsub::RelayPublisher;
use crate::websocket::ConnectionRegistry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Per-event delivery summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    /// Users the event was addressed to
    pub targets: usize,
    /// Connections that accepted the payload
    pub delivered: usize,
    /// Targets with no live connection on this instance
    pub offline: usize,
    /// Connections that were closed and have been unregistered
    pub failed: usize,
}

/// Pushes events to the live connections of conversation members.
///
/// Callers that need per-conversation ordering hold the conversation's
/// [`lane`](FanoutService::lane) across persist and notify; enqueueing onto a
/// connection never blocks, so a slow socket cannot stall the lane.
pub struct FanoutService {
    conversations: Arc<dyn ConversationRepository>,
    registry: ConnectionRegistry,
    relay: Option<RelayPublisher>,
    lanes: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl FanoutService {
    pub fn new(conversations: Arc<dyn ConversationRepository>, registry: ConnectionRegistry) -> Self {
        Self {
            conversations,
            registry,
            relay: None,
            lanes: DashMap::new(),
        }
    }

    pub fn with_relay(mut self, relay: RelayPublisher) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Serialize work on one conversation.
    pub async fn lane(&self, conversation_id: Uuid) -> OwnedMutexGuard<()> {
        let lane = self
            .lanes
            .entry(conversation_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lane.lock_owned().await
    }

    /// Send `event` to every active member except `actor_id`.
    pub async fn notify(
        &self,
        conversation_id: Uuid,
        actor_id: Option<Uuid>,
        event: &ServerEvent,
    ) -> FanoutReport {
        let members = match self.conversations.active_member_ids(conversation_id).await {
            Ok(members) => members,
            Err(e) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    event = event.event_type(),
                    error = %e,
                    "fan-out skipped, member lookup failed"
                );
                return FanoutReport::default();
            }
        };
        let targets: Vec<Uuid> = members
            .into_iter()
            .filter(|u| Some(*u) != actor_id)
            .collect();
        self.push(Some(conversation_id), targets, event).await
    }

    /// Send `event` to an explicit user list (presence, removed members).
    pub async fn notify_users(&self, user_ids: &[Uuid], event: &ServerEvent) -> FanoutReport {
        self.push(None, user_ids.to_vec(), event).await
    }

    async fn push(
        &self,
        conversation_id: Option<Uuid>,
        targets: Vec<Uuid>,
        event: &ServerEvent,
    ) -> FanoutReport {
        let mut report = FanoutReport {
            targets: targets.len(),
            ..Default::default()
        };
        if targets.is_empty() {
            return report;
        }

        let payload = match event.to_payload() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(event = event.event_type(), error = %e, "failed to encode event");
                return report;
            }
        };

        for user_id in &targets {
            let outcome = self.registry.send_to_user(*user_id, &payload).await;
            if outcome.delivered == 0 {
                report.offline += 1;
            }
            report.delivered += outcome.delivered;
            report.failed += outcome.failed;
        }

        if let Some(relay) = &self.relay {
            relay.publish(conversation_id, targets, payload);
        }

        tracing::debug!(
            event = event.event_type(),
            targets = report.targets,
            delivered = report.delivered,
            offline = report.offline,
            failed = report.failed,
            "fan-out complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Conversation, ConversationKind};
    use crate::repository::MemoryStore;
    use chrono::Utc;

    async fn group_of_three() -> (Arc<MemoryStore>, Uuid, [Uuid; 3]) {
        let store = Arc::new(MemoryStore::new());
        let users = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let (conv, members) = Conversation::new_group(
            ConversationKind::Group,
            users[0],
            "trio",
            None,
            &users[1..],
            Utc::now(),
        )
        .unwrap();
        let conv = ConversationRepository::insert(store.as_ref(), conv, members)
            .await
            .unwrap();
        (store, conv.id, users)
    }

    #[tokio::test]
    async fn test_notify_skips_actor_and_counts_offline() {
        let (store, conv, [a, b, _c]) = group_of_three().await;
        let registry = ConnectionRegistry::new();
        let fanout = FanoutService::new(store, registry.clone());

        let (_, mut a_rx) = registry.add_connection(a).await;
        let (_, mut b_rx) = registry.add_connection(b).await;
        let (_, mut b_rx2) = registry.add_connection(b).await;

        let event = ServerEvent::UserTyping {
            user_id: a,
            conversation_id: conv,
        };
        let report = fanout.notify(conv, Some(a), &event).await;

        assert_eq!(
            report,
            FanoutReport {
                targets: 2,
                delivered: 2,
                offline: 1,
                failed: 0
            }
        );
        assert!(b_rx.recv().await.is_some());
        assert!(b_rx2.recv().await.is_some());
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_connection_does_not_block_others() {
        let (store, conv, [a, b, c]) = group_of_three().await;
        let registry = ConnectionRegistry::new();
        let fanout = FanoutService::new(store, registry.clone());

        let (_, dead) = registry.add_connection(b).await;
        drop(dead);
        let (_, mut c_rx) = registry.add_connection(c).await;

        let report = fanout
            .notify(conv, Some(a), &ServerEvent::Pong)
            .await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered, 1);
        assert!(c_rx.recv().await.is_some());
        assert!(!registry.is_connected(b).await);
    }

    #[tokio::test]
    async fn test_lane_serializes_holders() {
        let (store, conv, _) = group_of_three().await;
        let fanout = Arc::new(FanoutService::new(store, ConnectionRegistry::new()));

        let guard = fanout.lane(conv).await;
        let contender = {
            let fanout = fanout.clone();
            tokio::spawn(async move {
                let _g = fanout.lane(conv).await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!contender.is_finished());
        drop(guard);
        contender.await.unwrap();
    }
}
