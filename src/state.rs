use crate::{
    config::Config,
    middleware::JwtAuth,
    repository::{ConversationRepository, MemoryStore, MessageRepository, PgStore},
    services::{ConversationService, FanoutService, MessageService, PresenceTracker},
    websocket::{pubsub::RelayPublisher, ConnectionRegistry},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: JwtAuth,
    pub registry: ConnectionRegistry,
    pub fanout: Arc<FanoutService>,
    pub presence: Arc<PresenceTracker>,
    pub conversations: Arc<ConversationService>,
    pub messages: Arc<MessageService>,
}

impl AppState {
    /// Wire services over the given repositories.
    pub fn build(
        config: Config,
        conversation_repo: Arc<dyn ConversationRepository>,
        message_repo: Arc<dyn MessageRepository>,
        relay: Option<RelayPublisher>,
    ) -> Self {
        let registry = ConnectionRegistry::new();
        let mut fanout = FanoutService::new(conversation_repo.clone(), registry.clone());
        if let Some(relay) = relay {
            fanout = fanout.with_relay(relay);
        }
        let fanout = Arc::new(fanout);

        let conversations = Arc::new(ConversationService::new(
            conversation_repo.clone(),
            fanout.clone(),
        ));
        let messages = Arc::new(MessageService::new(
            conversation_repo.clone(),
            message_repo,
            conversations.clone(),
            fanout.clone(),
            config.sync_page_limit,
        ));
        let presence = Arc::new(PresenceTracker::new(conversation_repo, fanout.clone()));

        Self {
            auth: JwtAuth::new(&config.jwt_secret),
            config: Arc::new(config),
            registry,
            fanout,
            presence,
            conversations,
            messages,
        }
    }

    /// Single-node state backed by the in-memory store
    pub fn in_memory(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::build(config, store.clone(), store, None)
    }

    pub fn postgres(config: Config, store: PgStore, relay: Option<RelayPublisher>) -> Self {
        let store = Arc::new(store);
        Self::build(config, store.clone(), store, relay)
    }
}
