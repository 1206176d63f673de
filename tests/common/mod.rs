//! Shared fixtures for the integration suites.
//!
//! Everything runs against the in-memory store; no external services needed.

#![allow(dead_code)]

use realtime_delivery_service::{
    config::Config,
    models::{Conversation, ConversationKind, MessageContent, MessageView},
    services::SendMessage,
    state::AppState,
};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

pub const TEST_SECRET: &str = "integration-test-secret";

pub fn test_config() -> Config {
    Config::from_lookup(|key| match key {
        "JWT_SECRET" => Some(TEST_SECRET.to_string()),
        "SYNC_PAGE_LIMIT" => Some("10".to_string()),
        _ => None,
    })
    .expect("test config")
}

pub fn test_state() -> AppState {
    AppState::in_memory(test_config())
}

/// Register a live socket for `user` and return its outbound queue.
pub async fn connect(state: &AppState, user: Uuid) -> UnboundedReceiver<String> {
    let (_id, rx) = state.registry.add_connection(user).await;
    rx
}

/// Everything queued so far, parsed.
pub fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(payload) = rx.try_recv() {
        out.push(serde_json::from_str(&payload).expect("event payload is json"));
    }
    out
}

pub fn of_type<'a>(events: &'a [Value], event: &str) -> Vec<&'a Value> {
    events.iter().filter(|e| e["event"] == event).collect()
}

pub async fn send_text(
    state: &AppState,
    conversation_id: Uuid,
    sender_id: Uuid,
    text: &str,
) -> MessageView {
    state
        .messages
        .send(SendMessage {
            conversation_id,
            sender_id,
            content: MessageContent::text(text),
            reply_to: None,
            client_message_id: None,
        })
        .await
        .expect("send")
}

/// Group with `admin` as creator and `members` as plain members.
pub async fn group(state: &AppState, admin: Uuid, members: &[Uuid]) -> Conversation {
    state
        .conversations
        .create_group(admin, ConversationKind::Group, "team", None, members)
        .await
        .expect("create group")
        .conversation
}

pub fn token_for(state: &AppState, user: Uuid) -> String {
    state.auth.issue(user, 3600).expect("issue token")
}
