//! Socket event contract.
//!
//! Every frame is a JSON object tagged by `"event"`, e.g.
//!
//! ```json
//! { "event": "messages_read", "conversation_id": "…", "user_id": "…",
//!   "read_at": "2024-05-01T10:00:00Z", "up_to_message_id": "…" }
//! ```

use crate::models::{MemberRole, Message, MessageContent, MessageView, ReactionEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Server -> client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    ReceiveMessage {
        conversation_id: Uuid,
        message: MessageView,
    },
    MessageDelivered {
        message_id: Uuid,
        conversation_id: Uuid,
        user_id: Uuid,
        delivered_at: DateTime<Utc>,
    },
    MessagesRead {
        conversation_id: Uuid,
        user_id: Uuid,
        read_at: DateTime<Utc>,
        up_to_message_id: Uuid,
    },
    UserTyping {
        user_id: Uuid,
        conversation_id: Uuid,
    },
    UserStopTyping {
        user_id: Uuid,
        conversation_id: Uuid,
    },
    PresenceChanged {
        user_id: Uuid,
        status: PresenceStatus,
    },
    MessageEdited {
        conversation_id: Uuid,
        message: Message,
    },
    MessageDeleted {
        conversation_id: Uuid,
        message_id: Uuid,
        deleted_at: DateTime<Utc>,
    },
    ReactionUpdated {
        conversation_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
        active: bool,
        reactions: Vec<ReactionEntry>,
    },
    ParticipantAdded {
        conversation_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
        added_by: Uuid,
    },
    ParticipantRemoved {
        conversation_id: Uuid,
        user_id: Uuid,
        removed_by: Uuid,
    },
    /// Direct reply to a `sync` request
    SyncBatch {
        conversation_id: Uuid,
        messages: Vec<MessageView>,
        next_cursor: i64,
        has_more: bool,
    },
    /// Direct reply to a rejected client event
    Error { code: String, message: String },
    Pong,
}

impl ServerEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ReceiveMessage { .. } => "receive_message",
            Self::MessageDelivered { .. } => "message_delivered",
            Self::MessagesRead { .. } => "messages_read",
            Self::UserTyping { .. } => "user_typing",
            Self::UserStopTyping { .. } => "user_stop_typing",
            Self::PresenceChanged { .. } => "presence_changed",
            Self::MessageEdited { .. } => "message_edited",
            Self::MessageDeleted { .. } => "message_deleted",
            Self::ReactionUpdated { .. } => "reaction_updated",
            Self::ParticipantAdded { .. } => "participant_added",
            Self::ParticipantRemoved { .. } => "participant_removed",
            Self::SyncBatch { .. } => "sync_batch",
            Self::Error { .. } => "error",
            Self::Pong => "pong",
        }
    }

    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Client -> server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    Typing {
        conversation_id: Uuid,
    },
    StopTyping {
        conversation_id: Uuid,
    },
    SendMessage {
        conversation_id: Uuid,
        content: MessageContent,
        #[serde(default)]
        reply_to: Option<Uuid>,
        #[serde(default)]
        client_message_id: Option<String>,
    },
    MessageDelivered {
        message_id: Uuid,
    },
    MessagesRead {
        conversation_id: Uuid,
        up_to_message_id: Uuid,
    },
    Sync {
        conversation_id: Uuid,
        #[serde(default)]
        after_sequence: i64,
        #[serde(default)]
        limit: Option<usize>,
    },
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_events_are_tagged() {
        let user = Uuid::new_v4();
        let conv = Uuid::new_v4();
        let event = ServerEvent::UserTyping {
            user_id: user,
            conversation_id: conv,
        };
        let value: serde_json::Value =
            serde_json::from_str(&event.to_payload().unwrap()).unwrap();
        assert_eq!(value["event"], "user_typing");
        assert_eq!(value["user_id"], json!(user));
        assert_eq!(event.event_type(), "user_typing");

        let presence = ServerEvent::PresenceChanged {
            user_id: user,
            status: PresenceStatus::Offline,
        };
        let value = serde_json::to_value(&presence).unwrap();
        assert_eq!(value["status"], "offline");
    }

    #[test]
    fn test_inbound_send_message_parses() {
        let conv = Uuid::new_v4();
        let raw = json!({
            "event": "send_message",
            "conversation_id": conv,
            "content": { "text": "hi" },
            "client_message_id": "c-1"
        });
        let parsed: ClientEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(
            parsed,
            ClientEvent::SendMessage {
                conversation_id: conv,
                content: MessageContent::text("hi"),
                reply_to: None,
                client_message_id: Some("c-1".into()),
            }
        );

        let ping: ClientEvent = serde_json::from_str(r#"{"event":"ping"}"#).unwrap();
        assert_eq!(ping, ClientEvent::Ping);
    }

    #[test]
    fn test_unknown_inbound_event_is_rejected() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"explode"}"#).is_err());
    }
}
