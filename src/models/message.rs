use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const MAX_TEXT_CHARS: usize = 4000;
pub const MAX_EMOJI_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    File,
}

impl MessageType {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "file" => Some(Self::File),
            _ => None,
        }
    }

    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
        }
    }
}

/// Reference to an uploaded file; storage itself is owned elsewhere
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            attachment: None,
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        let text = self.text.as_deref().map(str::trim).filter(|t| !t.is_empty());
        if text.is_none() && self.attachment.is_none() {
            return Err(AppError::Validation(
                "message must carry text or an attachment".into(),
            ));
        }
        if let Some(text) = text {
            if text.chars().count() > MAX_TEXT_CHARS {
                return Err(AppError::Validation(format!(
                    "message text exceeds {MAX_TEXT_CHARS} characters"
                )));
            }
        }
        if let Some(attachment) = &self.attachment {
            if attachment.url.trim().is_empty() {
                return Err(AppError::Validation("attachment url is required".into()));
            }
            if attachment.size_bytes < 0 {
                return Err(AppError::Validation("attachment size is negative".into()));
            }
        }
        Ok(())
    }

    pub fn message_type(&self) -> MessageType {
        match &self.attachment {
            Some(a) if a.mime_type.starts_with("image/") => MessageType::Image,
            Some(_) => MessageType::File,
            None => MessageType::Text,
        }
    }

    /// Text used for list previews and reply quotes
    pub fn summary(&self) -> String {
        match (&self.text, &self.attachment) {
            (Some(text), _) if !text.trim().is_empty() => text.trim().to_string(),
            (_, Some(attachment)) => attachment.file_name.clone(),
            _ => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    /// Acceptance order within the conversation, starts at 1
    pub sequence_number: i64,
    pub content: MessageContent,
    pub message_type: MessageType,
    pub reply_to: Option<Uuid>,
    pub client_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub is_edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted_for_everyone: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_tombstoned(&self) -> bool {
        self.deleted_for_everyone
    }

    /// Suppress content while keeping the record for reply/receipt integrity
    pub fn tombstone(&mut self, at: DateTime<Utc>) -> bool {
        if self.deleted_for_everyone {
            return false;
        }
        self.deleted_for_everyone = true;
        self.deleted_at = Some(at);
        self.content = MessageContent::default();
        true
    }

    pub fn apply_edit(&mut self, content: MessageContent, at: DateTime<Utc>) {
        self.message_type = content.message_type();
        self.content = content;
        self.is_edited = true;
        self.edited_at = Some(at);
    }
}

/// A message accepted by the service but not yet sequenced
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: MessageContent,
    pub reply_to: Option<Uuid>,
    pub client_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewMessage {
    pub fn into_message(self, sequence_number: i64) -> Message {
        Message {
            id: self.id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            sequence_number,
            message_type: self.content.message_type(),
            content: self.content,
            reply_to: self.reply_to,
            client_message_id: self.client_message_id,
            created_at: self.created_at,
            is_edited: false,
            edited_at: None,
            deleted_for_everyone: false,
            deleted_at: None,
        }
    }
}

/// Per-recipient delivery status; ordering follows the allowed transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Sent,
    Delivered,
    Read,
}

/// Delivery state of one message for one recipient.
///
/// Transitions only move forward (sent -> delivered -> read); reading an
/// undelivered message stamps both timestamps at once so that
/// `read_at >= delivered_at` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientState {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub status: ReceiptStatus,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
}

impl RecipientState {
    pub fn new(message_id: Uuid, user_id: Uuid) -> Self {
        Self {
            message_id,
            user_id,
            status: ReceiptStatus::Sent,
            delivered_at: None,
            read_at: None,
        }
    }

    pub fn from_timestamps(
        message_id: Uuid,
        user_id: Uuid,
        delivered_at: Option<DateTime<Utc>>,
        read_at: Option<DateTime<Utc>>,
    ) -> Self {
        let status = match (delivered_at, read_at) {
            (_, Some(_)) => ReceiptStatus::Read,
            (Some(_), None) => ReceiptStatus::Delivered,
            (None, None) => ReceiptStatus::Sent,
        };
        Self {
            message_id,
            user_id,
            status,
            delivered_at: delivered_at.or(read_at),
            read_at,
        }
    }

    /// Returns true when the state actually advanced
    pub fn mark_delivered(&mut self, at: DateTime<Utc>) -> bool {
        if self.status >= ReceiptStatus::Delivered {
            return false;
        }
        self.status = ReceiptStatus::Delivered;
        self.delivered_at = Some(at);
        true
    }

    /// Returns true when the state actually advanced
    pub fn mark_read(&mut self, at: DateTime<Utc>) -> bool {
        if self.status == ReceiptStatus::Read {
            return false;
        }
        let delivered_at = *self.delivered_at.get_or_insert(at);
        self.status = ReceiptStatus::Read;
        self.read_at = Some(at.max(delivered_at));
        true
    }
}

/// All emojis one user holds on a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionEntry {
    pub user_id: Uuid,
    pub emojis: Vec<String>,
}

/// Fold `(user_id, emoji)` rows into one entry per user, ordered by user id
pub fn group_reactions<I>(rows: I) -> Vec<ReactionEntry>
where
    I: IntoIterator<Item = (Uuid, String)>,
{
    let mut by_user: BTreeMap<Uuid, Vec<String>> = BTreeMap::new();
    for (user_id, emoji) in rows {
        let emojis = by_user.entry(user_id).or_default();
        if !emojis.contains(&emoji) {
            emojis.push(emoji);
        }
    }
    by_user
        .into_iter()
        .map(|(user_id, emojis)| ReactionEntry { user_id, emojis })
        .collect()
}

pub fn validate_emoji(emoji: &str) -> AppResult<()> {
    if emoji.trim().is_empty() || emoji.len() > MAX_EMOJI_BYTES {
        return Err(AppError::Validation("invalid emoji".into()));
    }
    Ok(())
}

/// Quoted message rendered alongside a reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ReplyPreview {
    Available {
        message_id: Uuid,
        sender_id: Uuid,
        content: String,
        message_type: MessageType,
    },
    /// The original was deleted for everyone or cannot be resolved
    Unavailable { message_id: Uuid },
}

impl ReplyPreview {
    pub fn resolve(reply_to: Uuid, target: Option<&Message>) -> Self {
        match target {
            Some(m) if !m.is_tombstoned() => ReplyPreview::Available {
                message_id: m.id,
                sender_id: m.sender_id,
                content: m.content.summary(),
                message_type: m.message_type,
            },
            _ => ReplyPreview::Unavailable {
                message_id: reply_to,
            },
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, ReplyPreview::Available { .. })
    }
}

/// Message as rendered to one viewer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageView {
    #[serde(flatten)]
    pub message: Message,
    pub recipients: Vec<RecipientState>,
    pub reactions: Vec<ReactionEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_preview: Option<ReplyPreview>,
}

impl MessageView {
    pub fn recipient(&self, user_id: Uuid) -> Option<&RecipientState> {
        self.recipients.iter().find(|r| r.user_id == user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(sender: Uuid) -> Message {
        NewMessage {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            sender_id: sender,
            content: MessageContent::text("hi"),
            reply_to: None,
            client_message_id: None,
            created_at: Utc::now(),
        }
        .into_message(1)
    }

    #[test]
    fn test_content_requires_text_or_attachment() {
        assert!(MessageContent::default().validate().is_err());
        assert!(MessageContent::text("   ").validate().is_err());
        assert!(MessageContent::text("hello").validate().is_ok());

        let file_only = MessageContent {
            text: None,
            attachment: Some(Attachment {
                url: "https://cdn/x.png".into(),
                file_name: "x.png".into(),
                mime_type: "image/png".into(),
                size_bytes: 10,
            }),
        };
        assert!(file_only.validate().is_ok());
        assert_eq!(file_only.message_type(), MessageType::Image);
        assert_eq!(file_only.summary(), "x.png");
    }

    #[test]
    fn test_content_rejects_oversized_text() {
        let long = "a".repeat(MAX_TEXT_CHARS + 1);
        assert!(MessageContent::text(long).validate().is_err());
    }

    #[test]
    fn test_receipt_read_implies_delivered() {
        let mut r = RecipientState::new(Uuid::new_v4(), Uuid::new_v4());
        let at = Utc::now();
        assert!(r.mark_read(at));
        assert_eq!(r.status, ReceiptStatus::Read);
        assert_eq!(r.delivered_at, Some(at));
        assert_eq!(r.read_at, Some(at));
    }

    #[test]
    fn test_receipt_never_regresses() {
        let mut r = RecipientState::new(Uuid::new_v4(), Uuid::new_v4());
        let t0 = Utc::now();
        assert!(r.mark_delivered(t0));
        assert!(!r.mark_delivered(t0 + Duration::seconds(1)));
        assert_eq!(r.delivered_at, Some(t0));

        assert!(r.mark_read(t0 + Duration::seconds(2)));
        assert!(!r.mark_delivered(t0 + Duration::seconds(3)));
        assert!(!r.mark_read(t0 + Duration::seconds(4)));
        assert_eq!(r.status, ReceiptStatus::Read);
        assert_eq!(r.read_at, Some(t0 + Duration::seconds(2)));
    }

    #[test]
    fn test_stale_read_timestamp_is_clamped_to_delivery() {
        let mut r = RecipientState::new(Uuid::new_v4(), Uuid::new_v4());
        let t0 = Utc::now();
        r.mark_delivered(t0);
        r.mark_read(t0 - Duration::seconds(10));
        assert!(r.read_at >= r.delivered_at);
    }

    #[test]
    fn test_from_timestamps_repairs_missing_delivery() {
        let at = Utc::now();
        let r = RecipientState::from_timestamps(Uuid::new_v4(), Uuid::new_v4(), None, Some(at));
        assert_eq!(r.status, ReceiptStatus::Read);
        assert_eq!(r.delivered_at, Some(at));
    }

    #[test]
    fn test_group_reactions_per_user() {
        let a = Uuid::from_u128(1);
        let b = Uuid::from_u128(2);
        let grouped = group_reactions(vec![
            (b, "🔥".to_string()),
            (a, "👍".to_string()),
            (a, "❤️".to_string()),
            (a, "👍".to_string()),
        ]);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].user_id, a);
        assert_eq!(grouped[0].emojis, vec!["👍".to_string(), "❤️".to_string()]);
        assert_eq!(grouped[1].emojis, vec!["🔥".to_string()]);
    }

    #[test]
    fn test_reply_to_tombstone_is_unavailable() {
        let sender = Uuid::new_v4();
        let mut original = sample(sender);
        assert!(ReplyPreview::resolve(original.id, Some(&original)).is_available());

        assert!(original.tombstone(Utc::now()));
        assert!(!original.tombstone(Utc::now()));
        assert_eq!(original.content, MessageContent::default());
        assert_eq!(
            ReplyPreview::resolve(original.id, Some(&original)),
            ReplyPreview::Unavailable {
                message_id: original.id
            }
        );
        assert!(!ReplyPreview::resolve(Uuid::new_v4(), None).is_available());
    }
}
