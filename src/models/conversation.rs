use super::member::{MemberRole, Membership};
use super::message::{Message, MessageType};
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

pub const PREVIEW_MAX_CHARS: usize = 100;
pub const MAX_NAME_CHARS: usize = 100;
pub const MAX_DESCRIPTION_CHARS: usize = 500;
pub const DELETED_PREVIEW: &str = "This message was deleted";

/// Namespace for deterministic direct-conversation identifiers
const DIRECT_NAMESPACE: Uuid = Uuid::from_u128(0x6b8f_2c1e_4d3a_5e9f_a1b2_c3d4_e5f6_0718);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
    Channel,
}

impl ConversationKind {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(Self::Direct),
            "group" => Some(Self::Group),
            "channel" => Some(Self::Channel),
            _ => None,
        }
    }

    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
            Self::Channel => "channel",
        }
    }
}

/// Sorted `(lo, hi)` pair for a direct conversation
pub fn direct_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Stable identifier for the unordered pair `{a, b}`
pub fn direct_conversation_id(a: Uuid, b: Uuid) -> Uuid {
    let (lo, hi) = direct_pair(a, b);
    Uuid::new_v5(&DIRECT_NAMESPACE, format!("{lo}:{hi}").as_bytes())
}

/// Denormalized preview of the newest message, for list rendering only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastMessagePreview {
    pub message_id: Uuid,
    pub content: String,
    pub message_type: MessageType,
    pub sender_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl LastMessagePreview {
    pub fn from_message(message: &Message) -> Self {
        let content = if message.is_tombstoned() {
            DELETED_PREVIEW.to_string()
        } else {
            truncate_chars(&message.content.summary(), PREVIEW_MAX_CHARS)
        };
        Self {
            message_id: message.id,
            content,
            message_type: message.message_type,
            sender_id: message.sender_id,
            created_at: message.created_at,
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub kind: ConversationKind,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Sorted pair for direct conversations, empty otherwise
    pub direct_participants: Vec<Uuid>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub last_message: Option<LastMessagePreview>,
    pub message_count: i64,
    /// Active members only
    pub member_count: i64,
    pub is_archived: bool,
    pub archived_at: Option<DateTime<Utc>>,
}

impl Conversation {
    /// Build a direct conversation and its two memberships.
    pub fn new_direct(
        user_a: Uuid,
        user_b: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<(Self, Vec<Membership>)> {
        if user_a == user_b {
            return Err(AppError::Validation(
                "a direct conversation needs two distinct users".into(),
            ));
        }
        let (lo, hi) = direct_pair(user_a, user_b);
        let id = direct_conversation_id(lo, hi);
        let conversation = Self {
            id,
            kind: ConversationKind::Direct,
            name: None,
            description: None,
            direct_participants: vec![lo, hi],
            created_by: user_a,
            created_at: now,
            last_activity: now,
            last_message: None,
            message_count: 0,
            member_count: 2,
            is_archived: false,
            archived_at: None,
        };
        let members = vec![
            Membership::new(id, lo, MemberRole::Member, now),
            Membership::new(id, hi, MemberRole::Member, now),
        ];
        Ok((conversation, members))
    }

    /// Build a group or channel; the creator becomes admin.
    pub fn new_group(
        kind: ConversationKind,
        creator: Uuid,
        name: &str,
        description: Option<String>,
        participants: &[Uuid],
        now: DateTime<Utc>,
    ) -> AppResult<(Self, Vec<Membership>)> {
        if kind == ConversationKind::Direct {
            return Err(AppError::Validation(
                "use a direct conversation for two users".into(),
            ));
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Validation("group name is required".into()));
        }
        if name.chars().count() > MAX_NAME_CHARS {
            return Err(AppError::Validation(format!(
                "group name exceeds {MAX_NAME_CHARS} characters"
            )));
        }
        let description = description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        if description
            .as_ref()
            .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_CHARS)
        {
            return Err(AppError::Validation(format!(
                "description exceeds {MAX_DESCRIPTION_CHARS} characters"
            )));
        }

        let others: BTreeSet<Uuid> = participants
            .iter()
            .copied()
            .filter(|p| *p != creator)
            .collect();
        if others.is_empty() {
            return Err(AppError::Validation(
                "a group needs at least two participants".into(),
            ));
        }

        let id = Uuid::new_v4();
        let mut members = Vec::with_capacity(others.len() + 1);
        members.push(Membership::new(id, creator, MemberRole::Admin, now));
        members.extend(
            others
                .into_iter()
                .map(|user_id| Membership::new(id, user_id, MemberRole::Member, now)),
        );

        let conversation = Self {
            id,
            kind,
            name: Some(name.to_string()),
            description,
            direct_participants: Vec::new(),
            created_by: creator,
            created_at: now,
            last_activity: now,
            last_message: None,
            message_count: 0,
            member_count: members.len() as i64,
            is_archived: false,
            archived_at: None,
        };
        Ok((conversation, members))
    }

    pub fn is_direct(&self) -> bool {
        self.kind == ConversationKind::Direct
    }
}

/// Query options for a user's conversation list
#[derive(Debug, Clone, Deserialize)]
pub struct ConversationFilter {
    #[serde(default)]
    pub kind: Option<ConversationKind>,
    #[serde(default)]
    pub include_archived: bool,
    #[serde(default = "ConversationFilter::default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub skip: usize,
}

impl ConversationFilter {
    pub const MAX_LIMIT: usize = 100;

    fn default_limit() -> usize {
        20
    }

    /// Clamp the page size into `1..=MAX_LIMIT`
    pub fn normalized(mut self) -> Self {
        self.limit = self.limit.clamp(1, Self::MAX_LIMIT);
        self
    }

    pub fn matches(&self, conversation: &Conversation) -> bool {
        (self.include_archived || !conversation.is_archived)
            && self.kind.map_or(true, |k| k == conversation.kind)
    }
}

impl Default for ConversationFilter {
    fn default() -> Self {
        Self {
            kind: None,
            include_archived: false,
            limit: Self::default_limit(),
            skip: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationWithMembers {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub members: Vec<Membership>,
}
