//! Storage seams for conversations and messages.
//!
//! Services receive these as `Arc<dyn ...>` so the same logic runs against
//! PostgreSQL in production and the in-memory store in tests.

pub mod memory;
pub mod postgres;

use crate::error::AppResult;
use crate::models::{
    Conversation, ConversationFilter, JoinRequest, LastMessagePreview, MemberRole, Membership,
    Message, MessageContent, NewMessage, RecipientState,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Insert a direct conversation unless one already exists for the pair.
    /// Returns the stored conversation and whether it was created by this call.
    async fn insert_direct(
        &self,
        conversation: Conversation,
        members: Vec<Membership>,
    ) -> AppResult<(Conversation, bool)>;

    async fn insert(
        &self,
        conversation: Conversation,
        members: Vec<Membership>,
    ) -> AppResult<Conversation>;

    async fn get(&self, conversation_id: Uuid) -> AppResult<Option<Conversation>>;

    async fn membership(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Option<Membership>>;

    /// Every membership ever held, active or not
    async fn members(&self, conversation_id: Uuid) -> AppResult<Vec<Membership>>;

    async fn active_member_ids(&self, conversation_id: Uuid) -> AppResult<Vec<Uuid>>;

    /// Insert a first-time member and refresh `member_count`. Returns false
    /// when a row for the pair already exists.
    async fn add_member(&self, membership: &Membership) -> AppResult<bool>;

    /// Bring back a departed member under `role`. Read pointer, mute and
    /// receipts are left as stored. `None` unless the row exists and is inactive.
    async fn reactivate_member(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Membership>>;

    /// Mark an active member as departed, stamping the conversation's current
    /// sequence number. `None` unless the member was active.
    async fn deactivate_member(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Membership>>;

    /// Role and its permission set; `None` unless the member is active
    async fn set_member_role(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
    ) -> AppResult<Option<Membership>>;

    /// `None` unless the member is active
    async fn set_member_mute(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        muted: bool,
        until: Option<DateTime<Utc>>,
    ) -> AppResult<Option<Membership>>;

    /// Returns false when the stored pointer is already at or past `sequence`
    async fn advance_read_pointer(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        message_id: Uuid,
        sequence: i64,
        at: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Overwrite the preview; `last_activity` only moves forward
    async fn update_last_message(
        &self,
        conversation_id: Uuid,
        preview: LastMessagePreview,
    ) -> AppResult<()>;

    async fn set_archived(
        &self,
        conversation_id: Uuid,
        archived_at: Option<DateTime<Utc>>,
    ) -> AppResult<()>;

    /// Conversations with an active membership for `user_id`, newest activity first
    async fn list_for_user(
        &self,
        user_id: Uuid,
        filter: &ConversationFilter,
    ) -> AppResult<Vec<Conversation>>;

    async fn contacts_of(&self, user_id: Uuid) -> AppResult<Vec<Uuid>>;

    /// Returns false when a request is already pending
    async fn save_join_request(&self, request: &JoinRequest) -> AppResult<bool>;

    async fn take_join_request(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Option<JoinRequest>>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Assign the next sequence number, create a `sent` receipt per recipient
    /// and count the message on its conversation, including the preview, as
    /// one atomic write.
    async fn insert(&self, message: NewMessage, recipients: &[Uuid]) -> AppResult<Message>;

    async fn find_by_client_id(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        client_message_id: &str,
    ) -> AppResult<Option<Message>>;

    async fn get(&self, message_id: Uuid) -> AppResult<Option<Message>>;

    async fn get_many(&self, message_ids: &[Uuid]) -> AppResult<Vec<Message>>;

    /// Newest first, strictly below `before_sequence` when given
    async fn page_before(
        &self,
        conversation_id: Uuid,
        before_sequence: Option<i64>,
        limit: usize,
    ) -> AppResult<Vec<Message>>;

    /// Ascending, strictly above `after_sequence`
    async fn page_after(
        &self,
        conversation_id: Uuid,
        after_sequence: i64,
        limit: usize,
    ) -> AppResult<Vec<Message>>;

    async fn receipt(&self, message_id: Uuid, user_id: Uuid)
        -> AppResult<Option<RecipientState>>;

    async fn receipts(&self, message_ids: &[Uuid]) -> AppResult<Vec<RecipientState>>;

    /// `Some` only when the receipt advanced
    async fn mark_delivered(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<Option<RecipientState>>;

    /// `Some` only when the receipt advanced
    async fn mark_read(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<Option<RecipientState>>;

    /// Read every unread receipt of `user_id` up to `up_to_sequence`; returns the advanced ones
    async fn mark_read_up_to(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        up_to_sequence: i64,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<RecipientState>>;

    /// Returns whether `(user, emoji)` is present afterwards
    async fn toggle_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str)
        -> AppResult<bool>;

    /// `(message_id, user_id, emoji)` rows
    async fn reactions(&self, message_ids: &[Uuid]) -> AppResult<Vec<(Uuid, Uuid, String)>>;

    async fn hide_for_user(&self, message_id: Uuid, user_id: Uuid) -> AppResult<()>;

    async fn hidden_for_user(
        &self,
        user_id: Uuid,
        message_ids: &[Uuid],
    ) -> AppResult<HashSet<Uuid>>;

    /// `None` when the message was already tombstoned
    async fn tombstone(&self, message_id: Uuid, at: DateTime<Utc>) -> AppResult<Option<Message>>;

    /// Fails with `InvalidState` on a tombstoned message
    async fn update_content(
        &self,
        message_id: Uuid,
        content: MessageContent,
        at: DateTime<Utc>,
    ) -> AppResult<Message>;
}
