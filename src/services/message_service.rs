use crate::error::{AppError, AppResult};
use crate::models::message::{group_reactions, validate_emoji};
use crate::models::{
    Message, MessageContent, MessageView, NewMessage, ReactionEntry, RecipientState,
    ReplyPreview,
};
use crate::repository::{ConversationRepository, MessageRepository};
use crate::services::conversation_service::ConversationService;
use crate::services::fanout::FanoutService;
use crate::websocket::events::ServerEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const MAX_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone)]
pub struct SendMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: MessageContent,
    pub reply_to: Option<Uuid>,
    pub client_message_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub before_sequence: Option<i64>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncBatch {
    pub conversation_id: Uuid,
    pub messages: Vec<MessageView>,
    /// Pass back as `after_sequence` to continue
    pub next_cursor: i64,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReactionOutcome {
    pub message_id: Uuid,
    pub emoji: String,
    pub active: bool,
    pub reactions: Vec<ReactionEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadSummary {
    pub conversation_id: Uuid,
    pub up_to_message_id: Uuid,
    pub read_at: DateTime<Utc>,
    pub messages_read: usize,
}

/// Message store: acceptance, receipts, reactions, deletes and history
pub struct MessageService {
    conversations: Arc<dyn ConversationRepository>,
    messages: Arc<dyn MessageRepository>,
    conversation_service: Arc<ConversationService>,
    fanout: Arc<FanoutService>,
    sync_page_limit: usize,
}

impl MessageService {
    pub fn new(
        conversations: Arc<dyn ConversationRepository>,
        messages: Arc<dyn MessageRepository>,
        conversation_service: Arc<ConversationService>,
        fanout: Arc<FanoutService>,
        sync_page_limit: usize,
    ) -> Self {
        Self {
            conversations,
            messages,
            conversation_service,
            fanout,
            sync_page_limit: sync_page_limit.max(1),
        }
    }

    pub async fn send(&self, request: SendMessage) -> AppResult<MessageView> {
        request.content.validate()?;
        let conversation = self
            .conversations
            .get(request.conversation_id)
            .await?
            .ok_or(AppError::NotFound)?;
        let sender = self
            .conversation_service
            .require_active_member(request.conversation_id, request.sender_id)
            .await?;
        if !sender.permissions.can_send_messages {
            return Err(AppError::Forbidden);
        }
        if conversation.is_archived {
            return Err(AppError::InvalidState("conversation is archived".into()));
        }
        let reply_target = match request.reply_to {
            Some(reply_to) => Some(
                self.messages
                    .get(reply_to)
                    .await?
                    .filter(|m| m.conversation_id == request.conversation_id)
                    .ok_or(AppError::NotFound)?,
            ),
            None => None,
        };

        let _lane = self.fanout.lane(request.conversation_id).await;

        if let Some(key) = request.client_message_id.as_deref() {
            if let Some(existing) = self
                .messages
                .find_by_client_id(request.conversation_id, request.sender_id, key)
                .await?
            {
                tracing::debug!(message_id = %existing.id, "duplicate send ignored");
                let mut views = self.build_views(request.sender_id, vec![existing]).await?;
                return views.pop().ok_or(AppError::Internal);
            }
        }

        let recipients = self
            .conversations
            .active_member_ids(request.conversation_id)
            .await?;
        let new_message = NewMessage {
            id: Uuid::new_v4(),
            conversation_id: request.conversation_id,
            sender_id: request.sender_id,
            content: request.content,
            reply_to: request.reply_to,
            client_message_id: request.client_message_id,
            created_at: Utc::now(),
        };
        let message = self.messages.insert(new_message, &recipients).await?;

        let view = MessageView {
            recipients: recipients
                .iter()
                .filter(|u| **u != message.sender_id)
                .map(|u| RecipientState::new(message.id, *u))
                .collect(),
            reactions: Vec::new(),
            reply_preview: message
                .reply_to
                .map(|id| ReplyPreview::resolve(id, reply_target.as_ref())),
            message,
        };

        tracing::info!(
            message_id = %view.message.id,
            conversation_id = %view.message.conversation_id,
            sequence = view.message.sequence_number,
            "message accepted"
        );

        let event = ServerEvent::ReceiveMessage {
            conversation_id: view.message.conversation_id,
            message: view.clone(),
        };
        self.fanout
            .notify(view.message.conversation_id, Some(view.message.sender_id), &event)
            .await;
        Ok(view)
    }

    /// First message to a user creates the direct conversation.
    pub async fn send_direct(
        &self,
        sender_id: Uuid,
        recipient_id: Uuid,
        content: MessageContent,
        reply_to: Option<Uuid>,
        client_message_id: Option<String>,
    ) -> AppResult<MessageView> {
        content.validate()?;
        let conversation = self
            .conversation_service
            .create_direct(sender_id, recipient_id)
            .await?;
        self.send(SendMessage {
            conversation_id: conversation.id,
            sender_id,
            content,
            reply_to,
            client_message_id,
        })
        .await
    }

    /// No-op unless the user is a recipient still in `sent`.
    pub async fn mark_delivered(
        &self,
        message_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Option<RecipientState>> {
        let message = self.load(message_id).await?;
        let _lane = self.fanout.lane(message.conversation_id).await;
        self.deliver(&message, user_id).await
    }

    /// Reading implies delivery; silent for non-recipients. A receipt still
    /// in `sent` announces `message_delivered` before `messages_read`.
    pub async fn mark_read(
        &self,
        message_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Option<RecipientState>> {
        let message = self.load(message_id).await?;
        let _lane = self.fanout.lane(message.conversation_id).await;

        self.deliver(&message, user_id).await?;

        let Some(state) = self.messages.mark_read(message_id, user_id, Utc::now()).await? else {
            return Ok(None);
        };
        let read_at = state.read_at.unwrap_or_else(Utc::now);
        self.conversations
            .advance_read_pointer(
                message.conversation_id,
                user_id,
                message.id,
                message.sequence_number,
                read_at,
            )
            .await?;

        let event = ServerEvent::MessagesRead {
            conversation_id: message.conversation_id,
            user_id,
            read_at,
            up_to_message_id: message.id,
        };
        self.fanout
            .notify(message.conversation_id, Some(user_id), &event)
            .await;
        Ok(Some(state))
    }

    /// Read everything up to and including `up_to_message_id` in one step.
    pub async fn mark_conversation_read(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        up_to_message_id: Uuid,
    ) -> AppResult<ReadSummary> {
        self.conversation_service
            .require_active_member(conversation_id, user_id)
            .await?;
        let target = self.load(up_to_message_id).await?;
        if target.conversation_id != conversation_id {
            return Err(AppError::NotFound);
        }

        let _lane = self.fanout.lane(conversation_id).await;
        let now = Utc::now();
        let advanced = self
            .messages
            .mark_read_up_to(conversation_id, user_id, target.sequence_number, now)
            .await?;
        let read_at = advanced.iter().filter_map(|r| r.read_at).max().unwrap_or(now);
        self.conversations
            .advance_read_pointer(
                conversation_id,
                user_id,
                target.id,
                target.sequence_number,
                read_at,
            )
            .await?;

        if !advanced.is_empty() {
            let event = ServerEvent::MessagesRead {
                conversation_id,
                user_id,
                read_at,
                up_to_message_id: target.id,
            };
            self.fanout.notify(conversation_id, Some(user_id), &event).await;
        }
        Ok(ReadSummary {
            conversation_id,
            up_to_message_id: target.id,
            read_at,
            messages_read: advanced.len(),
        })
    }

    pub async fn toggle_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> AppResult<ReactionOutcome> {
        validate_emoji(emoji)?;
        let message = self.load(message_id).await?;
        self.conversation_service
            .require_active_member(message.conversation_id, user_id)
            .await?;
        if message.is_tombstoned() {
            return Err(AppError::InvalidState("message was deleted".into()));
        }

        let _lane = self.fanout.lane(message.conversation_id).await;
        let active = self
            .messages
            .toggle_reaction(message_id, user_id, emoji)
            .await?;
        let rows = self.messages.reactions(&[message_id]).await?;
        let reactions = group_reactions(rows.into_iter().map(|(_, user, emoji)| (user, emoji)));

        let event = ServerEvent::ReactionUpdated {
            conversation_id: message.conversation_id,
            message_id,
            user_id,
            emoji: emoji.to_string(),
            active,
            reactions: reactions.clone(),
        };
        self.fanout
            .notify(message.conversation_id, Some(user_id), &event)
            .await;

        Ok(ReactionOutcome {
            message_id,
            emoji: emoji.to_string(),
            active,
            reactions,
        })
    }

    /// Hide a message from one viewer only
    pub async fn delete_for_me(&self, message_id: Uuid, user_id: Uuid) -> AppResult<()> {
        let message = self.load(message_id).await?;
        self.conversations
            .membership(message.conversation_id, user_id)
            .await?
            .ok_or(AppError::NotAParticipant)?;
        self.messages.hide_for_user(message_id, user_id).await
    }

    /// Tombstone for all viewers; only the sender may do this.
    pub async fn delete_for_everyone(&self, message_id: Uuid, actor_id: Uuid) -> AppResult<Message> {
        let message = self.load(message_id).await?;
        if message.sender_id != actor_id {
            return Err(AppError::Forbidden);
        }

        let _lane = self.fanout.lane(message.conversation_id).await;
        let now = Utc::now();
        let Some(tombstoned) = self.messages.tombstone(message_id, now).await? else {
            return self.load(message_id).await;
        };
        self.refresh_preview_if_latest(&tombstoned).await?;

        tracing::info!(message_id = %message_id, "message deleted for everyone");
        let event = ServerEvent::MessageDeleted {
            conversation_id: tombstoned.conversation_id,
            message_id,
            deleted_at: tombstoned.deleted_at.unwrap_or(now),
        };
        self.fanout
            .notify(tombstoned.conversation_id, Some(actor_id), &event)
            .await;
        Ok(tombstoned)
    }

    pub async fn edit(
        &self,
        message_id: Uuid,
        actor_id: Uuid,
        content: MessageContent,
    ) -> AppResult<Message> {
        content.validate()?;
        let message = self.load(message_id).await?;
        if message.sender_id != actor_id {
            return Err(AppError::Forbidden);
        }
        if message.is_tombstoned() {
            return Err(AppError::InvalidState("message was deleted".into()));
        }

        let _lane = self.fanout.lane(message.conversation_id).await;
        let edited = self
            .messages
            .update_content(message_id, content, Utc::now())
            .await?;
        self.refresh_preview_if_latest(&edited).await?;

        let event = ServerEvent::MessageEdited {
            conversation_id: edited.conversation_id,
            message: edited.clone(),
        };
        self.fanout
            .notify(edited.conversation_id, Some(actor_id), &event)
            .await;
        Ok(edited)
    }

    /// Newest-first page as seen by `viewer`. Former members only see what
    /// was sent before they left.
    pub async fn history(
        &self,
        conversation_id: Uuid,
        viewer: Uuid,
        query: HistoryQuery,
    ) -> AppResult<Vec<MessageView>> {
        let member = self
            .conversations
            .membership(conversation_id, viewer)
            .await?
            .ok_or(AppError::NotAParticipant)?;
        let limit = query
            .limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        let page = self
            .messages
            .page_before(conversation_id, member.history_bound(query.before_sequence), limit)
            .await?;
        self.build_views(viewer, page).await
    }

    /// Catch-up after a reconnect: everything past `after_sequence`, oldest
    /// first. Messages addressed to the viewer are marked delivered.
    pub async fn sync(
        &self,
        conversation_id: Uuid,
        viewer: Uuid,
        after_sequence: i64,
        limit: Option<usize>,
    ) -> AppResult<SyncBatch> {
        self.conversation_service
            .require_active_member(conversation_id, viewer)
            .await?;
        let limit = limit
            .unwrap_or(self.sync_page_limit)
            .clamp(1, self.sync_page_limit);
        let after_sequence = after_sequence.max(0);

        let mut page = self
            .messages
            .page_after(conversation_id, after_sequence, limit + 1)
            .await?;
        let has_more = page.len() > limit;
        page.truncate(limit);
        let next_cursor = page
            .last()
            .map(|m| m.sequence_number)
            .unwrap_or(after_sequence);

        {
            let _lane = self.fanout.lane(conversation_id).await;
            for message in page.iter().filter(|m| m.sender_id != viewer) {
                self.deliver(message, viewer).await?;
            }
        }

        let messages = self.build_views(viewer, page).await?;
        Ok(SyncBatch {
            conversation_id,
            messages,
            next_cursor,
            has_more,
        })
    }

    async fn load(&self, message_id: Uuid) -> AppResult<Message> {
        self.messages
            .get(message_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    /// Caller holds the conversation lane
    async fn deliver(&self, message: &Message, user_id: Uuid) -> AppResult<Option<RecipientState>> {
        let Some(state) = self
            .messages
            .mark_delivered(message.id, user_id, Utc::now())
            .await?
        else {
            return Ok(None);
        };
        let event = ServerEvent::MessageDelivered {
            message_id: message.id,
            conversation_id: message.conversation_id,
            user_id,
            delivered_at: state.delivered_at.unwrap_or_else(Utc::now),
        };
        self.fanout
            .notify(message.conversation_id, Some(user_id), &event)
            .await;
        Ok(Some(state))
    }

    async fn refresh_preview_if_latest(&self, message: &Message) -> AppResult<()> {
        let points_here = self
            .conversations
            .get(message.conversation_id)
            .await?
            .and_then(|c| c.last_message)
            .is_some_and(|p| p.message_id == message.id);
        if points_here {
            self.conversation_service
                .update_last_message(message.conversation_id, message)
                .await?;
        }
        Ok(())
    }

    async fn build_views(&self, viewer: Uuid, messages: Vec<Message>) -> AppResult<Vec<MessageView>> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = messages.iter().map(|m| m.id).collect();
        let hidden = self.messages.hidden_for_user(viewer, &ids).await?;

        let mut receipts: HashMap<Uuid, Vec<RecipientState>> = HashMap::new();
        for receipt in self.messages.receipts(&ids).await? {
            receipts.entry(receipt.message_id).or_default().push(receipt);
        }

        let mut reaction_rows: HashMap<Uuid, Vec<(Uuid, String)>> = HashMap::new();
        for (message_id, user_id, emoji) in self.messages.reactions(&ids).await? {
            reaction_rows
                .entry(message_id)
                .or_default()
                .push((user_id, emoji));
        }

        let reply_ids: Vec<Uuid> = messages
            .iter()
            .filter_map(|m| m.reply_to)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let replies: HashMap<Uuid, Message> = self
            .messages
            .get_many(&reply_ids)
            .await?
            .into_iter()
            .map(|m| (m.id, m))
            .collect();

        Ok(messages
            .into_iter()
            .filter(|m| !hidden.contains(&m.id))
            .map(|message| MessageView {
                recipients: receipts.remove(&message.id).unwrap_or_default(),
                reactions: group_reactions(reaction_rows.remove(&message.id).unwrap_or_default()),
                reply_preview: message
                    .reply_to
                    .map(|id| ReplyPreview::resolve(id, replies.get(&id))),
                message,
            })
            .collect())
    }
}
