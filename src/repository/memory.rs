use super::{ConversationRepository, MessageRepository};
use crate::error::{AppError, AppResult};
use crate::models::{
    Conversation, ConversationFilter, JoinRequest, LastMessagePreview, MemberRole, Membership,
    Message, MessageContent, NewMessage, RecipientState,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    conversations: HashMap<Uuid, Conversation>,
    members: BTreeMap<(Uuid, Uuid), Membership>,
    join_requests: BTreeMap<(Uuid, Uuid), JoinRequest>,
    messages: HashMap<Uuid, Message>,
    by_conversation: HashMap<Uuid, BTreeMap<i64, Uuid>>,
    counters: HashMap<Uuid, i64>,
    receipts: HashMap<(Uuid, Uuid), RecipientState>,
    reactions: BTreeSet<(Uuid, Uuid, String)>,
    hidden: HashSet<(Uuid, Uuid)>,
}

fn roster_keys(conversation_id: Uuid) -> std::ops::RangeInclusive<(Uuid, Uuid)> {
    (conversation_id, Uuid::nil())..=(conversation_id, Uuid::from_u128(u128::MAX))
}

impl Tables {
    fn refresh_member_count(&mut self, conversation_id: Uuid) {
        let count = self
            .members
            .range(roster_keys(conversation_id))
            .filter(|(_, m)| m.is_active)
            .count() as i64;
        if let Some(conv) = self.conversations.get_mut(&conversation_id) {
            conv.member_count = count;
        }
    }

    fn roster(&self, conversation_id: Uuid) -> impl Iterator<Item = &Membership> {
        self.members
            .range(roster_keys(conversation_id))
            .map(|(_, m)| m)
    }

    fn conversation_mut(&mut self, conversation_id: Uuid) -> AppResult<&mut Conversation> {
        self.conversations
            .get_mut(&conversation_id)
            .ok_or(AppError::NotFound)
    }

    fn store_conversation(&mut self, conversation: Conversation, members: Vec<Membership>) {
        let id = conversation.id;
        self.conversations.insert(id, conversation);
        for m in members {
            self.members.insert((id, m.user_id), m);
        }
        self.refresh_member_count(id);
    }
}

/// Process-local store backing both repositories.
///
/// A single lock over all tables keeps multi-row updates atomic; suitable for
/// tests and single-node development.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationRepository for MemoryStore {
    async fn insert_direct(
        &self,
        conversation: Conversation,
        members: Vec<Membership>,
    ) -> AppResult<(Conversation, bool)> {
        let mut t = self.tables.write().await;
        if let Some(existing) = t.conversations.get(&conversation.id) {
            return Ok((existing.clone(), false));
        }
        t.store_conversation(conversation.clone(), members);
        let stored = t
            .conversations
            .get(&conversation.id)
            .cloned()
            .unwrap_or(conversation);
        Ok((stored, true))
    }

    async fn insert(
        &self,
        conversation: Conversation,
        members: Vec<Membership>,
    ) -> AppResult<Conversation> {
        let mut t = self.tables.write().await;
        if t.conversations.contains_key(&conversation.id) {
            return Err(AppError::DuplicateOperation("conversation exists".into()));
        }
        t.store_conversation(conversation.clone(), members);
        Ok(t
            .conversations
            .get(&conversation.id)
            .cloned()
            .unwrap_or(conversation))
    }

    async fn get(&self, conversation_id: Uuid) -> AppResult<Option<Conversation>> {
        Ok(self
            .tables
            .read()
            .await
            .conversations
            .get(&conversation_id)
            .cloned())
    }

    async fn membership(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Option<Membership>> {
        Ok(self
            .tables
            .read()
            .await
            .members
            .get(&(conversation_id, user_id))
            .cloned())
    }

    async fn members(&self, conversation_id: Uuid) -> AppResult<Vec<Membership>> {
        let t = self.tables.read().await;
        Ok(t.roster(conversation_id).cloned().collect())
    }

    async fn active_member_ids(&self, conversation_id: Uuid) -> AppResult<Vec<Uuid>> {
        let t = self.tables.read().await;
        Ok(t
            .roster(conversation_id)
            .filter(|m| m.is_active)
            .map(|m| m.user_id)
            .collect())
    }

    async fn add_member(&self, membership: &Membership) -> AppResult<bool> {
        let mut t = self.tables.write().await;
        if !t.conversations.contains_key(&membership.conversation_id) {
            return Err(AppError::NotFound);
        }
        let key = (membership.conversation_id, membership.user_id);
        if t.members.contains_key(&key) {
            return Ok(false);
        }
        t.members.insert(key, membership.clone());
        t.refresh_member_count(membership.conversation_id);
        Ok(true)
    }

    async fn reactivate_member(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Membership>> {
        let mut t = self.tables.write().await;
        let Some(m) = t
            .members
            .get_mut(&(conversation_id, user_id))
            .filter(|m| !m.is_active)
        else {
            return Ok(None);
        };
        m.reactivate(role, at);
        let updated = m.clone();
        t.refresh_member_count(conversation_id);
        Ok(Some(updated))
    }

    async fn deactivate_member(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Membership>> {
        let mut t = self.tables.write().await;
        let last_sequence = t.counters.get(&conversation_id).copied().unwrap_or(0);
        let Some(m) = t
            .members
            .get_mut(&(conversation_id, user_id))
            .filter(|m| m.is_active)
        else {
            return Ok(None);
        };
        m.deactivate(at, last_sequence);
        let updated = m.clone();
        t.refresh_member_count(conversation_id);
        Ok(Some(updated))
    }

    async fn set_member_role(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
    ) -> AppResult<Option<Membership>> {
        let mut t = self.tables.write().await;
        Ok(t.members
            .get_mut(&(conversation_id, user_id))
            .filter(|m| m.is_active)
            .map(|m| {
                m.set_role(role);
                m.clone()
            }))
    }

    async fn set_member_mute(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        muted: bool,
        until: Option<DateTime<Utc>>,
    ) -> AppResult<Option<Membership>> {
        let mut t = self.tables.write().await;
        Ok(t.members
            .get_mut(&(conversation_id, user_id))
            .filter(|m| m.is_active)
            .map(|m| {
                m.is_muted = muted;
                m.muted_until = if muted { until } else { None };
                m.clone()
            }))
    }

    async fn advance_read_pointer(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        message_id: Uuid,
        sequence: i64,
        at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut t = self.tables.write().await;
        Ok(t.members
            .get_mut(&(conversation_id, user_id))
            .map(|m| m.advance_read_pointer(message_id, sequence, at))
            .unwrap_or(false))
    }

    async fn update_last_message(
        &self,
        conversation_id: Uuid,
        preview: LastMessagePreview,
    ) -> AppResult<()> {
        let mut t = self.tables.write().await;
        let conv = t.conversation_mut(conversation_id)?;
        conv.last_activity = conv.last_activity.max(preview.created_at);
        conv.last_message = Some(preview);
        Ok(())
    }

    async fn set_archived(
        &self,
        conversation_id: Uuid,
        archived_at: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        let mut t = self.tables.write().await;
        let conv = t.conversation_mut(conversation_id)?;
        conv.is_archived = archived_at.is_some();
        conv.archived_at = archived_at;
        Ok(())
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        filter: &ConversationFilter,
    ) -> AppResult<Vec<Conversation>> {
        let t = self.tables.read().await;
        let mut found: Vec<Conversation> = t
            .members
            .values()
            .filter(|m| m.user_id == user_id && m.is_active)
            .filter_map(|m| t.conversations.get(&m.conversation_id))
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            b.last_activity
                .cmp(&a.last_activity)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(found
            .into_iter()
            .skip(filter.skip)
            .take(filter.limit)
            .collect())
    }

    async fn contacts_of(&self, user_id: Uuid) -> AppResult<Vec<Uuid>> {
        let t = self.tables.read().await;
        let conversations: HashSet<Uuid> = t
            .members
            .values()
            .filter(|m| m.user_id == user_id && m.is_active)
            .map(|m| m.conversation_id)
            .collect();
        let contacts: BTreeSet<Uuid> = conversations
            .iter()
            .flat_map(|c| t.roster(*c))
            .filter(|m| m.is_active && m.user_id != user_id)
            .map(|m| m.user_id)
            .collect();
        Ok(contacts.into_iter().collect())
    }

    async fn save_join_request(&self, request: &JoinRequest) -> AppResult<bool> {
        let mut t = self.tables.write().await;
        let key = (request.conversation_id, request.user_id);
        if t.join_requests.contains_key(&key) {
            return Ok(false);
        }
        t.join_requests.insert(key, request.clone());
        Ok(true)
    }

    async fn take_join_request(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Option<JoinRequest>> {
        Ok(self
            .tables
            .write()
            .await
            .join_requests
            .remove(&(conversation_id, user_id)))
    }
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn insert(&self, message: NewMessage, recipients: &[Uuid]) -> AppResult<Message> {
        let mut t = self.tables.write().await;
        let counter = t.counters.entry(message.conversation_id).or_insert(0);
        *counter += 1;
        let message = message.into_message(*counter);

        if let Some(conv) = t.conversations.get_mut(&message.conversation_id) {
            conv.message_count += 1;
            conv.last_activity = conv.last_activity.max(message.created_at);
            conv.last_message = Some(LastMessagePreview::from_message(&message));
        }
        t.by_conversation
            .entry(message.conversation_id)
            .or_default()
            .insert(message.sequence_number, message.id);
        for user_id in recipients.iter().filter(|u| **u != message.sender_id) {
            t.receipts.insert(
                (message.id, *user_id),
                RecipientState::new(message.id, *user_id),
            );
        }
        t.messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn find_by_client_id(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        client_message_id: &str,
    ) -> AppResult<Option<Message>> {
        let t = self.tables.read().await;
        Ok(t.messages
            .values()
            .find(|m| {
                m.conversation_id == conversation_id
                    && m.sender_id == sender_id
                    && m.client_message_id.as_deref() == Some(client_message_id)
            })
            .cloned())
    }

    async fn get(&self, message_id: Uuid) -> AppResult<Option<Message>> {
        Ok(self.tables.read().await.messages.get(&message_id).cloned())
    }

    async fn get_many(&self, message_ids: &[Uuid]) -> AppResult<Vec<Message>> {
        let t = self.tables.read().await;
        Ok(message_ids
            .iter()
            .filter_map(|id| t.messages.get(id).cloned())
            .collect())
    }

    async fn page_before(
        &self,
        conversation_id: Uuid,
        before_sequence: Option<i64>,
        limit: usize,
    ) -> AppResult<Vec<Message>> {
        let t = self.tables.read().await;
        let Some(index) = t.by_conversation.get(&conversation_id) else {
            return Ok(Vec::new());
        };
        let upper = before_sequence.unwrap_or(i64::MAX);
        Ok(index
            .range(..upper)
            .rev()
            .take(limit)
            .filter_map(|(_, id)| t.messages.get(id).cloned())
            .collect())
    }

    async fn page_after(
        &self,
        conversation_id: Uuid,
        after_sequence: i64,
        limit: usize,
    ) -> AppResult<Vec<Message>> {
        let t = self.tables.read().await;
        let Some(index) = t.by_conversation.get(&conversation_id) else {
            return Ok(Vec::new());
        };
        Ok(index
            .range(after_sequence.saturating_add(1)..)
            .take(limit)
            .filter_map(|(_, id)| t.messages.get(id).cloned())
            .collect())
    }

    async fn receipt(
        &self,
        message_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Option<RecipientState>> {
        Ok(self
            .tables
            .read()
            .await
            .receipts
            .get(&(message_id, user_id))
            .cloned())
    }

    async fn receipts(&self, message_ids: &[Uuid]) -> AppResult<Vec<RecipientState>> {
        let wanted: HashSet<&Uuid> = message_ids.iter().collect();
        let t = self.tables.read().await;
        let mut found: Vec<RecipientState> = t
            .receipts
            .values()
            .filter(|r| wanted.contains(&r.message_id))
            .cloned()
            .collect();
        found.sort_by_key(|r| (r.message_id, r.user_id));
        Ok(found)
    }

    async fn mark_delivered(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<Option<RecipientState>> {
        let mut t = self.tables.write().await;
        Ok(t.receipts
            .get_mut(&(message_id, user_id))
            .and_then(|r| r.mark_delivered(at).then(|| r.clone())))
    }

    async fn mark_read(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<Option<RecipientState>> {
        let mut t = self.tables.write().await;
        Ok(t.receipts
            .get_mut(&(message_id, user_id))
            .and_then(|r| r.mark_read(at).then(|| r.clone())))
    }

    async fn mark_read_up_to(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        up_to_sequence: i64,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<RecipientState>> {
        let mut t = self.tables.write().await;
        let ids: Vec<Uuid> = t
            .by_conversation
            .get(&conversation_id)
            .map(|index| index.range(..=up_to_sequence).map(|(_, id)| *id).collect())
            .unwrap_or_default();

        let mut advanced = Vec::new();
        for id in ids {
            if let Some(r) = t.receipts.get_mut(&(id, user_id)) {
                if r.mark_read(at) {
                    advanced.push(r.clone());
                }
            }
        }
        Ok(advanced)
    }

    async fn toggle_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> AppResult<bool> {
        let mut t = self.tables.write().await;
        let key = (message_id, user_id, emoji.to_string());
        if t.reactions.remove(&key) {
            Ok(false)
        } else {
            t.reactions.insert(key);
            Ok(true)
        }
    }

    async fn reactions(&self, message_ids: &[Uuid]) -> AppResult<Vec<(Uuid, Uuid, String)>> {
        let wanted: HashSet<&Uuid> = message_ids.iter().collect();
        let t = self.tables.read().await;
        Ok(t.reactions
            .iter()
            .filter(|(m, _, _)| wanted.contains(m))
            .cloned()
            .collect())
    }

    async fn hide_for_user(&self, message_id: Uuid, user_id: Uuid) -> AppResult<()> {
        self.tables
            .write()
            .await
            .hidden
            .insert((message_id, user_id));
        Ok(())
    }

    async fn hidden_for_user(
        &self,
        user_id: Uuid,
        message_ids: &[Uuid],
    ) -> AppResult<HashSet<Uuid>> {
        let t = self.tables.read().await;
        Ok(message_ids
            .iter()
            .filter(|id| t.hidden.contains(&(**id, user_id)))
            .copied()
            .collect())
    }

    async fn tombstone(&self, message_id: Uuid, at: DateTime<Utc>) -> AppResult<Option<Message>> {
        let mut t = self.tables.write().await;
        let message = t.messages.get_mut(&message_id).ok_or(AppError::NotFound)?;
        Ok(message.tombstone(at).then(|| message.clone()))
    }

    async fn update_content(
        &self,
        message_id: Uuid,
        content: MessageContent,
        at: DateTime<Utc>,
    ) -> AppResult<Message> {
        let mut t = self.tables.write().await;
        let message = t.messages.get_mut(&message_id).ok_or(AppError::NotFound)?;
        if message.is_tombstoned() {
            return Err(AppError::InvalidState("message was deleted".into()));
        }
        message.apply_edit(content, at);
        Ok(message.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReceiptStatus;

    fn new_message(conversation_id: Uuid, sender_id: Uuid, text: &str) -> NewMessage {
        NewMessage {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            content: MessageContent::text(text),
            reply_to: None,
            client_message_id: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_direct_returns_existing() {
        let store = MemoryStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let (conv, members) = Conversation::new_direct(a, b, Utc::now()).unwrap();
        let (first, created) = store.insert_direct(conv, members).await.unwrap();
        assert!(created);

        let (conv, members) = Conversation::new_direct(b, a, Utc::now()).unwrap();
        let (second, created) = store.insert_direct(conv, members).await.unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(second.member_count, 2);
    }

    #[tokio::test]
    async fn test_sequence_numbers_increase_per_conversation() {
        let store = MemoryStore::new();
        let conv_a = Uuid::new_v4();
        let conv_b = Uuid::new_v4();
        let sender = Uuid::new_v4();

        let m1 = MessageRepository::insert(&store, new_message(conv_a, sender, "1"), &[])
            .await
            .unwrap();
        let m2 = MessageRepository::insert(&store, new_message(conv_a, sender, "2"), &[])
            .await
            .unwrap();
        let other = MessageRepository::insert(&store, new_message(conv_b, sender, "x"), &[])
            .await
            .unwrap();

        assert_eq!((m1.sequence_number, m2.sequence_number), (1, 2));
        assert_eq!(other.sequence_number, 1);

        let after = store.page_after(conv_a, 1, 10).await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].id, m2.id);

        let before = store.page_before(conv_a, None, 10).await.unwrap();
        assert_eq!(before[0].id, m2.id);
        assert_eq!(before[1].id, m1.id);
    }

    #[tokio::test]
    async fn test_receipts_exclude_sender_and_never_regress() {
        let store = MemoryStore::new();
        let conv = Uuid::new_v4();
        let sender = Uuid::new_v4();
        let reader = Uuid::new_v4();
        let msg = MessageRepository::insert(&store, new_message(conv, sender, "hi"), &[sender, reader])
            .await
            .unwrap();

        assert!(store.receipt(msg.id, sender).await.unwrap().is_none());

        let now = Utc::now();
        let read = store.mark_read(msg.id, reader, now).await.unwrap().unwrap();
        assert_eq!(read.status, ReceiptStatus::Read);
        assert!(store.mark_delivered(msg.id, reader, now).await.unwrap().is_none());
        assert!(store.mark_read(msg.id, reader, now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_member_count_tracks_active_members() {
        let store = MemoryStore::new();
        let admin = Uuid::new_v4();
        let user = Uuid::new_v4();
        let (conv, members) = Conversation::new_group(
            crate::models::ConversationKind::Group,
            admin,
            "team",
            None,
            &[user],
            Utc::now(),
        )
        .unwrap();
        let conv = ConversationRepository::insert(&store, conv, members).await.unwrap();
        assert_eq!(conv.member_count, 2);

        let left = store
            .deactivate_member(conv.id, user, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert!(!left.is_active);
        let stored = ConversationRepository::get(&store, conv.id).await.unwrap().unwrap();
        assert_eq!(stored.member_count, 1);

        let late = Membership::new(conv.id, Uuid::new_v4(), MemberRole::Member, Utc::now());
        assert!(store.add_member(&late).await.unwrap());
        assert!(!store.add_member(&late).await.unwrap());
        let stored = ConversationRepository::get(&store, conv.id).await.unwrap().unwrap();
        assert_eq!(stored.member_count, 2);
        assert_eq!(store.members(conv.id).await.unwrap().len(), 3);

        store
            .reactivate_member(conv.id, user, MemberRole::Member, Utc::now())
            .await
            .unwrap()
            .unwrap();
        let stored = ConversationRepository::get(&store, conv.id).await.unwrap().unwrap();
        assert_eq!(stored.member_count, 3);
    }

    /// Verifies:
    /// - roster writes touch only their own columns
    /// - a role change after removal does not bring the member back
    /// - reactivation keeps a read pointer advanced while the member was away
    #[tokio::test]
    async fn test_roster_writes_do_not_clobber_each_other() {
        let store = MemoryStore::new();
        let admin = Uuid::new_v4();
        let user = Uuid::new_v4();
        let (conv, members) = Conversation::new_group(
            crate::models::ConversationKind::Group,
            admin,
            "team",
            None,
            &[user],
            Utc::now(),
        )
        .unwrap();
        let conv = ConversationRepository::insert(&store, conv, members).await.unwrap();
        let first = MessageRepository::insert(&store, new_message(conv.id, admin, "1"), &[admin, user])
            .await
            .unwrap();
        let second = MessageRepository::insert(&store, new_message(conv.id, admin, "2"), &[admin, user])
            .await
            .unwrap();

        let now = Utc::now();
        assert!(store
            .advance_read_pointer(conv.id, user, first.id, first.sequence_number, now)
            .await
            .unwrap());
        let left = store
            .deactivate_member(conv.id, user, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(left.left_at_sequence, Some(2));
        assert_eq!(left.last_read_sequence, 1);

        assert!(store
            .set_member_role(conv.id, user, MemberRole::Moderator)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .set_member_mute(conv.id, user, true, None)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .deactivate_member(conv.id, user, now)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .advance_read_pointer(conv.id, user, second.id, second.sequence_number, now)
            .await
            .unwrap());

        let stored = store.membership(conv.id, user).await.unwrap().unwrap();
        assert!(!stored.is_active);
        assert_eq!(stored.role, MemberRole::Member);
        assert_eq!(stored.last_read_sequence, 2);

        let back = store
            .reactivate_member(conv.id, user, MemberRole::Member, Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert!(back.is_active);
        assert_eq!(back.left_at_sequence, None);
        assert_eq!(back.last_read_sequence, 2);
        assert_eq!(back.last_read_message_id, Some(second.id));
        assert!(store
            .reactivate_member(conv.id, user, MemberRole::Admin, Utc::now())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_insert_counts_message_on_conversation() {
        let store = MemoryStore::new();
        let admin = Uuid::new_v4();
        let (conv, members) = Conversation::new_group(
            crate::models::ConversationKind::Group,
            admin,
            "team",
            None,
            &[Uuid::new_v4()],
            Utc::now(),
        )
        .unwrap();
        let conv = ConversationRepository::insert(&store, conv, members).await.unwrap();

        let mut last = None;
        for text in ["a", "b", "c"] {
            last = Some(
                MessageRepository::insert(&store, new_message(conv.id, admin, text), &[admin])
                    .await
                    .unwrap(),
            );
        }
        let last = last.unwrap();

        let stored = ConversationRepository::get(&store, conv.id).await.unwrap().unwrap();
        assert_eq!(stored.message_count, 3);
        assert_eq!(
            stored.message_count as usize,
            store.page_before(conv.id, None, 100).await.unwrap().len()
        );
        let preview = stored.last_message.unwrap();
        assert_eq!(preview.message_id, last.id);
        assert_eq!(preview.content, "c");
    }

    #[tokio::test]
    async fn test_toggle_reaction_is_an_involution() {
        let store = MemoryStore::new();
        let msg = Uuid::new_v4();
        let user = Uuid::new_v4();
        assert!(store.toggle_reaction(msg, user, "👍").await.unwrap());
        assert!(store.toggle_reaction(msg, user, "❤️").await.unwrap());
        assert!(!store.toggle_reaction(msg, user, "👍").await.unwrap());
        let rows = store.reactions(&[msg]).await.unwrap();
        assert_eq!(rows, vec![(msg, user, "❤️".to_string())]);
    }
}
