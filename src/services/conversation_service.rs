use crate::error::{AppError, AppResult};
use crate::models::{
    Conversation, ConversationFilter, ConversationKind, ConversationWithMembers, JoinRequest,
    LastMessagePreview, MemberRole, Membership, Message,
};
use crate::repository::ConversationRepository;
use crate::services::fanout::FanoutService;
use crate::websocket::events::ServerEvent;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

const MAX_JOIN_NOTE_CHARS: usize = 500;

/// Conversation store and participant manager
pub struct ConversationService {
    repo: Arc<dyn ConversationRepository>,
    fanout: Arc<FanoutService>,
}

impl ConversationService {
    pub fn new(repo: Arc<dyn ConversationRepository>, fanout: Arc<FanoutService>) -> Self {
        Self { repo, fanout }
    }

    /// Existing conversation for the unordered pair, or a new one.
    pub async fn create_direct(&self, user_a: Uuid, user_b: Uuid) -> AppResult<Conversation> {
        let (conversation, members) = Conversation::new_direct(user_a, user_b, Utc::now())?;
        let (conversation, created) = self.repo.insert_direct(conversation, members).await?;
        if created {
            tracing::info!(conversation_id = %conversation.id, "direct conversation created");
        }
        Ok(conversation)
    }

    pub async fn create_group(
        &self,
        creator: Uuid,
        kind: ConversationKind,
        name: &str,
        description: Option<String>,
        participants: &[Uuid],
    ) -> AppResult<ConversationWithMembers> {
        let (conversation, members) =
            Conversation::new_group(kind, creator, name, description, participants, Utc::now())?;
        let conversation = self.repo.insert(conversation, members).await?;
        tracing::info!(
            conversation_id = %conversation.id,
            kind = conversation.kind.to_db(),
            members = conversation.member_count,
            "group conversation created"
        );
        let members = self.repo.members(conversation.id).await?;
        Ok(ConversationWithMembers {
            conversation,
            members,
        })
    }

    pub async fn get_conversation(
        &self,
        conversation_id: Uuid,
        viewer: Uuid,
    ) -> AppResult<ConversationWithMembers> {
        let conversation = self.load(conversation_id).await?;
        let members = self.repo.members(conversation_id).await?;
        if !members.iter().any(|m| m.user_id == viewer) {
            return Err(AppError::NotAParticipant);
        }
        Ok(ConversationWithMembers {
            conversation,
            members,
        })
    }

    /// Active membership of `user_id`, or `NotAParticipant`
    pub async fn require_active_member(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Membership> {
        self.repo
            .membership(conversation_id, user_id)
            .await?
            .filter(|m| m.is_active)
            .ok_or(AppError::NotAParticipant)
    }

    pub async fn add_participant(
        &self,
        conversation_id: Uuid,
        actor_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
    ) -> AppResult<Membership> {
        let conversation = self.load(conversation_id).await?;
        if conversation.is_direct() {
            return Err(AppError::InvalidOperation(
                "direct conversations have a fixed roster".into(),
            ));
        }
        let actor = self
            .repo
            .membership(conversation_id, actor_id)
            .await?
            .filter(|m| m.is_active && m.permissions.can_add_members)
            .ok_or(AppError::Forbidden)?;
        if role > actor.role {
            return Err(AppError::Forbidden);
        }

        let membership = self.admit(conversation_id, user_id, role).await?;
        tracing::info!(
            conversation_id = %conversation_id,
            user_id = %user_id,
            actor_id = %actor_id,
            role = %role,
            "participant added"
        );

        let event = ServerEvent::ParticipantAdded {
            conversation_id,
            user_id,
            role,
            added_by: actor_id,
        };
        self.fanout.notify(conversation_id, Some(actor_id), &event).await;
        Ok(membership)
    }

    pub async fn remove_participant(
        &self,
        conversation_id: Uuid,
        actor_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Membership> {
        let conversation = self.load(conversation_id).await?;
        if conversation.is_direct() {
            return Err(AppError::InvalidOperation(
                "direct conversations have a fixed roster".into(),
            ));
        }
        let target = self
            .repo
            .membership(conversation_id, user_id)
            .await?
            .filter(|m| m.is_active)
            .ok_or(AppError::NotFound)?;

        if actor_id != user_id {
            let actor = self
                .repo
                .membership(conversation_id, actor_id)
                .await?
                .filter(|m| m.is_active)
                .ok_or(AppError::Forbidden)?;
            if !actor.permissions.can_remove_members || !actor.role.can_manage(target.role) {
                return Err(AppError::Forbidden);
            }
        }

        let _lane = self.fanout.lane(conversation_id).await;
        let removed = self
            .repo
            .deactivate_member(conversation_id, user_id, Utc::now())
            .await?
            .ok_or(AppError::NotFound)?;
        tracing::info!(
            conversation_id = %conversation_id,
            user_id = %user_id,
            actor_id = %actor_id,
            "participant removed"
        );

        let event = ServerEvent::ParticipantRemoved {
            conversation_id,
            user_id,
            removed_by: actor_id,
        };
        self.fanout.notify(conversation_id, Some(actor_id), &event).await;
        if actor_id != user_id {
            self.fanout.notify_users(&[user_id], &event).await;
        }
        Ok(removed)
    }

    pub async fn update_role(
        &self,
        conversation_id: Uuid,
        actor_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
    ) -> AppResult<Membership> {
        let conversation = self.load(conversation_id).await?;
        if conversation.is_direct() {
            return Err(AppError::InvalidOperation(
                "roles do not apply to direct conversations".into(),
            ));
        }
        let actor = self.require_active_member(conversation_id, actor_id).await?;
        if !actor.role.is_privileged() {
            return Err(AppError::Forbidden);
        }
        if actor_id == user_id {
            return Err(AppError::InvalidOperation("cannot change your own role".into()));
        }
        let target = self
            .repo
            .set_member_role(conversation_id, user_id, role)
            .await?
            .ok_or(AppError::NotFound)?;
        tracing::info!(
            conversation_id = %conversation_id,
            user_id = %user_id,
            role = %role,
            "member role updated"
        );
        Ok(target)
    }

    /// Overwrite the list preview; never validates the message.
    pub async fn update_last_message(
        &self,
        conversation_id: Uuid,
        message: &Message,
    ) -> AppResult<()> {
        self.repo
            .update_last_message(conversation_id, LastMessagePreview::from_message(message))
            .await
    }

    pub async fn find_user_conversations(
        &self,
        user_id: Uuid,
        filter: ConversationFilter,
    ) -> AppResult<Vec<Conversation>> {
        let filter = filter.normalized();
        self.repo.list_for_user(user_id, &filter).await
    }

    pub async fn archive(&self, conversation_id: Uuid, actor_id: Uuid) -> AppResult<Conversation> {
        self.set_archived(conversation_id, actor_id, Some(Utc::now()))
            .await
    }

    pub async fn unarchive(
        &self,
        conversation_id: Uuid,
        actor_id: Uuid,
    ) -> AppResult<Conversation> {
        self.set_archived(conversation_id, actor_id, None).await
    }

    pub async fn set_muted(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        muted: bool,
        until: Option<DateTime<Utc>>,
    ) -> AppResult<Membership> {
        if let Some(until) = until {
            if until <= Utc::now() {
                return Err(AppError::Validation("mute expiry is in the past".into()));
            }
        }
        self.repo
            .set_member_mute(conversation_id, user_id, muted, until)
            .await?
            .ok_or(AppError::NotAParticipant)
    }

    pub async fn request_join(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        message: Option<String>,
    ) -> AppResult<JoinRequest> {
        let conversation = self.load(conversation_id).await?;
        if conversation.is_direct() {
            return Err(AppError::InvalidOperation(
                "direct conversations cannot be joined".into(),
            ));
        }
        if self
            .repo
            .membership(conversation_id, user_id)
            .await?
            .is_some_and(|m| m.is_active)
        {
            return Err(AppError::DuplicateOperation("already a participant".into()));
        }
        let message = message
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());
        if message
            .as_ref()
            .is_some_and(|m| m.chars().count() > MAX_JOIN_NOTE_CHARS)
        {
            return Err(AppError::Validation("join note is too long".into()));
        }

        let request = JoinRequest {
            conversation_id,
            user_id,
            message,
            requested_at: Utc::now(),
        };
        if !self.repo.save_join_request(&request).await? {
            return Err(AppError::DuplicateOperation("join request pending".into()));
        }
        Ok(request)
    }

    /// Approve or reject a pending request. Returns the membership on approval.
    pub async fn resolve_join_request(
        &self,
        conversation_id: Uuid,
        actor_id: Uuid,
        user_id: Uuid,
        approve: bool,
    ) -> AppResult<Option<Membership>> {
        self.load(conversation_id).await?;
        self.repo
            .membership(conversation_id, actor_id)
            .await?
            .filter(|m| m.is_active && m.permissions.can_add_members)
            .ok_or(AppError::Forbidden)?;

        self.repo
            .take_join_request(conversation_id, user_id)
            .await?
            .ok_or(AppError::NotFound)?;
        if !approve {
            tracing::info!(conversation_id = %conversation_id, user_id = %user_id, "join request rejected");
            return Ok(None);
        }

        let membership = self.admit(conversation_id, user_id, MemberRole::Member).await?;
        let event = ServerEvent::ParticipantAdded {
            conversation_id,
            user_id,
            role: membership.role,
            added_by: actor_id,
        };
        self.fanout.notify(conversation_id, Some(actor_id), &event).await;
        Ok(Some(membership))
    }

    pub async fn contacts_of(&self, user_id: Uuid) -> AppResult<Vec<Uuid>> {
        self.repo.contacts_of(user_id).await
    }

    async fn load(&self, conversation_id: Uuid) -> AppResult<Conversation> {
        self.repo
            .get(conversation_id)
            .await?
            .ok_or(AppError::NotFound)
    }

    /// Reactivate a former member or insert a new one
    async fn admit(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
    ) -> AppResult<Membership> {
        let now = Utc::now();
        let admitted = match self.repo.membership(conversation_id, user_id).await? {
            Some(m) if m.is_active => None,
            Some(_) => {
                self.repo
                    .reactivate_member(conversation_id, user_id, role, now)
                    .await?
            }
            None => {
                let membership = Membership::new(conversation_id, user_id, role, now);
                self.repo
                    .add_member(&membership)
                    .await?
                    .then_some(membership)
            }
        };
        admitted.ok_or_else(|| AppError::DuplicateOperation("already a participant".into()))
    }

    async fn set_archived(
        &self,
        conversation_id: Uuid,
        actor_id: Uuid,
        archived_at: Option<DateTime<Utc>>,
    ) -> AppResult<Conversation> {
        let conversation = self.load(conversation_id).await?;
        let actor = self.require_active_member(conversation_id, actor_id).await?;
        if !conversation.is_direct() && !actor.permissions.can_edit_info {
            return Err(AppError::Forbidden);
        }
        self.repo.set_archived(conversation_id, archived_at).await?;
        self.load(conversation_id).await
    }
}
