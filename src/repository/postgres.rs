use super::{ConversationRepository, MessageRepository};
use crate::error::{AppError, AppResult};
use crate::models::{
    Attachment, Conversation, ConversationFilter, ConversationKind, JoinRequest,
    LastMessagePreview, MemberPermissions, MemberRole, Membership, Message, MessageContent,
    MessageType, NewMessage, RecipientState,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Pool, Transaction};
use std::collections::HashSet;
use tokio_postgres::types::{Json, ToSql};
use tokio_postgres::Row;
use uuid::Uuid;

const CONVERSATION_COLUMNS: &str = "id, kind, name, description, direct_lo, direct_hi, \
     created_by, created_at, last_activity, last_message_id, last_message_content, \
     last_message_type, last_message_sender, last_message_at, message_count, member_count, \
     is_archived, archived_at";

const MEMBER_COLUMNS: &str = "conversation_id, user_id, role, is_active, joined_at, left_at, \
     left_at_sequence, is_muted, muted_until, last_read_message_id, last_read_sequence, last_read_at, \
     can_send_messages, can_add_members, can_remove_members, can_edit_info, \
     can_delete_others_messages";

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, sequence_number, message_type, \
     content_text, attachment, reply_to, client_message_id, created_at, is_edited, edited_at, \
     deleted_for_everyone, deleted_at";

const RECEIPT_COLUMNS: &str = "message_id, user_id, delivered_at, read_at";

/// PostgreSQL-backed store shared by both repository traits
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    async fn fetch_conversation(&self, conversation_id: Uuid) -> AppResult<Option<Conversation>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1"),
                &[&conversation_id],
            )
            .await?;
        row.as_ref().map(conversation_from_row).transpose()
    }

    async fn fetch_message(&self, message_id: Uuid) -> AppResult<Option<Message>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"),
                &[&message_id],
            )
            .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    /// Run a single-row `UPDATE ... RETURNING` on `conversation_members`,
    /// refreshing `member_count` in the same transaction when asked.
    async fn update_member(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
        conversation_id: Uuid,
        refresh_count: bool,
    ) -> AppResult<Option<Membership>> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let row = tx.query_opt(sql, params).await?;
        let updated = row.as_ref().map(membership_from_row).transpose()?;
        if updated.is_some() && refresh_count {
            refresh_member_count(&tx, conversation_id).await?;
        }
        tx.commit().await?;
        Ok(updated)
    }
}

fn conversation_from_row(row: &Row) -> AppResult<Conversation> {
    let kind: String = row.try_get("kind")?;
    let kind = ConversationKind::from_db(&kind)
        .ok_or_else(|| AppError::Database(format!("unknown conversation kind {kind}")))?;

    let direct_participants = match (
        row.try_get::<_, Option<Uuid>>("direct_lo")?,
        row.try_get::<_, Option<Uuid>>("direct_hi")?,
    ) {
        (Some(lo), Some(hi)) => vec![lo, hi],
        _ => Vec::new(),
    };

    let last_message = match row.try_get::<_, Option<Uuid>>("last_message_id")? {
        Some(message_id) => {
            let message_type: Option<String> = row.try_get("last_message_type")?;
            Some(LastMessagePreview {
                message_id,
                content: row
                    .try_get::<_, Option<String>>("last_message_content")?
                    .unwrap_or_default(),
                message_type: message_type
                    .as_deref()
                    .and_then(MessageType::from_db)
                    .unwrap_or(MessageType::Text),
                sender_id: row.try_get("last_message_sender")?,
                created_at: row.try_get("last_message_at")?,
            })
        }
        None => None,
    };

    Ok(Conversation {
        id: row.try_get("id")?,
        kind,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        direct_participants,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        last_activity: row.try_get("last_activity")?,
        last_message,
        message_count: row.try_get("message_count")?,
        member_count: row.try_get("member_count")?,
        is_archived: row.try_get("is_archived")?,
        archived_at: row.try_get("archived_at")?,
    })
}

fn membership_from_row(row: &Row) -> AppResult<Membership> {
    let role: String = row.try_get("role")?;
    Ok(Membership {
        conversation_id: row.try_get("conversation_id")?,
        user_id: row.try_get("user_id")?,
        role: MemberRole::from_db(&role).unwrap_or(MemberRole::Member),
        is_active: row.try_get("is_active")?,
        joined_at: row.try_get("joined_at")?,
        left_at: row.try_get("left_at")?,
        left_at_sequence: row.try_get("left_at_sequence")?,
        is_muted: row.try_get("is_muted")?,
        muted_until: row.try_get("muted_until")?,
        last_read_message_id: row.try_get("last_read_message_id")?,
        last_read_sequence: row.try_get("last_read_sequence")?,
        last_read_at: row.try_get("last_read_at")?,
        permissions: MemberPermissions {
            can_send_messages: row.try_get("can_send_messages")?,
            can_add_members: row.try_get("can_add_members")?,
            can_remove_members: row.try_get("can_remove_members")?,
            can_edit_info: row.try_get("can_edit_info")?,
            can_delete_others_messages: row.try_get("can_delete_others_messages")?,
        },
    })
}

fn message_from_row(row: &Row) -> AppResult<Message> {
    let message_type: String = row.try_get("message_type")?;
    let attachment: Option<Json<Attachment>> = row.try_get("attachment")?;
    Ok(Message {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        sender_id: row.try_get("sender_id")?,
        sequence_number: row.try_get("sequence_number")?,
        content: MessageContent {
            text: row.try_get("content_text")?,
            attachment: attachment.map(|Json(a)| a),
        },
        message_type: MessageType::from_db(&message_type).unwrap_or(MessageType::Text),
        reply_to: row.try_get("reply_to")?,
        client_message_id: row.try_get("client_message_id")?,
        created_at: row.try_get("created_at")?,
        is_edited: row.try_get("is_edited")?,
        edited_at: row.try_get("edited_at")?,
        deleted_for_everyone: row.try_get("deleted_for_everyone")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn receipt_from_row(row: &Row) -> AppResult<RecipientState> {
    Ok(RecipientState::from_timestamps(
        row.try_get("message_id")?,
        row.try_get("user_id")?,
        row.try_get("delivered_at")?,
        row.try_get("read_at")?,
    ))
}

async fn insert_conversation_row(
    tx: &Transaction<'_>,
    conversation: &Conversation,
    skip_existing: bool,
) -> AppResult<bool> {
    let (lo, hi) = match conversation.direct_participants.as_slice() {
        [lo, hi] => (Some(*lo), Some(*hi)),
        _ => (None, None),
    };
    let conflict = if skip_existing {
        "ON CONFLICT (id) DO NOTHING"
    } else {
        ""
    };
    let inserted = tx
        .execute(
            &format!(
                r#"
                INSERT INTO conversations (
                    id, kind, name, description, direct_lo, direct_hi,
                    created_by, created_at, last_activity, message_count, member_count,
                    is_archived, archived_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0, 0, FALSE, NULL)
                {conflict}
                "#
            ),
            &[
                &conversation.id,
                &conversation.kind.to_db(),
                &conversation.name,
                &conversation.description,
                &lo,
                &hi,
                &conversation.created_by,
                &conversation.created_at,
                &conversation.last_activity,
            ],
        )
        .await?;
    Ok(inserted == 1)
}

/// Plain insert; an existing row for the pair is left untouched.
async fn insert_membership(tx: &Transaction<'_>, m: &Membership) -> AppResult<bool> {
    let inserted = tx
        .execute(
            &format!(
                r#"
                INSERT INTO conversation_members ({MEMBER_COLUMNS})
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
                ON CONFLICT (conversation_id, user_id) DO NOTHING
                "#
            ),
            &[
                &m.conversation_id,
                &m.user_id,
                &m.role.to_db(),
                &m.is_active,
                &m.joined_at,
                &m.left_at,
                &m.left_at_sequence,
                &m.is_muted,
                &m.muted_until,
                &m.last_read_message_id,
                &m.last_read_sequence,
                &m.last_read_at,
                &m.permissions.can_send_messages,
                &m.permissions.can_add_members,
                &m.permissions.can_remove_members,
                &m.permissions.can_edit_info,
                &m.permissions.can_delete_others_messages,
            ],
        )
        .await?;
    Ok(inserted == 1)
}

async fn write_preview(
    tx: &Transaction<'_>,
    conversation_id: Uuid,
    preview: &LastMessagePreview,
    count_message: bool,
) -> AppResult<()> {
    let updated = tx
        .execute(
            r#"
            UPDATE conversations
            SET message_count = message_count + CASE WHEN $7 THEN 1 ELSE 0 END,
                last_message_id = $2,
                last_message_content = $3,
                last_message_type = $4,
                last_message_sender = $5,
                last_message_at = $6,
                last_activity = GREATEST(last_activity, $6)
            WHERE id = $1
            "#,
            &[
                &conversation_id,
                &preview.message_id,
                &preview.content,
                &preview.message_type.to_db(),
                &preview.sender_id,
                &preview.created_at,
                &count_message,
            ],
        )
        .await?;
    if updated == 0 {
        return Err(AppError::NotFound);
    }
    Ok(())
}

async fn refresh_member_count(tx: &Transaction<'_>, conversation_id: Uuid) -> AppResult<()> {
    tx.execute(
        r#"
        UPDATE conversations
        SET member_count = (
            SELECT COUNT(*) FROM conversation_members
            WHERE conversation_id = $1 AND is_active
        )
        WHERE id = $1
        "#,
        &[&conversation_id],
    )
    .await?;
    Ok(())
}

#[async_trait]
impl ConversationRepository for PgStore {
    async fn insert_direct(
        &self,
        conversation: Conversation,
        members: Vec<Membership>,
    ) -> AppResult<(Conversation, bool)> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let created = insert_conversation_row(&tx, &conversation, true).await?;
        if created {
            for m in &members {
                insert_membership(&tx, m).await?;
            }
            refresh_member_count(&tx, conversation.id).await?;
        }
        tx.commit().await?;
        drop(client);

        let stored = self
            .fetch_conversation(conversation.id)
            .await?
            .ok_or(AppError::Internal)?;
        Ok((stored, created))
    }

    async fn insert(
        &self,
        conversation: Conversation,
        members: Vec<Membership>,
    ) -> AppResult<Conversation> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        insert_conversation_row(&tx, &conversation, false).await?;
        for m in &members {
            insert_membership(&tx, m).await?;
        }
        refresh_member_count(&tx, conversation.id).await?;
        tx.commit().await?;
        drop(client);

        self.fetch_conversation(conversation.id)
            .await?
            .ok_or(AppError::Internal)
    }

    async fn get(&self, conversation_id: Uuid) -> AppResult<Option<Conversation>> {
        self.fetch_conversation(conversation_id).await
    }

    async fn membership(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Option<Membership>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {MEMBER_COLUMNS} FROM conversation_members \
                     WHERE conversation_id = $1 AND user_id = $2"
                ),
                &[&conversation_id, &user_id],
            )
            .await?;
        row.as_ref().map(membership_from_row).transpose()
    }

    async fn members(&self, conversation_id: Uuid) -> AppResult<Vec<Membership>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {MEMBER_COLUMNS} FROM conversation_members \
                     WHERE conversation_id = $1 ORDER BY user_id"
                ),
                &[&conversation_id],
            )
            .await?;
        rows.iter().map(membership_from_row).collect()
    }

    async fn active_member_ids(&self, conversation_id: Uuid) -> AppResult<Vec<Uuid>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT user_id FROM conversation_members \
                 WHERE conversation_id = $1 AND is_active ORDER BY user_id",
                &[&conversation_id],
            )
            .await?;
        rows.iter()
            .map(|r| r.try_get(0).map_err(AppError::from))
            .collect()
    }

    async fn add_member(&self, membership: &Membership) -> AppResult<bool> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let inserted = insert_membership(&tx, membership).await?;
        if inserted {
            refresh_member_count(&tx, membership.conversation_id).await?;
        }
        tx.commit().await?;
        Ok(inserted)
    }

    async fn reactivate_member(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Membership>> {
        let p = MemberPermissions::for_role(role);
        let sql = format!(
            r#"
            UPDATE conversation_members
            SET is_active = TRUE, joined_at = $3, left_at = NULL, left_at_sequence = NULL,
                role = $4, can_send_messages = $5, can_add_members = $6,
                can_remove_members = $7, can_edit_info = $8, can_delete_others_messages = $9
            WHERE conversation_id = $1 AND user_id = $2 AND NOT is_active
            RETURNING {MEMBER_COLUMNS}
            "#
        );
        self.update_member(
            &sql,
            &[
                &conversation_id,
                &user_id,
                &at,
                &role.to_db(),
                &p.can_send_messages,
                &p.can_add_members,
                &p.can_remove_members,
                &p.can_edit_info,
                &p.can_delete_others_messages,
            ],
            conversation_id,
            true,
        )
        .await
    }

    async fn deactivate_member(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<Option<Membership>> {
        let sql = format!(
            r#"
            UPDATE conversation_members
            SET is_active = FALSE, left_at = $3,
                left_at_sequence = COALESCE(
                    (SELECT last_seq FROM conversation_counters WHERE conversation_id = $1),
                    0
                )
            WHERE conversation_id = $1 AND user_id = $2 AND is_active
            RETURNING {MEMBER_COLUMNS}
            "#
        );
        self.update_member(&sql, &[&conversation_id, &user_id, &at], conversation_id, true)
            .await
    }

    async fn set_member_role(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
    ) -> AppResult<Option<Membership>> {
        let p = MemberPermissions::for_role(role);
        let sql = format!(
            r#"
            UPDATE conversation_members
            SET role = $3, can_send_messages = $4, can_add_members = $5,
                can_remove_members = $6, can_edit_info = $7, can_delete_others_messages = $8
            WHERE conversation_id = $1 AND user_id = $2 AND is_active
            RETURNING {MEMBER_COLUMNS}
            "#
        );
        self.update_member(
            &sql,
            &[
                &conversation_id,
                &user_id,
                &role.to_db(),
                &p.can_send_messages,
                &p.can_add_members,
                &p.can_remove_members,
                &p.can_edit_info,
                &p.can_delete_others_messages,
            ],
            conversation_id,
            false,
        )
        .await
    }

    async fn set_member_mute(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        muted: bool,
        until: Option<DateTime<Utc>>,
    ) -> AppResult<Option<Membership>> {
        let until = if muted { until } else { None };
        let sql = format!(
            r#"
            UPDATE conversation_members
            SET is_muted = $3, muted_until = $4
            WHERE conversation_id = $1 AND user_id = $2 AND is_active
            RETURNING {MEMBER_COLUMNS}
            "#
        );
        self.update_member(
            &sql,
            &[&conversation_id, &user_id, &muted, &until],
            conversation_id,
            false,
        )
        .await
    }

    async fn advance_read_pointer(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        message_id: Uuid,
        sequence: i64,
        at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                r#"
                UPDATE conversation_members
                SET last_read_message_id = $3, last_read_sequence = $4, last_read_at = $5
                WHERE conversation_id = $1 AND user_id = $2 AND last_read_sequence < $4
                "#,
                &[&conversation_id, &user_id, &message_id, &sequence, &at],
            )
            .await?;
        Ok(updated == 1)
    }

    async fn update_last_message(
        &self,
        conversation_id: Uuid,
        preview: LastMessagePreview,
    ) -> AppResult<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        write_preview(&tx, conversation_id, &preview, false).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn set_archived(
        &self,
        conversation_id: Uuid,
        archived_at: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                "UPDATE conversations SET is_archived = $2, archived_at = $3 WHERE id = $1",
                &[&conversation_id, &archived_at.is_some(), &archived_at],
            )
            .await?;
        if updated == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        filter: &ConversationFilter,
    ) -> AppResult<Vec<Conversation>> {
        let client = self.pool.get().await?;
        let kind = filter.kind.map(|k| k.to_db());
        let limit = filter.limit as i64;
        let offset = filter.skip as i64;
        let rows = client
            .query(
                &format!(
                    r#"
                    SELECT {CONVERSATION_COLUMNS} FROM conversations
                    WHERE id IN (
                        SELECT conversation_id FROM conversation_members
                        WHERE user_id = $1 AND is_active
                    )
                    AND ($2::TEXT IS NULL OR kind = $2)
                    AND ($3 OR NOT is_archived)
                    ORDER BY last_activity DESC, id
                    LIMIT $4 OFFSET $5
                    "#
                ),
                &[&user_id, &kind, &filter.include_archived, &limit, &offset],
            )
            .await?;
        rows.iter().map(conversation_from_row).collect()
    }

    async fn contacts_of(&self, user_id: Uuid) -> AppResult<Vec<Uuid>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                SELECT DISTINCT other.user_id
                FROM conversation_members me
                JOIN conversation_members other ON other.conversation_id = me.conversation_id
                WHERE me.user_id = $1 AND me.is_active
                  AND other.is_active AND other.user_id <> $1
                ORDER BY other.user_id
                "#,
                &[&user_id],
            )
            .await?;
        rows.iter()
            .map(|r| r.try_get(0).map_err(AppError::from))
            .collect()
    }

    async fn save_join_request(&self, request: &JoinRequest) -> AppResult<bool> {
        let client = self.pool.get().await?;
        let inserted = client
            .execute(
                r#"
                INSERT INTO conversation_join_requests (conversation_id, user_id, message, requested_at)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (conversation_id, user_id) DO NOTHING
                "#,
                &[
                    &request.conversation_id,
                    &request.user_id,
                    &request.message,
                    &request.requested_at,
                ],
            )
            .await?;
        Ok(inserted == 1)
    }

    async fn take_join_request(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Option<JoinRequest>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                DELETE FROM conversation_join_requests
                WHERE conversation_id = $1 AND user_id = $2
                RETURNING conversation_id, user_id, message, requested_at
                "#,
                &[&conversation_id, &user_id],
            )
            .await?;
        row.map(|r| {
            Ok(JoinRequest {
                conversation_id: r.try_get(0)?,
                user_id: r.try_get(1)?,
                message: r.try_get(2)?,
                requested_at: r.try_get(3)?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl MessageRepository for PgStore {
    async fn insert(&self, message: NewMessage, recipients: &[Uuid]) -> AppResult<Message> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let message_type = message.content.message_type();
        let attachment = message.content.attachment.clone().map(Json);
        let row = tx
            .query_one(
                &format!(
                    r#"
                    WITH next AS (
                        INSERT INTO conversation_counters (conversation_id, last_seq)
                        VALUES ($2, 1)
                        ON CONFLICT (conversation_id)
                        DO UPDATE SET last_seq = conversation_counters.last_seq + 1
                        RETURNING last_seq
                    )
                    INSERT INTO messages (
                        id, conversation_id, sender_id, sequence_number, message_type,
                        content_text, attachment, reply_to, client_message_id, created_at
                    )
                    SELECT $1, $2, $3, next.last_seq, $4, $5, $6, $7, $8, $9
                    FROM next
                    RETURNING {MESSAGE_COLUMNS}
                    "#
                ),
                &[
                    &message.id,
                    &message.conversation_id,
                    &message.sender_id,
                    &message_type.to_db(),
                    &message.content.text,
                    &attachment,
                    &message.reply_to,
                    &message.client_message_id,
                    &message.created_at,
                ],
            )
            .await?;
        let stored = message_from_row(&row)?;

        let targets: Vec<Uuid> = recipients
            .iter()
            .copied()
            .filter(|u| *u != stored.sender_id)
            .collect();
        if !targets.is_empty() {
            tx.execute(
                r#"
                INSERT INTO message_receipts (message_id, user_id)
                SELECT $1, unnest($2::UUID[])
                ON CONFLICT DO NOTHING
                "#,
                &[&stored.id, &targets],
            )
            .await?;
        }
        write_preview(
            &tx,
            stored.conversation_id,
            &LastMessagePreview::from_message(&stored),
            true,
        )
        .await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn find_by_client_id(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        client_message_id: &str,
    ) -> AppResult<Option<Message>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages \
                     WHERE conversation_id = $1 AND sender_id = $2 AND client_message_id = $3"
                ),
                &[&conversation_id, &sender_id, &client_message_id],
            )
            .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn get(&self, message_id: Uuid) -> AppResult<Option<Message>> {
        self.fetch_message(message_id).await
    }

    async fn get_many(&self, message_ids: &[Uuid]) -> AppResult<Vec<Message>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ANY($1)"),
                &[&message_ids],
            )
            .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn page_before(
        &self,
        conversation_id: Uuid,
        before_sequence: Option<i64>,
        limit: usize,
    ) -> AppResult<Vec<Message>> {
        let client = self.pool.get().await?;
        let before = before_sequence.unwrap_or(i64::MAX);
        let limit = limit as i64;
        let rows = client
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages \
                     WHERE conversation_id = $1 AND sequence_number < $2 \
                     ORDER BY sequence_number DESC LIMIT $3"
                ),
                &[&conversation_id, &before, &limit],
            )
            .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn page_after(
        &self,
        conversation_id: Uuid,
        after_sequence: i64,
        limit: usize,
    ) -> AppResult<Vec<Message>> {
        let client = self.pool.get().await?;
        let limit = limit as i64;
        let rows = client
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages \
                     WHERE conversation_id = $1 AND sequence_number > $2 \
                     ORDER BY sequence_number ASC LIMIT $3"
                ),
                &[&conversation_id, &after_sequence, &limit],
            )
            .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn receipt(
        &self,
        message_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Option<RecipientState>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {RECEIPT_COLUMNS} FROM message_receipts \
                     WHERE message_id = $1 AND user_id = $2"
                ),
                &[&message_id, &user_id],
            )
            .await?;
        row.as_ref().map(receipt_from_row).transpose()
    }

    async fn receipts(&self, message_ids: &[Uuid]) -> AppResult<Vec<RecipientState>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {RECEIPT_COLUMNS} FROM message_receipts \
                     WHERE message_id = ANY($1) ORDER BY message_id, user_id"
                ),
                &[&message_ids],
            )
            .await?;
        rows.iter().map(receipt_from_row).collect()
    }

    async fn mark_delivered(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<Option<RecipientState>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    r#"
                    UPDATE message_receipts SET delivered_at = $3
                    WHERE message_id = $1 AND user_id = $2 AND delivered_at IS NULL
                    RETURNING {RECEIPT_COLUMNS}
                    "#
                ),
                &[&message_id, &user_id, &at],
            )
            .await?;
        row.as_ref().map(receipt_from_row).transpose()
    }

    async fn mark_read(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> AppResult<Option<RecipientState>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    r#"
                    UPDATE message_receipts
                    SET delivered_at = COALESCE(delivered_at, $3),
                        read_at = GREATEST($3, COALESCE(delivered_at, $3))
                    WHERE message_id = $1 AND user_id = $2 AND read_at IS NULL
                    RETURNING {RECEIPT_COLUMNS}
                    "#
                ),
                &[&message_id, &user_id, &at],
            )
            .await?;
        row.as_ref().map(receipt_from_row).transpose()
    }

    async fn mark_read_up_to(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        up_to_sequence: i64,
        at: DateTime<Utc>,
    ) -> AppResult<Vec<RecipientState>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                r#"
                UPDATE message_receipts r
                SET delivered_at = COALESCE(r.delivered_at, $4),
                    read_at = GREATEST($4, COALESCE(r.delivered_at, $4))
                FROM messages m
                WHERE m.id = r.message_id
                  AND m.conversation_id = $1
                  AND m.sequence_number <= $3
                  AND r.user_id = $2
                  AND r.read_at IS NULL
                RETURNING r.message_id, r.user_id, r.delivered_at, r.read_at
                "#,
                &[&conversation_id, &user_id, &up_to_sequence, &at],
            )
            .await?;
        rows.iter().map(receipt_from_row).collect()
    }

    async fn toggle_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> AppResult<bool> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;
        let removed = tx
            .execute(
                "DELETE FROM message_reactions WHERE message_id = $1 AND user_id = $2 AND emoji = $3",
                &[&message_id, &user_id, &emoji],
            )
            .await?;
        if removed == 0 {
            tx.execute(
                r#"
                INSERT INTO message_reactions (message_id, user_id, emoji)
                VALUES ($1, $2, $3)
                ON CONFLICT DO NOTHING
                "#,
                &[&message_id, &user_id, &emoji],
            )
            .await?;
        }
        tx.commit().await?;
        Ok(removed == 0)
    }

    async fn reactions(&self, message_ids: &[Uuid]) -> AppResult<Vec<(Uuid, Uuid, String)>> {
        if message_ids.is_empty() {
            return Ok(Vec::new());
        }
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT message_id, user_id, emoji FROM message_reactions \
                 WHERE message_id = ANY($1) ORDER BY created_at",
                &[&message_ids],
            )
            .await?;
        rows.iter()
            .map(|r| Ok((r.try_get(0)?, r.try_get(1)?, r.try_get(2)?)))
            .collect()
    }

    async fn hide_for_user(&self, message_id: Uuid, user_id: Uuid) -> AppResult<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO message_hidden (message_id, user_id) VALUES ($1, $2) \
                 ON CONFLICT DO NOTHING",
                &[&message_id, &user_id],
            )
            .await?;
        Ok(())
    }

    async fn hidden_for_user(
        &self,
        user_id: Uuid,
        message_ids: &[Uuid],
    ) -> AppResult<HashSet<Uuid>> {
        if message_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT message_id FROM message_hidden WHERE user_id = $1 AND message_id = ANY($2)",
                &[&user_id, &message_ids],
            )
            .await?;
        rows.iter()
            .map(|r| r.try_get(0).map_err(AppError::from))
            .collect()
    }

    async fn tombstone(&self, message_id: Uuid, at: DateTime<Utc>) -> AppResult<Option<Message>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                &format!(
                    r#"
                    UPDATE messages
                    SET deleted_for_everyone = TRUE, deleted_at = $2,
                        content_text = NULL, attachment = NULL
                    WHERE id = $1 AND NOT deleted_for_everyone
                    RETURNING {MESSAGE_COLUMNS}
                    "#
                ),
                &[&message_id, &at],
            )
            .await?;
        drop(client);
        match row {
            Some(row) => message_from_row(&row).map(Some),
            None => match self.fetch_message(message_id).await? {
                Some(_) => Ok(None),
                None => Err(AppError::NotFound),
            },
        }
    }

    async fn update_content(
        &self,
        message_id: Uuid,
        content: MessageContent,
        at: DateTime<Utc>,
    ) -> AppResult<Message> {
        let client = self.pool.get().await?;
        let attachment = content.attachment.clone().map(Json);
        let row = client
            .query_opt(
                &format!(
                    r#"
                    UPDATE messages
                    SET content_text = $2, attachment = $3, message_type = $4,
                        is_edited = TRUE, edited_at = $5
                    WHERE id = $1 AND NOT deleted_for_everyone
                    RETURNING {MESSAGE_COLUMNS}
                    "#
                ),
                &[
                    &message_id,
                    &content.text,
                    &attachment,
                    &content.message_type().to_db(),
                    &at,
                ],
            )
            .await?;
        drop(client);
        match row {
            Some(row) => message_from_row(&row),
            None => match self.fetch_message(message_id).await? {
                Some(_) => Err(AppError::InvalidState("message was deleted".into())),
                None => Err(AppError::NotFound),
            },
        }
    }
}
