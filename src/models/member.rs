//! Conversation membership records
//!
//! Memberships live in their own table keyed by `(conversation_id, user_id)`
//! so roster mutations touch a single row instead of rewriting the whole
//! conversation. Records are never deleted: leaving flips `is_active` and
//! stamps `left_at`, which keeps historical read receipts attributable.
//!
//! Roles have a natural ordering: Member < Moderator < Admin

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Member role in a conversation with natural hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    /// Regular member - can send messages
    Member = 0,
    /// Moderator - can delete others' messages and remove members
    Moderator = 1,
    /// Admin - can manage members, roles and conversation info
    Admin = 2,
}

impl MemberRole {
    /// Parse role from database string
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "member" => Some(Self::Member),
            "moderator" => Some(Self::Moderator),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    /// Convert role to database string
    pub fn to_db(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Moderator => "moderator",
            Self::Admin => "admin",
        }
    }

    /// You can only manage roles strictly below yours
    pub fn can_manage(&self, target: MemberRole) -> bool {
        *self > target
    }

    pub fn is_privileged(&self) -> bool {
        *self >= MemberRole::Admin
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db())
    }
}

impl std::str::FromStr for MemberRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db(&s.to_ascii_lowercase()).ok_or_else(|| format!("Invalid role: {}", s))
    }
}

/// Granular permission flags carried by each membership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberPermissions {
    pub can_send_messages: bool,
    pub can_add_members: bool,
    pub can_remove_members: bool,
    pub can_edit_info: bool,
    pub can_delete_others_messages: bool,
}

impl MemberPermissions {
    pub fn for_role(role: MemberRole) -> Self {
        match role {
            MemberRole::Member => Self {
                can_send_messages: true,
                can_add_members: false,
                can_remove_members: false,
                can_edit_info: false,
                can_delete_others_messages: false,
            },
            MemberRole::Moderator => Self {
                can_send_messages: true,
                can_add_members: true,
                can_remove_members: true,
                can_edit_info: false,
                can_delete_others_messages: true,
            },
            MemberRole::Admin => Self {
                can_send_messages: true,
                can_add_members: true,
                can_remove_members: true,
                can_edit_info: true,
                can_delete_others_messages: true,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub role: MemberRole,
    pub is_active: bool,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
    /// Last sequence number of the conversation when the member left
    pub left_at_sequence: Option<i64>,
    pub is_muted: bool,
    pub muted_until: Option<DateTime<Utc>>,
    pub last_read_message_id: Option<Uuid>,
    /// Sequence number of `last_read_message_id`, 0 when nothing was read
    pub last_read_sequence: i64,
    pub last_read_at: Option<DateTime<Utc>>,
    pub permissions: MemberPermissions,
}

impl Membership {
    pub fn new(conversation_id: Uuid, user_id: Uuid, role: MemberRole, now: DateTime<Utc>) -> Self {
        Self {
            conversation_id,
            user_id,
            role,
            is_active: true,
            joined_at: now,
            left_at: None,
            left_at_sequence: None,
            is_muted: false,
            muted_until: None,
            last_read_message_id: None,
            last_read_sequence: 0,
            last_read_at: None,
            permissions: MemberPermissions::for_role(role),
        }
    }

    /// Bring a previously departed member back. The read pointer is kept.
    pub fn reactivate(&mut self, role: MemberRole, now: DateTime<Utc>) {
        self.is_active = true;
        self.joined_at = now;
        self.left_at = None;
        self.left_at_sequence = None;
        self.set_role(role);
    }

    /// `last_sequence` caps what the former member can still page through.
    pub fn deactivate(&mut self, now: DateTime<Utc>, last_sequence: i64) {
        self.is_active = false;
        self.left_at = Some(now);
        self.left_at_sequence = Some(last_sequence);
    }

    /// Exclusive upper bound for a history page requested with `requested`.
    pub fn history_bound(&self, requested: Option<i64>) -> Option<i64> {
        match self.left_at_sequence.filter(|_| !self.is_active) {
            Some(last) => Some(requested.map_or(last + 1, |before| before.min(last + 1))),
            None => requested,
        }
    }

    pub fn set_role(&mut self, role: MemberRole) {
        self.role = role;
        self.permissions = MemberPermissions::for_role(role);
    }

    /// A mute with an expiry stops applying once `muted_until` has passed.
    pub fn is_muted_at(&self, now: DateTime<Utc>) -> bool {
        self.is_muted && self.muted_until.map_or(true, |until| until > now)
    }

    /// Moves the last-read pointer forward; returns false for stale updates.
    pub fn advance_read_pointer(
        &mut self,
        message_id: Uuid,
        sequence: i64,
        at: DateTime<Utc>,
    ) -> bool {
        if sequence <= self.last_read_sequence {
            return false;
        }
        self.last_read_message_id = Some(message_id);
        self.last_read_sequence = sequence;
        self.last_read_at = Some(at);
        true
    }
}

/// Pending request to join a group or channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
    pub message: Option<String>,
    pub requested_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_role_ordering() {
        assert!(MemberRole::Admin > MemberRole::Moderator);
        assert!(MemberRole::Moderator > MemberRole::Member);
        assert!(MemberRole::Admin.can_manage(MemberRole::Moderator));
        assert!(!MemberRole::Moderator.can_manage(MemberRole::Moderator));
        assert!(!MemberRole::Member.can_manage(MemberRole::Member));
    }

    #[test]
    fn test_role_from_str() {
        assert_eq!("ADMIN".parse::<MemberRole>().unwrap(), MemberRole::Admin);
        assert!("owner".parse::<MemberRole>().is_err());
    }

    #[test]
    fn test_reactivate_keeps_read_pointer_and_resets_join() {
        let t0 = Utc::now();
        let mut m = Membership::new(Uuid::new_v4(), Uuid::new_v4(), MemberRole::Member, t0);
        let msg = Uuid::new_v4();
        assert!(m.advance_read_pointer(msg, 3, t0));

        let t1 = t0 + Duration::minutes(5);
        m.deactivate(t1, 7);
        assert!(!m.is_active);
        assert_eq!(m.left_at, Some(t1));
        assert_eq!(m.left_at_sequence, Some(7));

        let t2 = t1 + Duration::minutes(5);
        m.reactivate(MemberRole::Moderator, t2);
        assert!(m.is_active);
        assert_eq!(m.joined_at, t2);
        assert_eq!(m.left_at, None);
        assert_eq!(m.left_at_sequence, None);
        assert_eq!(m.last_read_message_id, Some(msg));
        assert!(m.permissions.can_remove_members);
    }

    #[test]
    fn test_read_pointer_never_moves_backwards() {
        let now = Utc::now();
        let mut m = Membership::new(Uuid::new_v4(), Uuid::new_v4(), MemberRole::Member, now);
        assert!(m.advance_read_pointer(Uuid::new_v4(), 5, now));
        assert!(!m.advance_read_pointer(Uuid::new_v4(), 4, now));
        assert!(!m.advance_read_pointer(Uuid::new_v4(), 5, now));
        assert_eq!(m.last_read_sequence, 5);
    }

    #[test]
    fn test_history_bound_stops_at_departure() {
        let now = Utc::now();
        let mut m = Membership::new(Uuid::new_v4(), Uuid::new_v4(), MemberRole::Member, now);
        assert_eq!(m.history_bound(None), None);
        assert_eq!(m.history_bound(Some(9)), Some(9));

        m.deactivate(now, 4);
        assert_eq!(m.history_bound(None), Some(5));
        assert_eq!(m.history_bound(Some(9)), Some(5));
        assert_eq!(m.history_bound(Some(3)), Some(3));

        m.reactivate(MemberRole::Member, now);
        assert_eq!(m.history_bound(None), None);
    }

    #[test]
    fn test_timed_mute_expires() {
        let now = Utc::now();
        let mut m = Membership::new(Uuid::new_v4(), Uuid::new_v4(), MemberRole::Member, now);
        m.is_muted = true;
        m.muted_until = Some(now + Duration::hours(1));
        assert!(m.is_muted_at(now));
        assert!(!m.is_muted_at(now + Duration::hours(2)));
    }
}
