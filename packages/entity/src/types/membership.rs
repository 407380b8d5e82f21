use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a member within a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    Moderator,
    Member,
}

impl MemberRole {
    /// Moderation rights gate soft deletion of other users' messages.
    pub fn can_moderate(&self) -> bool {
        matches!(self, MemberRole::Admin | MemberRole::Moderator)
    }
}

/// Membership record for a (room, user) pair. Unique per pair; gates
/// authorization for every room-scoped operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomMember {
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
}

impl RoomMember {
    pub fn new(room_id: Uuid, user_id: Uuid, role: MemberRole) -> Self {
        Self { room_id, user_id, role, joined_at: Utc::now() }
    }
}
