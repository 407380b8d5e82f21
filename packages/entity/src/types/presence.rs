use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::UserStatus;

/// Per-user presence state in the shared store. Authoritative across nodes,
/// eventually consistent, never used for authorization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceState {
    pub status: UserStatus,
    pub last_seen: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_room: Option<Uuid>,
}

impl PresenceState {
    pub fn online(current_room: Option<Uuid>) -> Self {
        Self { status: UserStatus::Online, last_seen: Utc::now(), current_room }
    }

    pub fn offline() -> Self {
        Self { status: UserStatus::Offline, last_seen: Utc::now(), current_room: None }
    }
}
