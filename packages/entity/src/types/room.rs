use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    Public,
    Private,
    Group,
    Dm,
}

/// The persistent chat room entity. The in-memory room instance tracking live
/// members on one node is a separate lifecycle owned by the room registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRoom {
    pub id: Uuid,
    pub name: String,

    #[serde(rename = "type")]
    pub kind: RoomKind,

    pub creator_id: Uuid,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,

    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
}
