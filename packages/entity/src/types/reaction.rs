use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Emoji reaction on a message. Unique per (message, user, emoji).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reaction {
    pub message_id: i64,
    pub user_id: Uuid,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}
