use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Read receipt for a (message, user) pair. At most one per pair; marking the
/// same message read twice is a no-op after the first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRead {
    pub message_id: i64,
    pub user_id: Uuid,
    pub read_at: DateTime<Utc>,
}
