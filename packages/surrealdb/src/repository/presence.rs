use surrealdb::{Surreal, engine::any::Any};
use uuid::Uuid;

use crate::repository::error::RepositoryError;
use palaver_entity::types::PresenceState;

/// Per-user presence in the shared store: one row per user, read/write
/// anywhere, no local cache, no history. Callers treat failures as
/// non-blocking (log and move on).
#[derive(Clone)]
pub struct PresenceRepository {
    db: Surreal<Any>,
}

impl PresenceRepository {
    pub fn new(db: Surreal<Any>) -> Self {
        Self { db }
    }

    /// Unconditional overwrite of the user's presence.
    pub async fn set(&self, user_id: Uuid, state: &PresenceState) -> Result<(), RepositoryError> {
        let _: Option<PresenceState> = self
            .db
            .upsert(("presence", user_id.to_string()))
            .content(state.clone())
            .await?;
        Ok(())
    }

    /// None means the user was never observed.
    pub async fn get(&self, user_id: Uuid) -> Result<Option<PresenceState>, RepositoryError> {
        let state: Option<PresenceState> =
            self.db.select(("presence", user_id.to_string())).await?;
        Ok(state)
    }

    pub async fn delete(&self, user_id: Uuid) -> Result<(), RepositoryError> {
        let _: Option<PresenceState> =
            self.db.delete(("presence", user_id.to_string())).await?;
        Ok(())
    }
}
