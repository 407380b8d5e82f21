use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::{Surreal, engine::any::Any};
use uuid::Uuid;

use crate::repository::error::RepositoryError;

/// A bearer token presented at the connection upgrade. Token issuance lives
/// outside the realtime core; this table is the validation seam.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub token: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }
}

#[derive(Clone)]
pub struct AuthRepository {
    db: Surreal<Any>,
}

impl AuthRepository {
    pub fn new(db: Surreal<Any>) -> Self {
        Self { db }
    }

    pub async fn create_access_token(
        &self,
        token: &str,
        user_id: Uuid,
        ttl: Duration,
    ) -> Result<AccessToken, RepositoryError> {
        let record = AccessToken {
            token: token.to_string(),
            user_id,
            expires_at: Utc::now() + ttl,
        };

        let created: Option<AccessToken> = self
            .db
            .upsert(("access_token", token.to_string()))
            .content(record.clone())
            .await?;

        created.ok_or_else(|| RepositoryError::not_found("access_token", token))
    }

    /// Look up a token. Expired tokens are reported as absent.
    pub async fn validate_access_token(
        &self,
        token: &str,
    ) -> Result<Option<AccessToken>, RepositoryError> {
        let found: Option<AccessToken> =
            self.db.select(("access_token", token.to_string())).await?;
        Ok(found.filter(|t| !t.is_expired()))
    }
}
