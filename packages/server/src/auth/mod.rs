use axum::http::{HeaderMap, header::AUTHORIZATION};
use uuid::Uuid;

use crate::error::ApiError;
use palaver_surrealdb::repository::AuthRepository;

/// Token validation seam for the upgrade and the REST surface. Token
/// issuance (signup/login) lives outside the realtime core.
#[derive(Clone)]
pub struct AuthService {
    tokens: AuthRepository,
}

impl AuthService {
    pub fn new(tokens: AuthRepository) -> Self {
        Self { tokens }
    }

    pub async fn authenticate(&self, token: &str) -> Result<Uuid, ApiError> {
        let found = self.tokens.validate_access_token(token).await?;
        found.map(|t| t.user_id).ok_or(ApiError::UnknownToken)
    }

    /// Authenticate a REST request via its bearer header.
    pub async fn authenticate_headers(&self, headers: &HeaderMap) -> Result<Uuid, ApiError> {
        let token = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .ok_or(ApiError::MissingToken)?;
        self.authenticate(token).await
    }
}
