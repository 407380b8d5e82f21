use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use palaver_surrealdb::repository::RepositoryError;

/// Error surface of the HTTP/WebSocket layer. Authorization failures are
/// rejected before the connection upgrade completes; everything else maps to
/// a status code plus a small JSON body.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Missing access token")]
    MissingToken,

    #[error("Unknown or expired access token")]
    UnknownToken,

    #[error("Not a member of this room")]
    NotARoomMember,

    #[error("Forbidden")]
    Forbidden,

    #[error("Resource not found")]
    NotFound,

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Internal error")]
    Internal(#[source] RepositoryError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingToken | ApiError::UnknownToken => StatusCode::UNAUTHORIZED,
            ApiError::NotARoomMember | ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::InvalidParam(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::MissingToken => "MISSING_TOKEN",
            ApiError::UnknownToken => "UNKNOWN_TOKEN",
            ApiError::NotARoomMember => "NOT_A_ROOM_MEMBER",
            ApiError::Forbidden => "FORBIDDEN",
            ApiError::NotFound => "NOT_FOUND",
            ApiError::InvalidParam(_) => "INVALID_PARAM",
            ApiError::Internal(_) => "INTERNAL",
        }
    }
}

impl From<RepositoryError> for ApiError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::NotFound { .. } => ApiError::NotFound,
            RepositoryError::Validation { field, message } => {
                ApiError::InvalidParam(format!("{field}: {message}"))
            },
            other => ApiError::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(ref source) = self {
            tracing::error!(error = %source, "request failed");
        }
        let body = json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}
