use thiserror::Error;

/// Failure surface of the storage layer. Authorization is enforced above the
/// repositories (handlers check authorship and membership directly), so the
/// variants here cover exactly what the queries themselves can produce.
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("database query failed: {0}")]
    Database(#[from] surrealdb::Error),

    /// The targeted record does not exist, is soft-deleted, or the scoped
    /// update (e.g. an author-scoped edit) matched nothing.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    /// Input refused before it reaches the store.
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    /// Bus payload could not be encoded.
    #[error("payload encoding failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RepositoryError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        RepositoryError::NotFound { entity, id: id.to_string() }
    }
}
