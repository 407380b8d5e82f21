#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod repository;
pub mod test_utils;

pub use repository::*;

use surrealdb::{Surreal, engine::any::Any};

/// Apply the schema migration to a freshly connected database. Idempotent;
/// run once at startup before any repository is used.
pub async fn migrate(db: &Surreal<Any>) -> Result<(), repository::error::RepositoryError> {
    let schema = include_str!("../migrations/palaver.surql");
    db.query(schema).await?;
    Ok(())
}
