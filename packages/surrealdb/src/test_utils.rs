//! Shared test plumbing: isolated in-memory databases with the production
//! schema applied, plus seed helpers for users, rooms and tokens.

use chrono::{Duration, Utc};
use surrealdb::{Surreal, engine::any::Any};
use thiserror::Error;
use uuid::Uuid;

use crate::repository::{AuthRepository, MembershipRepository, UserRepository};
use palaver_entity::types::{MemberRole, User, UserStatus};

#[derive(Error, Debug)]
pub enum TestUtilsError {
    #[error("Database connection failed: {0}")]
    DatabaseConnection(#[from] surrealdb::Error),

    #[error("Seed failed: {0}")]
    Seed(#[from] crate::repository::RepositoryError),
}

/// An isolated in-memory database with the schema migration applied. Each
/// instance gets a unique namespace and database name, so tests never bleed
/// into each other.
pub struct TestDatabase {
    pub db: Surreal<Any>,
}

impl TestDatabase {
    pub async fn new() -> Result<Self, TestUtilsError> {
        let db = surrealdb::engine::any::connect("mem://").await?;
        db.use_ns(format!("test_ns_{}", Uuid::new_v4().simple()))
            .use_db(format!("test_db_{}", Uuid::new_v4().simple()))
            .await?;

        crate::migrate(&db).await?;
        Ok(TestDatabase { db })
    }

    /// Create a user with a generated id.
    pub async fn seed_user(&self, username: &str) -> Result<Uuid, TestUtilsError> {
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: format!("{username}@test.localhost"),
            password_hash: "x".to_string(),
            avatar_url: None,
            status: UserStatus::Offline,
            last_seen: Utc::now(),
            created_at: Utc::now(),
        };
        UserRepository::new(self.db.clone()).create_user(&user).await?;
        Ok(user.id)
    }

    /// Create a room record and make the creator an admin member.
    pub async fn seed_room(&self, creator_id: Uuid) -> Result<Uuid, TestUtilsError> {
        let room_id = Uuid::new_v4();
        self.db
            .query(
                "CREATE type::thing('room', $id) SET \
                 name = $name, type = 'group', creator_id = $creator, \
                 is_archived = false, created_at = time::now() RETURN NONE",
            )
            .bind(("id", room_id))
            .bind(("name", format!("room-{}", room_id.simple())))
            .bind(("creator", creator_id))
            .await?;

        MembershipRepository::new(self.db.clone())
            .add_member(room_id, creator_id, MemberRole::Admin)
            .await?;
        Ok(room_id)
    }

    pub async fn join_room(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
    ) -> Result<(), TestUtilsError> {
        MembershipRepository::new(self.db.clone())
            .add_member(room_id, user_id, role)
            .await?;
        Ok(())
    }

    /// Issue a bearer token valid for an hour.
    pub async fn issue_token(&self, user_id: Uuid) -> Result<String, TestUtilsError> {
        let token = format!("tok_{}", Uuid::new_v4().simple());
        AuthRepository::new(self.db.clone())
            .create_access_token(&token, user_id, Duration::hours(1))
            .await?;
        Ok(token)
    }
}
