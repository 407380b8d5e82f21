use surrealdb::{Surreal, engine::any::Any};
use uuid::Uuid;

use crate::repository::error::RepositoryError;
use palaver_entity::types::{User, UserStatus};

const USER_FIELDS: &str = "record::id(id) AS id, username, email, password_hash, avatar_url, \
     status, last_seen, created_at";

#[derive(Clone)]
pub struct UserRepository {
    db: Surreal<Any>,
}

impl UserRepository {
    pub fn new(db: Surreal<Any>) -> Self {
        Self { db }
    }

    pub async fn create_user(&self, user: &User) -> Result<User, RepositoryError> {
        let mut response = self
            .db
            .query(format!(
                "CREATE type::thing('user', $id) SET \
                 username = $username, \
                 email = $email, \
                 password_hash = $password_hash, \
                 avatar_url = $avatar_url, \
                 status = $status, \
                 last_seen = time::now(), \
                 created_at = time::now() \
                 RETURN {USER_FIELDS}"
            ))
            .bind(("id", user.id))
            .bind(("username", user.username.clone()))
            .bind(("email", user.email.clone()))
            .bind(("password_hash", user.password_hash.clone()))
            .bind(("avatar_url", user.avatar_url.clone()))
            .bind(("status", user.status))
            .await?;

        let users: Vec<User> = response.take(0)?;
        users
            .into_iter()
            .next()
            .ok_or_else(|| RepositoryError::not_found("user", user.id))
    }

    pub async fn get_by_id(&self, user_id: Uuid) -> Result<Option<User>, RepositoryError> {
        let mut response = self
            .db
            .query(format!("SELECT {USER_FIELDS} FROM type::thing('user', $id)"))
            .bind(("id", user_id))
            .await?;

        let users: Vec<User> = response.take(0)?;
        Ok(users.into_iter().next())
    }

    /// Status transition written by the session lifecycle; bumps last-seen.
    pub async fn update_user_status(
        &self,
        user_id: Uuid,
        status: UserStatus,
    ) -> Result<(), RepositoryError> {
        self.db
            .query(
                "UPDATE type::thing('user', $id) SET \
                 status = $status, last_seen = time::now() RETURN NONE",
            )
            .bind(("id", user_id))
            .bind(("status", status))
            .await?;
        Ok(())
    }
}
