use surrealdb::{Surreal, engine::any::Any};
use uuid::Uuid;

use crate::repository::error::RepositoryError;
use palaver_entity::types::{MemberRole, RoomMember};

/// Membership records live under composite record ids
/// `room_membership:[room_id, user_id]`, which makes the (room, user) pair
/// unique by construction.
#[derive(Clone)]
pub struct MembershipRepository {
    db: Surreal<Any>,
}

impl MembershipRepository {
    pub fn new(db: Surreal<Any>) -> Self {
        Self { db }
    }

    /// Add a member, keeping the existing role and joined-at if the pair
    /// already exists.
    pub async fn add_member(
        &self,
        room_id: Uuid,
        user_id: Uuid,
        role: MemberRole,
    ) -> Result<RoomMember, RepositoryError> {
        let query = "
            UPSERT type::thing('room_membership', [$room_id, $user_id]) SET
                room_id = $room_id,
                user_id = $user_id,
                role = (role ?? $role),
                joined_at = (joined_at ?? time::now())
            RETURN room_id, user_id, role, joined_at
        ";

        let mut response = self
            .db
            .query(query)
            .bind(("room_id", room_id))
            .bind(("user_id", user_id))
            .bind(("role", role))
            .await?;

        let members: Vec<RoomMember> = response.take(0)?;
        members.into_iter().next().ok_or_else(|| {
            RepositoryError::not_found("room_membership", format!("{room_id}:{user_id}"))
        })
    }

    pub async fn remove_member(&self, room_id: Uuid, user_id: Uuid) -> Result<(), RepositoryError> {
        self.db
            .query("DELETE type::thing('room_membership', [$room_id, $user_id])")
            .bind(("room_id", room_id))
            .bind(("user_id", user_id))
            .await?;
        Ok(())
    }

    /// Membership check gating every room-scoped operation.
    pub async fn is_room_member(
        &self,
        room_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, RepositoryError> {
        Ok(self.get_member(room_id, user_id).await?.is_some())
    }

    pub async fn get_member(
        &self,
        room_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<RoomMember>, RepositoryError> {
        let mut response = self
            .db
            .query(
                "SELECT room_id, user_id, role, joined_at \
                 FROM type::thing('room_membership', [$room_id, $user_id])",
            )
            .bind(("room_id", room_id))
            .bind(("user_id", user_id))
            .await?;

        let members: Vec<RoomMember> = response.take(0)?;
        Ok(members.into_iter().next())
    }

    pub async fn get_room_members(
        &self,
        room_id: Uuid,
    ) -> Result<Vec<RoomMember>, RepositoryError> {
        let mut response = self
            .db
            .query(
                "SELECT room_id, user_id, role, joined_at \
                 FROM room_membership WHERE room_id = $room_id",
            )
            .bind(("room_id", room_id))
            .await?;

        let members: Vec<RoomMember> = response.take(0)?;
        Ok(members)
    }
}
