use surrealdb::{Surreal, engine::any::Any};
use uuid::Uuid;

use crate::repository::error::RepositoryError;
use palaver_entity::types::{Message, MessageRead, NewMessage, Reaction};

/// Projection mapping the numeric record id back onto the entity's `id`
/// field. Messages are stored as `message:<n>` where `n` comes from the
/// global sequence record advanced in the insert transaction.
const MESSAGE_FIELDS: &str = "record::id(id) AS id, room_id, user_id, content, message_type, \
     file_url, parent_id, edited_at, deleted_at, created_at";

#[derive(Clone)]
pub struct MessageRepository {
    db: Surreal<Any>,
}

impl MessageRepository {
    pub fn new(db: Surreal<Any>) -> Self {
        Self { db }
    }

    /// Insert a batch of messages in one transaction. The global sequence is
    /// advanced by the batch length, so every message receives a strictly
    /// increasing id in enqueue order and the whole batch commits or rolls
    /// back as a unit. Returns the stored messages with assigned ids and
    /// commit timestamps, in insertion order.
    pub async fn create_batch(&self, batch: &[NewMessage]) -> Result<Vec<Message>, RepositoryError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let mut sql = String::from("BEGIN TRANSACTION;\n");
        sql.push_str("LET $count = array::len($batch);\n");
        sql.push_str(
            "LET $last = (UPSERT message_seq:global \
             SET value = (value ?? 0) + $count RETURN VALUE value)[0];\n",
        );
        sql.push_str("LET $first = $last - $count + 1;\n");
        for i in 0..batch.len() {
            sql.push_str(&format!(
                "CREATE type::thing('message', $first + {i}) SET \
                 room_id = $batch[{i}].room_id, \
                 user_id = $batch[{i}].user_id, \
                 content = $batch[{i}].content, \
                 message_type = $batch[{i}].message_type, \
                 file_url = $batch[{i}].file_url, \
                 parent_id = $batch[{i}].parent_id, \
                 edited_at = NONE, \
                 deleted_at = NONE, \
                 created_at = time::now() \
                 RETURN NONE;\n"
            ));
        }
        sql.push_str(&format!(
            "SELECT {MESSAGE_FIELDS} FROM message \
             WHERE record::id(id) >= $first AND record::id(id) <= $last \
             ORDER BY id ASC;\n"
        ));
        sql.push_str("COMMIT TRANSACTION;");

        let mut response = self.db.query(sql).bind(("batch", batch.to_vec())).await?;
        // The final statement before COMMIT is the ordered read-back.
        let select_index = response.num_statements() - 1;
        let stored: Vec<Message> = response.take(select_index)?;

        if stored.len() != batch.len() {
            return Err(RepositoryError::Validation {
                field: "batch",
                message: format!("stored {} of {} messages", stored.len(), batch.len()),
            });
        }
        Ok(stored)
    }

    /// Fetch a message by id. Soft-deleted messages do not surface here.
    pub async fn get_by_id(&self, message_id: i64) -> Result<Option<Message>, RepositoryError> {
        let mut response = self
            .db
            .query(format!(
                "SELECT {MESSAGE_FIELDS} FROM type::thing('message', $message_id) \
                 WHERE deleted_at IS NONE"
            ))
            .bind(("message_id", message_id))
            .await?;

        let messages: Vec<Message> = response.take(0)?;
        Ok(messages.into_iter().next())
    }

    /// Fetch a set of messages by id, newest first, soft-deleted filtered
    /// out. Backs the hot-cache read path.
    pub async fn get_by_ids(&self, ids: &[i64]) -> Result<Vec<Message>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut response = self
            .db
            .query(format!(
                "SELECT {MESSAGE_FIELDS} FROM message \
                 WHERE record::id(id) IN $ids AND deleted_at IS NONE \
                 ORDER BY id DESC"
            ))
            .bind(("ids", ids.to_vec()))
            .await?;

        let messages: Vec<Message> = response.take(0)?;
        Ok(messages)
    }

    /// Room history, newest first, soft-deleted messages filtered out.
    /// `before` pages backwards by message id.
    pub async fn get_room_messages(
        &self,
        room_id: Uuid,
        limit: usize,
        before: Option<i64>,
    ) -> Result<Vec<Message>, RepositoryError> {
        let mut sql = format!(
            "SELECT {MESSAGE_FIELDS} FROM message \
             WHERE room_id = $room_id AND deleted_at IS NONE"
        );
        if before.is_some() {
            sql.push_str(" AND record::id(id) < $before");
        }
        sql.push_str(" ORDER BY id DESC LIMIT $limit");

        let mut query = self
            .db
            .query(sql)
            .bind(("room_id", room_id))
            .bind(("limit", limit));
        if let Some(before) = before {
            query = query.bind(("before", before));
        }

        let mut response = query.await?;
        let messages: Vec<Message> = response.take(0)?;
        Ok(messages)
    }

    /// Update message content. Scoped to the original author; editing someone
    /// else's message or a deleted message reports not-found.
    pub async fn edit_message(
        &self,
        message_id: i64,
        author_id: Uuid,
        content: String,
    ) -> Result<Message, RepositoryError> {
        let mut response = self
            .db
            .query(format!(
                "UPDATE type::thing('message', $message_id) \
                 SET content = $content, edited_at = time::now() \
                 WHERE user_id = $author_id AND deleted_at IS NONE \
                 RETURN {MESSAGE_FIELDS}"
            ))
            .bind(("message_id", message_id))
            .bind(("author_id", author_id))
            .bind(("content", content))
            .await?;

        let messages: Vec<Message> = response.take(0)?;
        messages
            .into_iter()
            .next()
            .ok_or_else(|| RepositoryError::not_found("message", message_id))
    }

    /// Soft delete: the row and content remain, but every filtered read path
    /// stops surfacing the message. Idempotent at the caller's level; a second
    /// delete reports not-found.
    pub async fn soft_delete_message(&self, message_id: i64) -> Result<Message, RepositoryError> {
        let mut response = self
            .db
            .query(format!(
                "UPDATE type::thing('message', $message_id) \
                 SET deleted_at = time::now() \
                 WHERE deleted_at IS NONE \
                 RETURN {MESSAGE_FIELDS}"
            ))
            .bind(("message_id", message_id))
            .await?;

        let messages: Vec<Message> = response.take(0)?;
        messages
            .into_iter()
            .next()
            .ok_or_else(|| RepositoryError::not_found("message", message_id))
    }

    /// Persist a read receipt. At most one per (message, user); repeats keep
    /// the original read-at.
    pub async fn mark_message_read(
        &self,
        message_id: i64,
        user_id: Uuid,
    ) -> Result<(), RepositoryError> {
        self.db
            .query(
                "UPSERT type::thing('message_read', [$message_id, $user_id]) SET \
                 message_id = $message_id, \
                 user_id = $user_id, \
                 read_at = (read_at ?? time::now()) \
                 RETURN NONE",
            )
            .bind(("message_id", message_id))
            .bind(("user_id", user_id))
            .await?;
        Ok(())
    }

    pub async fn get_message_reads(
        &self,
        message_id: i64,
    ) -> Result<Vec<MessageRead>, RepositoryError> {
        let mut response = self
            .db
            .query(
                "SELECT message_id, user_id, read_at FROM message_read \
                 WHERE message_id = $message_id",
            )
            .bind(("message_id", message_id))
            .await?;

        let reads: Vec<MessageRead> = response.take(0)?;
        Ok(reads)
    }

    /// Add a reaction. Unique per (message, user, emoji); repeats keep the
    /// original timestamp.
    pub async fn add_reaction(
        &self,
        message_id: i64,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<Reaction, RepositoryError> {
        if emoji.is_empty() || emoji.len() > 100 {
            return Err(RepositoryError::Validation {
                field: "emoji",
                message: "invalid reaction length".to_string(),
            });
        }

        let mut response = self
            .db
            .query(
                "UPSERT type::thing('reaction', [$message_id, $user_id, $emoji]) SET \
                 message_id = $message_id, \
                 user_id = $user_id, \
                 emoji = $emoji, \
                 created_at = (created_at ?? time::now()) \
                 RETURN message_id, user_id, emoji, created_at",
            )
            .bind(("message_id", message_id))
            .bind(("user_id", user_id))
            .bind(("emoji", emoji.to_string()))
            .await?;

        let reactions: Vec<Reaction> = response.take(0)?;
        reactions
            .into_iter()
            .next()
            .ok_or_else(|| RepositoryError::not_found("reaction", message_id))
    }

    pub async fn remove_reaction(
        &self,
        message_id: i64,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<(), RepositoryError> {
        self.db
            .query("DELETE type::thing('reaction', [$message_id, $user_id, $emoji])")
            .bind(("message_id", message_id))
            .bind(("user_id", user_id))
            .bind(("emoji", emoji.to_string()))
            .await?;
        Ok(())
    }

    pub async fn get_message_reactions(
        &self,
        message_id: i64,
    ) -> Result<Vec<Reaction>, RepositoryError> {
        let mut response = self
            .db
            .query(
                "SELECT message_id, user_id, emoji, created_at FROM reaction \
                 WHERE message_id = $message_id",
            )
            .bind(("message_id", message_id))
            .await?;

        let reactions: Vec<Reaction> = response.take(0)?;
        Ok(reactions)
    }
}
