//! Thin REST wrappers over the durable store for the operations that feed
//! the sync bus: history reads, edits, soft deletes, reactions and read
//! receipts. Edits and deletes publish the full message envelope on the
//! `messages` channel; reactions publish on `room_events`. Local clients see
//! the result through bus loopback, identical to remote ones.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;
use palaver_entity::types::{Message, MessageRead, Reaction, RoomEvent};

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
    pub before: Option<i64>,
}

const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 200;

/// Latest messages for a room. The common head query is served from the
/// hot cache when it holds enough committed ids; pagination and cold rooms
/// fall back to the store.
pub async fn room_history(
    State(state): State<AppState>,
    Path(room_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
    headers: HeaderMap,
) -> Result<Json<Vec<Message>>, ApiError> {
    let user_id = state.auth.authenticate_headers(&headers).await?;
    if !state.memberships.is_room_member(room_id, user_id).await? {
        return Err(ApiError::NotARoomMember);
    }

    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_HISTORY_LIMIT);

    if query.before.is_none() {
        let cached = state.recent_cache.recent(room_id);
        if cached.len() >= limit {
            let newest: Vec<i64> = cached[cached.len() - limit..].to_vec();
            let messages = state.messages.get_by_ids(&newest).await?;
            // Soft deletes can punch holes in the cached window; only a full
            // page is trustworthy.
            if messages.len() == limit {
                return Ok(Json(messages));
            }
        }
    }

    let messages = state.messages.get_room_messages(room_id, limit, query.before).await?;
    Ok(Json(messages))
}

#[derive(Deserialize)]
pub struct EditMessageBody {
    pub content: String,
}

/// Edit a message. Author-only; the store-side scope doubles as the check.
pub async fn edit_message(
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<EditMessageBody>,
) -> Result<Json<Message>, ApiError> {
    let user_id = state.auth.authenticate_headers(&headers).await?;

    let existing = state
        .messages
        .get_by_id(message_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    if existing.user_id != user_id {
        return Err(ApiError::Forbidden);
    }

    let edited = state.messages.edit_message(message_id, user_id, body.content).await?;

    if let Err(e) = state.publisher.publish_message(&edited).await {
        warn!(error = %e, message_id, "edit publish failed");
    }
    Ok(Json(edited))
}

/// Soft delete. Allowed for the author, or for an admin/moderator of the
/// message's room.
pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<Message>, ApiError> {
    let user_id = state.auth.authenticate_headers(&headers).await?;

    let existing = state
        .messages
        .get_by_id(message_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    if existing.user_id != user_id {
        let member = state
            .memberships
            .get_member(existing.room_id, user_id)
            .await?
            .ok_or(ApiError::NotARoomMember)?;
        if !member.role.can_moderate() {
            return Err(ApiError::Forbidden);
        }
    }

    let deleted = state.messages.soft_delete_message(message_id).await?;

    if let Err(e) = state.publisher.publish_message(&deleted).await {
        warn!(error = %e, message_id, "delete publish failed");
    }
    Ok(Json(deleted))
}

pub async fn message_reads(
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
    headers: HeaderMap,
) -> Result<Json<Vec<MessageRead>>, ApiError> {
    let user_id = state.auth.authenticate_headers(&headers).await?;

    let message = state
        .messages
        .get_by_id(message_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    if !state.memberships.is_room_member(message.room_id, user_id).await? {
        return Err(ApiError::NotARoomMember);
    }

    Ok(Json(state.messages.get_message_reads(message_id).await?))
}

#[derive(Deserialize)]
pub struct ReactionBody {
    pub emoji: String,
}

pub async fn add_reaction(
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
    headers: HeaderMap,
    Json(body): Json<ReactionBody>,
) -> Result<Json<Reaction>, ApiError> {
    let user_id = state.auth.authenticate_headers(&headers).await?;

    let message = state
        .messages
        .get_by_id(message_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    if !state.memberships.is_room_member(message.room_id, user_id).await? {
        return Err(ApiError::NotARoomMember);
    }

    let reaction = state.messages.add_reaction(message_id, user_id, &body.emoji).await?;

    let event = RoomEvent::ReactionAdded {
        room_id: message.room_id,
        message_id,
        user_id,
        emoji: reaction.emoji.clone(),
        timestamp: Utc::now(),
    };
    if let Err(e) = state.publisher.publish_room_event(&event).await {
        warn!(error = %e, message_id, "reaction publish failed");
    }
    Ok(Json(reaction))
}

pub async fn remove_reaction(
    State(state): State<AppState>,
    Path((message_id, emoji)): Path<(i64, String)>,
    headers: HeaderMap,
) -> Result<(), ApiError> {
    let user_id = state.auth.authenticate_headers(&headers).await?;

    let message = state
        .messages
        .get_by_id(message_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    if !state.memberships.is_room_member(message.room_id, user_id).await? {
        return Err(ApiError::NotARoomMember);
    }

    state.messages.remove_reaction(message_id, user_id, &emoji).await?;

    let event = RoomEvent::ReactionRemoved {
        room_id: message.room_id,
        message_id,
        user_id,
        emoji,
        timestamp: Utc::now(),
    };
    if let Err(e) = state.publisher.publish_room_event(&event).await {
        warn!(error = %e, message_id, "reaction publish failed");
    }
    Ok(())
}
