use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::Response,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::error::ApiError;
use crate::realtime::session;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ConnectQuery {
    token: String,
    room_id: Uuid,
}

/// Connection upgrade. The token is validated and room membership verified
/// before the upgrade completes; oversized frames are refused by the
/// transport with a 1009 close.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let user_id = state.auth.authenticate(&query.token).await?;

    if !state.memberships.is_room_member(query.room_id, user_id).await? {
        return Err(ApiError::NotARoomMember);
    }

    info!(%user_id, room_id = %query.room_id, "websocket connection accepted");

    let room = state.registry.get_or_create(query.room_id).await;
    let max_frame = state.config.realtime.max_frame_size;

    Ok(ws
        .max_frame_size(max_frame)
        .max_message_size(max_frame)
        .on_upgrade(move |socket| session::run(socket, state, room, user_id)))
}
