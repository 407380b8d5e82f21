pub mod messages;

use axum::{
    Router,
    extract::State,
    response::IntoResponse,
    routing::{delete, get, post, put},
};

use crate::realtime::socket::websocket_handler;
use crate::state::AppState;

/// The node's HTTP surface: the realtime upgrade, the thin REST wrappers
/// that feed the sync bus, and the operational endpoints.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/api/rooms/{room_id}/messages", get(messages::room_history))
        .route(
            "/api/messages/{message_id}",
            put(messages::edit_message).delete(messages::delete_message),
        )
        .route("/api/messages/{message_id}/reads", get(messages::message_reads))
        .route("/api/messages/{message_id}/reactions", post(messages::add_reaction))
        .route(
            "/api/messages/{message_id}/reactions/{emoji}",
            delete(messages::remove_reaction),
        )
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.export()
}
