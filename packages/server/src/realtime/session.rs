//! One live client connection: exactly one read task and one write task,
//! heartbeat on the transport, presence lifecycle around them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::RealtimeConfig;
use crate::realtime::room::RoomHandle;
use crate::state::AppState;
use palaver_entity::types::{ClientFrame, NewMessage, PresenceState, ServerFrame, UserStatus};

/// Three consecutive full-queue drops mark a session for disconnect.
const MAX_CONSECUTIVE_DROPS: u32 = 3;

pub enum DeliverOutcome {
    Delivered,
    /// Queue full; frame dropped for this session only.
    Dropped,
    /// Queue closed, or the drop limit was reached.
    Dead,
}

/// The room's weak back-reference to a session: a sender into the outbound
/// queue plus the shared drop counter. Dropping the handle closes the queue
/// without freeing the session's tasks prematurely.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session_id: Uuid,
    pub user_id: Uuid,
    frames: mpsc::Sender<ServerFrame>,
    consecutive_drops: Arc<AtomicU32>,
}

impl SessionHandle {
    pub fn new(session_id: Uuid, user_id: Uuid, frames: mpsc::Sender<ServerFrame>) -> Self {
        Self {
            session_id,
            user_id,
            frames,
            consecutive_drops: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Non-blocking enqueue toward the write pump. Never blocks the room.
    pub fn try_deliver(&self, frame: &ServerFrame) -> DeliverOutcome {
        match self.frames.try_send(frame.clone()) {
            Ok(()) => {
                self.consecutive_drops.store(0, Ordering::Relaxed);
                DeliverOutcome::Delivered
            },
            Err(mpsc::error::TrySendError::Full(_)) => {
                let drops = self.consecutive_drops.fetch_add(1, Ordering::Relaxed) + 1;
                if drops >= MAX_CONSECUTIVE_DROPS {
                    DeliverOutcome::Dead
                } else {
                    DeliverOutcome::Dropped
                }
            },
            Err(mpsc::error::TrySendError::Closed(_)) => DeliverOutcome::Dead,
        }
    }
}

/// Drive an upgraded socket until either pump ends, then tear down: detach
/// from the room, flip presence to offline and announce the status change.
pub async fn run(socket: WebSocket, state: AppState, room: RoomHandle, user_id: Uuid) {
    let session_id = Uuid::new_v4();
    let config = state.config.realtime.clone();

    let (frames_tx, frames_rx) = mpsc::channel(config.session_outbound_capacity);
    let handle = SessionHandle::new(session_id, user_id, frames_tx);

    if !room.attach(handle).await {
        debug!(%session_id, "room closed before attach");
        return;
    }
    set_presence(
        &state,
        user_id,
        PresenceState::online(Some(room.id)),
        UserStatus::Online,
        Some(room.id),
    )
    .await;
    debug!(%session_id, %user_id, room_id = %room.id, "session started");

    let (sender, receiver) = socket.split();
    let mut send_task = tokio::spawn(write_pump(sender, frames_rx, config.clone()));
    let mut recv_task = tokio::spawn(read_pump(
        receiver,
        state.clone(),
        room.clone(),
        user_id,
        config.clone(),
    ));

    let write_done = tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
            true
        },
        _ = &mut recv_task => false,
    };

    // Detaching drops the room's sender, which closes the outbound queue and
    // lets the write pump send its close frame and exit.
    room.detach(session_id).await;
    if !write_done {
        let _ = send_task.await;
    }

    set_presence(&state, user_id, PresenceState::offline(), UserStatus::Offline, Some(room.id))
        .await;
    debug!(%session_id, %user_id, "session closed");
}

/// Presence and status fan-out around the session lifecycle. Failures are
/// logged and never block the connection. The status change always names the
/// room the session was attached to, so peers with that room active can
/// refresh their member lists.
async fn set_presence(
    state: &AppState,
    user_id: Uuid,
    presence: PresenceState,
    status: UserStatus,
    room_id: Option<Uuid>,
) {
    if let Err(e) = state.presence.set(user_id, &presence).await {
        warn!(error = %e, %user_id, "presence update failed");
    }
    if let Err(e) = state.users.update_user_status(user_id, status).await {
        warn!(error = %e, %user_id, "user status update failed");
    }
    if let Err(e) = state.publisher.publish_user_status(user_id, status, room_id).await {
        warn!(error = %e, %user_id, "status change publish failed");
    }
}

/// At most one reader per connection. The read deadline resets on every
/// inbound frame or pong; a missed deadline closes the session.
async fn read_pump(
    mut receiver: SplitStream<WebSocket>,
    state: AppState,
    room: RoomHandle,
    user_id: Uuid,
    config: RealtimeConfig,
) {
    loop {
        match timeout(config.pong_wait, receiver.next()).await {
            Err(_) => {
                debug!(%user_id, "read deadline exceeded");
                break;
            },
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(error = %e, %user_id, "socket read failed");
                break;
            },
            Ok(Some(Ok(message))) => match message {
                WsMessage::Text(text) => {
                    handle_frame(&state, &room, user_id, text.as_str()).await;
                },
                // The transport answers pings itself; both control frames
                // only serve to refresh the deadline.
                WsMessage::Ping(_) | WsMessage::Pong(_) => {},
                WsMessage::Close(_) => break,
                WsMessage::Binary(_) => {
                    warn!(%user_id, "binary frame dropped");
                },
            },
        }
    }
}

/// Decode one inbound frame and apply it. Protocol errors are logged and
/// dropped, never fatal to the session.
async fn handle_frame(state: &AppState, room: &RoomHandle, user_id: Uuid, raw: &str) {
    let frame: ClientFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, %user_id, "unparseable frame dropped");
            return;
        },
    };

    match frame {
        ClientFrame::Message { content, message_type, file_url, parent_id } => {
            let message = NewMessage {
                room_id: room.id,
                user_id,
                content,
                message_type,
                file_url,
                parent_id,
            };
            // No local broadcast: the sync bus redelivers once the batch
            // commits, so local and remote subscribers see the same thing.
            if let Err(e) = state.writer.enqueue(message).await {
                warn!(error = %e, %user_id, "content frame dropped");
            }
        },
        ClientFrame::TypingStart => {
            room.typing(user_id, true);
        },
        ClientFrame::TypingStop => {
            room.typing(user_id, false);
        },
        ClientFrame::Read { message_id } => {
            if let Err(e) = state.messages.mark_message_read(message_id, user_id).await {
                warn!(error = %e, message_id, "read receipt failed");
            }
        },
        ClientFrame::MessageEdited { message } => {
            rebroadcast(state, room, ServerFrame::MessageEdited { message });
        },
        ClientFrame::MessageDeleted { message } => {
            rebroadcast(state, room, ServerFrame::MessageDeleted { message });
        },
        ClientFrame::ReactionAdded { message_id, user_id, emoji } => {
            rebroadcast(state, room, ServerFrame::ReactionAdded { message_id, user_id, emoji });
        },
        ClientFrame::ReactionRemoved { message_id, user_id, emoji } => {
            rebroadcast(state, room, ServerFrame::ReactionRemoved { message_id, user_id, emoji });
        },
    }
}

fn rebroadcast(state: &AppState, room: &RoomHandle, frame: ServerFrame) {
    if !room.try_broadcast(frame) {
        state.metrics.room_broadcasts_dropped.inc();
        warn!(room_id = %room.id, "room inbox full, rebroadcast dropped");
    }
}

/// At most one writer per connection. Consumes the outbound queue, enforces
/// the write deadline and keeps the transport heartbeat going. Queue closure
/// means the room let go of the session: send a close frame and exit.
async fn write_pump(
    mut sender: SplitSink<WebSocket, WsMessage>,
    mut frames: mpsc::Receiver<ServerFrame>,
    config: RealtimeConfig,
) {
    let mut ping = interval(config.ping_period());
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(frame) => {
                    let text = match serde_json::to_string(&frame) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!(error = %e, "outbound frame lost to serialization");
                            continue;
                        },
                    };
                    match timeout(config.write_wait, sender.send(WsMessage::Text(text.into()))).await {
                        Ok(Ok(())) => {},
                        Ok(Err(e)) => {
                            debug!(error = %e, "socket write failed");
                            return;
                        },
                        Err(_) => {
                            debug!("write deadline exceeded");
                            return;
                        },
                    }
                },
                None => {
                    let _ = timeout(config.write_wait, sender.send(WsMessage::Close(None))).await;
                    return;
                },
            },
            _ = ping.tick() => {
                let ping_frame = WsMessage::Ping(Vec::new().into());
                match timeout(config.write_wait, sender.send(ping_frame)).await {
                    Ok(Ok(())) => {},
                    _ => return,
                }
            },
        }
    }
}
