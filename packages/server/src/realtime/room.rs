//! The in-memory room instance: a single task owns the client set and the
//! typing tracker, and every fan-out for the room on this node passes through
//! its inboxes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::RealtimeConfig;
use crate::metrics::Metrics;
use crate::realtime::registry::RoomRegistry;
use crate::realtime::session::{DeliverOutcome, SessionHandle};
use crate::sync::BusPublisher;
use palaver_entity::types::{RoomEvent, ServerFrame};

/// Control-plane requests into the room loop. Kept on a separate channel from
/// the broadcast inbox so a flooded room can never drop an attach or detach.
#[derive(Debug)]
pub enum RoomCommand {
    Attach(SessionHandle),
    Detach { session_id: Uuid },
    Typing { user_id: Uuid, is_typing: bool },
}

const CONTROL_CAPACITY: usize = 16;

/// Cheap cloneable handle to a room loop. The registry owns the canonical
/// copy; sessions and the sync engine hold clones.
#[derive(Clone)]
pub struct RoomHandle {
    pub id: Uuid,
    control: mpsc::Sender<RoomCommand>,
    broadcast: mpsc::Sender<ServerFrame>,
    occupancy: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

impl RoomHandle {
    /// Register a session. Returns false if the room is shutting down.
    pub async fn attach(&self, session: SessionHandle) -> bool {
        self.control.send(RoomCommand::Attach(session)).await.is_ok()
    }

    /// Unregister a session. Idempotent beyond the first pair.
    pub async fn detach(&self, session_id: Uuid) {
        let _ = self.control.send(RoomCommand::Detach { session_id }).await;
    }

    /// Non-blocking broadcast. False means the inbox was full or closed and
    /// the event was dropped; the caller owns the metric.
    pub fn try_broadcast(&self, frame: ServerFrame) -> bool {
        self.broadcast.try_send(frame).is_ok()
    }

    /// Typing updates are lossy by design; a dropped one is repaired by the
    /// next keystroke or by expiry.
    pub fn typing(&self, user_id: Uuid, is_typing: bool) -> bool {
        self.control.try_send(RoomCommand::Typing { user_id, is_typing }).is_ok()
    }

    pub fn occupancy(&self) -> usize {
        self.occupancy.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.occupancy() == 0
    }

    /// True once the loop task has exited (or panicked).
    pub fn is_closed(&self) -> bool {
        self.control.is_closed()
    }

    /// Signal the loop to close all session queues and exit.
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

/// Start a room loop and return its handle. Called by the registry under its
/// write lock on first use of a room id.
pub(crate) fn spawn_room(
    id: Uuid,
    registry: Arc<RoomRegistry>,
    publisher: Arc<dyn BusPublisher>,
    config: RealtimeConfig,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
) -> RoomHandle {
    let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
    let (broadcast_tx, broadcast_rx) = mpsc::channel(config.room_broadcast_capacity);
    let occupancy = Arc::new(AtomicUsize::new(0));

    let handle = RoomHandle {
        id,
        control: control_tx,
        broadcast: broadcast_tx,
        occupancy: Arc::clone(&occupancy),
        shutdown: shutdown.clone(),
    };

    let room = RoomLoop {
        id,
        registry,
        publisher,
        config,
        metrics,
        clients: HashMap::new(),
        typing: HashMap::new(),
        occupancy,
        shutdown,
    };
    tokio::spawn(room.run(control_rx, broadcast_rx));

    handle
}

struct RoomLoop {
    id: Uuid,
    registry: Arc<RoomRegistry>,
    publisher: Arc<dyn BusPublisher>,
    config: RealtimeConfig,
    metrics: Arc<Metrics>,
    clients: HashMap<Uuid, SessionHandle>,
    typing: HashMap<Uuid, Instant>,
    occupancy: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

impl RoomLoop {
    async fn run(
        mut self,
        mut control: mpsc::Receiver<RoomCommand>,
        mut broadcast: mpsc::Receiver<ServerFrame>,
    ) {
        let mut tick = interval(self.config.typing_sweep_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                command = control.recv() => match command {
                    Some(RoomCommand::Attach(session)) => {
                        self.registry.touch(self.id).await;
                        self.attach(session);
                    },
                    Some(RoomCommand::Detach { session_id }) => self.detach(session_id),
                    Some(RoomCommand::Typing { user_id, is_typing }) => {
                        self.handle_typing(user_id, is_typing);
                    },
                    None => break,
                },
                frame = broadcast.recv() => match frame {
                    Some(frame) => {
                        self.registry.touch(self.id).await;
                        self.fan_out(frame);
                    },
                    None => break,
                },
                _ = tick.tick() => self.expire_typing(),
            }
        }

        // Dropping the handles closes every session's outbound queue, which
        // ends the write pumps and with them the connections.
        self.clients.clear();
        self.occupancy.store(0, Ordering::Relaxed);
        debug!(room_id = %self.id, "room loop exited");
    }

    fn attach(&mut self, session: SessionHandle) {
        let user_id = session.user_id;
        self.clients.insert(session.session_id, session);
        self.occupancy.store(self.clients.len(), Ordering::Relaxed);

        self.fan_out(ServerFrame::Join {
            room_id: self.id,
            user_id,
            timestamp: Utc::now(),
        });
    }

    fn detach(&mut self, session_id: Uuid) {
        let Some(session) = self.clients.remove(&session_id) else {
            return;
        };
        self.occupancy.store(self.clients.len(), Ordering::Relaxed);
        self.typing.remove(&session.user_id);

        self.fan_out(ServerFrame::Leave {
            room_id: self.id,
            user_id: session.user_id,
            timestamp: Utc::now(),
        });

        if self.clients.is_empty() {
            self.registry.schedule_probe(self.id);
        }
    }

    /// Iterate the client set with a non-blocking enqueue per session. A full
    /// queue drops the frame for that session only; three consecutive drops
    /// mark the session for disconnect.
    fn fan_out(&mut self, frame: ServerFrame) {
        let mut marked: Vec<Uuid> = Vec::new();
        for (session_id, session) in &self.clients {
            match session.try_deliver(&frame) {
                DeliverOutcome::Delivered => {},
                DeliverOutcome::Dropped => {
                    self.metrics.outbound_frames_dropped.inc();
                    debug!(room_id = %self.id, %session_id, "outbound queue full, frame dropped");
                },
                DeliverOutcome::Dead => marked.push(*session_id),
            }
        }

        for session_id in marked {
            self.metrics.slow_sessions_disconnected.inc();
            warn!(room_id = %self.id, %session_id, "disconnecting slow session");
            self.detach(session_id);
        }
    }

    fn handle_typing(&mut self, user_id: Uuid, is_typing: bool) {
        if is_typing {
            self.typing.insert(user_id, Instant::now());
        } else {
            self.typing.remove(&user_id);
        }

        self.fan_out(ServerFrame::TypingUpdate { room_id: self.id, user_id, is_typing });

        // Peers learn about typing through the bus; the loop never waits on
        // the store.
        let publisher = Arc::clone(&self.publisher);
        let event = RoomEvent::TypingUpdate {
            room_id: self.id,
            user_id,
            is_typing,
            timestamp: Utc::now(),
        };
        tokio::spawn(async move {
            if let Err(e) = publisher.publish_room_event(&event).await {
                debug!(error = %e, "typing publish failed");
            }
        });
    }

    /// Expire stale typing entries; clients that went silent without a
    /// typing_stop get an explicit false update.
    fn expire_typing(&mut self) {
        let expiry = self.config.typing_expiry;
        let expired: Vec<Uuid> = self
            .typing
            .iter()
            .filter(|(_, last)| last.elapsed() > expiry)
            .map(|(user_id, _)| *user_id)
            .collect();

        for user_id in expired {
            self.typing.remove(&user_id);
            self.fan_out(ServerFrame::TypingUpdate {
                room_id: self.id,
                user_id,
                is_typing: false,
            });
        }
    }
}
