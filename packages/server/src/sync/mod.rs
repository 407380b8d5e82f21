//! Cross-node coherence: the publish capability used by sessions, rooms and
//! the write pipeline, and the consumer task that dispatches inbound bus
//! events to local rooms.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use futures_util::stream::{BoxStream, SelectAll, select_all};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::BusConfig;
use crate::metrics::Metrics;
use crate::realtime::registry::RoomRegistry;
use palaver_entity::types::{
    BusEnvelope, CHANNEL_MESSAGES, CHANNEL_MESSAGES_DELIVERED, CHANNEL_ROOM_EVENTS,
    CHANNEL_USER_EVENTS, Message, MessageDelivered, RoomEvent, ServerFrame, UserEvent, UserStatus,
};
use palaver_surrealdb::repository::{RepositoryError, SyncBusRepository};

/// The small capability the rest of the engine needs from the bus: publish an
/// opaque payload on a channel. Typed helpers are provided on top so callers
/// never hand-build envelopes.
#[async_trait]
pub trait BusPublisher: Send + Sync {
    async fn publish(&self, channel: &str, payload: Value) -> Result<(), RepositoryError>;

    /// Announce a durably committed message. Receivers on every node,
    /// including this one, fan it out to their local room.
    async fn publish_message_delivered(&self, message: &Message) -> Result<(), RepositoryError> {
        let event = MessageDelivered {
            message_id: message.id,
            room_id: message.room_id,
            user_id: message.user_id,
            content: message.content.clone(),
            timestamp: message.created_at,
        };
        self.publish(CHANNEL_MESSAGES_DELIVERED, serde_json::to_value(&event)?).await
    }

    /// Publish a full message envelope after an edit or soft delete.
    async fn publish_message(&self, message: &Message) -> Result<(), RepositoryError> {
        self.publish(CHANNEL_MESSAGES, serde_json::to_value(message)?).await
    }

    async fn publish_room_event(&self, event: &RoomEvent) -> Result<(), RepositoryError> {
        self.publish(CHANNEL_ROOM_EVENTS, serde_json::to_value(event)?).await
    }

    async fn publish_user_status(
        &self,
        user_id: Uuid,
        status: UserStatus,
        room_id: Option<Uuid>,
    ) -> Result<(), RepositoryError> {
        let event = UserEvent::StatusChange { user_id, status, timestamp: Utc::now(), room_id };
        self.publish(CHANNEL_USER_EVENTS, serde_json::to_value(&event)?).await
    }
}

/// Production publisher backed by the bus table.
pub struct SyncPublisher {
    bus: SyncBusRepository,
}

impl SyncPublisher {
    pub fn new(bus: SyncBusRepository) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl BusPublisher for SyncPublisher {
    async fn publish(&self, channel: &str, payload: Value) -> Result<(), RepositoryError> {
        self.bus.publish(channel, payload).await
    }
}

/// A bus event decoded into the frame to fan out and the room to fan it out
/// in. None means the event was malformed or carries nothing to deliver.
type Delivery = Option<(Uuid, ServerFrame)>;
type InboundStream = BoxStream<'static, Result<Delivery, RepositoryError>>;

/// The per-node subscriber task. Opens one live stream per channel, decodes
/// each at the subscription edge and merges them, then dispatches to locally
/// active rooms without ever back-pressuring the bus: a full room inbox
/// drops the event with a metric.
pub struct SyncEngine {
    bus: SyncBusRepository,
    registry: Arc<RoomRegistry>,
    metrics: Arc<Metrics>,
    config: BusConfig,
    shutdown: CancellationToken,
}

impl SyncEngine {
    pub fn new(
        bus: SyncBusRepository,
        registry: Arc<RoomRegistry>,
        metrics: Arc<Metrics>,
        config: BusConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self { bus, registry, metrics, config, shutdown }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// One LIVE SELECT per channel, each mapped through that channel's
    /// decoder before the four streams merge into the consumer's single
    /// drain.
    async fn subscribe_channels(&self) -> Result<SelectAll<InboundStream>, RepositoryError> {
        let delivered: InboundStream = self
            .bus
            .subscribe(CHANNEL_MESSAGES_DELIVERED)
            .await?
            .map(|item| item.map(decode_message_delivered))
            .boxed();
        let messages: InboundStream = self
            .bus
            .subscribe(CHANNEL_MESSAGES)
            .await?
            .map(|item| item.map(decode_message))
            .boxed();
        let room_events: InboundStream = self
            .bus
            .subscribe(CHANNEL_ROOM_EVENTS)
            .await?
            .map(|item| item.map(decode_room_event))
            .boxed();
        let user_events: InboundStream = self
            .bus
            .subscribe(CHANNEL_USER_EVENTS)
            .await?
            .map(|item| item.map(decode_user_event))
            .boxed();

        Ok(select_all(vec![delivered, messages, room_events, user_events]))
    }

    async fn run(self) {
        let mut backoff = self.config.reconnect_backoff;

        loop {
            if self.shutdown.is_cancelled() {
                return;
            }

            match self.subscribe_channels().await {
                Ok(mut merged) => {
                    debug!("sync bus subscriptions established");
                    backoff = self.config.reconnect_backoff;

                    loop {
                        tokio::select! {
                            _ = self.shutdown.cancelled() => return,
                            item = merged.next() => match item {
                                Some(Ok(Some((room_id, frame)))) => {
                                    self.deliver(room_id, frame).await;
                                },
                                Some(Ok(None)) => {},
                                Some(Err(e)) => {
                                    warn!(error = %e, "sync bus stream error");
                                    break;
                                },
                                None => {
                                    warn!("sync bus subscriptions ended");
                                    break;
                                },
                            },
                        }
                    }
                },
                Err(e) => warn!(error = %e, "sync bus subscribe failed"),
            }

            self.metrics.bus_reconnects.inc();
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = tokio::time::sleep(backoff) => {},
            }
            backoff = (backoff * 2).min(self.config.max_reconnect_backoff);
        }
    }

    /// Non-blocking dispatch into a locally active room. Rooms not resident
    /// on this node are skipped; nobody here is attached to them.
    async fn deliver(&self, room_id: Uuid, frame: ServerFrame) {
        if let Some(room) = self.registry.get_active(room_id).await
            && !room.try_broadcast(frame)
        {
            self.metrics.bus_dispatches_dropped.inc();
            warn!(%room_id, "room inbox full, bus event dropped");
        }
    }
}

fn decode_message_delivered(envelope: BusEnvelope) -> Delivery {
    match serde_json::from_value::<MessageDelivered>(envelope.payload) {
        Ok(event) => Some((
            event.room_id,
            ServerFrame::MessageDelivered {
                message_id: event.message_id,
                room_id: event.room_id,
                user_id: event.user_id,
                content: event.content,
                timestamp: event.timestamp,
            },
        )),
        Err(e) => {
            warn!(error = %e, "bad messages_delivered payload");
            None
        },
    }
}

/// Full message envelopes arrive after an edit or soft delete; receivers
/// tell the two apart by the deleted-at marker.
fn decode_message(envelope: BusEnvelope) -> Delivery {
    match serde_json::from_value::<Message>(envelope.payload) {
        Ok(message) => {
            let room_id = message.room_id;
            let frame = if message.is_deleted() {
                ServerFrame::MessageDeleted { message }
            } else {
                ServerFrame::MessageEdited { message }
            };
            Some((room_id, frame))
        },
        Err(e) => {
            warn!(error = %e, "bad messages payload");
            None
        },
    }
}

fn decode_room_event(envelope: BusEnvelope) -> Delivery {
    match serde_json::from_value::<RoomEvent>(envelope.payload) {
        Ok(event) => {
            let room_id = event.room_id();
            let frame = match event {
                RoomEvent::ReactionAdded { message_id, user_id, emoji, .. } => {
                    ServerFrame::ReactionAdded { message_id, user_id, emoji }
                },
                RoomEvent::ReactionRemoved { message_id, user_id, emoji, .. } => {
                    ServerFrame::ReactionRemoved { message_id, user_id, emoji }
                },
                RoomEvent::TypingUpdate { room_id, user_id, is_typing, .. } => {
                    ServerFrame::TypingUpdate { room_id, user_id, is_typing }
                },
            };
            Some((room_id, frame))
        },
        Err(e) => {
            warn!(error = %e, "bad room_events payload");
            None
        },
    }
}

/// Status changes only reach clients through a room the user was connected
/// to, and only where that room is active.
fn decode_user_event(envelope: BusEnvelope) -> Delivery {
    match serde_json::from_value::<UserEvent>(envelope.payload) {
        Ok(UserEvent::StatusChange { user_id, status, timestamp, room_id }) => room_id
            .map(|room_id| (room_id, ServerFrame::StatusChange { user_id, status, timestamp })),
        Err(e) => {
            warn!(error = %e, "bad user_events payload");
            None
        },
    }
}
