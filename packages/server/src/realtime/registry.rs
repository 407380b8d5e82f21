//! Node-local room registry: owns the room-id → room map, creates rooms on
//! first use and evicts cold ones.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::RealtimeConfig;
use crate::metrics::Metrics;
use crate::realtime::room::{self, RoomHandle};
use crate::sync::BusPublisher;

/// A single lock guards both maps, so an eviction decision always sees a
/// consistent (occupancy, activity) pair.
struct RegistryInner {
    rooms: HashMap<Uuid, RoomHandle>,
    last_activity: HashMap<Uuid, Instant>,
}

pub struct RoomRegistry {
    inner: RwLock<RegistryInner>,
    publisher: Arc<dyn BusPublisher>,
    config: RealtimeConfig,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
}

impl RoomRegistry {
    pub fn new(
        publisher: Arc<dyn BusPublisher>,
        config: RealtimeConfig,
        metrics: Arc<Metrics>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(RegistryInner {
                rooms: HashMap::new(),
                last_activity: HashMap::new(),
            }),
            publisher,
            config,
            metrics,
            shutdown,
        })
    }

    /// Atomic lookup-or-create. First use of a room id spawns its loop. A
    /// room whose loop died (panic containment) is replaced with a fresh one.
    pub async fn get_or_create(self: &Arc<Self>, room_id: Uuid) -> RoomHandle {
        let mut inner = self.inner.write().await;
        inner.last_activity.insert(room_id, Instant::now());

        if let Some(handle) = inner.rooms.get(&room_id)
            && !handle.is_closed()
        {
            return handle.clone();
        }

        debug!(%room_id, "creating room");
        let handle = room::spawn_room(
            room_id,
            Arc::clone(self),
            Arc::clone(&self.publisher),
            self.config.clone(),
            Arc::clone(&self.metrics),
            self.shutdown.child_token(),
        );
        inner.rooms.insert(room_id, handle.clone());
        handle
    }

    /// Lookup without creating, for bus dispatch. A hit counts as activity.
    pub async fn get_active(&self, room_id: Uuid) -> Option<RoomHandle> {
        let mut inner = self.inner.write().await;
        let handle = inner.rooms.get(&room_id).cloned();
        if handle.is_some() {
            inner.last_activity.insert(room_id, Instant::now());
        }
        handle
    }

    pub async fn touch(&self, room_id: Uuid) {
        let mut inner = self.inner.write().await;
        inner.last_activity.insert(room_id, Instant::now());
    }

    pub async fn remove(&self, room_id: Uuid) {
        let mut inner = self.inner.write().await;
        if let Some(handle) = inner.rooms.remove(&room_id) {
            handle.close();
        }
        inner.last_activity.remove(&room_id);
    }

    /// One-shot probe scheduled when a room becomes empty, so eviction does
    /// not have to wait for the next sweeper tick.
    pub fn schedule_probe(self: &Arc<Self>, room_id: Uuid) {
        let registry = Arc::clone(self);
        let grace = self.config.empty_room_grace;
        tokio::spawn(async move {
            tokio::select! {
                _ = registry.shutdown.cancelled() => {},
                _ = tokio::time::sleep(grace) => registry.evict_if_cold(room_id).await,
            }
        });
    }

    /// Evict a room if it is empty and idle past the threshold. Idempotent;
    /// non-empty rooms are never evicted regardless of idle time.
    pub async fn evict_if_cold(&self, room_id: Uuid) {
        let mut inner = self.inner.write().await;
        let Some(handle) = inner.rooms.get(&room_id) else {
            return;
        };
        let idle = inner
            .last_activity
            .get(&room_id)
            .map(|at| at.elapsed())
            .unwrap_or(self.config.inactivity_threshold);

        if handle.is_empty() && idle >= self.config.inactivity_threshold {
            info!(%room_id, "evicting cold room");
            if let Some(handle) = inner.rooms.remove(&room_id) {
                handle.close();
            }
            inner.last_activity.remove(&room_id);
        }
    }

    /// Background sweeper applying the eviction policy on a fixed period.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = interval(registry.config.evict_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = registry.shutdown.cancelled() => break,
                    _ = tick.tick() => registry.sweep().await,
                }
            }
        })
    }

    async fn sweep(&self) {
        let candidates: Vec<Uuid> = {
            let inner = self.inner.read().await;
            inner
                .rooms
                .iter()
                .filter(|(room_id, handle)| {
                    let idle = inner
                        .last_activity
                        .get(room_id)
                        .map(|at| at.elapsed())
                        .unwrap_or(self.config.inactivity_threshold);
                    handle.is_empty() && idle >= self.config.inactivity_threshold
                })
                .map(|(room_id, _)| *room_id)
                .collect()
        };

        for room_id in candidates {
            // Re-checked under the write lock; a session may have attached
            // between the scan and now.
            self.evict_if_cold(room_id).await;
        }
    }

    pub async fn room_count(&self) -> usize {
        self.inner.read().await.rooms.len()
    }

    pub async fn is_active(&self, room_id: Uuid) -> bool {
        self.inner.read().await.rooms.contains_key(&room_id)
    }

    /// Close every room; their loops close all session queues on exit.
    pub async fn shutdown_all(&self) {
        let mut inner = self.inner.write().await;
        for handle in inner.rooms.values() {
            handle.close();
        }
        inner.rooms.clear();
        inner.last_activity.clear();
    }
}
