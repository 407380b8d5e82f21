use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::RealtimeConfig;
use crate::metrics::Metrics;
use crate::realtime::registry::RoomRegistry;
use crate::realtime::room::RoomHandle;
use crate::realtime::session::SessionHandle;
use crate::sync::BusPublisher;
use palaver_entity::types::ServerFrame;
use palaver_surrealdb::repository::RepositoryError;

/// Collects published bus events instead of hitting a store.
struct RecordingPublisher {
    events: Mutex<Vec<(String, Value)>>,
}

impl RecordingPublisher {
    fn new() -> Arc<Self> {
        Arc::new(Self { events: Mutex::new(Vec::new()) })
    }

    fn channels(&self) -> Vec<String> {
        self.events.lock().unwrap().iter().map(|(channel, _)| channel.clone()).collect()
    }
}

#[async_trait]
impl BusPublisher for RecordingPublisher {
    async fn publish(&self, channel: &str, payload: Value) -> Result<(), RepositoryError> {
        self.events.lock().unwrap().push((channel.to_string(), payload));
        Ok(())
    }
}

fn test_config() -> RealtimeConfig {
    RealtimeConfig {
        session_outbound_capacity: 64,
        room_broadcast_capacity: 64,
        pong_wait: Duration::from_secs(60),
        write_wait: Duration::from_secs(10),
        max_frame_size: 512,
        evict_interval: Duration::from_secs(60),
        inactivity_threshold: Duration::from_secs(600),
        empty_room_grace: Duration::from_secs(60),
        typing_expiry: Duration::from_secs(3),
        typing_sweep_interval: Duration::from_secs(5),
    }
}

fn test_registry(
    config: RealtimeConfig,
) -> (Arc<RoomRegistry>, Arc<RecordingPublisher>, Arc<Metrics>) {
    let publisher = RecordingPublisher::new();
    let metrics = Arc::new(Metrics::new().unwrap());
    let registry = RoomRegistry::new(
        Arc::clone(&publisher) as Arc<dyn BusPublisher>,
        config,
        Arc::clone(&metrics),
        CancellationToken::new(),
    );
    (registry, publisher, metrics)
}

/// Attach a fresh session with the given queue capacity; returns its id and
/// the receiving end of the outbound queue.
async fn attach_session(
    room: &RoomHandle,
    capacity: usize,
) -> (Uuid, Uuid, mpsc::Receiver<ServerFrame>) {
    let session_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    let (tx, rx) = mpsc::channel(capacity);
    assert!(room.attach(SessionHandle::new(session_id, user_id, tx)).await);
    (session_id, user_id, rx)
}

/// Pull frames until one matches, with a generous deadline.
async fn recv_matching(
    rx: &mut mpsc::Receiver<ServerFrame>,
    mut pred: impl FnMut(&ServerFrame) -> bool,
) -> ServerFrame {
    timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Some(frame) if pred(&frame) => return frame,
                Some(_) => continue,
                None => panic!("queue closed before a matching frame arrived"),
            }
        }
    })
    .await
    .expect("timed out waiting for frame")
}

#[tokio::test(start_paused = true)]
async fn broadcast_reaches_every_attached_session() {
    let (registry, _, _) = test_registry(test_config());
    let room_id = Uuid::new_v4();
    let room = registry.get_or_create(room_id).await;

    let (_, user_a, mut rx_a) = attach_session(&room, 64).await;
    let (_, user_b, mut rx_b) = attach_session(&room, 64).await;

    // Session A sees B's join; both were announced.
    recv_matching(&mut rx_a, |f| matches!(f, ServerFrame::Join { user_id, .. } if *user_id == user_b)).await;

    assert!(room.try_broadcast(ServerFrame::TypingUpdate {
        room_id,
        user_id: user_a,
        is_typing: true,
    }));

    for rx in [&mut rx_a, &mut rx_b] {
        let frame = recv_matching(rx, |f| matches!(f, ServerFrame::TypingUpdate { .. })).await;
        match frame {
            ServerFrame::TypingUpdate { user_id, is_typing, .. } => {
                assert_eq!(user_id, user_a);
                assert!(is_typing);
            },
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn slow_session_is_dropped_then_disconnected() {
    let (registry, _, metrics) = test_registry(test_config());
    let room_id = Uuid::new_v4();
    let room = registry.get_or_create(room_id).await;

    // The healthy session consumes; the slow one has a single-slot queue
    // that nobody drains. Its own join announcement occupies the slot.
    let (_, _, mut rx_fast) = attach_session(&room, 64).await;
    let (_, slow_user, mut rx_slow) = attach_session(&room, 1).await;
    recv_matching(&mut rx_fast, |f| matches!(f, ServerFrame::Join { user_id, .. } if *user_id == slow_user)).await;

    let frame = |n: i64| ServerFrame::MessageDelivered {
        message_id: n,
        room_id,
        user_id: slow_user,
        content: "x".into(),
        timestamp: chrono::Utc::now(),
    };

    // Every broadcast is a drop for the slow session; the third consecutive
    // drop marks it for disconnect.
    for n in 0..4 {
        assert!(room.try_broadcast(frame(n)));
    }
    sleep(Duration::from_millis(50)).await;

    // The fast session got all four frames plus the slow session's leave,
    // and the room never stalled.
    let mut delivered = Vec::new();
    let mut saw_leave = false;
    while delivered.len() < 4 || !saw_leave {
        let frame = timeout(Duration::from_secs(5), rx_fast.recv())
            .await
            .expect("fast session starved")
            .expect("fast session queue closed");
        match frame {
            ServerFrame::MessageDelivered { message_id, .. } => delivered.push(message_id),
            ServerFrame::Leave { user_id, .. } if user_id == slow_user => saw_leave = true,
            _ => {},
        }
    }
    assert_eq!(delivered, vec![0, 1, 2, 3]);

    // The slow session kept only what fit before the drops, then its queue
    // closed when the room let go of it.
    assert!(matches!(rx_slow.recv().await, Some(ServerFrame::Join { .. })));
    while let Some(_frame) = rx_slow.recv().await {}
    assert_eq!(room.occupancy(), 1);

    assert!(metrics.outbound_frames_dropped.get() >= 2);
    assert_eq!(metrics.slow_sessions_disconnected.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn typing_expires_without_an_explicit_stop() {
    let (registry, publisher, _) = test_registry(test_config());
    let room_id = Uuid::new_v4();
    let room = registry.get_or_create(room_id).await;

    let (_, typist, _rx_typist) = attach_session(&room, 64).await;
    let (_, _, mut rx_peer) = attach_session(&room, 64).await;

    assert!(room.typing(typist, true));
    let frame = recv_matching(&mut rx_peer, |f| matches!(f, ServerFrame::TypingUpdate { .. })).await;
    assert!(matches!(frame, ServerFrame::TypingUpdate { is_typing: true, .. }));

    // No typing_stop follows. The sweep tick expires the entry and fans out
    // the stop on its own.
    sleep(Duration::from_secs(10)).await;
    let frame = recv_matching(&mut rx_peer, |f| {
        matches!(f, ServerFrame::TypingUpdate { is_typing: false, .. })
    })
    .await;
    match frame {
        ServerFrame::TypingUpdate { user_id, .. } => assert_eq!(user_id, typist),
        other => panic!("unexpected frame: {other:?}"),
    }

    // Typing also went out to peers over the bus.
    assert!(publisher.channels().iter().any(|c| c == "room_events"));
}

#[tokio::test(start_paused = true)]
async fn empty_idle_room_is_evicted_and_recreated_clean() {
    let (registry, _, _) = test_registry(test_config());
    let _sweeper = registry.spawn_sweeper();
    let room_id = Uuid::new_v4();

    let room = registry.get_or_create(room_id).await;
    let (session_id, _, mut rx) = attach_session(&room, 64).await;
    recv_matching(&mut rx, |f| matches!(f, ServerFrame::Join { .. })).await;

    room.detach(session_id).await;
    sleep(Duration::from_millis(50)).await;
    assert!(registry.is_active(room_id).await, "grace window keeps the room resident");

    // Non-empty rooms survive any amount of idle time; empty ones go once
    // the inactivity threshold passes.
    sleep(Duration::from_secs(700)).await;
    assert!(!registry.is_active(room_id).await, "room should be evicted");
    assert_eq!(registry.room_count().await, 0);

    // Re-joining recreates the room with empty state.
    let recreated = registry.get_or_create(room_id).await;
    assert_eq!(recreated.occupancy(), 0);
    assert!(registry.is_active(room_id).await);
}

#[tokio::test(start_paused = true)]
async fn occupied_room_is_never_evicted() {
    let (registry, _, _) = test_registry(test_config());
    let _sweeper = registry.spawn_sweeper();
    let room_id = Uuid::new_v4();

    let room = registry.get_or_create(room_id).await;
    let (_, _, _rx) = attach_session(&room, 64).await;

    sleep(Duration::from_secs(3600)).await;
    assert!(registry.is_active(room_id).await);
    assert_eq!(room.occupancy(), 1);
}

#[tokio::test(start_paused = true)]
async fn rapid_attach_detach_leaks_nothing() {
    let (registry, _, _) = test_registry(test_config());
    let _sweeper = registry.spawn_sweeper();
    let room_id = Uuid::new_v4();
    let room = registry.get_or_create(room_id).await;

    for _ in 0..50 {
        let (session_id, _, mut rx) = attach_session(&room, 64).await;
        recv_matching(&mut rx, |f| matches!(f, ServerFrame::Join { .. })).await;
        room.detach(session_id).await;
        // Detaching twice is harmless.
        room.detach(session_id).await;
    }

    sleep(Duration::from_millis(50)).await;
    assert_eq!(room.occupancy(), 0);
    assert_eq!(registry.room_count().await, 1);

    sleep(Duration::from_secs(700)).await;
    assert_eq!(registry.room_count().await, 0, "cold room must not linger");
}

#[tokio::test(start_paused = true)]
async fn registry_shutdown_closes_session_queues() {
    let (registry, _, _) = test_registry(test_config());
    let room = registry.get_or_create(Uuid::new_v4()).await;
    let (_, _, mut rx) = attach_session(&room, 64).await;
    recv_matching(&mut rx, |f| matches!(f, ServerFrame::Join { .. })).await;

    registry.shutdown_all().await;
    sleep(Duration::from_millis(50)).await;

    // Queue closes once the room loop drops its handles.
    while let Some(_frame) = rx.recv().await {}
    assert_eq!(registry.room_count().await, 0);
}
