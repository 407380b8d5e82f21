//! End-to-end flows through the engine: produced messages travel session →
//! write pipeline → durable store → sync bus → registry → room → session
//! queue, on one node and across two nodes sharing the same store.

use std::sync::Arc;
use std::time::Duration;

use surrealdb::{Surreal, engine::any::Any};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use palaver_entity::types::{MessageKind, NewMessage, ServerFrame, UserStatus};
use palaver_server::cache::RecentMessageCache;
use palaver_server::config::{BusConfig, CacheConfig, RealtimeConfig, WriterConfig};
use palaver_server::metrics::Metrics;
use palaver_server::persistence::{EnqueueError, MessageWriter};
use palaver_server::realtime::{RoomRegistry, SessionHandle};
use palaver_server::sync::{BusPublisher, SyncEngine, SyncPublisher};
use palaver_surrealdb::repository::{MessageRepository, SyncBusRepository};
use palaver_surrealdb::test_utils::TestDatabase;

fn realtime_config() -> RealtimeConfig {
    RealtimeConfig {
        session_outbound_capacity: 256,
        room_broadcast_capacity: 256,
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

fn writer_config() -> WriterConfig {
    WriterConfig {
        batch_size: 50,
        flush_interval: Duration::from_millis(20),
        max_retries: 3,
        initial_backoff: Duration::from_millis(10),
        queue_capacity: 1000,
        enqueue_wait: Duration::from_millis(25),
    }
}

fn bus_config() -> BusConfig {
    BusConfig {
        retention: Duration::from_secs(600),
        cleanup_interval: Duration::from_secs(60),
        reconnect_backoff: Duration::from_millis(50),
        max_reconnect_backoff: Duration::from_secs(1),
    }
}

/// One simulated fleet node: a registry plus a sync consumer over the shared
/// store.
struct Node {
    registry: Arc<RoomRegistry>,
    publisher: Arc<dyn BusPublisher>,
    shutdown: CancellationToken,
    engine: JoinHandle<()>,
}

impl Node {
    fn spawn(db: &Surreal<Any>) -> Self {
        let shutdown = CancellationToken::new();
        let metrics = Arc::new(Metrics::new().unwrap());
        let bus = SyncBusRepository::new(db.clone());
        let publisher: Arc<dyn BusPublisher> = Arc::new(SyncPublisher::new(bus.clone()));

        let registry = RoomRegistry::new(
            Arc::clone(&publisher),
            realtime_config(),
            Arc::clone(&metrics),
            shutdown.child_token(),
        );

        let engine = SyncEngine::new(
            bus,
            Arc::clone(&registry),
            metrics,
            bus_config(),
            shutdown.child_token(),
        )
        .spawn();

        Self { registry, publisher, shutdown, engine }
    }

    fn spawn_writer(&self, db: &Surreal<Any>) -> Arc<MessageWriter> {
        MessageWriter::spawn(
            MessageRepository::new(db.clone()),
            RecentMessageCache::new(&CacheConfig {
                ttl: Duration::from_secs(60),
                recent_limit: 100,
            }),
            Arc::clone(&self.publisher),
            writer_config(),
            Arc::new(Metrics::new().unwrap()),
        )
    }

    async fn attach(&self, room_id: Uuid, user_id: Uuid) -> mpsc::Receiver<ServerFrame> {
        let room = self.registry.get_or_create(room_id).await;
        let (tx, rx) = mpsc::channel(256);
        assert!(room.attach(SessionHandle::new(Uuid::new_v4(), user_id, tx)).await);
        rx
    }

    async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.engine.await;
    }
}

async fn recv_matching(
    rx: &mut mpsc::Receiver<ServerFrame>,
    mut pred: impl FnMut(&ServerFrame) -> bool,
) -> ServerFrame {
    timeout(Duration::from_secs(10), async {
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

fn content_message(room_id: Uuid, user_id: Uuid, content: &str) -> NewMessage {
    NewMessage {
        room_id,
        user_id,
        content: content.to_string(),
        message_type: MessageKind::Text,
        file_url: None,
        parent_id: None,
    }
}

#[tokio::test]
async fn produced_message_fans_out_once_committed() {
    let test_db = TestDatabase::new().await.unwrap();
    let alice = test_db.seed_user("alice").await.unwrap();
    let bob = test_db.seed_user("bob").await.unwrap();
    let room = test_db.seed_room(alice).await.unwrap();

    let node = Node::spawn(&test_db.db);
    let writer = node.spawn_writer(&test_db.db);
    let mut rx_alice = node.attach(room, alice).await;
    let mut rx_bob = node.attach(room, bob).await;

    writer.enqueue(content_message(room, alice, "hi")).await.unwrap();

    // Loopback is the only delivery path: both sessions, the author
    // included, receive the committed frame with the same assigned id.
    let frame_alice =
        recv_matching(&mut rx_alice, |f| matches!(f, ServerFrame::MessageDelivered { .. })).await;
    let frame_bob =
        recv_matching(&mut rx_bob, |f| matches!(f, ServerFrame::MessageDelivered { .. })).await;

    let (id_a, id_b) = match (&frame_alice, &frame_bob) {
        (
            ServerFrame::MessageDelivered { message_id: a, content: ca, user_id: ua, .. },
            ServerFrame::MessageDelivered { message_id: b, content: cb, .. },
        ) => {
            assert_eq!(ca, "hi");
            assert_eq!(cb, "hi");
            assert_eq!(*ua, alice);
            (*a, *b)
        },
        other => panic!("unexpected frames: {other:?}"),
    };
    assert_eq!(id_a, id_b);

    // Exactly one durable row.
    let stored = MessageRepository::new(test_db.db.clone())
        .get_room_messages(room, 50, None)
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, id_a);
    assert_eq!(stored[0].user_id, alice);

    writer.stop().await;
    node.stop().await;
}

#[tokio::test]
async fn message_crosses_nodes_with_equal_ids() {
    let test_db = TestDatabase::new().await.unwrap();
    let alice = test_db.seed_user("alice").await.unwrap();
    let bob = test_db.seed_user("bob").await.unwrap();
    let room = test_db.seed_room(alice).await.unwrap();
    test_db.join_room(room, bob, palaver_entity::types::MemberRole::Member).await.unwrap();

    let node_a = Node::spawn(&test_db.db);
    let node_b = Node::spawn(&test_db.db);
    let writer_a = node_a.spawn_writer(&test_db.db);

    let mut rx_alice = node_a.attach(room, alice).await;
    let mut rx_bob = node_b.attach(room, bob).await;

    writer_a.enqueue(content_message(room, alice, "hello")).await.unwrap();

    let frame_alice =
        recv_matching(&mut rx_alice, |f| matches!(f, ServerFrame::MessageDelivered { .. })).await;
    let frame_bob =
        recv_matching(&mut rx_bob, |f| matches!(f, ServerFrame::MessageDelivered { .. })).await;

    match (frame_alice, frame_bob) {
        (
            ServerFrame::MessageDelivered { message_id: a, content: ca, .. },
            ServerFrame::MessageDelivered { message_id: b, content: cb, .. },
        ) => {
            assert_eq!(a, b, "both nodes must observe the same assigned id");
            assert_eq!(ca, "hello");
            assert_eq!(cb, "hello");
        },
        other => panic!("unexpected frames: {other:?}"),
    }

    writer_a.stop().await;
    node_a.stop().await;
    node_b.stop().await;
}

#[tokio::test]
async fn stop_flushes_every_accepted_message() {
    let test_db = TestDatabase::new().await.unwrap();
    let alice = test_db.seed_user("alice").await.unwrap();
    let room = test_db.seed_room(alice).await.unwrap();

    let node = Node::spawn(&test_db.db);
    let writer = node.spawn_writer(&test_db.db);

    let mut accepted = 0;
    for i in 0..200 {
        if writer.enqueue(content_message(room, alice, &format!("m{i}"))).await.is_ok() {
            accepted += 1;
        }
    }
    writer.stop().await;

    let stored = MessageRepository::new(test_db.db.clone())
        .get_room_messages(room, 500, None)
        .await
        .unwrap();
    assert_eq!(stored.len(), accepted);
    // Ids are strictly increasing; the newest-first page reverses that.
    for pair in stored.windows(2) {
        assert!(pair[0].id > pair[1].id);
    }

    // The pipeline refuses work after stop.
    assert!(matches!(
        writer.enqueue(content_message(room, alice, "late")).await,
        Err(EnqueueError::Stopped)
    ));

    node.stop().await;
}

#[tokio::test]
async fn edits_and_deletes_loop_back_as_envelopes() {
    let test_db = TestDatabase::new().await.unwrap();
    let alice = test_db.seed_user("alice").await.unwrap();
    let bob = test_db.seed_user("bob").await.unwrap();
    let room = test_db.seed_room(alice).await.unwrap();

    let node = Node::spawn(&test_db.db);
    let messages = MessageRepository::new(test_db.db.clone());
    let mut rx_bob = node.attach(room, bob).await;

    let stored = messages
        .create_batch(&[
            content_message(room, alice, "original"),
            content_message(room, alice, "doomed"),
        ])
        .await
        .unwrap();

    let edited = messages.edit_message(stored[0].id, alice, "revised".into()).await.unwrap();
    node.publisher.publish_message(&edited).await.unwrap();

    let frame = recv_matching(&mut rx_bob, |f| matches!(f, ServerFrame::MessageEdited { .. })).await;
    match frame {
        ServerFrame::MessageEdited { message } => {
            assert_eq!(message.id, stored[0].id);
            assert_eq!(message.content, "revised");
            assert!(message.edited_at.is_some());
        },
        other => panic!("unexpected frame: {other:?}"),
    }

    let deleted = messages.soft_delete_message(stored[1].id).await.unwrap();
    node.publisher.publish_message(&deleted).await.unwrap();

    let frame =
        recv_matching(&mut rx_bob, |f| matches!(f, ServerFrame::MessageDeleted { .. })).await;
    match frame {
        ServerFrame::MessageDeleted { message } => {
            assert_eq!(message.id, stored[1].id);
            assert!(message.deleted_at.is_some());
        },
        other => panic!("unexpected frame: {other:?}"),
    }

    node.stop().await;
}

#[tokio::test]
async fn status_changes_reach_the_users_room() {
    let test_db = TestDatabase::new().await.unwrap();
    let alice = test_db.seed_user("alice").await.unwrap();
    let bob = test_db.seed_user("bob").await.unwrap();
    let room = test_db.seed_room(alice).await.unwrap();

    let node = Node::spawn(&test_db.db);
    let mut rx_bob = node.attach(room, bob).await;

    node.publisher
        .publish_user_status(alice, UserStatus::Online, Some(room))
        .await
        .unwrap();

    let frame = recv_matching(&mut rx_bob, |f| matches!(f, ServerFrame::StatusChange { .. })).await;
    match frame {
        ServerFrame::StatusChange { user_id, status, .. } => {
            assert_eq!(user_id, alice);
            assert_eq!(status, UserStatus::Online);
        },
        other => panic!("unexpected frame: {other:?}"),
    }

    node.stop().await;
}

#[tokio::test]
async fn duplicate_announcements_are_visibly_equal() {
    let test_db = TestDatabase::new().await.unwrap();
    let alice = test_db.seed_user("alice").await.unwrap();
    let bob = test_db.seed_user("bob").await.unwrap();
    let room = test_db.seed_room(alice).await.unwrap();

    let node = Node::spawn(&test_db.db);
    let messages = MessageRepository::new(test_db.db.clone());
    let mut rx_bob = node.attach(room, bob).await;

    let stored = messages.create_batch(&[content_message(room, alice, "once")]).await.unwrap();

    // An at-least-once bus may redeliver; both copies must carry the same id
    // and content so clients can deduplicate trivially.
    node.publisher.publish_message_delivered(&stored[0]).await.unwrap();
    node.publisher.publish_message_delivered(&stored[0]).await.unwrap();

    let first =
        recv_matching(&mut rx_bob, |f| matches!(f, ServerFrame::MessageDelivered { .. })).await;
    let second =
        recv_matching(&mut rx_bob, |f| matches!(f, ServerFrame::MessageDelivered { .. })).await;

    match (first, second) {
        (
            ServerFrame::MessageDelivered { message_id: a, content: ca, .. },
            ServerFrame::MessageDelivered { message_id: b, content: cb, .. },
        ) => {
            assert_eq!(a, b);
            assert_eq!(ca, cb);
        },
        other => panic!("unexpected frames: {other:?}"),
    }

    node.stop().await;
}
