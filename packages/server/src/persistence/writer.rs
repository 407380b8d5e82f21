//! The batched durable-write pipeline: volatile queue in, committed batches
//! out, with an announcement per message on the sync bus after commit.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::cache::RecentMessageCache;
use crate::config::WriterConfig;
use crate::metrics::Metrics;
use crate::sync::BusPublisher;
use palaver_entity::types::{Message, NewMessage};
use palaver_surrealdb::repository::MessageRepository;

#[derive(Error, Debug)]
pub enum EnqueueError {
    /// Queue full past the brief blocking window; the caller must not retry.
    #[error("write pipeline queue is full")]
    Full,
    /// Pipeline is stopping; the message was not accepted.
    #[error("write pipeline is stopped")]
    Stopped,
}

/// Durability begins only after a successful enqueue: everything accepted
/// before `stop()` is flushed, everything refused was never owed.
pub struct MessageWriter {
    queue: RwLock<Option<mpsc::Sender<NewMessage>>>,
    enqueue_wait: std::time::Duration,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MessageWriter {
    pub fn spawn(
        repo: MessageRepository,
        cache: RecentMessageCache,
        publisher: Arc<dyn BusPublisher>,
        config: WriterConfig,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let enqueue_wait = config.enqueue_wait;

        let task = WriterTask { repo, cache, publisher, config, metrics };
        let worker = tokio::spawn(task.run(rx));

        Arc::new(Self {
            queue: RwLock::new(Some(tx)),
            enqueue_wait,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Non-blocking best effort: try the queue, block briefly if full, then
    /// fail fast.
    pub async fn enqueue(&self, message: NewMessage) -> Result<(), EnqueueError> {
        let guard = self.queue.read().await;
        let Some(tx) = guard.as_ref() else {
            return Err(EnqueueError::Stopped);
        };

        match tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(EnqueueError::Stopped),
            Err(mpsc::error::TrySendError::Full(message)) => {
                match timeout(self.enqueue_wait, tx.send(message)).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => Err(EnqueueError::Stopped),
                    Err(_) => Err(EnqueueError::Full),
                }
            },
        }
    }

    /// Stop accepting, flush everything accepted so far and wait for the
    /// worker. The caller bounds this with the shutdown deadline.
    pub async fn stop(&self) {
        self.queue.write().await.take();
        if let Some(worker) = self.worker.lock().await.take() {
            if let Err(e) = worker.await {
                error!(error = %e, "writer task failed");
            }
        }
    }
}

struct WriterTask {
    repo: MessageRepository,
    cache: RecentMessageCache,
    publisher: Arc<dyn BusPublisher>,
    config: WriterConfig,
    metrics: Arc<Metrics>,
}

impl WriterTask {
    /// Accumulate until the batch is full or the flush interval elapses,
    /// whichever comes first. Channel closure is the stop signal: drain,
    /// final-flush, exit.
    async fn run(self, mut rx: mpsc::Receiver<NewMessage>) {
        let mut batch: Vec<NewMessage> = Vec::with_capacity(self.config.batch_size);
        let mut flush = interval(self.config.flush_interval);
        flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                message = rx.recv() => match message {
                    Some(message) => {
                        batch.push(message);
                        if batch.len() >= self.config.batch_size {
                            self.write_batch(&mut batch).await;
                            flush.reset();
                        }
                    },
                    None => break,
                },
                _ = flush.tick() => {
                    if !batch.is_empty() {
                        self.write_batch(&mut batch).await;
                    }
                },
            }
        }

        if !batch.is_empty() {
            self.write_batch(&mut batch).await;
        }
        info!("write pipeline drained");
    }

    /// One transaction per batch, all-or-nothing, with exponential backoff
    /// between attempts. An exhausted batch is dropped with a metric.
    async fn write_batch(&self, batch: &mut Vec<NewMessage>) {
        let pending = std::mem::take(batch);
        let mut backoff = self.config.initial_backoff;

        for attempt in 1..=self.config.max_retries {
            match self.repo.create_batch(&pending).await {
                Ok(stored) => {
                    debug!(count = stored.len(), "message batch committed");
                    self.announce(stored).await;
                    return;
                },
                Err(e) => {
                    warn!(
                        attempt,
                        max = self.config.max_retries,
                        error = %e,
                        "message batch write failed"
                    );
                    if attempt < self.config.max_retries {
                        sleep(backoff).await;
                        backoff *= 2;
                    }
                },
            }
        }

        self.metrics.message_batches_dropped.inc();
        error!(count = pending.len(), "dropping message batch after exhausted retries");
    }

    /// Post-commit fan-in: hot-cache record per message, then the
    /// `message_delivered` announcement. The origin node receives its own
    /// announcement back and treats that as the authoritative fan-out.
    async fn announce(&self, stored: Vec<Message>) {
        for message in stored {
            self.cache.push(message.room_id, message.id);
            if let Err(e) = self.publisher.publish_message_delivered(&message).await {
                warn!(error = %e, message_id = message.id, "delivery announcement failed");
            }
        }
    }
}
