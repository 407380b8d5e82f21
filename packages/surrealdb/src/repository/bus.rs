use futures_util::StreamExt;
use serde_json::Value;
use std::time::Duration;
use surrealdb::{Surreal, engine::any::Any};

use crate::repository::error::RepositoryError;
use palaver_entity::types::BusEnvelope;

/// The cross-node sync bus: an append-only `bus_event` table observed through
/// SurrealDB LiveQuery. Publishing inserts a row; every subscriber, the
/// origin node included, receives the CREATE notification. Delivery is
/// at-least-once with no ordering guarantee across channels.
#[derive(Clone)]
pub struct SyncBusRepository {
    db: Surreal<Any>,
}

impl SyncBusRepository {
    pub fn new(db: Surreal<Any>) -> Self {
        Self { db }
    }

    /// Publish an opaque payload on a logical channel.
    pub async fn publish(&self, channel: &str, payload: Value) -> Result<(), RepositoryError> {
        self.db
            .query(
                "CREATE bus_event SET \
                 channel = $channel, payload = $payload, published_at = time::now() \
                 RETURN NONE",
            )
            .bind(("channel", channel.to_string()))
            .bind(("payload", payload))
            .await?;
        Ok(())
    }

    /// Subscribe to a single channel. The consumer opens one of these per
    /// channel and merges the streams.
    pub async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<
        impl futures_util::Stream<Item = Result<BusEnvelope, RepositoryError>> + use<>,
        RepositoryError,
    > {
        let mut response = self
            .db
            .query("LIVE SELECT * FROM bus_event WHERE channel = $channel")
            .bind(("channel", channel.to_string()))
            .await
            .map_err(RepositoryError::Database)?;

        let stream = response
            .stream::<surrealdb::Notification<BusEnvelope>>(0)
            .map_err(RepositoryError::Database)?
            .filter_map(|notification_result| async move {
                match notification_result {
                    Ok(notification) => match notification.action {
                        surrealdb::Action::Create => Some(Ok(notification.data)),
                        // Updates never happen and deletions are hygiene only.
                        _ => None,
                    },
                    Err(e) => Some(Err(RepositoryError::Database(e))),
                }
            });

        Ok(stream)
    }

    /// Delete bus events older than the retention window so the table stays
    /// bounded. Run periodically by a background task.
    pub async fn purge_older_than(&self, retention: Duration) -> Result<(), RepositoryError> {
        self.db
            .query("DELETE bus_event WHERE published_at < (time::now() - $retention) RETURN NONE")
            .bind(("retention", retention))
            .await?;
        Ok(())
    }
}
