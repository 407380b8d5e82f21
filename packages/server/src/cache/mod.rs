use moka::sync::Cache;
use uuid::Uuid;

use crate::config::CacheConfig;

/// Hot cache of recently committed message ids, keyed by room. Written by
/// the write pipeline after each commit; read by the history endpoint to
/// avoid a full table scan for the common "latest messages" query. Entries
/// expire after the configured TTL (default 24 h).
#[derive(Clone)]
pub struct RecentMessageCache {
    inner: Cache<Uuid, Vec<i64>>,
    recent_limit: usize,
}

impl RecentMessageCache {
    pub fn new(config: &CacheConfig) -> Self {
        let inner = Cache::builder()
            .time_to_live(config.ttl)
            .max_capacity(100_000)
            .build();
        Self { inner, recent_limit: config.recent_limit }
    }

    /// Record a committed message id, keeping only the newest ids per room.
    pub fn push(&self, room_id: Uuid, message_id: i64) {
        let mut ids = self.inner.get(&room_id).unwrap_or_default();
        ids.push(message_id);
        if ids.len() > self.recent_limit {
            let excess = ids.len() - self.recent_limit;
            ids.drain(..excess);
        }
        self.inner.insert(room_id, ids);
    }

    /// Recent message ids for a room, oldest first. Empty when the room is
    /// cold or the entry expired.
    pub fn recent(&self, room_id: Uuid) -> Vec<i64> {
        self.inner.get(&room_id).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn keeps_only_the_newest_ids() {
        let cache = RecentMessageCache::new(&CacheConfig {
            ttl: Duration::from_secs(60),
            recent_limit: 3,
        });
        let room = Uuid::new_v4();

        for id in 1..=5 {
            cache.push(room, id);
        }

        assert_eq!(cache.recent(room), vec![3, 4, 5]);
        assert!(cache.recent(Uuid::new_v4()).is_empty());
    }
}
