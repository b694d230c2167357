//! TTL cache of successfully fetched records.

use std::time::Duration;

use dashmap::DashMap;
use kiln_core::{EntityType, SourceRecord};
use tokio::time::Instant;

struct CacheEntry {
    record: SourceRecord,
    stored_at: Instant,
}

/// Per-collector record cache keyed by `(entity_type, external_id)`.
///
/// Inserts and reads are atomic per key. Expired entries are dropped
/// lazily on read.
pub struct RecordCache {
    entries: DashMap<(EntityType, u64), CacheEntry>,
    ttl: Duration,
}

impl RecordCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh cached record, if any.
    #[must_use]
    pub fn get(&self, entity_type: EntityType, external_id: u64) -> Option<SourceRecord> {
        let key = (entity_type, external_id);
        if let Some(entry) = self.entries.get(&key) {
            if entry.stored_at.elapsed() < self.ttl {
                return Some(entry.record.clone());
            }
        }
        self.entries
            .remove_if(&key, |_, entry| entry.stored_at.elapsed() >= self.ttl);
        None
    }

    pub fn insert(&self, record: SourceRecord) {
        if self.ttl.is_zero() {
            return;
        }
        self.entries.insert(
            (record.entity_type, record.external_id),
            CacheEntry {
                record,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, entity_type: EntityType, external_id: u64) {
        self.entries.remove(&(entity_type, external_id));
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = RecordCache::new(Duration::from_secs(60));
        cache.insert(SourceRecord::new(EntityType::Item, 1, json!({ "id": 1 })));
        assert!(cache.get(EntityType::Item, 1).is_some());
        assert!(cache.get(EntityType::Monster, 1).is_none());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get(EntityType::Item, 1).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn zero_ttl_disables_caching() {
        let cache = RecordCache::new(Duration::ZERO);
        cache.insert(SourceRecord::new(EntityType::Item, 1, json!({})));
        assert!(cache.is_empty());
    }
}
