//! In-process catalog source for tests and offline fixtures.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use kiln_core::EntityType;
use serde_json::Value;

use crate::error::FetchError;
use crate::source::CatalogSource;

/// Serves records from memory. Unknown ids are [`FetchError::NotFound`].
///
/// Scripted failures are consumed first, one per call, so transient
/// behavior can be simulated without a network.
#[derive(Default)]
pub struct MemoryCatalog {
    records: Mutex<HashMap<(EntityType, u64), Value>>,
    failures: Mutex<HashMap<(EntityType, u64), VecDeque<FetchError>>>,
    calls: AtomicUsize,
}

impl MemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style record insert.
    #[must_use]
    pub fn with_record(self, entity_type: EntityType, external_id: u64, payload: Value) -> Self {
        self.insert(entity_type, external_id, payload);
        self
    }

    pub fn insert(&self, entity_type: EntityType, external_id: u64, payload: Value) {
        if let Ok(mut records) = self.records.lock() {
            records.insert((entity_type, external_id), payload);
        }
    }

    /// Queue an error returned by the next call for this key.
    pub fn fail_next(&self, entity_type: EntityType, external_id: u64, err: FetchError) {
        if let Ok(mut failures) = self.failures.lock() {
            failures
                .entry((entity_type, external_id))
                .or_default()
                .push_back(err);
        }
    }

    /// Number of `fetch_raw` calls served so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogSource for MemoryCatalog {
    async fn fetch_raw(
        &self,
        entity_type: EntityType,
        external_id: u64,
    ) -> Result<Value, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = (entity_type, external_id);

        let scripted = self
            .failures
            .lock()
            .ok()
            .and_then(|mut failures| failures.get_mut(&key).and_then(VecDeque::pop_front));
        if let Some(err) = scripted {
            return Err(err);
        }

        self.records
            .lock()
            .ok()
            .and_then(|records| records.get(&key).cloned())
            .ok_or(FetchError::NotFound {
                entity_type,
                external_id,
            })
    }
}
