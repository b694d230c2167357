//! # kiln-catalog
//!
//! The collector: reads raw records from the upstream catalog, with a TTL
//! cache and bounded exponential retry for transient failures.
//!
//! - [`CatalogSource`] is the single-attempt seam ([`HttpCatalog`] in
//!   production, [`MemoryCatalog`] in tests).
//! - [`Collector`] owns the cache and retry policy. One collector is built
//!   per orchestrator, never shared process-wide.

mod cache;
mod error;
mod http;
mod memory;
mod retry;
mod source;

pub use cache::RecordCache;
pub use error::FetchError;
pub use http::{HttpCatalog, check_response};
pub use memory::MemoryCatalog;
pub use retry::{RetryConfig, with_retry};
pub use source::CatalogSource;

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use futures::stream::{self, StreamExt};
use kiln_config::CatalogConfig;
use kiln_core::{EntityType, SourceRecord};

/// Cached, retrying front for a [`CatalogSource`].
pub struct Collector {
    source: Arc<dyn CatalogSource>,
    cache: RecordCache,
    retry: RetryConfig,
}

impl Collector {
    #[must_use]
    pub fn new(source: Arc<dyn CatalogSource>, retry: RetryConfig, cache_ttl: Duration) -> Self {
        Self {
            source,
            cache: RecordCache::new(cache_ttl),
            retry,
        }
    }

    /// Collector over the HTTP catalog described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Client`] if the HTTP client cannot be built.
    pub fn from_config(config: &CatalogConfig) -> Result<Self, FetchError> {
        let source = HttpCatalog::new(config)?;
        Ok(Self::new(
            Arc::new(source),
            RetryConfig::from(config),
            config.cache_ttl(),
        ))
    }

    #[must_use]
    pub const fn cache(&self) -> &RecordCache {
        &self.cache
    }

    #[must_use]
    pub const fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Fetch one record, serving from cache within the TTL.
    ///
    /// # Errors
    ///
    /// [`FetchError::NotFound`] immediately for missing records;
    /// [`FetchError::Exhausted`] once transient failures use up every
    /// attempt; other terminal errors as returned by the source.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn fetch(
        &self,
        entity_type: EntityType,
        external_id: u64,
    ) -> Result<SourceRecord, FetchError> {
        if let Some(record) = self.cache.get(entity_type, external_id) {
            tracing::debug!("cache hit");
            return Ok(record);
        }

        let payload = with_retry(&self.retry, |attempt| {
            tracing::trace!(attempt, "fetching from catalog");
            self.source.fetch_raw(entity_type, external_id)
        })
        .await?;

        let record = SourceRecord::new(entity_type, external_id, payload);
        self.cache.insert(record.clone());
        Ok(record)
    }

    /// Lazily fetch every id in `ids`, in order, one at a time.
    ///
    /// Each item pairs the id with its own result; a failure never ends the
    /// stream early.
    pub fn fetch_range(
        &self,
        entity_type: EntityType,
        ids: RangeInclusive<u64>,
    ) -> impl Stream<Item = (u64, Result<SourceRecord, FetchError>)> + '_ {
        stream::iter(ids).then(move |id| async move { (id, self.fetch(entity_type, id).await) })
    }
}
