//! The seam between the collector and whatever serves raw records.

use async_trait::async_trait;
use kiln_core::EntityType;
use serde_json::Value;

use crate::error::FetchError;

/// One attempt at reading a raw record.
///
/// Implementations classify failures: [`FetchError::NotFound`] for records
/// that do not exist, [`FetchError::Transient`] or
/// [`FetchError::RateLimited`] for failures worth retrying. Retries and
/// caching live in [`crate::Collector`], not here.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch_raw(&self, entity_type: EntityType, external_id: u64)
    -> Result<Value, FetchError>;
}
