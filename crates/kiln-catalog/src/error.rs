//! Collector error types.

use kiln_core::{EntityType, ErrorKind};
use thiserror::Error;

/// Errors raised while fetching a source record.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The record does not exist upstream. Terminal, never retried.
    #[error("{entity_type} {external_id} not found upstream")]
    NotFound {
        entity_type: EntityType,
        external_id: u64,
    },

    /// The catalog returned 429 Too Many Requests.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Network failure or 5xx response.
    #[error("transient upstream error: {0}")]
    Transient(String),

    /// Non-retryable, non-404 error status.
    #[error("catalog API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The response body is not a JSON record.
    #[error("parse error: {0}")]
    Parse(String),

    /// Transient errors persisted through every attempt.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },

    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl FetchError {
    /// Whether another attempt may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient(_))
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        ErrorKind::Fetch
    }
}
