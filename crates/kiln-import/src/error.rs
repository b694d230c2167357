//! Pipeline error types and their mapping onto per-record outcomes.

use kiln_catalog::FetchError;
use kiln_core::{EntityType, ErrorKind, ImportOutcome, SkipReason};
use kiln_db::DatabaseError;
use kiln_formula::{EvaluationError, ValidationError};
use thiserror::Error;

/// Conversion of one source record failed or was stopped by triage.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// A required rule could not be evaluated.
    #[error("rule '{key}' failed: {source}")]
    Rule {
        key: String,
        #[source]
        source: EvaluationError,
    },

    /// A raw value violates its configured source limit.
    #[error("source field '{path}' rejected: {source}")]
    SourceLimit {
        path: String,
        #[source]
        source: ValidationError,
    },

    /// Triage has blocked this record's category.
    #[error("category {category_id} is blocked")]
    BlockedCategory { category_id: i64 },

    /// Recording the triage sighting failed.
    #[error(transparent)]
    Store(#[from] DatabaseError),
}

impl ConvertError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Rule { source, .. } => source.kind(),
            Self::SourceLimit { .. } => ErrorKind::Validation,
            Self::BlockedCategory { .. } => ErrorKind::UnknownCategory,
            Self::Store(_) => ErrorKind::Store,
        }
    }
}

/// Integration would violate a store invariant. The record's write is
/// rolled back.
#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("relation '{kind}' points back at the entity itself")]
    SelfReference { kind: String },

    #[error("relation '{kind}' from {source_id} to {target_id} would form a cycle")]
    Cycle {
        kind: String,
        source_id: i64,
        target_id: i64,
    },

    #[error("required characteristic '{key}' is missing after write")]
    MissingRequired { key: String },

    #[error("characteristic '{key}' is invalid after write: {source}")]
    InvalidCharacteristic {
        key: String,
        #[source]
        source: ValidationError,
    },

    #[error("persisted external id {found:?} does not match {expected}")]
    ExternalIdMismatch { expected: u64, found: Option<u64> },

    #[error("{entity_type} named '{name_key}' is being integrated by another writer")]
    StagingConflict {
        entity_type: EntityType,
        name_key: String,
    },
}

/// Any failure of one record's pipeline run.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Convert(#[from] ConvertError),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

impl ImportError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Fetch(e) => e.kind(),
            Self::Convert(e) => e.kind(),
            Self::Integrity(_) => ErrorKind::Integrity,
            Self::Store(e) => e.kind(),
        }
    }

    /// Not-found and blocked-category errors are skips; everything else fails.
    #[must_use]
    pub fn into_outcome(self) -> ImportOutcome {
        match self {
            Self::Fetch(FetchError::NotFound { .. }) => ImportOutcome::skipped(SkipReason::NotFound),
            Self::Convert(ConvertError::BlockedCategory { category_id }) => {
                ImportOutcome::skipped(SkipReason::BlockedCategory { category_id })
            }
            other => ImportOutcome::failed(other.kind(), other.to_string()),
        }
    }
}
