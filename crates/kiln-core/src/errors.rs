//! Cross-cutting error types for kiln.
//!
//! Component errors (`FetchError`, `FormulaError`, `DatabaseError`, ...) live
//! in their own crates and map onto [`crate::ErrorKind`] for reporting.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Entity type name does not match any known kind.
    #[error("unknown entity type: {0}")]
    UnknownEntityType(String),

    /// Stored triage decision string is not a known decision.
    #[error("invalid triage decision: {0}")]
    InvalidDecision(String),
}
