//! # kiln-core
//!
//! Core domain types shared by every kiln crate:
//! - Entity types and their upstream collection paths
//! - Raw source records and normalized conversion output
//! - Persisted target entities, relations, and category triage decisions
//! - Per-record import outcomes and aggregated reports
//! - The error-kind taxonomy reported for failed records

pub mod entities;
pub mod enums;
pub mod errors;
pub mod outcome;

pub use entities::{
    CategoryReview, Characteristic, NormalizedEntity, RelationRef, SourceRecord, TargetEntity,
    TypeDecision, resolve_path,
};
pub use enums::{Decision, EntityType, ErrorKind, MatchKind, SkipReason};
pub use errors::CoreError;
pub use outcome::{ImportOutcome, ImportReport, OutcomeCounts, RecordReport};
