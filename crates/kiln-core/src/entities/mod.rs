//! Entity structs for the import pipeline.
//!
//! Raw upstream payloads ([`SourceRecord`]) flow through conversion into
//! [`NormalizedEntity`] values, which integration merges into persisted
//! [`TargetEntity`] rows. [`TypeDecision`] rows gate unknown categories.

mod normalized;
mod source_record;
mod target;
mod type_decision;

pub use normalized::{CategoryReview, Characteristic, NormalizedEntity, RelationRef};
pub use source_record::{SourceRecord, resolve_path};
pub use target::TargetEntity;
pub use type_decision::TypeDecision;
