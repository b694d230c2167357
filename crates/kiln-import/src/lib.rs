//! # kiln-import
//!
//! The import pipeline over the collector, rule store and persistent store:
//!
//! - [`Converter`] applies conversion rules to one source record and runs
//!   category triage
//! - [`Integrator`] resolves identity, deduplicates, upserts and wires
//!   relations inside one transaction per record
//! - [`Orchestrator`] drives single, batch, range and preview runs and
//!   aggregates an [`kiln_core::ImportReport`]

pub mod converter;
pub mod error;
pub mod integrator;
pub mod locale;
pub mod orchestrator;
pub mod triage;

pub use converter::Converter;
pub use error::{ConvertError, ImportError, IntegrityError};
pub use integrator::{Integrator, Resolution, resolve_identity};
pub use locale::localized;
pub use orchestrator::{ImportObserver, Orchestrator};
pub use triage::{CategoryTriage, PeekTriage, RecordingTriage};

pub use tokio_util::sync::CancellationToken;
