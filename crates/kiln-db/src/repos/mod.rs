//! Repository modules.
//!
//! Each module exposes free functions over a `&libsql::Connection` so the
//! same code serves plain reads and per-record transactions.

pub mod entities;
pub mod relations;
pub mod staging;
pub mod type_decisions;
