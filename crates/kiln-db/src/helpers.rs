//! Row-to-entity parsing helpers.
//!
//! Repos convert column-indexed `libsql::Row`s into typed structs through
//! these helpers. Datetimes are stored as RFC 3339 but `SQLite`'s own
//! `datetime('now')` format is accepted too.

use chrono::{DateTime, Utc};

use crate::error::DatabaseError;

/// Parse a required TEXT column as `DateTime<Utc>`.
///
/// # Errors
///
/// Returns `DatabaseError::Query` if the string cannot be parsed as either format.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| DatabaseError::Query(format!("Failed to parse datetime '{s}': {e}")))
}

/// Parse a TEXT column into a serde-deserializable enum.
///
/// Works with the kiln-core enums that use `#[serde(rename_all = "snake_case")]`.
///
/// # Errors
///
/// Returns `DatabaseError::Query` if the string does not match any enum variant.
pub fn parse_enum<T: serde::de::DeserializeOwned>(s: &str) -> Result<T, DatabaseError> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|e| DatabaseError::Query(format!("Failed to parse enum from '{s}': {e}")))
}

/// Read a nullable TEXT column. Returns `None` for both SQL NULL and empty string.
///
/// `row.get::<String>(idx)` on a NULL column returns an error, not `""`.
///
/// # Errors
///
/// Returns `DatabaseError` if the column read fails.
pub fn get_opt_string(row: &libsql::Row, idx: i32) -> Result<Option<String>, DatabaseError> {
    match row.get::<Option<String>>(idx)? {
        Some(s) if s.is_empty() => Ok(None),
        other => Ok(other),
    }
}

/// Read an INTEGER 0/1 column as `bool`.
///
/// # Errors
///
/// Returns `DatabaseError` if the column read fails.
pub fn get_bool(row: &libsql::Row, idx: i32) -> Result<bool, DatabaseError> {
    Ok(row.get::<i64>(idx)? != 0)
}

/// Read a nullable INTEGER column holding an upstream id.
///
/// # Errors
///
/// Returns `DatabaseError::InvalidState` for negative ids.
pub fn get_opt_external_id(row: &libsql::Row, idx: i32) -> Result<Option<u64>, DatabaseError> {
    row.get::<Option<i64>>(idx)?
        .map(|id| {
            u64::try_from(id)
                .map_err(|_| DatabaseError::InvalidState(format!("negative external id {id}")))
        })
        .transpose()
}

/// Upstream ids are unsigned; `SQLite` integers are signed.
///
/// # Errors
///
/// Returns `DatabaseError::InvalidState` for ids above `i64::MAX`.
pub fn sql_external_id(id: u64) -> Result<i64, DatabaseError> {
    i64::try_from(id).map_err(|_| DatabaseError::InvalidState(format!("external id {id} too large")))
}

/// Parse a JSON object column.
///
/// # Errors
///
/// Returns `DatabaseError::Query` for invalid JSON or non-object values.
pub fn parse_json_object(
    s: &str,
) -> Result<std::collections::BTreeMap<String, serde_json::Value>, DatabaseError> {
    serde_json::from_str(s).map_err(|e| DatabaseError::Query(format!("Invalid JSON in column: {e}")))
}

/// Heuristic identity key: lowercase with whitespace runs collapsed to one
/// space and trimmed. No fuzzy matching beyond this.
#[must_use]
pub fn name_key(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
