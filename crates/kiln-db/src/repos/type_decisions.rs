//! Category triage repository.

use chrono::Utc;
use kiln_core::{Decision, EntityType, TypeDecision};

use crate::error::DatabaseError;
use crate::helpers::{parse_datetime, parse_enum};

const COLUMNS: &str =
    "entity_type, external_category_id, decision, seen_count, first_seen_at, last_seen_at";

fn row_to_decision(row: &libsql::Row) -> Result<TypeDecision, DatabaseError> {
    Ok(TypeDecision {
        entity_type: parse_enum(&row.get::<String>(0)?)?,
        external_category_id: row.get::<i64>(1)?,
        decision: parse_enum(&row.get::<String>(2)?)?,
        seen_count: u32::try_from(row.get::<i64>(3)?)
            .map_err(|e| DatabaseError::InvalidState(format!("seen_count: {e}")))?,
        first_seen_at: parse_datetime(&row.get::<String>(4)?)?,
        last_seen_at: parse_datetime(&row.get::<String>(5)?)?,
    })
}

/// Insert a `pending` row on first sighting, otherwise bump `seen_count`
/// and `last_seen_at`. One statement, so concurrent sightings never lose
/// an increment. The decision itself is never changed here.
///
/// # Errors
///
/// Returns `DatabaseError` if the upsert fails.
pub async fn record_sighting(
    conn: &libsql::Connection,
    entity_type: EntityType,
    category_id: i64,
) -> Result<TypeDecision, DatabaseError> {
    let now = Utc::now().to_rfc3339();
    let mut rows = conn
        .query(
            &format!(
                "INSERT INTO type_decisions (entity_type, external_category_id, decision,
                     seen_count, first_seen_at, last_seen_at)
                 VALUES (?1, ?2, 'pending', 1, ?3, ?3)
                 ON CONFLICT (external_category_id) DO UPDATE
                 SET seen_count = seen_count + 1, last_seen_at = excluded.last_seen_at
                 RETURNING {COLUMNS}"
            ),
            libsql::params![entity_type.as_str(), category_id, now.as_str()],
        )
        .await?;
    let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
    let decision = row_to_decision(&row)?;
    tracing::debug!(
        category_id,
        seen_count = decision.seen_count,
        decision = decision.decision.as_str(),
        "category sighting recorded"
    );
    Ok(decision)
}

/// # Errors
///
/// Returns `DatabaseError` if the query fails.
pub async fn get(
    conn: &libsql::Connection,
    category_id: i64,
) -> Result<Option<TypeDecision>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!("SELECT {COLUMNS} FROM type_decisions WHERE external_category_id = ?1"),
            [category_id],
        )
        .await?;
    match rows.next().await? {
        Some(row) => Ok(Some(row_to_decision(&row)?)),
        None => Ok(None),
    }
}

/// Record an external allow/block decision.
///
/// # Errors
///
/// Returns `DatabaseError::NoResult` if the category has no row.
pub async fn set_decision(
    conn: &libsql::Connection,
    category_id: i64,
    decision: Decision,
) -> Result<TypeDecision, DatabaseError> {
    let mut rows = conn
        .query(
            &format!(
                "UPDATE type_decisions SET decision = ?1 WHERE external_category_id = ?2
                 RETURNING {COLUMNS}"
            ),
            libsql::params![decision.as_str(), category_id],
        )
        .await?;
    let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
    row_to_decision(&row)
}

/// # Errors
///
/// Returns `DatabaseError` if the query fails.
pub async fn list(conn: &libsql::Connection) -> Result<Vec<TypeDecision>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!("SELECT {COLUMNS} FROM type_decisions ORDER BY external_category_id"),
            (),
        )
        .await?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        out.push(row_to_decision(&row)?);
    }
    Ok(out)
}

/// # Errors
///
/// Returns `DatabaseError` if the query fails.
pub async fn count(conn: &libsql::Connection) -> Result<u64, DatabaseError> {
    let mut rows = conn.query("SELECT COUNT(*) FROM type_decisions", ()).await?;
    let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
    u64::try_from(row.get::<i64>(0)?).map_err(|e| DatabaseError::InvalidState(e.to_string()))
}
