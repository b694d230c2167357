//! Entity relation repository: links, re-wiring, cycle checks.

use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;

/// One directed, typed link between two persisted entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub source_id: i64,
    pub target_id: i64,
    pub kind: String,
    pub position: u32,
}

fn row_to_relation(row: &libsql::Row) -> Result<Relation, DatabaseError> {
    Ok(Relation {
        source_id: row.get::<i64>(0)?,
        target_id: row.get::<i64>(1)?,
        kind: row.get::<String>(2)?,
        position: u32::try_from(row.get::<i64>(3)?)
            .map_err(|e| DatabaseError::InvalidState(format!("relation position: {e}")))?,
    })
}

/// Insert or re-position a link. Self-links are rejected by the schema.
///
/// # Errors
///
/// Returns `DatabaseError` on constraint violations.
pub async fn link(
    conn: &libsql::Connection,
    source_id: i64,
    target_id: i64,
    kind: &str,
    position: u32,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO entity_relations (source_id, target_id, kind, position)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (source_id, target_id, kind) DO UPDATE SET position = excluded.position",
        libsql::params![source_id, target_id, kind, i64::from(position)],
    )
    .await?;
    Ok(())
}

/// Drop outgoing links of one kind before they are re-wired.
///
/// # Errors
///
/// Returns `DatabaseError` if the delete fails.
pub async fn clear_kind(
    conn: &libsql::Connection,
    source_id: i64,
    kind: &str,
) -> Result<u64, DatabaseError> {
    Ok(conn
        .execute(
            "DELETE FROM entity_relations WHERE source_id = ?1 AND kind = ?2",
            libsql::params![source_id, kind],
        )
        .await?)
}

/// Outgoing links in `(kind, position)` order.
///
/// # Errors
///
/// Returns `DatabaseError` if the query fails.
pub async fn outgoing(
    conn: &libsql::Connection,
    source_id: i64,
) -> Result<Vec<Relation>, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT source_id, target_id, kind, position FROM entity_relations
             WHERE source_id = ?1 ORDER BY kind, position",
            [source_id],
        )
        .await?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        out.push(row_to_relation(&row)?);
    }
    Ok(out)
}

/// Whether linking `source_id -> target_id` under `kind` would close a
/// cycle, i.e. `source_id` is already reachable from `target_id` through
/// links of the same kind.
///
/// # Errors
///
/// Returns `DatabaseError` if the query fails.
pub async fn would_create_cycle(
    conn: &libsql::Connection,
    source_id: i64,
    target_id: i64,
    kind: &str,
) -> Result<bool, DatabaseError> {
    if source_id == target_id {
        return Ok(true);
    }
    let mut rows = conn
        .query(
            "WITH RECURSIVE reachable(id) AS (
                 SELECT ?1
                 UNION
                 SELECT r.target_id FROM entity_relations r
                 JOIN reachable ON r.source_id = reachable.id
                 WHERE r.kind = ?3
             )
             SELECT 1 FROM reachable WHERE id = ?2 LIMIT 1",
            libsql::params![target_id, source_id, kind],
        )
        .await?;
    Ok(rows.next().await?.is_some())
}
