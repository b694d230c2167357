//! Target entity repository: identity lookups, insert, merge-update, cleanup marks.

use std::collections::BTreeMap;

use chrono::Utc;
use kiln_core::{EntityType, TargetEntity};
use serde_json::Value;

use crate::error::DatabaseError;
use crate::helpers::{
    get_bool, get_opt_external_id, get_opt_string, name_key, parse_datetime, parse_enum,
    parse_json_object, sql_external_id,
};

const COLUMNS: &str = "id, entity_type, external_id, name, category_id, characteristics, \
     is_stub, needs_review, pending_cleanup, merged_into, created_at, updated_at";

fn row_to_entity(row: &libsql::Row) -> Result<TargetEntity, DatabaseError> {
    Ok(TargetEntity {
        id: row.get::<i64>(0)?,
        entity_type: parse_enum(&row.get::<String>(1)?)?,
        external_id: get_opt_external_id(row, 2)?,
        name: get_opt_string(row, 3)?,
        category_id: row.get::<Option<i64>>(4)?,
        characteristics: parse_json_object(&row.get::<String>(5)?)?,
        is_stub: get_bool(row, 6)?,
        needs_review: get_bool(row, 7)?,
        pending_cleanup: get_bool(row, 8)?,
        merged_into: row.get::<Option<i64>>(9)?,
        created_at: parse_datetime(&row.get::<String>(10)?)?,
        updated_at: parse_datetime(&row.get::<String>(11)?)?,
    })
}

async fn collect(mut rows: libsql::Rows) -> Result<Vec<TargetEntity>, DatabaseError> {
    let mut out = Vec::new();
    while let Some(row) = rows.next().await? {
        out.push(row_to_entity(&row)?);
    }
    Ok(out)
}

fn characteristics_json(characteristics: &BTreeMap<String, Value>) -> Result<String, DatabaseError> {
    serde_json::to_string(characteristics).map_err(|e| DatabaseError::Other(e.into()))
}

/// Column values for an insert or update. `entity_type` is ignored by
/// [`update`].
#[derive(Debug, Clone)]
pub struct NewEntity {
    pub entity_type: EntityType,
    pub external_id: Option<u64>,
    pub name: Option<String>,
    pub category_id: Option<i64>,
    pub characteristics: BTreeMap<String, Value>,
    pub is_stub: bool,
    pub needs_review: bool,
}

impl NewEntity {
    #[must_use]
    pub const fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            external_id: None,
            name: None,
            category_id: None,
            characteristics: BTreeMap::new(),
            is_stub: false,
            needs_review: false,
        }
    }
}

/// Insert a row and return its id.
///
/// # Errors
///
/// Returns `DatabaseError` on constraint violations, including a second
/// row for the same `(entity_type, external_id)`.
pub async fn insert(conn: &libsql::Connection, entity: &NewEntity) -> Result<i64, DatabaseError> {
    let entity_type = entity.entity_type;
    let external_id = entity.external_id.map(sql_external_id).transpose()?;
    let key = entity.name.as_deref().map(name_key);
    let now = Utc::now().to_rfc3339();

    let mut rows = conn
        .query(
            "INSERT INTO target_entities (entity_type, external_id, name, name_key, category_id,
                 characteristics, is_stub, needs_review, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             RETURNING id",
            libsql::params![
                entity_type.as_str(),
                external_id,
                entity.name.as_deref(),
                key,
                entity.category_id,
                characteristics_json(&entity.characteristics)?,
                i64::from(entity.is_stub),
                i64::from(entity.needs_review),
                now.as_str(),
                now.as_str()
            ],
        )
        .await?;
    let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
    Ok(row.get::<i64>(0)?)
}

/// # Errors
///
/// Returns `DatabaseError::NoResult` if no row has this id.
pub async fn get(conn: &libsql::Connection, id: i64) -> Result<TargetEntity, DatabaseError> {
    let mut rows = conn
        .query(
            &format!("SELECT {COLUMNS} FROM target_entities WHERE id = ?1"),
            [id],
        )
        .await?;
    let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
    row_to_entity(&row)
}

/// Exact identity: the unique row for `(entity_type, external_id)`.
///
/// # Errors
///
/// Returns `DatabaseError` if the query fails.
pub async fn find_by_external_id(
    conn: &libsql::Connection,
    entity_type: EntityType,
    external_id: u64,
) -> Result<Option<TargetEntity>, DatabaseError> {
    let mut rows = conn
        .query(
            &format!(
                "SELECT {COLUMNS} FROM target_entities WHERE entity_type = ?1 AND external_id = ?2"
            ),
            libsql::params![entity_type.as_str(), sql_external_id(external_id)?],
        )
        .await?;
    match rows.next().await? {
        Some(row) => Ok(Some(row_to_entity(&row)?)),
        None => Ok(None),
    }
}

/// Heuristic candidates: same type, same normalized name, no external id
/// yet, not already marked for cleanup. Lowest id first.
///
/// # Errors
///
/// Returns `DatabaseError` if the query fails.
pub async fn find_by_name_key(
    conn: &libsql::Connection,
    entity_type: EntityType,
    key: &str,
) -> Result<Vec<TargetEntity>, DatabaseError> {
    let rows = conn
        .query(
            &format!(
                "SELECT {COLUMNS} FROM target_entities
                 WHERE entity_type = ?1 AND name_key = ?2
                   AND external_id IS NULL AND pending_cleanup = 0
                 ORDER BY id"
            ),
            libsql::params![entity_type.as_str(), key],
        )
        .await?;
    collect(rows).await
}

/// Overwrite the mutable columns of an existing row.
///
/// Callers merge characteristics before calling; this writes exactly what
/// it is given and clears the stub flag.
///
/// # Errors
///
/// Returns `DatabaseError::NoResult` if no row has this id.
pub async fn update(
    conn: &libsql::Connection,
    id: i64,
    entity: &NewEntity,
) -> Result<(), DatabaseError> {
    let external_id = entity.external_id.map(sql_external_id).transpose()?;
    let key = entity.name.as_deref().map(name_key);
    let changed = conn
        .execute(
            "UPDATE target_entities
             SET external_id = COALESCE(?1, external_id),
                 name = COALESCE(?2, name),
                 name_key = COALESCE(?3, name_key),
                 category_id = COALESCE(?4, category_id),
                 characteristics = ?5,
                 is_stub = ?6,
                 needs_review = ?7,
                 updated_at = ?8
             WHERE id = ?9",
            libsql::params![
                external_id,
                entity.name.as_deref(),
                key,
                entity.category_id,
                characteristics_json(&entity.characteristics)?,
                i64::from(entity.is_stub),
                i64::from(entity.needs_review),
                Utc::now().to_rfc3339(),
                id
            ],
        )
        .await?;
    if changed == 0 {
        return Err(DatabaseError::NoResult);
    }
    Ok(())
}

/// Flag a heuristic duplicate for cleanup, pointing at the surviving row.
///
/// # Errors
///
/// Returns `DatabaseError` if the update fails.
pub async fn mark_for_cleanup(
    conn: &libsql::Connection,
    id: i64,
    merged_into: i64,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE target_entities SET pending_cleanup = 1, merged_into = ?1, updated_at = ?2
         WHERE id = ?3",
        libsql::params![merged_into, Utc::now().to_rfc3339(), id],
    )
    .await?;
    Ok(())
}

/// # Errors
///
/// Returns `DatabaseError` if the query fails.
pub async fn count(
    conn: &libsql::Connection,
    entity_type: Option<EntityType>,
) -> Result<u64, DatabaseError> {
    let mut rows = match entity_type {
        Some(t) => {
            conn.query(
                "SELECT COUNT(*) FROM target_entities WHERE entity_type = ?1",
                [t.as_str()],
            )
            .await?
        }
        None => conn.query("SELECT COUNT(*) FROM target_entities", ()).await?,
    };
    let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
    u64::try_from(row.get::<i64>(0)?).map_err(|e| DatabaseError::InvalidState(e.to_string()))
}

/// Every row of one type, in id order.
///
/// # Errors
///
/// Returns `DatabaseError` if the query fails.
pub async fn list(
    conn: &libsql::Connection,
    entity_type: EntityType,
) -> Result<Vec<TargetEntity>, DatabaseError> {
    let rows = conn
        .query(
            &format!("SELECT {COLUMNS} FROM target_entities WHERE entity_type = ?1 ORDER BY id"),
            [entity_type.as_str()],
        )
        .await?;
    collect(rows).await
}
