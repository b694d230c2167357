//! Staging claims for duplicate detection.
//!
//! A claim on `(entity_type, name_key)` exists only while one record is
//! being integrated. A claim that is already present means another writer
//! (possibly another process on the same file) is integrating a record
//! with the same normalized name.
//!
//! `claimed_at` is written as fixed-width UTC (`...T12:00:00.000000Z`) so
//! claims compare by age as plain text.

use chrono::{DateTime, SecondsFormat, Utc};
use kiln_core::EntityType;

use crate::error::DatabaseError;

fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Returns `false` when the key is already claimed.
///
/// # Errors
///
/// Returns `DatabaseError` if the insert fails.
pub async fn claim(
    conn: &libsql::Connection,
    entity_type: EntityType,
    name_key: &str,
) -> Result<bool, DatabaseError> {
    claim_at(conn, entity_type, name_key, Utc::now()).await
}

/// [`claim`] with an explicit claim time.
///
/// # Errors
///
/// Returns `DatabaseError` if the insert fails.
pub async fn claim_at(
    conn: &libsql::Connection,
    entity_type: EntityType,
    name_key: &str,
    at: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let inserted = conn
        .execute(
            "INSERT INTO import_staging (entity_type, name_key, claimed_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (entity_type, name_key) DO NOTHING",
            libsql::params![entity_type.as_str(), name_key, stamp(at)],
        )
        .await?;
    Ok(inserted == 1)
}

/// # Errors
///
/// Returns `DatabaseError` if the delete fails.
pub async fn release(
    conn: &libsql::Connection,
    entity_type: EntityType,
    name_key: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "DELETE FROM import_staging WHERE entity_type = ?1 AND name_key = ?2",
        libsql::params![entity_type.as_str(), name_key],
    )
    .await?;
    Ok(())
}

/// Remove claims made before `cutoff`. Claims held by a live writer are
/// younger than any sane cutoff and survive.
///
/// # Errors
///
/// Returns `DatabaseError` if the delete fails.
pub async fn clear_stale(
    conn: &libsql::Connection,
    cutoff: DateTime<Utc>,
) -> Result<u64, DatabaseError> {
    Ok(conn
        .execute(
            "DELETE FROM import_staging WHERE claimed_at < ?1",
            libsql::params![stamp(cutoff)],
        )
        .await?)
}

/// # Errors
///
/// Returns `DatabaseError` if the query fails.
pub async fn count(conn: &libsql::Connection) -> Result<u64, DatabaseError> {
    let mut rows = conn.query("SELECT COUNT(*) FROM import_staging", ()).await?;
    let row = rows.next().await?.ok_or(DatabaseError::NoResult)?;
    u64::try_from(row.get::<i64>(0)?).map_err(|e| DatabaseError::InvalidState(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KilnDb;

    #[tokio::test]
    async fn claims_are_exclusive_until_released() {
        let db = KilnDb::open_local(":memory:").await.unwrap();
        assert!(claim(db.conn(), EntityType::Item, "cape").await.unwrap());
        assert!(!claim(db.conn(), EntityType::Item, "cape").await.unwrap());
        assert!(claim(db.conn(), EntityType::Monster, "cape").await.unwrap());

        release(db.conn(), EntityType::Item, "cape").await.unwrap();
        assert!(claim(db.conn(), EntityType::Item, "cape").await.unwrap());
        assert_eq!(count(db.conn()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn only_claims_older_than_the_cutoff_are_cleared() {
        let db = KilnDb::open_local(":memory:").await.unwrap();
        let now = Utc::now();
        let hour_ago = now - chrono::Duration::hours(1);
        assert!(claim_at(db.conn(), EntityType::Monster, "bouftou", hour_ago).await.unwrap());
        assert!(claim(db.conn(), EntityType::Monster, "tofu").await.unwrap());

        let cleared = clear_stale(db.conn(), now - chrono::Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(cleared, 1);
        assert_eq!(count(db.conn()).await.unwrap(), 1);
        assert!(!claim(db.conn(), EntityType::Monster, "tofu").await.unwrap());
        assert!(claim(db.conn(), EntityType::Monster, "bouftou").await.unwrap());
    }
}
