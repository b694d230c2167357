//! Store service: the database handle plus the write lock.
//!
//! `ImportStore` owns one `KilnDb`. Reads use the connection directly.
//! Every write, including single-statement triage upserts, runs inside a
//! [`WriteSession`], which holds the store's async write lock for its
//! lifetime. Only one writer touches the connection at a time, so a
//! per-record transaction never interleaves with another record's writes.
//!
//! Several processes may share one store file. Opening a store only clears
//! staging claims older than the stale age, so claims held by a running
//! importer survive a second `open`.

use std::time::Duration;

use chrono::Utc;
use kiln_core::{EntityType, TargetEntity, TypeDecision};
use tokio::sync::{Mutex, MutexGuard};

use crate::KilnDb;
use crate::error::DatabaseError;
use crate::repos::{entities, staging, type_decisions};

pub struct ImportStore {
    db: KilnDb,
    write_lock: Mutex<()>,
}

/// Age after which a staging claim is treated as abandoned by a crashed run.
pub const DEFAULT_STALE_CLAIM_AGE: Duration = Duration::from_secs(15 * 60);

impl ImportStore {
    /// Open a local store, clearing claims older than
    /// [`DEFAULT_STALE_CLAIM_AGE`].
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the database cannot be opened.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        Self::open_with_stale_age(path, DEFAULT_STALE_CLAIM_AGE).await
    }

    /// Open a local store, clearing claims older than `stale_age`.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the database cannot be opened or
    /// `stale_age` is out of range.
    pub async fn open_with_stale_age(
        path: &str,
        stale_age: Duration,
    ) -> Result<Self, DatabaseError> {
        let db = KilnDb::open_local(path).await?;
        let age = chrono::Duration::from_std(stale_age)
            .map_err(|e| DatabaseError::InvalidState(format!("stale claim age: {e}")))?;
        let cleared = staging::clear_stale(db.conn(), Utc::now() - age).await?;
        if cleared > 0 {
            tracing::warn!(cleared, "removed stale staging claims");
        }
        Ok(Self::from_db(db))
    }

    /// Open an existing store for reads only. Nothing in the file changes.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the file is missing or unreadable.
    pub async fn open_read_only(path: &str) -> Result<Self, DatabaseError> {
        Ok(Self::from_db(KilnDb::open_read_only(path).await?))
    }

    /// In-memory store for tests and previews.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the database cannot be created.
    pub async fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::open(":memory:").await
    }

    #[must_use]
    pub fn from_db(db: KilnDb) -> Self {
        Self {
            db,
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub const fn db(&self) -> &KilnDb {
        &self.db
    }

    /// Wait for the write lock.
    pub async fn write_session(&self) -> WriteSession<'_> {
        WriteSession {
            _guard: self.write_lock.lock().await,
            conn: self.db.conn(),
        }
    }

    /// Record one sighting of a category id, atomically.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the upsert fails.
    pub async fn record_category_sighting(
        &self,
        entity_type: EntityType,
        category_id: i64,
    ) -> Result<TypeDecision, DatabaseError> {
        let session = self.write_session().await;
        type_decisions::record_sighting(session.conn(), entity_type, category_id).await
    }

    /// Read-only triage lookup.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn type_decision(
        &self,
        category_id: i64,
    ) -> Result<Option<TypeDecision>, DatabaseError> {
        type_decisions::get(self.db.conn(), category_id).await
    }

    /// Apply an external allow/block decision.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::NoResult` if the category has never been seen.
    pub async fn set_type_decision(
        &self,
        category_id: i64,
        decision: kiln_core::Decision,
    ) -> Result<TypeDecision, DatabaseError> {
        let session = self.write_session().await;
        type_decisions::set_decision(session.conn(), category_id, decision).await
    }

    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn list_type_decisions(&self) -> Result<Vec<TypeDecision>, DatabaseError> {
        type_decisions::list(self.db.conn()).await
    }

    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn entity_by_external_id(
        &self,
        entity_type: EntityType,
        external_id: u64,
    ) -> Result<Option<TargetEntity>, DatabaseError> {
        entities::find_by_external_id(self.db.conn(), entity_type, external_id).await
    }

    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn entity(&self, id: i64) -> Result<TargetEntity, DatabaseError> {
        entities::get(self.db.conn(), id).await
    }

    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn count_entities(
        &self,
        entity_type: Option<EntityType>,
    ) -> Result<u64, DatabaseError> {
        entities::count(self.db.conn(), entity_type).await
    }

    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn count_type_decisions(&self) -> Result<u64, DatabaseError> {
        type_decisions::count(self.db.conn()).await
    }
}

/// Exclusive write access to the store's connection.
pub struct WriteSession<'a> {
    _guard: MutexGuard<'a, ()>,
    conn: &'a libsql::Connection,
}

impl WriteSession<'_> {
    #[must_use]
    pub const fn conn(&self) -> &libsql::Connection {
        self.conn
    }

    /// Begin a transaction on the locked connection.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if `BEGIN` fails.
    pub async fn transaction(&self) -> Result<libsql::Transaction, DatabaseError> {
        Ok(self.conn.transaction().await?)
    }
}
