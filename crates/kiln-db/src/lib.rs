//! # kiln-db
//!
//! The import store: entities the pipeline has written, the links between
//! them, category triage decisions and the staging claims that guard
//! duplicate creation.
//!
//! Repository functions in [`repos`] take a `&libsql::Connection`, and a
//! `libsql::Transaction` derefs to one, so the integrator runs them inside
//! its per-record transaction unchanged. All writers go through
//! [`ImportStore::write_session`].
//!
//! A store opened with [`ImportStore::open_read_only`] never migrates,
//! never clears claims and rejects writes at the `SQLite` level.

pub mod error;
pub mod helpers;
mod migrations;
pub mod repos;
pub mod service;

pub use error::DatabaseError;
pub use helpers::name_key;
pub use repos::entities::NewEntity;
pub use repos::relations::Relation;
pub use service::{DEFAULT_STALE_CLAIM_AGE, ImportStore, WriteSession};

use libsql::{Builder, OpenFlags};

/// A libSQL database and the one connection kiln uses on it.
pub struct KilnDb {
    // Dropping the database closes the connection, so it lives as long as we do.
    _db: libsql::Database,
    conn: libsql::Connection,
    read_only: bool,
}

impl KilnDb {
    /// Open (creating if needed) a store file, or `":memory:"`, and bring
    /// its schema up to date.
    ///
    /// # Errors
    ///
    /// `DatabaseError::LibSql` if the file cannot be opened,
    /// `DatabaseError::Migration` if the schema cannot be applied.
    pub async fn open_local(path: &str) -> Result<Self, DatabaseError> {
        let db = Builder::new_local(path).build().await?;
        let conn = db.connect()?;
        conn.execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(|e| DatabaseError::Migration(format!("enabling foreign keys on {path}: {e}")))?;

        let store = Self {
            _db: db,
            conn,
            read_only: false,
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Open an existing store file without creating, migrating or writing.
    ///
    /// # Errors
    ///
    /// `DatabaseError::LibSql` if the file is missing or unreadable.
    pub async fn open_read_only(path: &str) -> Result<Self, DatabaseError> {
        let db = Builder::new_local(path)
            .flags(OpenFlags::SQLITE_OPEN_READ_ONLY)
            .build()
            .await?;
        let conn = db.connect()?;
        Ok(Self {
            _db: db,
            conn,
            read_only: true,
        })
    }

    #[must_use]
    pub const fn conn(&self) -> &libsql::Connection {
        &self.conn
    }

    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }
}
