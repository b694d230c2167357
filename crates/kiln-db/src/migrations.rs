//! Schema migrations, embedded at compile time.
//!
//! Each script is idempotent (`IF NOT EXISTS` throughout) and runs in order
//! on every writable open. A failure names the script that broke.

use crate::KilnDb;
use crate::error::DatabaseError;

/// `(name, sql)` in application order.
const MIGRATIONS: &[(&str, &str)] = &[(
    "001_initial",
    include_str!("../migrations/001_initial.sql"),
)];

impl KilnDb {
    pub(crate) async fn run_migrations(&self) -> Result<(), DatabaseError> {
        for (name, sql) in MIGRATIONS {
            self.conn
                .execute_batch(sql)
                .await
                .map_err(|e| DatabaseError::Migration(format!("{name} did not apply: {e}")))?;
            tracing::trace!(migration = name, "schema migration applied");
        }
        Ok(())
    }
}
