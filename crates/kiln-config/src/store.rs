//! Persistent store configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_path() -> String {
    ".kiln/kiln.db".to_string()
}

const fn default_stale_claim_secs() -> u64 {
    900
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// libSQL database file, or `:memory:`.
    #[serde(default = "default_path")]
    pub path: String,

    /// Staging claims older than this are cleared when a store opens.
    #[serde(default = "default_stale_claim_secs")]
    pub stale_claim_secs: u64,
}

impl StoreConfig {
    #[must_use]
    pub const fn stale_claim_age(&self) -> Duration {
        Duration::from_secs(self.stale_claim_secs)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            stale_claim_secs: default_stale_claim_secs(),
        }
    }
}
