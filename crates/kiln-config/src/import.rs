//! Import pipeline configuration.

use serde::{Deserialize, Serialize};

/// Small by default to respect upstream rate limits.
const fn default_concurrency() -> usize {
    4
}

fn default_rules_path() -> String {
    ".kiln/rules.toml".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImportConfig {
    /// Worker pool size for batch and range runs.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Path to the rule store TOML file.
    #[serde(default = "default_rules_path")]
    pub rules_path: String,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            rules_path: default_rules_path(),
        }
    }
}
