//! # kiln-config
//!
//! Layered configuration loading for kiln using figment.
//!
//! Configuration sources (in priority order, highest wins):
//! 1. Environment variables (`KILN_*` prefix, `__` as separator)
//! 2. An explicit file passed with `--config`, or project-level `.kiln/config.toml`
//! 3. User-level `~/.config/kiln/config.toml`
//! 4. Built-in defaults
//!
//! Figment maps `KILN_CATALOG__BASE_URL` -> `catalog.base_url`,
//! `KILN_IMPORT__CONCURRENCY` -> `import.concurrency`, etc.
//!
//! ```no_run
//! use kiln_config::KilnConfig;
//!
//! let config = KilnConfig::load_with_dotenv().expect("config");
//! println!("catalog: {}", config.catalog.base_url);
//! ```

mod catalog;
mod error;
mod import;
mod store;

pub use catalog::CatalogConfig;
pub use error::ConfigError;
pub use import::ImportConfig;
pub use store::StoreConfig;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KilnConfig {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl KilnConfig {
    /// Load configuration from TOML files and environment variables.
    ///
    /// Does NOT call `dotenvy`; use [`Self::load_with_dotenv`] for `.env` support.
    pub fn load() -> Result<Self, ConfigError> {
        Self::figment(None).extract::<Self>()?.validated()
    }

    /// Load with `.env` support, optionally replacing the project-level file.
    pub fn load_with_dotenv_from(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::figment(explicit).extract::<Self>()?.validated()
    }

    /// Load with `.env` support from the current directory.
    pub fn load_with_dotenv() -> Result<Self, ConfigError> {
        Self::load_with_dotenv_from(None)
    }

    /// Build the figment provider chain.
    ///
    /// Public so tests can layer additional providers on top.
    #[must_use]
    pub fn figment(explicit: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(global_path) = Self::global_config_path() {
            if global_path.exists() {
                figment = figment.merge(Toml::file(global_path));
            }
        }

        match explicit {
            Some(path) => figment = figment.merge(Toml::file(path)),
            None => {
                let local_path = PathBuf::from(".kiln/config.toml");
                if local_path.exists() {
                    figment = figment.merge(Toml::file(local_path));
                }
            }
        }

        figment.merge(Env::prefixed("KILN_").split("__"))
    }

    fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("kiln").join("config.toml"))
    }

    fn validated(self) -> Result<Self, ConfigError> {
        if self.import.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "import.concurrency".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.catalog.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "catalog.max_attempts".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.catalog.base_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "catalog.base_url".into(),
                reason: "must not be empty".into(),
            });
        }
        Ok(self)
    }
}
