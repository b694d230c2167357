//! Builds the pieces a command needs from configuration.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use kiln_catalog::Collector;
use kiln_config::KilnConfig;
use kiln_db::ImportStore;
use kiln_formula::{Evaluator, HandlerRegistry, RuleStore};
use kiln_import::Orchestrator;

use crate::cli::GlobalFlags;

pub fn load_config(flags: &GlobalFlags) -> anyhow::Result<KilnConfig> {
    if let Some(path) = &flags.config {
        anyhow::ensure!(path.exists(), "config file {} does not exist", path.display());
    }
    KilnConfig::load_with_dotenv_from(flags.config.as_deref()).context("failed to load kiln configuration")
}

pub fn load_rules(path: &Path, registry: &HandlerRegistry) -> anyhow::Result<RuleStore> {
    RuleStore::load(path, registry)
        .with_context(|| format!("failed to load rule file {}", path.display()))
}

pub fn collector(config: &KilnConfig) -> anyhow::Result<Collector> {
    Collector::from_config(&config.catalog).context("failed to build catalog client")
}

/// Full pipeline over the configured catalog, rule file and store.
pub async fn orchestrator(config: &KilnConfig) -> anyhow::Result<Orchestrator> {
    if let Some(parent) = Path::new(&config.store.path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let store = ImportStore::open_with_stale_age(&config.store.path, config.store.stale_claim_age())
        .await
        .with_context(|| format!("failed to open store at {}", config.store.path))?;
    pipeline(config, store)
}

/// Pipeline for `preview`. The store file is opened read-only, and an
/// absent file is never created: triage then sees no recorded decisions.
pub async fn preview_orchestrator(config: &KilnConfig) -> anyhow::Result<Orchestrator> {
    let path = Path::new(&config.store.path);
    let store = if config.store.path != ":memory:" && path.exists() {
        ImportStore::open_read_only(&config.store.path)
            .await
            .with_context(|| format!("failed to open store at {} read-only", config.store.path))?
    } else {
        tracing::debug!(path = %config.store.path, "no store file, previewing against an empty store");
        ImportStore::open_in_memory()
            .await
            .context("failed to create in-memory store")?
    };
    pipeline(config, store)
}

fn pipeline(config: &KilnConfig, store: ImportStore) -> anyhow::Result<Orchestrator> {
    let registry = HandlerRegistry::builtin();
    let rules = load_rules(Path::new(&config.import.rules_path), &registry)?;
    tracing::debug!(rules = rules.len(), "rule store ready");

    Ok(Orchestrator::new(
        collector(config)?,
        Arc::new(rules),
        Evaluator::new(registry),
        Arc::new(store),
        config.import.concurrency,
    ))
}
