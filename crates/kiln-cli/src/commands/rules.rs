use std::collections::BTreeMap;
use std::path::PathBuf;

use kiln_config::KilnConfig;
use kiln_core::EntityType;
use kiln_formula::HandlerRegistry;
use serde::Serialize;

use crate::cli::GlobalFlags;
use crate::cli::subcommands::RulesCommands;
use crate::context;
use crate::output;

#[derive(Debug, Serialize)]
struct RulesSummary {
    path: String,
    total: usize,
    by_entity_type: BTreeMap<EntityType, usize>,
    handlers: Vec<&'static str>,
}

pub fn handle(
    action: &RulesCommands,
    config: &KilnConfig,
    flags: &GlobalFlags,
) -> anyhow::Result<bool> {
    match action {
        RulesCommands::Check { path } => {
            let path = path
                .clone()
                .unwrap_or_else(|| PathBuf::from(&config.import.rules_path));
            let registry = HandlerRegistry::builtin();
            let rules = context::load_rules(&path, &registry)?;

            let summary = RulesSummary {
                path: path.display().to_string(),
                total: rules.len(),
                by_entity_type: rules.counts_by_type(),
                handlers: registry.names().collect(),
            };
            output::output(&summary, flags.format)?;
            Ok(true)
        }
    }
}
