use clap::{Args, Subcommand};
use kiln_core::EntityType;

use crate::cli::subcommands::RulesCommands;

/// Top-level command tree.
#[derive(Clone, Debug, Subcommand)]
pub enum Commands {
    /// Import one record.
    Import(RecordArgs),
    /// Import a comma-separated list of ids.
    ImportBatch(BatchArgs),
    /// Import every id in an inclusive range.
    ImportRange(RangeArgs),
    /// Fetch and convert one record without writing anything.
    Preview(RecordArgs),
    /// List which ids in a range exist upstream.
    Scan(RangeArgs),
    /// Rule file maintenance.
    Rules {
        #[command(subcommand)]
        action: RulesCommands,
    },
}

#[derive(Clone, Debug, Args)]
pub struct RecordArgs {
    /// Entity type (class, monster, spell, spell-level, item, panoply).
    pub entity_type: EntityType,
    /// Upstream id.
    pub external_id: u64,
}

#[derive(Clone, Debug, Args)]
pub struct BatchArgs {
    pub entity_type: EntityType,
    /// Ids separated by commas, e.g. `31,32,40`.
    #[arg(value_delimiter = ',', required = true)]
    pub external_ids: Vec<u64>,
}

#[derive(Clone, Debug, Args)]
pub struct RangeArgs {
    pub entity_type: EntityType,
    pub start: u64,
    /// Inclusive.
    pub end: u64,
}
