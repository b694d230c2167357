use kiln_config::KilnConfig;

use crate::cli::GlobalFlags;
use crate::cli::root_commands::Commands;
use crate::commands;

/// Dispatch a parsed command. `Ok(false)` means failed records were reported.
pub async fn dispatch(
    command: Commands,
    config: &KilnConfig,
    flags: &GlobalFlags,
) -> anyhow::Result<bool> {
    match command {
        Commands::Import(args) => commands::import::handle_one(&args, config, flags).await,
        Commands::ImportBatch(args) => commands::import::handle_batch(&args, config, flags).await,
        Commands::ImportRange(args) => commands::import::handle_range(&args, config, flags).await,
        Commands::Preview(args) => commands::preview::handle(&args, config, flags).await,
        Commands::Scan(args) => commands::scan::handle(&args, config, flags).await,
        Commands::Rules { action } => commands::rules::handle(&action, config, flags),
    }
}
