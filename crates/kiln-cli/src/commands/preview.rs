use kiln_config::KilnConfig;

use crate::cli::GlobalFlags;
use crate::cli::root_commands::RecordArgs;
use crate::context;
use crate::output;

/// Print the normalized entity. Nothing is written to the store.
pub async fn handle(
    args: &RecordArgs,
    config: &KilnConfig,
    flags: &GlobalFlags,
) -> anyhow::Result<bool> {
    let orchestrator = context::preview_orchestrator(config).await?;
    let entity = orchestrator
        .preview(args.entity_type, args.external_id)
        .await?;
    output::output(&entity, flags.format)?;
    Ok(true)
}
