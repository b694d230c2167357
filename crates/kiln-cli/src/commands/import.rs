use kiln_config::KilnConfig;
use kiln_core::ImportReport;
use kiln_import::CancellationToken;

use crate::cli::GlobalFlags;
use crate::cli::root_commands::{BatchArgs, RangeArgs, RecordArgs};
use crate::context;
use crate::output;
use crate::progress::Progress;

pub async fn handle_one(
    args: &RecordArgs,
    config: &KilnConfig,
    flags: &GlobalFlags,
) -> anyhow::Result<bool> {
    let orchestrator = context::orchestrator(config).await?;
    let outcome = orchestrator
        .import_one(args.entity_type, args.external_id)
        .await;

    let mut report = ImportReport::new(args.entity_type);
    report.push(args.external_id, outcome);
    output::report(&report, flags.format)?;
    Ok(!report.has_failures())
}

pub async fn handle_batch(
    args: &BatchArgs,
    config: &KilnConfig,
    flags: &GlobalFlags,
) -> anyhow::Result<bool> {
    let orchestrator = context::orchestrator(config).await?;
    let cancel = cancel_on_interrupt();
    let progress = Progress::bar(args.external_ids.len() as u64, "importing");

    let report = orchestrator
        .import_batch_with(args.entity_type, &args.external_ids, &cancel, &progress)
        .await;
    progress.finish_clear();

    output::report(&report, flags.format)?;
    Ok(!report.has_failures())
}

pub async fn handle_range(
    args: &RangeArgs,
    config: &KilnConfig,
    flags: &GlobalFlags,
) -> anyhow::Result<bool> {
    anyhow::ensure!(
        args.start <= args.end,
        "range start {} is after end {}",
        args.start,
        args.end
    );
    let orchestrator = context::orchestrator(config).await?;
    let cancel = cancel_on_interrupt();
    let progress = Progress::bar((args.end - args.start).saturating_add(1), "importing");

    let report = orchestrator
        .import_range_with(args.entity_type, args.start..=args.end, &cancel, &progress)
        .await;
    progress.finish_clear();

    output::report(&report, flags.format)?;
    Ok(!report.has_failures())
}

/// Token cancelled on the first Ctrl-C. In-flight records still finish.
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted; finishing in-flight records");
            trigger.cancel();
        }
    });
    cancel
}
