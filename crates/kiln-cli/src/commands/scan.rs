use futures::StreamExt;
use kiln_config::KilnConfig;
use kiln_core::EntityType;
use serde::Serialize;

use crate::cli::GlobalFlags;
use crate::cli::root_commands::RangeArgs;
use crate::context;
use crate::output;
use crate::progress::Progress;

#[derive(Debug, Serialize)]
struct ScanReport {
    entity_type: EntityType,
    found: Vec<u64>,
    missing: usize,
    errors: Vec<ScanError>,
}

#[derive(Debug, Serialize)]
struct ScanError {
    external_id: u64,
    message: String,
}

/// Walk the range through the collector and report which ids exist.
/// Nothing is converted or written.
pub async fn handle(
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
    let collector = context::collector(config)?;
    let progress = Progress::bar((args.end - args.start).saturating_add(1), "scanning");

    let mut report = ScanReport {
        entity_type: args.entity_type,
        found: Vec::new(),
        missing: 0,
        errors: Vec::new(),
    };
    let mut results = std::pin::pin!(collector.fetch_range(args.entity_type, args.start..=args.end));
    while let Some((external_id, result)) = results.next().await {
        match result {
            Ok(_) => report.found.push(external_id),
            Err(err) if err.is_not_found() => report.missing += 1,
            Err(err) => report.errors.push(ScanError {
                external_id,
                message: err.to_string(),
            }),
        }
        progress.inc(1);
    }
    progress.finish_clear();

    output::output(&report, flags.format)?;
    Ok(report.errors.is_empty())
}
