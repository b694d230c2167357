use kiln_core::{ImportOutcome, ImportReport, RecordReport};
use serde::Serialize;
use serde_json::Value;

use crate::cli::OutputFormat;
use crate::ui;

pub mod table;

/// Render a serializable response to a string in the requested format.
pub fn render<T: Serialize>(value: &T, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(value)?),
        OutputFormat::Table => render_table(value),
        OutputFormat::Raw => Ok(serde_json::to_string(value)?),
    }
}

/// Print a serializable response in the requested format.
pub fn output<T: Serialize>(value: &T, format: OutputFormat) -> anyhow::Result<()> {
    let rendered = render(value, format)?;
    println!("{rendered}");
    Ok(())
}

/// Print an import report: one row per record plus the counts in table
/// mode, the whole report otherwise.
pub fn report(report: &ImportReport, format: OutputFormat) -> anyhow::Result<()> {
    if format != OutputFormat::Table {
        return output(report, format);
    }
    let rows: Vec<Vec<String>> = report.records.iter().map(record_row).collect();
    println!(
        "{}",
        table::render_table(&["external_id", "outcome", "detail"], &rows, table_options())
    );
    let c = &report.counts;
    println!(
        "\n{}: created {}, updated {}, skipped {}, failed {}",
        report.entity_type, c.created, c.updated, c.skipped, c.failed
    );
    Ok(())
}

fn record_row(record: &RecordReport) -> Vec<String> {
    let detail = match &record.outcome {
        ImportOutcome::Created { entity_id, review } => review_detail(*entity_id, *review),
        ImportOutcome::Updated {
            entity_id,
            matched,
            review,
        } => format!("{} ({})", review_detail(*entity_id, *review), matched.as_str()),
        ImportOutcome::Skipped { reason } => reason.to_string(),
        ImportOutcome::Failed { kind, message } => format!("{kind}: {message}"),
    };
    vec![
        record.external_id.to_string(),
        record.outcome.label().to_string(),
        detail,
    ]
}

fn review_detail(entity_id: i64, review: bool) -> String {
    if review {
        format!("#{entity_id}, needs review")
    } else {
        format!("#{entity_id}")
    }
}

fn table_options() -> table::TableOptions {
    let prefs = ui::prefs();
    table::TableOptions {
        max_width: prefs.term_width,
        color: prefs.table_color,
    }
}

fn render_table<T: Serialize>(value: &T) -> anyhow::Result<String> {
    let options = table_options();
    match serde_json::to_value(value)? {
        Value::Array(items) => Ok(render_rows(&items, options)),
        Value::Object(map) => {
            let rows = map
                .into_iter()
                .map(|(key, value)| vec![key, cell(&value)])
                .collect::<Vec<_>>();
            Ok(table::render_table(&["key", "value"], &rows, options))
        }
        scalar => Ok(table::render_table(&["value"], &[vec![cell(&scalar)]], options)),
    }
}

/// Arrays of objects become one column per key, in first-seen order.
fn render_rows(items: &[Value], options: table::TableOptions) -> String {
    if items.is_empty() {
        return String::from("(no rows)");
    }
    if !items.iter().all(Value::is_object) {
        let rows = items.iter().map(|item| vec![cell(item)]).collect::<Vec<_>>();
        return table::render_table(&["value"], &rows, options);
    }

    let mut headers = Vec::<String>::new();
    for key in items.iter().filter_map(Value::as_object).flat_map(|m| m.keys()) {
        if !headers.contains(key) {
            headers.push(key.clone());
        }
    }
    let header_refs = headers.iter().map(String::as_str).collect::<Vec<_>>();
    let rows = items
        .iter()
        .filter_map(Value::as_object)
        .map(|map| {
            headers
                .iter()
                .map(|header| map.get(header).map_or_else(|| String::from("-"), cell))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    table::render_table(&header_refs, &rows, options)
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::from("null"),
        Value::String(v) => v.clone(),
        other => other.to_string(),
    }
}
