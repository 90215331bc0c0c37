//! CLI presentation: text and json formatters for run results and config.

use crate::config::GenflowConfig;
use crate::error::GenerationError;
use crate::queue::{QueueStats, UnitSnapshot, UnitStatus};
use crate::types::GenerationOutput;
use comfy_table::Table;
use owo_colors::OwoColorize;

const SUMMARY_WIDTH: usize = 40;

pub fn format_run_text(units: &[UnitSnapshot], stats: &QueueStats) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n", "Units".bold().underline()));
    out.push_str(&format_units_table(units));
    out.push_str("\n\n");
    out.push_str(&format_stats_text(stats));
    out
}

pub fn format_run_json(units: &[UnitSnapshot], stats: &QueueStats) -> Result<String, GenerationError> {
    let out = serde_json::json!({
        "units": units,
        "stats": stats,
    });
    Ok(serde_json::to_string_pretty(&out)?)
}

pub fn format_units_table(units: &[UnitSnapshot]) -> String {
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec![
        "Unit", "Request", "Type", "Priority", "Status", "Retries", "Progress", "Result",
    ]);
    for unit in units {
        table.add_row(vec![
            unit.id.to_string(),
            unit.request.id.clone(),
            unit.request.content_type().to_string(),
            unit.priority.value().to_string(),
            status_label(unit.status).to_string(),
            format!("{}/{}", unit.retry_count, unit.max_retries),
            format!("{}%", unit.progress),
            summarize(unit),
        ]);
    }
    table.to_string()
}

pub fn format_stats_text(stats: &QueueStats) -> String {
    let mut lines = vec![format!("{}", "Stats".bold().underline())];
    lines.push(format!(
        "  Queued: {}  Processing: {}  Completed: {}  Failed: {}  Cancelled: {}",
        stats.counts.queued,
        stats.counts.processing,
        stats.counts.completed.green(),
        stats.counts.failed.red(),
        stats.counts.cancelled.yellow()
    ));
    lines.push(format!(
        "  Processed: {}  Avg wait: {:.0}ms  Avg processing: {:.0}ms  Throughput: {}/min",
        stats.total_processed,
        stats.avg_wait_ms,
        stats.avg_processing_ms,
        stats.throughput_per_minute
    ));
    if stats.rate_limit.consecutive_errors > 0 {
        lines.push(format!(
            "  Rate limited: {} consecutive, backoff {}ms",
            stats.rate_limit.consecutive_errors, stats.rate_limit.backoff_ms
        ));
    }
    if stats.paused {
        lines.push(format!("  {}", "Paused".yellow()));
    }
    lines.join("\n")
}

pub fn format_config(config: &GenflowConfig, format: &str) -> Result<String, GenerationError> {
    match format {
        "json" => Ok(serde_json::to_string_pretty(config)?),
        "toml" => toml::to_string_pretty(config)
            .map_err(|e| GenerationError::Config(format!("Failed to render config: {}", e))),
        other => Err(GenerationError::Config(format!(
            "Invalid format: {} (must be 'toml' or 'json')",
            other
        ))),
    }
}

fn status_label(status: UnitStatus) -> &'static str {
    match status {
        UnitStatus::Queued => "queued",
        UnitStatus::Processing => "processing",
        UnitStatus::Completed => "completed",
        UnitStatus::Failed => "failed",
        UnitStatus::Cancelled => "cancelled",
    }
}

fn summarize(unit: &UnitSnapshot) -> String {
    match (&unit.result, &unit.error) {
        (Some(GenerationOutput::Text { content }), _) => truncate(content),
        (Some(GenerationOutput::Image { urls, .. }), _) => format!("{} image(s)", urls.len()),
        (Some(GenerationOutput::Video { job_id, urls }), _) => {
            format!("job {} ({} url(s))", job_id, urls.len())
        }
        (None, Some(error)) => truncate(error),
        (None, None) => "-".to_string(),
    }
}

fn truncate(text: &str) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() <= SUMMARY_WIDTH {
        single_line
    } else {
        let head: String = single_line.chars().take(SUMMARY_WIDTH - 1).collect();
        format!("{}…", head)
    }
}
