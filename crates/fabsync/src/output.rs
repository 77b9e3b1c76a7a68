//! Output formatting: table, JSON, YAML, plain.
//!
//! Renders data in the format selected by `--output`. Table uses `tabled`,
//! structured formats use serde, plain emits one identifier per line.

use std::io::{self, IsTerminal, Write};

use chrono::{DateTime, Utc};
use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};

use fabsync_core::{CalculatedSyncStatus, SyncOutcome};

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

// ── Color helpers ────────────────────────────────────────────────────

/// Determine whether color output should be enabled.
pub fn should_color(mode: &ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

pub fn paint_status(status: CalculatedSyncStatus, color: bool) -> String {
    let text = status.to_string();
    if !color {
        return text;
    }
    match status {
        CalculatedSyncStatus::InSync => text.green().to_string(),
        CalculatedSyncStatus::Syncing => text.cyan().to_string(),
        CalculatedSyncStatus::OutOfSync | CalculatedSyncStatus::NeverSynced => {
            text.yellow().to_string()
        }
        CalculatedSyncStatus::Error => text.red().bold().to_string(),
        CalculatedSyncStatus::Disabled | CalculatedSyncStatus::NotConfigured => {
            text.dimmed().to_string()
        }
    }
}

pub fn paint_outcome(outcome: SyncOutcome, color: bool) -> String {
    let text = outcome.to_string();
    if !color {
        return text;
    }
    match outcome {
        SyncOutcome::Success => text.green().to_string(),
        SyncOutcome::Partial | SyncOutcome::SkippedConcurrent => text.yellow().to_string(),
        SyncOutcome::Failed => text.red().bold().to_string(),
    }
}

// ── Time helpers ─────────────────────────────────────────────────────

/// `3m 20s ago` / `in 45s`, truncated to whole seconds.
pub fn relative(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = now.signed_duration_since(at);
    let secs = delta.num_seconds().unsigned_abs();
    let span = humantime::format_duration(std::time::Duration::from_secs(secs));
    if delta.num_seconds() >= 0 {
        format!("{span} ago")
    } else {
        format!("in {span}")
    }
}

pub fn relative_or_dash(at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    at.map_or_else(|| "-".into(), |at| relative(at, now))
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a list of serde-serializable + tabled items in the chosen format.
///
/// - `table`: uses the `Tabled` derive to build a pretty table
/// - `json` / `json-compact`: serializes the original data via serde
/// - `yaml`: serializes via serde_yaml
/// - `plain`: calls `id_fn` on each item to emit one identifier per line
pub fn render_list<T, R>(
    format: &OutputFormat,
    data: &[T],
    to_row: impl Fn(&T) -> R,
    id_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: serde::Serialize,
    R: Tabled,
{
    match format {
        OutputFormat::Table => {
            let rows: Vec<R> = data.iter().map(to_row).collect();
            Ok(render_table(&rows))
        }
        OutputFormat::Json => render_json(data, false),
        OutputFormat::JsonCompact => render_json(data, true),
        OutputFormat::Yaml => render_yaml(data),
        OutputFormat::Plain => Ok(data.iter().map(&id_fn).collect::<Vec<_>>().join("\n")),
    }
}

/// Render a single serde-serializable item in the chosen format.
///
/// Table rendering uses `detail_fn`, since single-item views are key/value
/// blocks rather than tables.
pub fn render_single<T>(
    format: &OutputFormat,
    data: &T,
    detail_fn: impl Fn(&T) -> String,
    id_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: serde::Serialize,
{
    match format {
        OutputFormat::Table => Ok(detail_fn(data)),
        OutputFormat::Json => render_json(data, false),
        OutputFormat::JsonCompact => render_json(data, true),
        OutputFormat::Yaml => render_yaml(data),
        OutputFormat::Plain => Ok(id_fn(data)),
    }
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

// ── Format-specific renderers ────────────────────────────────────────

fn render_table<R: Tabled>(rows: &[R]) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

pub(crate) fn render_json<T: serde::Serialize + ?Sized>(
    data: &T,
    compact: bool,
) -> Result<String, CliError> {
    let text = if compact {
        serde_json::to_string(data)?
    } else {
        serde_json::to_string_pretty(data)?
    };
    Ok(text)
}

pub(crate) fn render_yaml<T: serde::Serialize + ?Sized>(data: &T) -> Result<String, CliError> {
    Ok(serde_yaml::to_string(data)?)
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    #[test]
    fn relative_times_read_naturally() {
        let now = Utc::now();
        assert_eq!(relative(now - TimeDelta::seconds(200), now), "3m 20s ago");
        assert_eq!(relative(now + TimeDelta::seconds(45), now), "in 45s");
        assert_eq!(relative_or_dash(None, now), "-");
    }

    #[test]
    fn plain_status_has_no_escape_codes() {
        assert_eq!(paint_status(CalculatedSyncStatus::OutOfSync, false), "out_of_sync");
        assert!(paint_status(CalculatedSyncStatus::Error, true).contains('\u{1b}'));
    }
}
