//! Manual sync: one reconciliation of one fabric, whatever its status.

use tabled::{Table, Tabled, settings::Style};

use fabsync_core::{ErrorKind, FabricId, ResourceOutcome, ResourceResult, SyncOutcome, SyncResult};

use crate::cli::{GlobalOpts, SyncArgs};
use crate::error::CliError;
use crate::output;

use super::Session;

#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "Error")]
    error: String,
}

impl From<&ResourceResult> for ResourceRow {
    fn from(r: &ResourceResult) -> Self {
        let (outcome, error) = match &r.outcome {
            ResourceOutcome::Created => ("created".into(), String::new()),
            ResourceOutcome::Updated => ("updated".into(), String::new()),
            ResourceOutcome::Unchanged => ("unchanged".into(), String::new()),
            ResourceOutcome::Aborted => ("aborted".into(), String::new()),
            ResourceOutcome::Failed { kind, message } => (format!("failed ({kind})"), message.clone()),
        };
        Self {
            resource: r.resource.to_string(),
            outcome,
            attempts: r.attempts,
            error,
        }
    }
}

/// Summary line for a finished run, shared with `fabsync run`.
pub fn summary(result: &SyncResult, color: bool) -> String {
    let mut line = format!(
        "{}: {} (created {}, updated {}, unchanged {}, failed {})",
        result.fabric_id,
        output::paint_outcome(result.outcome, color),
        result.created,
        result.updated,
        result.unchanged,
        result.failed(),
    );
    if !result.orphaned.is_empty() {
        line.push_str(&format!(", {} orphaned", result.orphaned.len()));
    }
    if let Some(ref err) = result.error {
        line.push_str(&format!(": {} ({})", err.message, err.kind));
    }
    line
}

fn detail(result: &SyncResult, color: bool) -> String {
    let mut out = summary(result, color);
    let touched: Vec<ResourceRow> = result
        .resources
        .iter()
        .filter(|r| r.outcome != ResourceOutcome::Unchanged)
        .map(ResourceRow::from)
        .collect();
    if !touched.is_empty() {
        out.push('\n');
        out.push_str(&Table::new(touched).with(Style::rounded()).to_string());
    }
    for orphan in &result.orphaned {
        out.push_str(&format!("\norphaned: {orphan}"));
    }
    out
}

/// Map a non-successful run to the error the process exits with.
pub fn outcome_error(result: &SyncResult) -> Option<CliError> {
    let fabric = result.fabric_id.to_string();
    match result.outcome {
        SyncOutcome::Success => None,
        SyncOutcome::SkippedConcurrent => Some(CliError::SyncInFlight { fabric }),
        SyncOutcome::Partial | SyncOutcome::Failed => {
            let (kind, message) = result.error.as_ref().map_or_else(
                || (ErrorKind::Unknown, format!("{} resources failed", result.failed())),
                |e| (e.kind, e.message.clone()),
            );
            Some(CliError::sync_failed(fabric, kind, message))
        }
    }
}

pub async fn handle(session: &Session, args: SyncArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let color = output::should_color(&global.color);
    let id = FabricId::from(args.fabric);

    let result = session.engine.trigger_now(&id).await?;
    session.save_state()?;

    let out = output::render_single(
        &global.output,
        &result,
        |r| detail(r, color),
        |r| r.outcome.to_string(),
    )?;
    output::print_output(&out, global.quiet);

    outcome_error(&result).map_or(Ok(()), Err)
}
