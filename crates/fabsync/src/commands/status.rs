//! Status command handler.

use chrono::Utc;
use tabled::Tabled;

use fabsync_core::{FabricId, FabricStatus};

use crate::cli::{GlobalOpts, StatusArgs};
use crate::error::CliError;
use crate::output;

use super::Session;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Last Sync")]
    last_sync: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "Next Retry")]
    next_retry: String,
    #[tabled(rename = "Last Error")]
    last_error: String,
}

fn row(s: &FabricStatus, color: bool) -> StatusRow {
    let now = Utc::now();
    StatusRow {
        id: s.id.to_string(),
        name: s.name.clone(),
        status: output::paint_status(s.status, color),
        last_sync: output::relative_or_dash(s.last_sync_at, now),
        attempts: s.retry_attempts,
        next_retry: output::relative_or_dash(s.next_retry_at, now),
        last_error: s
            .last_error
            .as_ref()
            .map_or_else(|| "-".into(), |e| e.kind.to_string()),
    }
}

fn detail(s: &FabricStatus, color: bool) -> String {
    let now = Utc::now();
    let mut lines = vec![
        format!("ID:         {}", s.id),
        format!("Name:       {}", s.name),
        format!("Status:     {}", output::paint_status(s.status, color)),
        format!("Last Sync:  {}", output::relative_or_dash(s.last_sync_at, now)),
        format!("Attempts:   {}", s.retry_attempts),
    ];
    if let Some(at) = s.next_retry_at {
        lines.push(format!("Next Retry: {}", output::relative(at, now)));
    }
    if let Some(ref err) = s.last_error {
        lines.push(format!("Last Error: {} ({})", err.message, err.kind));
        if let Some(ref resource) = err.resource {
            lines.push(format!("Resource:   {resource}"));
        }
        lines.push(format!("Error At:   {}", output::relative(err.at, now)));
    }
    lines.join("\n")
}

pub fn handle(session: &Session, args: StatusArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let color = output::should_color(&global.color);
    let engine = &session.engine;

    let out = match args.fabric {
        Some(id) => {
            let status = engine.status(&FabricId::from(id))?;
            output::render_single(
                &global.output,
                &status,
                |s| detail(s, color),
                |s| s.status.to_string(),
            )?
        }
        None => {
            let statuses = engine.statuses();
            output::render_list(
                &global.output,
                &statuses,
                |s| row(s, color),
                |s| format!("{}\t{}", s.id, s.status),
            )?
        }
    };
    output::print_output(&out, global.quiet);
    Ok(())
}
