//! Scheduler loop: run the engine until Ctrl-C, reporting every run.

use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use fabsync_core::SyncResult;

use crate::cli::{GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

use super::Session;
use super::sync::summary;

fn render_event(result: &SyncResult, global: &GlobalOpts, color: bool) -> Result<String, CliError> {
    match global.output {
        // One JSON document per line, so the stream stays parseable.
        OutputFormat::Json | OutputFormat::JsonCompact => output::render_json(result, true),
        OutputFormat::Yaml => Ok(format!("---\n{}", output::render_yaml(result)?)),
        OutputFormat::Plain => Ok(format!("{}\t{}", result.fabric_id, result.outcome)),
        OutputFormat::Table => Ok(summary(result, color)),
    }
}

/// Print a rendered event. A render failure is logged and the loop goes on,
/// so in-flight runs are still drained on shutdown. Returns whether
/// anything was printed.
fn emit(result: &SyncResult, rendered: &Result<String, CliError>, quiet: bool) -> bool {
    match rendered {
        Ok(out) => {
            output::print_output(out, quiet);
            true
        }
        Err(e) => {
            warn!(fabric = %result.fabric_id, error = %e, "cannot render sync result");
            false
        }
    }
}

pub async fn handle(session: &Session, global: &GlobalOpts) -> Result<(), CliError> {
    let color = output::should_color(&global.color);
    let engine = &session.engine;
    let mut events = engine.events();

    engine.start().await?;
    info!(fabrics = engine.store().len(), "running; press Ctrl-C to stop");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "cannot listen for Ctrl-C, stopping");
                }
                break;
            }
            event = events.recv() => match event {
                Ok(result) => {
                    emit(&result, &render_event(&result, global, color), global.quiet);
                    if let Err(e) = session.save_state() {
                        warn!(error = %e, "failed to save sync state");
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "event stream lagged");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    info!("shutting down");
    engine.shutdown().await;
    session.save_state()
}
