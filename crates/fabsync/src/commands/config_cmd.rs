//! Config subcommand handlers.

use std::io::{self, BufRead, IsTerminal};

use fabsync_config::{self as config, DEFAULT_TOKEN_ACCOUNT};
use fabsync_core::CoreError;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::inventory::Inventory;
use crate::output;

// ── Helpers ─────────────────────────────────────────────────────────

/// Read a token from the terminal without echo, or one line from a pipe.
fn read_token() -> Result<String, CliError> {
    let token = if io::stdin().is_terminal() {
        rpassword::prompt_password("Cluster token: ")?
    } else {
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        line
    };
    let token = token.trim().to_owned();
    if token.is_empty() {
        return Err(CliError::Validation {
            field: "token".into(),
            reason: "token cannot be empty".into(),
        });
    }
    Ok(token)
}

/// Build every fabric's inventory, returning the total object count.
fn check_inventories(cfg: &config::Config) -> Result<usize, CliError> {
    let mut total = 0;
    for fabric in &cfg.fabrics {
        let resources = Inventory::build(fabric).map_err(|e| match e {
            CoreError::Validation { message } => CliError::Validation {
                field: format!("fabrics.{}", fabric.id),
                reason: message,
            },
            other => CliError::from(other),
        })?;
        total += resources.len();
    }
    Ok(total)
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            let path = global.config.clone().unwrap_or_else(config::config_path);
            output::print_output(&path.display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = config::load_config(global.config.as_deref())?.redacted();
            let out = match global.output {
                OutputFormat::Json => output::render_json(&cfg, false)?,
                OutputFormat::JsonCompact => output::render_json(&cfg, true)?,
                OutputFormat::Yaml => output::render_yaml(&cfg)?,
                OutputFormat::Table | OutputFormat::Plain => cfg.to_toml()?,
            };
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Validate => {
            let cfg = config::load_config(global.config.as_deref())?;
            let resources = check_inventories(&cfg)?;
            output::print_output(
                &format!(
                    "configuration OK: {} fabrics, {resources} wiring objects",
                    cfg.fabrics.len()
                ),
                global.quiet,
            );
            Ok(())
        }

        ConfigCommand::SetToken { fabric } => {
            let account = fabric.as_deref().unwrap_or(DEFAULT_TOKEN_ACCOUNT);
            let token = read_token()?;
            config::store_token(account, &token)?;
            if !global.quiet {
                eprintln!("Token stored in system keyring for '{account}'");
            }
            Ok(())
        }
    }
}
