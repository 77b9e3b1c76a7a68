//! Command dispatch: bridges CLI args -> sync engine -> output formatting.

pub mod config_cmd;
pub mod run;
pub mod status;
pub mod sync;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use fabsync_config::{Config, load_config};
use fabsync_core::{FabricStore, HttpConnector, SyncEngine};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;
use crate::inventory::Inventory;
use crate::state::{StateFile, StateLock};

/// Dispatch an engine-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Run => run::handle(&Session::open(global, true)?, global).await,
        Command::Status(args) => status::handle(&Session::open(global, false)?, args, global),
        Command::Sync(args) => {
            let session = Session::open(global, true).map_err(|e| match e {
                // Another process is reconciling, possibly this fabric.
                CliError::StateLocked { .. } => CliError::SyncInFlight {
                    fabric: args.fabric.clone(),
                },
                other => other,
            })?;
            sync::handle(&session, args, global).await
        }
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => Err(CliError::Engine {
            message: "command does not use the sync engine".into(),
        }),
    }
}

/// A loaded configuration and an engine seeded with the saved state.
pub struct Session {
    pub config: Config,
    pub engine: SyncEngine<HttpConnector>,
    pub state_path: PathBuf,
    /// Held by sessions that reconcile; `None` for read-only ones.
    lock: Option<StateLock>,
}

impl Session {
    /// An `exclusive` session locks the state file before reading it and
    /// keeps the lock until dropped.
    pub fn open(global: &GlobalOpts, exclusive: bool) -> Result<Self, CliError> {
        let config = load_config(global.config.as_deref())?;
        let state_path = config.state_path();
        let lock = if exclusive {
            Some(StateLock::try_acquire(&state_path)?)
        } else {
            None
        };
        let writer_alive = lock.is_none() && StateLock::is_held(&state_path);

        let mut store = FabricStore::new();
        for settings in config.fabric_settings() {
            store.upsert_config(settings);
        }
        StateFile::load(&state_path).restore(&mut store, writer_alive)?;
        debug!(
            fabrics = store.len(),
            state = %state_path.display(),
            exclusive,
            "session opened"
        );

        let engine = SyncEngine::new(
            config.engine_config(),
            Arc::new(store),
            config.connector(),
            Inventory::from_config(&config),
        );
        Ok(Self {
            config,
            engine,
            state_path,
            lock,
        })
    }

    /// No-op for read-only sessions.
    pub fn save_state(&self) -> Result<(), CliError> {
        if self.lock.is_none() {
            return Ok(());
        }
        StateFile::capture(self.engine.store()).save(&self.state_path)
    }
}
