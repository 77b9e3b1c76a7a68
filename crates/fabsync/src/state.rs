//! Sync state carried between CLI invocations.
//!
//! The engine keeps derived fields (`last_sync_at`, `last_error`, retry
//! counters) in memory only. `fabsync` saves them to a JSON file after each
//! run and seeds a fresh store from it on start.
//!
//! Processes that reconcile hold an exclusive advisory lock on a sibling
//! `.lock` file for their whole session, so two of them never run the same
//! fabric or overwrite each other's state.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::Path;

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use fabsync_core::{FabricConfig, FabricId, FabricStore, StoredSyncStatus, SyncState};

use crate::error::CliError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateFile {
    #[serde(default)]
    pub fabrics: BTreeMap<String, SavedFabric>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedFabric {
    /// Settings the state was recorded under.
    pub fingerprint: String,
    pub state: SyncState,
}

/// Identifies the settings that make a recorded error stale when changed.
fn fingerprint(fabric: &FabricConfig) -> String {
    format!(
        "{}|{}|{}|{}",
        fabric.remote_endpoint.trim(),
        fabric.namespace,
        fabric.sync_enabled,
        fabric.sync_interval_secs
    )
}

/// The last finished outcome a `syncing` record implies.
fn settled_status(state: &SyncState) -> StoredSyncStatus {
    match (&state.last_error, state.last_sync_at) {
        (Some(_), _) => StoredSyncStatus::Failed,
        (None, Some(_)) => StoredSyncStatus::Success,
        (None, None) => StoredSyncStatus::Never,
    }
}

impl StateFile {
    /// Missing or unreadable files yield an empty state.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read state file, starting fresh");
                return Self::default();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "corrupt state file, starting fresh");
            Self::default()
        })
    }

    /// Seed `store` with the saved state of every fabric it knows.
    ///
    /// A fabric whose settings changed since the state was saved gets a
    /// revision bump, so a recorded error no longer counts against it.
    /// Runs before `store` is handed to the engine.
    ///
    /// A saved `syncing` status means the writer died mid-run, unless
    /// `writer_alive` says another process still holds the state lock.
    pub fn restore(&self, store: &mut FabricStore, writer_alive: bool) -> Result<(), CliError> {
        for (id, saved) in &self.fabrics {
            let id = FabricId::from(id.as_str());
            let Some(fabric) = store.get(&id) else {
                debug!(fabric = %id, "dropping state of unconfigured fabric");
                continue;
            };
            let changed = fingerprint(&fabric) != saved.fingerprint;
            let mut state = saved.state.clone();
            if writer_alive && state.sync_status == StoredSyncStatus::Syncing {
                debug!(fabric = %id, "sync in flight in another process");
                state.sync_status = settled_status(&state);
            }
            store.restore_state(&id, state)?;
            if changed {
                debug!(fabric = %id, "settings changed since last run");
                store.bump_revision(&id)?;
            }
        }
        Ok(())
    }

    pub fn capture(store: &FabricStore) -> Self {
        let fabrics = store
            .snapshot()
            .iter()
            .map(|f| {
                let saved = SavedFabric {
                    fingerprint: fingerprint(f),
                    state: f.state.clone(),
                };
                (f.id.to_string(), saved)
            })
            .collect();
        Self { fabrics }
    }

    /// Write atomically: a sibling temp file renamed over `path`.
    pub fn save(&self, path: &Path) -> Result<(), CliError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), fabrics = self.fabrics.len(), "state saved");
        Ok(())
    }
}

// ── Cross-process lock ──────────────────────────────────────────────

/// Exclusive lock on a state file. Released on drop.
#[derive(Debug)]
pub struct StateLock {
    _file: File,
}

impl StateLock {
    pub fn lock_path(state_path: &Path) -> std::path::PathBuf {
        state_path.with_extension("lock")
    }

    /// Take the lock without waiting. Fails with `StateLocked` if another
    /// process holds it.
    pub fn try_acquire(state_path: &Path) -> Result<Self, CliError> {
        let path = Self::lock_path(state_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                debug!(path = %path.display(), "state lock acquired");
                Ok(Self { _file: file })
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(CliError::StateLocked {
                path: path.display().to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// `true` if another process holds the lock right now.
    pub fn is_held(state_path: &Path) -> bool {
        matches!(Self::try_acquire(state_path), Err(CliError::StateLocked { .. }))
    }
}
