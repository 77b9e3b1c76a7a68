// ── Fabric store ──
//
// Concurrent in-memory storage for fabric records with push-based change
// notification via `watch` channels. Configuration changes and derived
// state writes go through separate entry points: `upsert_config` can only
// replace settings, and derived state is only written through a
// `FabricWriter` borrowed from a live `SyncGuard`, or seeded by
// `restore_state` while the caller still owns the store exclusively.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::classify::ErrorKind;
use crate::error::CoreError;
use crate::lock::SyncGuard;
use crate::model::{FabricConfig, FabricId, FabricSettings, LastError, StoredSyncStatus, SyncState};

/// Outcome of [`FabricStore::upsert_config`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated { revision: u64 },
    Unchanged,
}

/// The set of fabrics the engine manages.
pub struct FabricStore {
    by_id: DashMap<FabricId, Arc<FabricConfig>>,

    /// Bumped on configuration changes only (not on derived-state writes).
    /// The scheduler wakes on it to pick up newly eligible fabrics.
    config_version: watch::Sender<u64>,

    /// Full snapshot sorted by id, rebuilt on every mutation.
    snapshot: watch::Sender<Arc<Vec<Arc<FabricConfig>>>>,
}

impl Default for FabricStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FabricStore {
    pub fn new() -> Self {
        let (config_version, _) = watch::channel(0u64);
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            by_id: DashMap::new(),
            config_version,
            snapshot,
        }
    }

    // ── Configuration layer ──────────────────────────────────────────

    /// Insert a fabric or replace its settings. Derived state is kept.
    pub fn upsert_config(&self, settings: FabricSettings) -> Upsert {
        let result = match self.by_id.entry(settings.id.clone()) {
            Entry::Occupied(mut entry) => {
                let mut next = FabricConfig::clone(entry.get());
                if next.apply_settings(settings) {
                    let revision = next.revision;
                    entry.insert(Arc::new(next));
                    Upsert::Updated { revision }
                } else {
                    Upsert::Unchanged
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(FabricConfig::from(settings)));
                Upsert::Created
            }
        };

        if result != Upsert::Unchanged {
            self.rebuild_snapshot();
            self.bump_config_version();
        }
        result
    }

    /// Bump a fabric's revision without changing its settings, e.g. after
    /// the operator rotated a credential stored outside the record.
    pub fn bump_revision(&self, id: &FabricId) -> Result<u64, CoreError> {
        let revision = {
            let mut entry = self
                .by_id
                .get_mut(id)
                .ok_or_else(|| CoreError::FabricNotFound { id: id.clone() })?;
            let mut next = FabricConfig::clone(entry.value());
            next.revision += 1;
            let revision = next.revision;
            *entry.value_mut() = Arc::new(next);
            revision
        };
        self.rebuild_snapshot();
        self.bump_config_version();
        Ok(revision)
    }

    /// Seed derived fields saved by a previous process. A recorded error is
    /// re-stamped with the current revision, since revisions do not survive
    /// a restart.
    ///
    /// Takes `&mut self`: once the store is shared with an engine, derived
    /// state can only change through a [`FabricWriter`].
    ///
    /// A saved `syncing` status means the previous holder died mid-run. It
    /// is recorded as a `stale_lock_recovered` failure.
    pub fn restore_state(&mut self, id: &FabricId, mut state: SyncState) -> Result<(), CoreError> {
        let revision = self
            .get(id)
            .ok_or_else(|| CoreError::FabricNotFound { id: id.clone() })?
            .revision;
        if let Some(err) = state.last_error.as_mut() {
            err.config_revision = revision;
        }
        if state.sync_status == StoredSyncStatus::Syncing {
            warn!(fabric = %id, "previous run ended while syncing, presumed dead");
            state.last_error = Some(LastError {
                kind: ErrorKind::StaleLockRecovered,
                message: "previous run did not finish".into(),
                at: Utc::now(),
                resource: None,
                retry_after_secs: None,
                config_revision: revision,
            });
            state.sync_status = StoredSyncStatus::Failed;
            state.retry_attempts = state.retry_attempts.saturating_add(1);
        }
        self.apply_state(id, |s| *s = state)
    }

    pub fn remove(&self, id: &FabricId) -> Option<Arc<FabricConfig>> {
        let removed = self.by_id.remove(id).map(|(_, v)| v);
        if removed.is_some() {
            self.rebuild_snapshot();
            self.bump_config_version();
        }
        removed
    }

    // ── Readers ──────────────────────────────────────────────────────

    pub fn get(&self, id: &FabricId) -> Option<Arc<FabricConfig>> {
        self.by_id.get(id).map(|r| Arc::clone(r.value()))
    }

    /// Current snapshot, sorted by id (cheap `Arc` clone).
    pub fn snapshot(&self) -> Arc<Vec<Arc<FabricConfig>>> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Arc<FabricConfig>>>> {
        self.snapshot.subscribe()
    }

    /// Receiver that changes whenever configuration (not derived state)
    /// changes.
    pub fn config_changes(&self) -> watch::Receiver<u64> {
        self.config_version.subscribe()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn apply_state(
        &self,
        id: &FabricId,
        f: impl FnOnce(&mut SyncState),
    ) -> Result<(), CoreError> {
        {
            let mut entry = self
                .by_id
                .get_mut(id)
                .ok_or_else(|| CoreError::FabricNotFound { id: id.clone() })?;
            let mut next = FabricConfig::clone(entry.value());
            f(&mut next.state);
            *entry.value_mut() = Arc::new(next);
        }
        self.rebuild_snapshot();
        Ok(())
    }

    fn rebuild_snapshot(&self) {
        let mut values: Vec<Arc<FabricConfig>> =
            self.by_id.iter().map(|r| Arc::clone(r.value())).collect();
        values.sort_by(|a, b| a.id.cmp(&b.id));
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }

    fn bump_config_version(&self) {
        self.config_version.send_modify(|v| *v += 1);
    }
}

// ── FabricWriter ────────────────────────────────────────────────────

/// Write capability for one fabric's derived fields. Only obtainable from
/// [`SyncGuard::writer`]; every write re-checks that the guard still owns
/// the lock.
pub struct FabricWriter<'a> {
    store: &'a FabricStore,
    guard: &'a SyncGuard,
}

impl<'a> FabricWriter<'a> {
    pub(crate) fn new(store: &'a FabricStore, guard: &'a SyncGuard) -> Self {
        Self { store, guard }
    }

    pub fn fabric_id(&self) -> &FabricId {
        self.guard.fabric_id()
    }

    pub fn mark_syncing(&self) -> Result<(), CoreError> {
        self.write(|s| s.sync_status = StoredSyncStatus::Syncing)
    }

    /// Every desired resource is in place.
    pub fn record_success(&self, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.write(|s| {
            s.last_sync_at = Some(now);
            s.last_error = None;
            s.sync_status = StoredSyncStatus::Success;
            s.retry_attempts = 0;
        })
    }

    /// Some resources applied, some failed. `error.at` should equal `now`.
    pub fn record_partial(&self, now: DateTime<Utc>, error: LastError) -> Result<(), CoreError> {
        self.write(|s| {
            s.last_sync_at = Some(now);
            s.last_error = Some(error);
            s.sync_status = StoredSyncStatus::Partial;
            s.retry_attempts = s.retry_attempts.saturating_add(1);
        })
    }

    /// Nothing applied. `last_sync_at` is left untouched.
    pub fn record_failure(&self, error: LastError) -> Result<(), CoreError> {
        self.write(|s| {
            s.last_error = Some(error);
            s.sync_status = StoredSyncStatus::Failed;
            s.retry_attempts = s.retry_attempts.saturating_add(1);
        })
    }

    fn write(&self, f: impl FnOnce(&mut SyncState)) -> Result<(), CoreError> {
        let id = self.guard.fabric_id();
        if !self.guard.is_current() {
            debug!(fabric = %id, "dropping write from a run that lost its lock");
            return Err(CoreError::LockLost { id: id.clone() });
        }
        self.store.apply_state(id, f)
    }
}
