// ── Per-fabric single-flight lock ──
//
// Non-blocking try-acquire keyed by fabric id. A held entry carries a
// hard expiry; expired entries stay in place until `reap_expired` removes
// them, so a slow holder is never silently overtaken by a second run.
// Release is tied to the `SyncGuard`'s lifetime and only ever removes the
// entry carrying the guard's own token.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;
use uuid::Uuid;

use crate::model::FabricId;
use crate::store::{FabricStore, FabricWriter};

#[derive(Debug, Clone, Copy)]
struct LockEntry {
    token: Uuid,
    acquired_at: Instant,
    expires_at: Instant,
}

struct LockInner {
    entries: DashMap<FabricId, LockEntry>,
    expiry: Duration,
}

/// Registry of live per-fabric locks. Cheap to clone.
#[derive(Clone)]
pub struct SyncLock {
    inner: Arc<LockInner>,
}

/// A lock entry removed by [`SyncLock::reap_expired`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleLock {
    pub fabric: FabricId,
    pub token: Uuid,
    pub held_for: Duration,
}

impl SyncLock {
    pub fn new(expiry: Duration) -> Self {
        Self {
            inner: Arc::new(LockInner {
                entries: DashMap::new(),
                expiry,
            }),
        }
    }

    pub fn expiry(&self) -> Duration {
        self.inner.expiry
    }

    /// Try to take the lock for `fabric`. Returns `None` immediately if any
    /// entry exists, including one past its expiry that has not yet been
    /// reaped.
    pub fn try_acquire(&self, fabric: &FabricId) -> Option<SyncGuard> {
        self.try_acquire_at(fabric, Instant::now())
    }

    pub(crate) fn try_acquire_at(&self, fabric: &FabricId, now: Instant) -> Option<SyncGuard> {
        match self.inner.entries.entry(fabric.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let token = Uuid::new_v4();
                slot.insert(LockEntry {
                    token,
                    acquired_at: now,
                    expires_at: now + self.inner.expiry,
                });
                Some(SyncGuard {
                    lock: self.clone(),
                    fabric: fabric.clone(),
                    token,
                })
            }
        }
    }

    /// `true` if a non-expired entry exists for `fabric`.
    pub fn is_held(&self, fabric: &FabricId) -> bool {
        let now = Instant::now();
        self.inner
            .entries
            .get(fabric)
            .is_some_and(|e| e.expires_at > now)
    }

    /// Remove every entry past its expiry.
    pub fn reap_expired(&self) -> Vec<StaleLock> {
        self.reap_expired_at(Instant::now())
    }

    pub(crate) fn reap_expired_at(&self, now: Instant) -> Vec<StaleLock> {
        let expired: Vec<FabricId> = self
            .inner
            .entries
            .iter()
            .filter(|e| e.expires_at <= now)
            .map(|e| e.key().clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|fabric| {
                // Re-check under the shard lock: the holder may have released
                // and a fresh run acquired since the scan.
                let (fabric, entry) = self
                    .inner
                    .entries
                    .remove_if(&fabric, |_, e| e.expires_at <= now)?;
                Some(StaleLock {
                    fabric,
                    token: entry.token,
                    held_for: now.saturating_duration_since(entry.acquired_at),
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    fn holds(&self, fabric: &FabricId, token: Uuid) -> bool {
        self.inner
            .entries
            .get(fabric)
            .is_some_and(|e| e.token == token)
    }

    fn release_token(&self, fabric: &FabricId, token: Uuid) -> bool {
        self.inner
            .entries
            .remove_if(fabric, |_, e| e.token == token)
            .is_some()
    }
}

impl std::fmt::Debug for SyncLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncLock")
            .field("held", &self.len())
            .field("expiry", &self.inner.expiry)
            .finish()
    }
}

// ── SyncGuard ───────────────────────────────────────────────────────

/// Proof of holding a fabric's lock. Released on drop.
///
/// The guard is the only way to obtain a [`FabricWriter`], so derived
/// fields can only be written by the run that owns the lock.
#[derive(Debug)]
pub struct SyncGuard {
    lock: SyncLock,
    fabric: FabricId,
    token: Uuid,
}

impl SyncGuard {
    pub fn fabric_id(&self) -> &FabricId {
        &self.fabric
    }

    pub fn token(&self) -> Uuid {
        self.token
    }

    /// `false` once the entry was reaped (and possibly re-acquired by
    /// another run).
    pub fn is_current(&self) -> bool {
        self.lock.holds(&self.fabric, self.token)
    }

    /// Write access to this fabric's derived fields in `store`.
    pub fn writer<'a>(&'a self, store: &'a FabricStore) -> FabricWriter<'a> {
        FabricWriter::new(store, self)
    }

    /// Release explicitly. Equivalent to dropping the guard.
    pub fn release(self) {}
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        self.lock.release_token(&self.fabric, self.token);
    }
}
