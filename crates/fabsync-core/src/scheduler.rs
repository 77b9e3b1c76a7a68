// ── Tick planning ──
//
// Decides, for one tick, which fabrics are due and in what order. Pure
// apart from the set of manual sync requests. The engine's scheduler task
// calls `plan_tick` and dispatches candidates while permits remain.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use tracing::debug;

use crate::classify::{ErrorKind, RecommendedAction};
use crate::lock::SyncLock;
use crate::model::{FabricConfig, FabricId};
use crate::retry::RetryPolicy;
use crate::status::{CalculatedSyncStatus, StatusCalculator};

/// Dispatch priority. `High` sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Priority {
    High,
    Normal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub fabric: FabricId,
    pub priority: Priority,
    pub status: CalculatedSyncStatus,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub requested: bool,
}

pub struct Scheduler {
    calculator: StatusCalculator,
    retry: RetryPolicy,
    requested: DashSet<FabricId>,
}

impl Scheduler {
    pub fn new(calculator: StatusCalculator, retry: RetryPolicy) -> Self {
        Self {
            calculator,
            retry,
            requested: DashSet::new(),
        }
    }

    pub fn calculator(&self) -> &StatusCalculator {
        &self.calculator
    }

    /// Flag a fabric for the next tick at high priority, whatever its
    /// status (unless disabled or not configured).
    pub fn request_sync(&self, fabric: FabricId) {
        self.requested.insert(fabric);
    }

    pub fn is_requested(&self, fabric: &FabricId) -> bool {
        self.requested.contains(fabric)
    }

    /// Drop a request once its run has been dispatched.
    pub(crate) fn clear_request(&self, fabric: &FabricId) {
        self.requested.remove(fabric);
    }

    /// When a fabric in `error` may be retried. `None` means never
    /// automatically (the error needs an operator) or no current error.
    pub fn next_retry_at(&self, fabric: &FabricConfig) -> Option<DateTime<Utc>> {
        let err = fabric.state.current_error(fabric.revision)?;
        if err.kind == ErrorKind::StaleLockRecovered {
            return Some(err.at);
        }
        if err.kind.action() == RecommendedAction::SurfaceError {
            return None;
        }
        // The first failure waits `base`, the next `2 * base`, and so on.
        let attempt = fabric.state.retry_attempts.saturating_sub(1);
        Some(self.retry.next_eligible_time_with_hint(
            attempt,
            err.at,
            err.retry_after_secs.map(Duration::from_secs),
        ))
    }

    /// Due fabrics, highest priority first, then least recently synced.
    pub fn plan_tick(
        &self,
        fabrics: &[Arc<FabricConfig>],
        lock: &SyncLock,
        now: DateTime<Utc>,
    ) -> Vec<Candidate> {
        let mut due: Vec<Candidate> = fabrics
            .iter()
            .filter_map(|fabric| self.evaluate(fabric, lock, now))
            .collect();
        due.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.last_sync_at.cmp(&b.last_sync_at))
                .then_with(|| a.fabric.cmp(&b.fabric))
        });
        due
    }

    fn evaluate(
        &self,
        fabric: &FabricConfig,
        lock: &SyncLock,
        now: DateTime<Utc>,
    ) -> Option<Candidate> {
        let in_flight = lock.is_held(&fabric.id);
        let status = self.calculator.calculate(fabric, now, in_flight);
        let requested = self.is_requested(&fabric.id);

        let priority = match status {
            CalculatedSyncStatus::NotConfigured | CalculatedSyncStatus::Disabled => {
                if requested {
                    debug!(fabric = %fabric.id, %status, "dropping sync request");
                    self.clear_request(&fabric.id);
                }
                return None;
            }
            // Keep any request until the running sync is done. A first sync
            // in flight still reads `never_synced`.
            CalculatedSyncStatus::Syncing => return None,
            _ if in_flight => return None,
            _ if requested => Priority::High,
            CalculatedSyncStatus::NeverSynced => Priority::High,
            CalculatedSyncStatus::OutOfSync => Priority::Normal,
            CalculatedSyncStatus::Error => {
                let retry_at = self.next_retry_at(fabric)?;
                if now < retry_at {
                    return None;
                }
                Priority::Normal
            }
            CalculatedSyncStatus::InSync => return None,
        };

        Some(Candidate {
            fabric: fabric.id.clone(),
            priority,
            status,
            last_sync_at: fabric.state.last_sync_at,
            requested,
        })
    }
}
