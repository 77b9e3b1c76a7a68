// ── Engine configuration ──
//
// Tuning knobs for the scheduler and reconciler. The core never reads
// files or environment variables: `fabsync-config` builds this.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Runtime configuration for a [`crate::SyncEngine`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Scheduler tick period.
    pub tick_interval: Duration,
    /// Global cap on concurrently running reconciliations.
    pub max_concurrent: usize,
    /// Overall deadline for one reconciliation run.
    pub run_timeout: Duration,
    /// Deadline for a single resource apply call.
    pub apply_timeout: Duration,
    /// Hard expiry of a held sync lock.
    pub lock_expiry: Duration,
    /// Multiplier on each fabric's sync interval before it reads
    /// `out_of_sync`.
    pub grace_multiplier: u32,
    pub retry: RetryPolicy,
    /// How long `shutdown` waits for in-flight runs before aborting them.
    pub shutdown_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let run_timeout = Duration::from_secs(300);
        Self {
            tick_interval: Duration::from_secs(60),
            max_concurrent: 4,
            run_timeout,
            apply_timeout: Duration::from_secs(20),
            lock_expiry: run_timeout * 2,
            grace_multiplier: 1,
            retry: RetryPolicy::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}
