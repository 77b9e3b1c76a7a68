// ── Sync engine facade ──
//
// Owns the fabric store, the lock registry, the reconciler and the
// scheduler task. Cheaply cloneable via `Arc<EngineInner>`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore, broadcast};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::desired::DesiredStateSource;
use crate::error::CoreError;
use crate::lock::SyncLock;
use crate::model::{FabricConfig, FabricId, LastError};
use crate::reconcile::{Reconciler, SyncResult};
use crate::remote::ClusterConnector;
use crate::scheduler::Scheduler;
use crate::status::{CalculatedSyncStatus, StatusCalculator};
use crate::store::FabricStore;

const EVENT_CHANNEL_SIZE: usize = 256;

/// Calculated status of one fabric, for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FabricStatus {
    pub id: FabricId,
    pub name: String,
    pub status: CalculatedSyncStatus,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<LastError>,
    pub retry_attempts: u32,
    /// Set while in `error` with an automatic retry pending.
    pub next_retry_at: Option<DateTime<Utc>>,
}

// ── SyncEngine ──────────────────────────────────────────────────────

/// The reconciliation engine. Cloning is cheap.
pub struct SyncEngine<K: ClusterConnector> {
    inner: Arc<EngineInner<K>>,
}

impl<K: ClusterConnector> Clone for SyncEngine<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct EngineInner<K: ClusterConnector> {
    config: EngineConfig,
    store: Arc<FabricStore>,
    lock: SyncLock,
    reconciler: Reconciler<K>,
    scheduler: Scheduler,
    permits: Arc<Semaphore>,
    events: broadcast::Sender<Arc<SyncResult>>,
    cancel: CancellationToken,
    scheduler_task: Mutex<Option<JoinHandle<()>>>,
}

impl<K: ClusterConnector> SyncEngine<K> {
    pub fn new(
        config: EngineConfig,
        store: Arc<FabricStore>,
        connector: K,
        desired: impl DesiredStateSource,
    ) -> Self {
        let lock = SyncLock::new(config.lock_expiry);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let reconciler = Reconciler::new(
            Arc::clone(&store),
            lock.clone(),
            Arc::new(connector),
            Arc::new(desired),
            &config,
            events.clone(),
        );
        let scheduler = Scheduler::new(StatusCalculator::new(config.grace_multiplier), config.retry);
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));

        Self {
            inner: Arc::new(EngineInner {
                config,
                store,
                lock,
                reconciler,
                scheduler,
                permits,
                events,
                cancel: CancellationToken::new(),
                scheduler_task: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<FabricStore> {
        &self.inner.store
    }

    pub fn lock(&self) -> &SyncLock {
        &self.inner.lock
    }

    /// Subscribe to per-run results.
    pub fn events(&self) -> broadcast::Receiver<Arc<SyncResult>> {
        self.inner.events.subscribe()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the scheduler task. The first tick runs immediately.
    pub async fn start(&self) -> Result<(), CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::ShuttingDown);
        }
        let mut task = self.inner.scheduler_task.lock().await;
        if task.is_some() {
            return Err(CoreError::AlreadyRunning);
        }
        info!(
            fabrics = self.inner.store.len(),
            tick_secs = self.inner.config.tick_interval.as_secs(),
            max_concurrent = self.inner.config.max_concurrent,
            "sync engine starting"
        );
        let engine = self.clone();
        let cancel = self.inner.cancel.child_token();
        *task = Some(tokio::spawn(scheduler_task(engine, cancel)));
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.inner
            .scheduler_task
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Stop scheduling, let in-flight runs finish their current step, and
    /// wait for them up to the shutdown deadline.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.permits.close();
        let handle = self.inner.scheduler_task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "scheduler task ended abnormally");
            }
        }
        info!("sync engine stopped");
    }

    // ── Operations ───────────────────────────────────────────────────

    /// Run one reconciliation now, bypassing eligibility. Goes through the
    /// same lock as scheduled runs, and waits for a concurrency permit.
    pub async fn trigger_now(&self, id: &FabricId) -> Result<SyncResult, CoreError> {
        let inner = &self.inner;
        if inner.cancel.is_cancelled() {
            return Err(CoreError::ShuttingDown);
        }
        if inner.store.get(id).is_none() {
            return Err(CoreError::FabricNotFound { id: id.clone() });
        }
        inner.reconciler.recover_stale_locks();

        let permit = tokio::select! {
            biased;
            () = inner.cancel.cancelled() => return Err(CoreError::ShuttingDown),
            permit = Arc::clone(&inner.permits).acquire_owned() => {
                permit.map_err(|_| CoreError::ShuttingDown)?
            }
        };
        debug!(fabric = %id, "manual sync");
        let result = inner.reconciler.reconcile(id, &inner.cancel).await;
        drop(permit);
        result
    }

    /// Flag a fabric for the next tick.
    pub fn request_sync(&self, id: &FabricId) -> Result<(), CoreError> {
        if self.inner.store.get(id).is_none() {
            return Err(CoreError::FabricNotFound { id: id.clone() });
        }
        self.inner.scheduler.request_sync(id.clone());
        Ok(())
    }

    /// Reap expired locks now. The scheduler also does this every tick.
    pub fn recover_stale_locks(&self) -> Vec<FabricId> {
        self.inner.reconciler.recover_stale_locks()
    }

    pub fn status(&self, id: &FabricId) -> Result<FabricStatus, CoreError> {
        let fabric = self
            .inner
            .store
            .get(id)
            .ok_or_else(|| CoreError::FabricNotFound { id: id.clone() })?;
        Ok(self.fabric_status(&fabric, Utc::now()))
    }

    /// Status of every fabric, sorted by id.
    pub fn statuses(&self) -> Vec<FabricStatus> {
        let now = Utc::now();
        self.inner
            .store
            .snapshot()
            .iter()
            .map(|f| self.fabric_status(f, now))
            .collect()
    }

    fn fabric_status(&self, fabric: &FabricConfig, now: DateTime<Utc>) -> FabricStatus {
        let scheduler = &self.inner.scheduler;
        let status = scheduler
            .calculator()
            .calculate(fabric, now, self.inner.lock.is_held(&fabric.id));
        FabricStatus {
            id: fabric.id.clone(),
            name: fabric.name.clone(),
            status,
            last_sync_at: fabric.state.last_sync_at,
            last_error: fabric.state.last_error.clone(),
            retry_attempts: fabric.state.retry_attempts,
            next_retry_at: (status == CalculatedSyncStatus::Error)
                .then(|| scheduler.next_retry_at(fabric))
                .flatten(),
        }
    }

    // ── Scheduling ───────────────────────────────────────────────────

    /// One scheduler pass: reclaim stale locks, plan, dispatch while
    /// permits remain.
    fn tick(&self, runs: &mut JoinSet<()>, cancel: &CancellationToken) {
        let inner = &self.inner;
        inner.reconciler.recover_stale_locks();

        let fabrics = inner.store.snapshot();
        let candidates = inner.scheduler.plan_tick(&fabrics, &inner.lock, Utc::now());
        let total = candidates.len();

        for (dispatched, candidate) in candidates.into_iter().enumerate() {
            let Ok(permit) = Arc::clone(&inner.permits).try_acquire_owned() else {
                debug!(
                    deferred = total - dispatched,
                    "concurrency cap reached, deferring to next tick"
                );
                break;
            };
            inner.scheduler.clear_request(&candidate.fabric);
            debug!(
                fabric = %candidate.fabric,
                priority = %candidate.priority,
                status = %candidate.status,
                "dispatching sync"
            );

            let engine = self.clone();
            let cancel = cancel.clone();
            runs.spawn(async move {
                let _permit = permit;
                if let Err(e) = engine.inner.reconciler.reconcile(&candidate.fabric, &cancel).await {
                    warn!(fabric = %candidate.fabric, error = %e, "sync could not run");
                }
            });
        }
    }

    async fn drain(&self, mut runs: JoinSet<()>) {
        if runs.is_empty() {
            return;
        }
        info!(in_flight = runs.len(), "waiting for in-flight syncs");
        let deadline = self.inner.config.shutdown_timeout;
        let drained = tokio::time::timeout(deadline, async {
            while runs.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = runs.len(),
                "shutdown deadline reached, aborting in-flight syncs"
            );
            runs.abort_all();
            while runs.join_next().await.is_some() {}
        }
    }
}

// ── Background task ──────────────────────────────────────────────────

async fn scheduler_task<K: ClusterConnector>(engine: SyncEngine<K>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(engine.inner.config.tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut config_changes = engine.inner.store.config_changes();
    let mut runs = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {}
            changed = config_changes.changed() => {
                if changed.is_err() {
                    break;
                }
                debug!("fabric configuration changed, re-planning");
            }
        }

        while let Some(joined) = runs.try_join_next() {
            if let Err(e) = joined {
                warn!(error = %e, "sync task ended abnormally");
            }
        }
        engine.tick(&mut runs, &cancel);
    }

    engine.drain(runs).await;
}
