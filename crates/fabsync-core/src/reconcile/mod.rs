// ── Reconciler ──
//
// One run: take the fabric's lock, validate locally, list what the
// cluster already has under the fabric's ownership label, diff, apply the
// delta resource by resource, then write the outcome back through the
// guard. Resource failures are classified and recorded without stopping
// the run; only fabric-level failures (connect, list) end it early.

mod diff;
mod result;
mod validate;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fabsync_api::{Error as ApiError, Resource, ResourceType};
use tokio::sync::broadcast;
use tokio::time::{Instant, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classify::{ErrorKind, MAX_CONFLICT_ATTEMPTS, RecommendedAction, classify};
use crate::config::EngineConfig;
use crate::desired::DesiredStateSource;
use crate::error::CoreError;
use crate::lock::SyncLock;
use crate::model::{
    DesiredResource, FABRIC_LABEL, FabricConfig, FabricId, LastError, ResourceKey,
};
use crate::remote::{ClusterApi, ClusterConnector};
use crate::store::FabricStore;

use self::diff::{Action, Step};
use self::result::{Interrupt, SyncAttempt};

pub use self::result::{ResourceOutcome, ResourceResult, SyncOutcome, SyncResult};

/// Single-flight executor for fabric reconciliation runs.
pub struct Reconciler<K: ClusterConnector> {
    store: Arc<FabricStore>,
    lock: SyncLock,
    connector: Arc<K>,
    desired: Arc<dyn DesiredStateSource>,
    run_timeout: Duration,
    apply_timeout: Duration,
    events: broadcast::Sender<Arc<SyncResult>>,
}

impl<K: ClusterConnector> Reconciler<K> {
    pub fn new(
        store: Arc<FabricStore>,
        lock: SyncLock,
        connector: Arc<K>,
        desired: Arc<dyn DesiredStateSource>,
        config: &EngineConfig,
        events: broadcast::Sender<Arc<SyncResult>>,
    ) -> Self {
        Self {
            store,
            lock,
            connector,
            desired,
            run_timeout: config.run_timeout,
            apply_timeout: config.apply_timeout,
            events,
        }
    }

    pub fn lock(&self) -> &SyncLock {
        &self.lock
    }

    /// Reconcile one fabric.
    ///
    /// Returns `SkippedConcurrent` without touching the fabric if another
    /// run holds its lock. `cancel` stops the run between apply steps.
    pub async fn reconcile(
        &self,
        id: &FabricId,
        cancel: &CancellationToken,
    ) -> Result<SyncResult, CoreError> {
        let started_at = Utc::now();
        let Some(guard) = self.lock.try_acquire(id) else {
            debug!(fabric = %id, "sync already in flight, skipping");
            let result = SyncResult::skipped(id.clone(), started_at);
            self.publish(&result);
            return Ok(result);
        };

        let fabric = self
            .store
            .get(id)
            .ok_or_else(|| CoreError::FabricNotFound { id: id.clone() })?;
        let writer = guard.writer(&self.store);
        writer.mark_syncing()?;

        debug!(fabric = %id, revision = fabric.revision, "sync started");
        let mut attempt = SyncAttempt::new(id.clone(), fabric.revision, started_at);
        let deadline = Instant::now() + self.run_timeout;
        self.run(&fabric, &mut attempt, deadline, cancel).await;

        let finished_at = Utc::now();
        let outcome = attempt.outcome();
        let error = attempt.summary_error(finished_at);
        let written = match &error {
            None => writer.record_success(finished_at),
            Some(e) if outcome == SyncOutcome::Partial => writer.record_partial(finished_at, e.clone()),
            Some(e) => writer.record_failure(e.clone()),
        };
        if let Err(e) = written {
            warn!(fabric = %id, error = %e, "sync result not recorded");
        }
        drop(writer);
        guard.release();

        let result = attempt.finish(finished_at, error);
        match &result.error {
            None => info!(
                fabric = %id,
                outcome = %result.outcome,
                created = result.created,
                updated = result.updated,
                unchanged = result.unchanged,
                "sync finished"
            ),
            Some(e) => warn!(
                fabric = %id,
                outcome = %result.outcome,
                created = result.created,
                updated = result.updated,
                failed = result.failed(),
                kind = %e.kind,
                error = %e.message,
                "sync finished with errors"
            ),
        }
        self.publish(&result);
        Ok(result)
    }

    /// Reap expired locks and record `stale_lock_recovered` on each
    /// affected fabric. Returns the recovered fabric ids.
    pub fn recover_stale_locks(&self) -> Vec<FabricId> {
        let now = Utc::now();
        self.lock
            .reap_expired()
            .into_iter()
            .filter_map(|stale| {
                warn!(
                    fabric = %stale.fabric,
                    held_secs = stale.held_for.as_secs(),
                    "reclaimed expired sync lock, previous run presumed dead"
                );
                let fabric = self.store.get(&stale.fabric)?;
                let guard = self.lock.try_acquire(&stale.fabric)?;
                let error = LastError {
                    kind: ErrorKind::StaleLockRecovered,
                    message: format!(
                        "sync lock expired after {}s without release",
                        stale.held_for.as_secs()
                    ),
                    at: now,
                    resource: None,
                    retry_after_secs: None,
                    config_revision: fabric.revision,
                };
                if let Err(e) = guard.writer(&self.store).record_failure(error) {
                    warn!(fabric = %stale.fabric, error = %e, "could not record lock recovery");
                }
                Some(stale.fabric)
            })
            .collect()
    }

    // ── Run steps ────────────────────────────────────────────────────

    async fn run(
        &self,
        fabric: &FabricConfig,
        attempt: &mut SyncAttempt,
        deadline: Instant,
        cancel: &CancellationToken,
    ) {
        let desired = match self.prepare(fabric) {
            Ok(desired) => desired,
            Err(e) => {
                attempt.fail_fabric(e.kind(), e.to_string());
                return;
            }
        };

        if let Some(interrupt) = interruption(cancel, deadline) {
            attempt.interrupted = Some(interrupt);
            attempt.fail_fabric(interrupt.kind(), "run interrupted before contacting the cluster");
            return;
        }

        let client = match self.connector.connect(fabric) {
            Ok(client) => client,
            Err(e) => {
                fail_with(attempt, &e, "connect");
                return;
            }
        };

        let observed = match self.observe(&client, fabric, &desired, deadline).await {
            Ok(observed) => observed,
            Err(ObserveError::Api(context, e)) => {
                fail_with(attempt, &e, &context);
                return;
            }
            Err(ObserveError::Deadline) => {
                attempt.interrupted = Some(Interrupt::DeadlineExceeded);
                attempt.fail_fabric(ErrorKind::Timeout, "run deadline exceeded while listing");
                return;
            }
        };

        let plan = diff::plan(&fabric.id, &desired, &observed);
        if !plan.orphaned.is_empty() {
            debug!(
                fabric = %fabric.id,
                count = plan.orphaned.len(),
                "remote objects no longer desired (left in place)"
            );
        }
        debug!(fabric = %fabric.id, pending = plan.pending(), total = plan.steps.len(), "diff computed");
        attempt.orphaned.clone_from(&plan.orphaned);

        for step in &plan.steps {
            let key = step.desired.key();
            if step.action == Action::Unchanged {
                attempt.push(key, ResourceOutcome::Unchanged, 0);
                continue;
            }
            if attempt.interrupted.is_none() {
                attempt.interrupted = interruption(cancel, deadline);
            }
            if attempt.interrupted.is_some() {
                attempt.push(key, ResourceOutcome::Aborted, 0);
                continue;
            }
            let (outcome, calls) = self.apply(&client, fabric, step, deadline).await;
            if let ResourceOutcome::Failed { kind, message } = &outcome {
                debug!(fabric = %fabric.id, resource = %key, %kind, error = %message, "apply failed");
            }
            attempt.push(key, outcome, calls);
        }
    }

    /// Local checks and the desired set. No network.
    fn prepare(&self, fabric: &FabricConfig) -> Result<Vec<DesiredResource>, CoreError> {
        validate::endpoint(fabric)?;
        validate::namespace(fabric)?;
        let desired = self.desired.desired_resources(fabric)?;
        validate::resources(fabric, &desired)?;
        Ok(desired)
    }

    /// List every resource type the desired set uses, filtered to objects
    /// owned by this fabric.
    async fn observe<C: ClusterApi>(
        &self,
        client: &C,
        fabric: &FabricConfig,
        desired: &[DesiredResource],
        deadline: Instant,
    ) -> Result<BTreeMap<ResourceKey, Resource>, ObserveError> {
        let selector = format!("{FABRIC_LABEL}={}", fabric.id);
        let types: BTreeSet<&ResourceType> = desired.iter().map(|d| &d.resource_type).collect();

        let mut observed = BTreeMap::new();
        for rt in types {
            let items = timeout_at(deadline, client.list(rt, &fabric.namespace, Some(selector.as_str())))
                .await
                .map_err(|_| ObserveError::Deadline)?
                .map_err(|e| ObserveError::Api(format!("list {rt}"), e))?;
            for item in items {
                let key = ResourceKey {
                    kind: rt.kind.clone(),
                    name: item.metadata.name.clone(),
                };
                observed.insert(key, item);
            }
        }
        Ok(observed)
    }

    /// Apply one step, re-fetching and retrying on conflicts. Returns the
    /// outcome and the number of write calls made.
    async fn apply<C: ClusterApi>(
        &self,
        client: &C,
        fabric: &FabricConfig,
        step: &Step<'_>,
        run_deadline: Instant,
    ) -> (ResourceOutcome, u32) {
        let desired = step.desired;
        let rt = &desired.resource_type;
        let ns = fabric.namespace.as_str();
        let mut action = step.action.clone();
        let mut calls = 0;

        loop {
            let deadline = run_deadline.min(Instant::now() + self.apply_timeout);
            calls += 1;
            let written = match &action {
                Action::Unchanged => return (ResourceOutcome::Unchanged, calls - 1),
                Action::Create => {
                    let body = desired.to_resource(&fabric.id, ns, None);
                    timeout_at(deadline, client.create(rt, ns, &body))
                        .await
                        .map(|r| r.map(|_| ResourceOutcome::Created))
                }
                Action::Update { current } => {
                    let body = desired.to_update(&fabric.id, ns, current);
                    timeout_at(deadline, client.update(rt, ns, &body))
                        .await
                        .map(|r| r.map(|_| ResourceOutcome::Updated))
                }
            };

            let err = match written {
                Ok(Ok(outcome)) => return (outcome, calls),
                Ok(Err(e)) => e,
                Err(_) => return (self.timed_out(), calls),
            };

            let class = classify(&err);
            if class.action != RecommendedAction::RetryImmediate || calls >= MAX_CONFLICT_ATTEMPTS {
                return (failed(class.kind, &err), calls);
            }

            // Conflict: someone else wrote the object. Re-read it and decide
            // again against the fresh version.
            debug!(fabric = %fabric.id, resource = %desired.key(), attempt = calls, "conflict, re-fetching");
            let deadline = run_deadline.min(Instant::now() + self.apply_timeout);
            action = match timeout_at(deadline, client.get(rt, ns, &desired.name)).await {
                Ok(Ok(current)) if desired.is_satisfied_by(&fabric.id, &current) => Action::Unchanged,
                Ok(Ok(current)) => Action::Update {
                    current: Box::new(current.metadata),
                },
                Ok(Err(e)) if e.is_not_found() => Action::Create,
                Ok(Err(e)) => return (failed(classify(&e).kind, &e), calls),
                Err(_) => return (self.timed_out(), calls),
            };
        }
    }

    fn timed_out(&self) -> ResourceOutcome {
        ResourceOutcome::Failed {
            kind: ErrorKind::Timeout,
            message: format!("no response within {}s", self.apply_timeout.as_secs()),
        }
    }

    fn publish(&self, result: &SyncResult) {
        // No receivers is fine.
        let _ = self.events.send(Arc::new(result.clone()));
    }
}

enum ObserveError {
    Api(String, ApiError),
    Deadline,
}

fn interruption(cancel: &CancellationToken, deadline: Instant) -> Option<Interrupt> {
    if cancel.is_cancelled() {
        Some(Interrupt::Cancelled)
    } else if Instant::now() >= deadline {
        Some(Interrupt::DeadlineExceeded)
    } else {
        None
    }
}

fn failed(kind: ErrorKind, err: &ApiError) -> ResourceOutcome {
    ResourceOutcome::Failed {
        kind,
        message: err.to_string(),
    }
}

fn fail_with(attempt: &mut SyncAttempt, err: &ApiError, context: &str) {
    let class = classify(err);
    attempt.fabric_error = Some((
        class.kind,
        format!("{context}: {err}"),
        class.retry_after.map(|d| d.as_secs()),
    ));
}
