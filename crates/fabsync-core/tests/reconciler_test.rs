#![allow(clippy::unwrap_used)]
// Reconciler behaviour against an in-memory cluster.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fabsync_api::Error as ApiError;
use fabsync_core::{
    CalculatedSyncStatus, CoreError, EngineConfig, ErrorKind, FABRIC_LABEL, FabricId,
    FabricSettings, FabricStore, Reconciler, ResourceOutcome, StatusCalculator,
    StoredSyncStatus, SyncLock, SyncOutcome, SyncResult,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use common::{ENDPOINT, FakeCluster, SharedDesired, switch, switches};

// ── Helpers ─────────────────────────────────────────────────────────

struct Harness {
    store: Arc<FabricStore>,
    cluster: FakeCluster,
    desired: SharedDesired,
    reconciler: Arc<Reconciler<FakeCluster>>,
    events: broadcast::Receiver<Arc<SyncResult>>,
    id: FabricId,
}

fn harness_with(config: &EngineConfig, desired: Vec<fabsync_core::DesiredResource>) -> Harness {
    let store = Arc::new(FabricStore::new());
    let id = FabricId::from("f1");
    store.upsert_config(FabricSettings::new("f1").endpoint(ENDPOINT).enabled(true));

    let cluster = FakeCluster::new();
    let desired = SharedDesired::new(desired);
    let (tx, events) = broadcast::channel(64);
    let reconciler = Reconciler::new(
        Arc::clone(&store),
        SyncLock::new(config.lock_expiry),
        Arc::new(cluster.clone()),
        Arc::new(desired.source()),
        config,
        tx,
    );
    Harness {
        store,
        cluster,
        desired,
        reconciler: Arc::new(reconciler),
        events,
        id,
    }
}

fn harness(desired: Vec<fabsync_core::DesiredResource>) -> Harness {
    harness_with(&EngineConfig::default(), desired)
}

impl Harness {
    async fn run(&self) -> SyncResult {
        self.reconciler
            .reconcile(&self.id, &CancellationToken::new())
            .await
            .unwrap()
    }

    fn state(&self) -> fabsync_core::SyncState {
        self.store.get(&self.id).unwrap().state.clone()
    }

    fn status(&self) -> CalculatedSyncStatus {
        let fabric = self.store.get(&self.id).unwrap();
        StatusCalculator::default().calculate(&fabric, Utc::now(), false)
    }
}

const FIVE: [&str; 5] = ["leaf-1", "leaf-2", "leaf-3", "leaf-4", "leaf-5"];

// ── Happy path ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_first_run_creates_everything() {
    let mut h = harness(switches(&FIVE));

    let result = h.run().await;

    assert_eq!(result.outcome, SyncOutcome::Success);
    assert_eq!(result.created, 5);
    assert_eq!(h.cluster.names().len(), 5);
    let obj = h.cluster.object("leaf-1").unwrap();
    assert_eq!(obj.metadata.labels.get(FABRIC_LABEL).map(String::as_str), Some("f1"));
    assert_eq!(obj.metadata.namespace.as_deref(), Some("default"));

    let state = h.state();
    assert_eq!(state.last_sync_at, Some(result.finished_at));
    assert!(state.last_error.is_none());
    assert_eq!(state.sync_status, StoredSyncStatus::Success);
    assert_eq!(h.status(), CalculatedSyncStatus::InSync);

    let event = h.events.recv().await.unwrap();
    assert_eq!(event.outcome, SyncOutcome::Success);
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let h = harness(switches(&FIVE));
    h.run().await;
    let writes_after_first = h.cluster.creates() + h.cluster.updates();

    let second = h.run().await;

    assert_eq!(second.outcome, SyncOutcome::Success);
    assert_eq!(second.unchanged, 5);
    assert_eq!((second.created, second.updated), (0, 0));
    assert_eq!(h.cluster.creates() + h.cluster.updates(), writes_after_first);
    assert_eq!(h.cluster.updates(), 0);
}

#[tokio::test]
async fn test_spec_change_updates_only_that_resource() {
    let h = harness(switches(&FIVE));
    h.run().await;

    let mut next = switches(&FIVE);
    next[2].spec = json!({"role": "border-leaf"});
    h.desired.set(next);
    let result = h.run().await;

    assert_eq!(result.updated, 1);
    assert_eq!(result.unchanged, 4);
    assert_eq!(h.cluster.updates(), 1);
    assert_eq!(h.cluster.object("leaf-3").unwrap().spec, json!({"role": "border-leaf"}));
}

#[tokio::test]
async fn test_removed_resources_are_reported_not_deleted() {
    let h = harness(switches(&FIVE));
    h.run().await;

    h.desired.set(switches(&["leaf-1", "leaf-2"]));
    let result = h.run().await;

    assert_eq!(result.outcome, SyncOutcome::Success);
    assert_eq!(result.orphaned.len(), 3);
    assert_eq!(h.cluster.names().len(), 5);
}

#[tokio::test]
async fn test_server_defaulted_fields_do_not_trigger_updates() {
    let h = harness(switches(&["leaf-1"]));
    h.cluster.seed(
        "leaf-1",
        &[(FABRIC_LABEL, "f1")],
        json!({"role": "server-leaf", "profile": "default"}),
    );

    let result = h.run().await;

    assert_eq!(result.unchanged, 1);
    assert_eq!(h.cluster.updates(), 0);
}

// ── Concurrency ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_concurrent_runs_exactly_one_proceeds() {
    let h = harness(switches(&FIVE));
    h.cluster.delay_all_writes(Duration::from_secs(1));

    let mut runs = JoinSet::new();
    for _ in 0..10 {
        let reconciler = Arc::clone(&h.reconciler);
        let id = h.id.clone();
        runs.spawn(async move { reconciler.reconcile(&id, &CancellationToken::new()).await });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = runs.join_next().await {
        outcomes.push(joined.unwrap().unwrap());
    }

    let proceeded: Vec<&SyncResult> = outcomes
        .iter()
        .filter(|r| r.outcome != SyncOutcome::SkippedConcurrent)
        .collect();
    assert_eq!(proceeded.len(), 1);
    assert_eq!(proceeded[0].outcome, SyncOutcome::Success);
    assert_eq!(outcomes.len() - proceeded.len(), 9);

    // Skipped runs wrote nothing: the state is exactly the winner's.
    let state = h.state();
    assert_eq!(state.last_sync_at, Some(proceeded[0].finished_at));
    assert_eq!(state.retry_attempts, 0);
    assert!(state.last_error.is_none());
    assert_eq!(h.cluster.creates(), 5);
    assert!(h.reconciler.lock().is_empty());
}

// ── Failure isolation ───────────────────────────────────────────────

#[tokio::test]
async fn test_one_failing_resource_yields_partial() {
    let h = harness(switches(&FIVE));
    h.cluster.fail_writes_for("leaf-3", || ApiError::Forbidden {
        message: "switches is forbidden".into(),
    });

    let result = h.run().await;

    assert_eq!(result.outcome, SyncOutcome::Partial);
    assert_eq!(result.created, 4);
    assert_eq!(result.failed(), 1);

    let state = h.state();
    assert_eq!(state.last_sync_at, Some(result.finished_at));
    let err = state.last_error.unwrap();
    assert_eq!(err.kind, ErrorKind::Forbidden);
    assert_eq!(err.resource.as_deref(), Some("Switch/leaf-3"));
    assert!(err.message.contains("leaf-3"));
    assert_eq!(state.retry_attempts, 1);
    assert_eq!(state.sync_status, StoredSyncStatus::Partial);

    for name in ["leaf-1", "leaf-2", "leaf-4", "leaf-5"] {
        assert!(h.cluster.object(name).is_some(), "{name} should exist");
    }
    assert!(h.cluster.object("leaf-3").is_none());
}

#[tokio::test]
async fn test_all_failing_resources_yield_failed() {
    let h = harness(switches(&["leaf-1", "leaf-2"]));
    for name in ["leaf-1", "leaf-2"] {
        h.cluster.fail_writes_for(name, || ApiError::Server {
            status: 503,
            message: "etcd unavailable".into(),
        });
    }

    let result = h.run().await;

    assert_eq!(result.outcome, SyncOutcome::Failed);
    let state = h.state();
    assert!(state.last_sync_at.is_none());
    assert_eq!(state.last_error.unwrap().kind, ErrorKind::ServerError);
    assert_eq!(h.status(), CalculatedSyncStatus::Error);
}

#[tokio::test]
async fn test_auth_failure_on_list_fails_the_run() {
    let h = harness(switches(&FIVE));
    h.cluster.fail_lists(|| ApiError::Unauthorized {
        message: "token expired".into(),
    });

    let result = h.run().await;

    assert_eq!(result.outcome, SyncOutcome::Failed);
    assert!(result.resources.is_empty());
    assert_eq!(h.cluster.creates(), 0);
    let state = h.state();
    assert!(state.last_sync_at.is_none());
    let err = state.last_error.unwrap();
    assert_eq!(err.kind, ErrorKind::Auth);
    assert!(err.message.contains("token expired"));
    assert_eq!(h.status(), CalculatedSyncStatus::Error);
}

#[tokio::test]
async fn test_rate_limit_hint_is_recorded() {
    let h = harness(switches(&["leaf-1"]));
    h.cluster.fail_lists(|| ApiError::RateLimited {
        retry_after_secs: Some(120),
    });

    h.run().await;

    let err = h.state().last_error.unwrap();
    assert_eq!(err.kind, ErrorKind::RateLimited);
    assert_eq!(err.retry_after_secs, Some(120));
}

#[tokio::test]
async fn test_validation_failure_makes_no_network_calls() {
    let h = harness(vec![switch("leaf-1"), switch("leaf-1")]);

    let result = h.run().await;

    assert_eq!(result.outcome, SyncOutcome::Failed);
    assert_eq!(h.cluster.calls(), 0);
    let err = h.state().last_error.unwrap();
    assert_eq!(err.kind, ErrorKind::Validation);
    assert!(err.message.contains("duplicate"));
}

#[tokio::test]
async fn test_bad_endpoint_is_a_validation_error() {
    let h = harness(switches(&["leaf-1"]));
    h.store
        .upsert_config(FabricSettings::new("f1").endpoint("cluster.test").enabled(true));

    let result = h.run().await;

    assert_eq!(result.outcome, SyncOutcome::Failed);
    assert_eq!(h.cluster.calls(), 0);
    assert_eq!(h.state().last_error.unwrap().kind, ErrorKind::Validation);
}

#[tokio::test]
async fn test_unknown_fabric_is_an_error() {
    let h = harness(switches(&["leaf-1"]));
    let result = h
        .reconciler
        .reconcile(&FabricId::from("nope"), &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(CoreError::FabricNotFound { .. })));
    assert!(h.reconciler.lock().is_empty());
}

// ── Conflicts ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_conflict_is_retried_with_fresh_version() {
    let h = harness(vec![switch("leaf-1").with_label("role", "leaf")]);
    h.cluster.seed("leaf-1", &[(FABRIC_LABEL, "f1")], json!({"role": "old"}));
    h.cluster.conflict_on("leaf-1", 2);

    let result = h.run().await;

    assert_eq!(result.outcome, SyncOutcome::Success);
    assert_eq!(result.updated, 1);
    assert_eq!(result.resources[0].attempts, 3);
    assert_eq!(h.cluster.gets(), 2);
    let obj = h.cluster.object("leaf-1").unwrap();
    assert_eq!(obj.spec, json!({"role": "server-leaf"}));
    assert_eq!(obj.metadata.labels.get("role").map(String::as_str), Some("leaf"));
}

#[tokio::test]
async fn test_conflict_gives_up_after_three_attempts() {
    let h = harness(switches(&["leaf-1"]));
    h.cluster.seed("leaf-1", &[(FABRIC_LABEL, "f1")], json!({"role": "old"}));
    h.cluster.conflict_on("leaf-1", 10);

    let result = h.run().await;

    assert_eq!(result.outcome, SyncOutcome::Failed);
    assert_eq!(result.resources[0].attempts, 3);
    assert!(matches!(
        result.resources[0].outcome,
        ResourceOutcome::Failed { kind: ErrorKind::Conflict, .. }
    ));
}

#[tokio::test]
async fn test_existing_unlabelled_object_is_adopted() {
    let h = harness(switches(&["leaf-1"]));
    // Not listed (no ownership label), so the first write is a create.
    h.cluster.seed("leaf-1", &[], json!({"role": "server-leaf"}));

    let result = h.run().await;

    assert_eq!(result.outcome, SyncOutcome::Success);
    assert_eq!(result.updated, 1);
    assert_eq!(h.cluster.creates(), 1);
    let obj = h.cluster.object("leaf-1").unwrap();
    assert_eq!(obj.metadata.labels.get(FABRIC_LABEL).map(String::as_str), Some("f1"));
}

// ── Deadlines and cancellation ──────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_cancel_finishes_current_step_then_aborts() {
    let h = harness(switches(&["leaf-1", "leaf-2", "leaf-3"]));
    h.cluster.delay_all_writes(Duration::from_secs(10));

    let cancel = CancellationToken::new();
    let reconciler = Arc::clone(&h.reconciler);
    let id = h.id.clone();
    let token = cancel.clone();
    let run = tokio::spawn(async move { reconciler.reconcile(&id, &token).await });

    // leaf-1 done at 10s, leaf-2 in flight until 20s.
    tokio::time::sleep(Duration::from_secs(15)).await;
    cancel.cancel();
    let result = run.await.unwrap().unwrap();

    assert_eq!(result.outcome, SyncOutcome::Partial);
    assert_eq!(result.created, 2);
    assert_eq!(result.resources[2].outcome, ResourceOutcome::Aborted);
    assert_eq!(h.cluster.names(), ["leaf-1", "leaf-2"]);
    assert_eq!(h.state().last_error.unwrap().kind, ErrorKind::Cancelled);
    assert!(h.reconciler.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_slow_resource_times_out_alone() {
    let config = EngineConfig {
        apply_timeout: Duration::from_secs(5),
        ..EngineConfig::default()
    };
    let h = harness_with(&config, switches(&["leaf-1", "leaf-2", "leaf-3"]));
    h.cluster.delay_writes_for("leaf-2", Duration::from_secs(60));

    let result = h.run().await;

    assert_eq!(result.outcome, SyncOutcome::Partial);
    assert_eq!(result.created, 2);
    assert!(matches!(
        result.resources[1].outcome,
        ResourceOutcome::Failed { kind: ErrorKind::Timeout, .. }
    ));
    assert!(h.cluster.object("leaf-2").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_run_deadline_aborts_remaining_steps() {
    let config = EngineConfig {
        run_timeout: Duration::from_secs(15),
        ..EngineConfig::default()
    };
    let h = harness_with(&config, switches(&["leaf-1", "leaf-2", "leaf-3"]));
    h.cluster.delay_all_writes(Duration::from_secs(10));

    let result = h.run().await;

    assert_eq!(result.outcome, SyncOutcome::Partial);
    assert_eq!(result.created, 1);
    assert!(matches!(
        result.resources[1].outcome,
        ResourceOutcome::Failed { kind: ErrorKind::Timeout, .. }
    ));
    assert_eq!(result.resources[2].outcome, ResourceOutcome::Aborted);
    assert_eq!(h.state().last_error.unwrap().kind, ErrorKind::Timeout);
}

// ── Lock expiry ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_expired_lock_is_recovered() {
    let config = EngineConfig {
        lock_expiry: Duration::from_secs(30),
        ..EngineConfig::default()
    };
    let h = harness_with(&config, switches(&["leaf-1"]));

    // A run that never finishes.
    let stuck = h.reconciler.lock().try_acquire(&h.id).unwrap();
    assert_eq!(h.run().await.outcome, SyncOutcome::SkippedConcurrent);

    tokio::time::advance(Duration::from_secs(31)).await;
    let recovered = h.reconciler.recover_stale_locks();

    assert_eq!(recovered, [h.id.clone()]);
    let err = h.state().last_error.unwrap();
    assert_eq!(err.kind, ErrorKind::StaleLockRecovered);
    assert_eq!(h.status(), CalculatedSyncStatus::Error);

    // The stuck holder can no longer write or release.
    assert!(!stuck.is_current());
    assert!(matches!(
        stuck.writer(&h.store).record_success(Utc::now()),
        Err(CoreError::LockLost { .. })
    ));

    let result = h.run().await;
    assert_eq!(result.outcome, SyncOutcome::Success);
    drop(stuck);
    assert!(h.reconciler.lock().is_empty());
    assert_eq!(h.status(), CalculatedSyncStatus::InSync);
}
