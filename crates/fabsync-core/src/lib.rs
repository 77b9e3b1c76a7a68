//! Fabric synchronization reconciler.
//!
//! Keeps locally-owned fabric records in step with a Kubernetes-style
//! declarative cluster API:
//!
//! - **[`StatusCalculator`]** derives one [`CalculatedSyncStatus`] from a
//!   [`FabricConfig`], the current time, and whether a run is in flight.
//!   Every consumer uses it; the stored `sync_status` is only an audit trail.
//!
//! - **[`Reconciler`]** runs one single-flight sync: lock, validate, list,
//!   diff, apply the delta, write the outcome back through the lock's
//!   [`FabricWriter`]. Resource failures are isolated and classified
//!   ([`classify`]) rather than aborting the run.
//!
//! - **[`SyncEngine`]** owns the [`FabricStore`], the [`SyncLock`] registry
//!   and a scheduler task that ticks on a fixed interval (and on config
//!   changes), picking due fabrics via [`Scheduler`] and dispatching them
//!   under a global concurrency cap. Errors back off per [`RetryPolicy`].
//!
//! The cluster is reached through the [`ClusterApi`] / [`ClusterConnector`]
//! traits; [`HttpConnector`] wraps `fabsync_api::ClusterClient`. Desired
//! state comes from an injected [`DesiredStateSource`].

pub mod classify;
pub mod config;
pub mod desired;
pub mod engine;
pub mod error;
pub mod lock;
pub mod model;
pub mod reconcile;
pub mod remote;
pub mod retry;
pub mod scheduler;
pub mod status;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use classify::{ErrorClass, ErrorKind, RecommendedAction, classify};
pub use config::EngineConfig;
pub use desired::DesiredStateSource;
pub use engine::{FabricStatus, SyncEngine};
pub use error::CoreError;
pub use lock::{StaleLock, SyncGuard, SyncLock};
pub use reconcile::{Reconciler, ResourceOutcome, ResourceResult, SyncOutcome, SyncResult};
pub use remote::{ClusterApi, ClusterConnector, HttpConnector};
pub use retry::RetryPolicy;
pub use scheduler::{Candidate, Priority, Scheduler};
pub use status::{CalculatedSyncStatus, StatusCalculator};
pub use store::{FabricStore, FabricWriter, Upsert};

pub use model::{
    DesiredResource, FABRIC_LABEL, FabricConfig, FabricId, FabricSettings, LastError,
    ResourceKey, StoredSyncStatus, SyncState,
};
