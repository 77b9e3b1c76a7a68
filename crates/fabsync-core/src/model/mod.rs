// ── Domain model ──

pub mod fabric;
pub mod resource;

pub use fabric::{
    DEFAULT_NAMESPACE, DEFAULT_SYNC_INTERVAL_SECS, FabricConfig, FabricId, FabricSettings,
    LastError, StoredSyncStatus, SyncState,
};
pub use resource::{DesiredResource, FABRIC_LABEL, ResourceKey};
