// ── Fabric record ──
//
// `FabricConfig` is owned by the host's configuration layer. The nested
// `SyncState` holds the derived fields, and is only ever written through a
// `FabricWriter`, which in turn can only be obtained from a live `SyncGuard`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::ErrorKind;

/// Default reconciliation interval for a freshly created fabric.
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;

/// Default remote namespace.
pub const DEFAULT_NAMESPACE: &str = "default";

// ── FabricId ────────────────────────────────────────────────────────

/// Opaque, unique fabric identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FabricId(String);

impl FabricId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FabricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for FabricId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

impl From<&str> for FabricId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for FabricId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ── Derived state ───────────────────────────────────────────────────

/// Raw status stored by the last sync attempt. Audit trail only: callers
/// that need "the" status use [`crate::StatusCalculator`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StoredSyncStatus {
    #[default]
    Never,
    Syncing,
    Success,
    Partial,
    Failed,
}

/// A classified error recorded against a fabric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
    /// The resource the error is about, when it is resource-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Server backoff hint (HTTP 429 `Retry-After`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    /// Configuration revision the failing attempt ran against.
    pub config_revision: u64,
}

/// Fields written by the reconciler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_error: Option<LastError>,
    pub sync_status: StoredSyncStatus,
    /// Consecutive unsuccessful attempts. Reset on success.
    pub retry_attempts: u32,
}

impl SyncState {
    /// The recorded error, if it still describes the fabric as configured
    /// at `revision` and is newer than the last sync.
    ///
    /// Errors recorded against an older revision are stale: the operator
    /// has changed configuration since. Stale-lock recovery is independent
    /// of configuration and always counts.
    pub fn current_error(&self, revision: u64) -> Option<&LastError> {
        let err = self.last_error.as_ref()?;
        let same_config =
            err.kind == ErrorKind::StaleLockRecovered || err.config_revision == revision;
        let after_sync = self.last_sync_at.is_none_or(|synced| err.at > synced);
        (same_config && after_sync).then_some(err)
    }
}

// ── FabricConfig ────────────────────────────────────────────────────

/// A fabric record as the reconciler sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FabricConfig {
    pub id: FabricId,
    pub name: String,
    /// Cluster API endpoint. Empty means "not configured".
    pub remote_endpoint: String,
    pub namespace: String,
    pub sync_enabled: bool,
    pub sync_interval_secs: u64,
    /// Bumped by the configuration layer on every change.
    pub revision: u64,
    pub state: SyncState,
}

impl FabricConfig {
    /// A fresh, unconfigured and disabled fabric.
    pub fn new(id: impl Into<FabricId>) -> Self {
        let id = id.into();
        Self {
            name: id.to_string(),
            id,
            remote_endpoint: String::new(),
            namespace: DEFAULT_NAMESPACE.into(),
            sync_enabled: false,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            revision: 0,
            state: SyncState::default(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.remote_endpoint.trim().is_empty()
    }

    pub fn sync_interval(&self) -> TimeDelta {
        i64::try_from(self.sync_interval_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }

    fn settings(&self) -> FabricSettings {
        FabricSettings {
            id: self.id.clone(),
            name: self.name.clone(),
            remote_endpoint: self.remote_endpoint.clone(),
            namespace: self.namespace.clone(),
            sync_enabled: self.sync_enabled,
            sync_interval_secs: self.sync_interval_secs,
        }
    }

    /// Apply configuration-layer settings. Returns `true` (and bumps the
    /// revision) if anything changed. Derived state is never touched.
    pub(crate) fn apply_settings(&mut self, settings: FabricSettings) -> bool {
        if self.settings() == settings {
            return false;
        }
        self.name = settings.name;
        self.remote_endpoint = settings.remote_endpoint;
        self.namespace = settings.namespace;
        self.sync_enabled = settings.sync_enabled;
        self.sync_interval_secs = settings.sync_interval_secs;
        self.revision += 1;
        true
    }
}

/// The configuration-owned subset of a fabric, as supplied by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FabricSettings {
    pub id: FabricId,
    pub name: String,
    pub remote_endpoint: String,
    pub namespace: String,
    pub sync_enabled: bool,
    pub sync_interval_secs: u64,
}

impl FabricSettings {
    pub fn new(id: impl Into<FabricId>) -> Self {
        FabricConfig::new(id).settings()
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.remote_endpoint = endpoint.into();
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.sync_enabled = enabled;
        self
    }

    pub fn interval_secs(mut self, secs: u64) -> Self {
        self.sync_interval_secs = secs;
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl From<FabricSettings> for FabricConfig {
    fn from(settings: FabricSettings) -> Self {
        let mut fabric = FabricConfig::new(settings.id.clone());
        fabric.apply_settings(settings);
        fabric.revision = 0;
        fabric
    }
}
