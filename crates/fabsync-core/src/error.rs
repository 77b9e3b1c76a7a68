// ── Core error types ──
//
// Errors returned by the engine's public operations. Reconciliation
// failures are not errors at this level: they are classified and recorded
// on the fabric, and reported through `SyncResult`.

use thiserror::Error;

use crate::classify::{ErrorKind, classify};
use crate::model::FabricId;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Fabric errors ────────────────────────────────────────────────
    #[error("Fabric not found: {id}")]
    FabricNotFound { id: FabricId },

    #[error("Sync lock for fabric {id} is no longer held by this run")]
    LockLost { id: FabricId },

    #[error("Validation failed: {message}")]
    Validation { message: String },

    // ── Cluster errors (classified, not exposed raw) ─────────────────
    #[error("Cluster API error ({kind}): {message}")]
    Cluster { kind: ErrorKind, message: String },

    // ── Engine lifecycle ─────────────────────────────────────────────
    #[error("Sync engine is already running")]
    AlreadyRunning,

    #[error("Sync engine is shutting down")]
    ShuttingDown,

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// The failure kind recorded on a fabric when this error ends a run.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Cluster { kind, .. } => *kind,
            Self::Validation { .. } | Self::Config { .. } => ErrorKind::Validation,
            Self::ShuttingDown => ErrorKind::Cancelled,
            Self::FabricNotFound { .. }
            | Self::LockLost { .. }
            | Self::AlreadyRunning
            | Self::Internal(_) => ErrorKind::Unknown,
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<fabsync_api::Error> for CoreError {
    fn from(err: fabsync_api::Error) -> Self {
        match err {
            fabsync_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            fabsync_api::Error::TlsConfig(msg) => CoreError::Config {
                message: format!("TLS setup failed: {msg}"),
            },
            other => CoreError::Cluster {
                kind: classify(&other).kind,
                message: other.to_string(),
            },
        }
    }
}
