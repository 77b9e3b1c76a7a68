//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` / `ConfigError` into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use fabsync_config::ConfigError;
use fabsync_core::{CoreError, ErrorKind};

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const PERMISSION: i32 = 5;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Sync outcomes ────────────────────────────────────────────────

    #[error("Sync of fabric '{fabric}' failed ({kind}): {message}")]
    #[diagnostic(code(fabsync::sync_failed))]
    SyncFailed {
        fabric: String,
        kind: ErrorKind,
        message: String,
        #[help]
        advice: String,
    },

    #[error("Sync of fabric '{fabric}' was skipped: another sync is in flight")]
    #[diagnostic(
        code(fabsync::sync_in_flight),
        help("Wait for the running sync to finish, or check `fabsync status`.")
    )]
    SyncInFlight { fabric: String },

    #[error("State file {path} is locked by another fabsync process")]
    #[diagnostic(
        code(fabsync::state_locked),
        help("Only one `fabsync run` or `fabsync sync` may use a state file at a time.")
    )]
    StateLocked { path: String },

    #[error("Cluster API error ({kind}): {message}")]
    #[diagnostic(code(fabsync::cluster))]
    Cluster {
        kind: ErrorKind,
        message: String,
        #[help]
        advice: String,
    },

    // ── Resources ────────────────────────────────────────────────────

    #[error("Fabric '{id}' not found")]
    #[diagnostic(
        code(fabsync::not_found),
        help("Run: fabsync status to see configured fabrics")
    )]
    FabricNotFound { id: String },

    // ── Validation / configuration ───────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(fabsync::validation))]
    Validation { field: String, reason: String },

    #[error(transparent)]
    #[diagnostic(
        code(fabsync::config),
        help("Check the file with: fabsync config validate")
    )]
    Config(#[from] ConfigError),

    // ── Engine ───────────────────────────────────────────────────────

    #[error("{message}")]
    #[diagnostic(code(fabsync::engine))]
    Engine { message: String },

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    #[diagnostic(code(fabsync::json))]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    #[diagnostic(code(fabsync::yaml))]
    Yaml(#[from] serde_yaml::Error),
}

fn kind_help(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Auth => {
            "The cluster rejected the token. Store a new one with: fabsync config set-token"
        }
        ErrorKind::Forbidden => {
            "The token is valid but lacks RBAC permissions for the wiring resources."
        }
        ErrorKind::Validation => "Fix the fabric's inventory or endpoint in the configuration.",
        ErrorKind::TransientNetwork | ErrorKind::Timeout => {
            "Check that the cluster endpoint is reachable. Scheduled runs retry with backoff."
        }
        ErrorKind::RateLimited | ErrorKind::ServerError => {
            "The cluster is overloaded or unhealthy. Scheduled runs retry with backoff."
        }
        _ => "See `fabsync status` for the recorded error.",
    }
}

fn kind_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Auth => exit_code::AUTH,
        ErrorKind::Forbidden => exit_code::PERMISSION,
        ErrorKind::NotFound => exit_code::NOT_FOUND,
        ErrorKind::Conflict | ErrorKind::SkippedConcurrent => exit_code::CONFLICT,
        ErrorKind::TransientNetwork => exit_code::CONNECTION,
        ErrorKind::Timeout => exit_code::TIMEOUT,
        ErrorKind::Validation => exit_code::USAGE,
        _ => exit_code::GENERAL,
    }
}

impl CliError {
    pub fn sync_failed(fabric: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::SyncFailed {
            fabric: fabric.into(),
            kind,
            message: message.into(),
            advice: kind_help(kind).into(),
        }
    }

    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::SyncFailed { kind, .. } | Self::Cluster { kind, .. } => kind_exit_code(*kind),
            Self::SyncInFlight { .. } | Self::StateLocked { .. } => exit_code::CONFLICT,
            Self::FabricNotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } | Self::Config(_) => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::FabricNotFound { id } => CliError::FabricNotFound { id: id.to_string() },
            CoreError::Validation { message } => CliError::Validation {
                field: "inventory".into(),
                reason: message,
            },
            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::Cluster { kind, message } => CliError::Cluster {
                kind,
                message,
                advice: kind_help(kind).into(),
            },
            other @ (CoreError::LockLost { .. }
            | CoreError::AlreadyRunning
            | CoreError::ShuttingDown
            | CoreError::Internal(_)) => CliError::Engine {
                message: other.to_string(),
            },
        }
    }
}
