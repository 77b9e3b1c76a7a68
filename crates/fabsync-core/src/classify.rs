// ── Error classification ──
//
// Maps raw cluster-API failures onto a small taxonomy, each kind carrying
// the action the scheduler should take.

use std::time::Duration;

use fabsync_api::Error as ApiError;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Maximum apply attempts for one resource when the server reports an
/// optimistic-concurrency conflict.
pub const MAX_CONFLICT_ATTEMPTS: u32 = 3;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    TransientNetwork,
    Auth,
    Forbidden,
    NotFound,
    Conflict,
    RateLimited,
    ServerError,
    Validation,
    Unknown,
    /// A previous run's lock expired and was reclaimed.
    StaleLockRecovered,
    /// Another run already held the lock. An expected outcome, not a fault.
    SkippedConcurrent,
    /// The run deadline or a per-resource deadline elapsed.
    Timeout,
    /// Shutdown interrupted the run.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecommendedAction {
    RetryBackoff,
    /// Re-fetch and retry within the same run, bounded by
    /// [`MAX_CONFLICT_ATTEMPTS`].
    RetryImmediate,
    /// Needs an operator. Never retried automatically.
    SurfaceError,
}

impl ErrorKind {
    pub fn action(self) -> RecommendedAction {
        match self {
            Self::Auth | Self::Forbidden | Self::Validation => RecommendedAction::SurfaceError,
            Self::Conflict | Self::StaleLockRecovered => RecommendedAction::RetryImmediate,
            Self::TransientNetwork
            | Self::NotFound
            | Self::RateLimited
            | Self::ServerError
            | Self::Unknown
            | Self::SkippedConcurrent
            | Self::Timeout
            | Self::Cancelled => RecommendedAction::RetryBackoff,
        }
    }

    /// `true` for kinds that describe the fabric's configuration rather
    /// than a remote hiccup.
    pub fn needs_operator(self) -> bool {
        self.action() == RecommendedAction::SurfaceError
    }
}

/// Result of classifying one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorClass {
    pub kind: ErrorKind,
    pub action: RecommendedAction,
    /// Server backoff hint, when one was sent.
    pub retry_after: Option<Duration>,
}

impl ErrorClass {
    pub fn of(kind: ErrorKind) -> Self {
        Self {
            kind,
            action: kind.action(),
            retry_after: None,
        }
    }
}

/// Classify a cluster-API error.
pub fn classify(err: &ApiError) -> ErrorClass {
    let kind = match err {
        ApiError::Unauthorized { .. } => ErrorKind::Auth,
        ApiError::Forbidden { .. } => ErrorKind::Forbidden,
        ApiError::NotFound { .. } => ErrorKind::NotFound,
        ApiError::Conflict { .. } => ErrorKind::Conflict,
        ApiError::RateLimited { .. } => ErrorKind::RateLimited,
        ApiError::Server { .. } => ErrorKind::ServerError,
        ApiError::Invalid { .. } | ApiError::InvalidUrl(_) | ApiError::TlsConfig(_) => {
            ErrorKind::Validation
        }
        ApiError::Connection { .. } | ApiError::Timeout { .. } | ApiError::Tls(_) => {
            ErrorKind::TransientNetwork
        }
        ApiError::Transport(e) => classify_transport(e),
        ApiError::Api { status, .. } => classify_status(*status),
        ApiError::Deserialization { .. } => ErrorKind::Unknown,
    };
    ErrorClass {
        kind,
        action: kind.action(),
        retry_after: err.retry_after_secs().map(Duration::from_secs),
    }
}

fn classify_transport(e: &reqwest::Error) -> ErrorKind {
    if let Some(status) = e.status() {
        return classify_status(status.as_u16());
    }
    if e.is_timeout() || e.is_connect() || e.is_request() {
        ErrorKind::TransientNetwork
    } else if e.is_builder() {
        ErrorKind::Validation
    } else {
        ErrorKind::Unknown
    }
}

fn classify_status(status: u16) -> ErrorKind {
    match status {
        401 => ErrorKind::Auth,
        403 => ErrorKind::Forbidden,
        404 => ErrorKind::NotFound,
        409 => ErrorKind::Conflict,
        429 => ErrorKind::RateLimited,
        400 | 422 => ErrorKind::Validation,
        500..=599 => ErrorKind::ServerError,
        _ => ErrorKind::Unknown,
    }
}
