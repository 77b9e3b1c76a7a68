use thiserror::Error;

/// Top-level error type for the `fabsync-api` crate.
///
/// Every HTTP status the cluster can answer with gets its own variant so
/// that callers (the reconciler's error classifier in particular) can
/// branch on the failure without re-parsing messages.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// HTTP 401: the bearer token was missing, expired, or rejected.
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// HTTP 403: authenticated, but RBAC denies the operation.
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    // ── Resource state ──────────────────────────────────────────────
    /// HTTP 404 on a resource or collection.
    #[error("Not found: {message}")]
    NotFound { message: String },

    /// HTTP 409: stale `resourceVersion` or the object already exists.
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// HTTP 422 / 400: the server rejected the object as invalid.
    #[error("Invalid resource (HTTP {status}): {message}")]
    Invalid { status: u16, message: String },

    // ── Throttling & server ─────────────────────────────────────────
    /// HTTP 429, with the `Retry-After` hint when the server sent one.
    #[error("Rate limited{}", retry_hint(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    /// HTTP 5xx.
    #[error("Server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// Any other non-success status.
    #[error("API error (HTTP {status}): {message}")]
    Api {
        status: u16,
        message: String,
        reason: Option<String>,
    },

    // ── Transport ───────────────────────────────────────────────────
    /// Connection refused, DNS failure, connection reset.
    #[error("Connection failed: {message}")]
    Connection { message: String },

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS handshake or certificate verification failed on a request.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The TLS setup itself is unusable: unreadable or invalid CA file.
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    /// Any other HTTP transport error.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

#[allow(clippy::ref_option, clippy::trivially_copy_pass_by_ref)]
fn retry_hint(retry_after_secs: &Option<u64>) -> String {
    retry_after_secs.map_or_else(String::new, |s| format!(" -- retry after {s}s"))
}

impl Error {
    /// The HTTP status this error was built from, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Unauthorized { .. } => Some(401),
            Self::Forbidden { .. } => Some(403),
            Self::NotFound { .. } => Some(404),
            Self::Conflict { .. } => Some(409),
            Self::RateLimited { .. } => Some(429),
            Self::Invalid { status, .. } | Self::Server { status, .. } | Self::Api { status, .. } => {
                Some(*status)
            }
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Returns `true` if this error indicates the credentials are bad.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Unauthorized { .. } | Self::Forbidden { .. })
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Connection { .. }
            | Self::Timeout { .. }
            | Self::Tls(_)
            | Self::RateLimited { .. }
            | Self::Server { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Server-provided backoff hint, if any.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }
}
