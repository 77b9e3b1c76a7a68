//! Configuration for fabsync.
//!
//! TOML file + `FABSYNC_` environment overrides (figment), cluster token
//! resolution (env → keyring → plaintext), and translation into
//! `fabsync_core` types: [`EngineConfig`], [`FabricSettings`] and an
//! [`HttpConnector`] carrying per-fabric tokens.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use fabsync_api::{TlsMode, TransportConfig};
use fabsync_core::{EngineConfig, FabricId, FabricSettings, HttpConnector, RetryPolicy};

/// Keyring service name for stored cluster tokens.
pub const KEYRING_SERVICE: &str = "fabsync";

/// Keyring account of the token shared by fabrics without their own.
pub const DEFAULT_TOKEN_ACCOUNT: &str = "default";

const REDACTED: &str = "********";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("configuration file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Where sync state is kept between runs. Defaults to the platform
    /// data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,

    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub cluster: ClusterSection,

    #[serde(default)]
    pub fabrics: Vec<FabricEntry>,
}

/// Scheduler and reconciler knobs. Durations are whole seconds.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineSection {
    pub tick_interval: u64,
    pub max_concurrent: usize,
    pub run_timeout: u64,
    pub apply_timeout: u64,
    /// Defaults to twice `run_timeout`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_expiry: Option<u64>,
    pub grace_multiplier: u32,
    pub retry_base: u64,
    pub retry_cap: u64,
    pub retry_jitter: f64,
    pub shutdown_timeout: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            tick_interval: engine.tick_interval.as_secs(),
            max_concurrent: engine.max_concurrent,
            run_timeout: engine.run_timeout.as_secs(),
            apply_timeout: engine.apply_timeout.as_secs(),
            lock_expiry: None,
            grace_multiplier: engine.grace_multiplier,
            retry_base: engine.retry.base.as_secs(),
            retry_cap: engine.retry.cap.as_secs(),
            retry_jitter: engine.retry.jitter,
            shutdown_timeout: engine.shutdown_timeout.as_secs(),
        }
    }
}

/// Connection settings shared by every fabric.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterSection {
    /// Bearer token (plaintext: prefer `token_env` or the keyring).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Environment variable holding the bearer token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,

    /// Extra CA certificate (PEM) for the API servers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,

    /// Accept any server certificate.
    pub insecure: bool,

    /// Per-request HTTP timeout in seconds.
    pub timeout: u64,
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            token: None,
            token_env: None,
            ca_cert: None,
            insecure: false,
            timeout: 30,
        }
    }
}

/// One fabric and its inventory.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FabricEntry {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Cluster API URL. Empty leaves the fabric unconfigured.
    #[serde(default)]
    pub endpoint: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Sync interval in seconds.
    #[serde(default = "default_interval")]
    pub interval: u64,

    /// Per-fabric token overrides the `[cluster]` one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,

    #[serde(default)]
    pub switches: Vec<SwitchEntry>,

    #[serde(default)]
    pub connections: Vec<ConnectionEntry>,
}

fn default_namespace() -> String {
    fabsync_core::model::DEFAULT_NAMESPACE.into()
}
fn default_enabled() -> bool {
    true
}
fn default_interval() -> u64 {
    fabsync_core::model::DEFAULT_SYNC_INTERVAL_SECS
}

/// A switch in a fabric's wiring inventory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SwitchEntry {
    pub name: String,

    /// `spine`, `server-leaf`, `border-leaf`, `mixed-leaf` or `virtual-edge`.
    pub role: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asn: Option<u32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// A cabled connection between switches and/or servers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConnectionEntry {
    pub name: String,

    /// `unbundled`, `bundled`, `mclag` or `fabric`.
    pub kind: String,

    #[serde(default)]
    pub links: Vec<LinkEntry>,
}

/// Two ports, each written `device/port`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LinkEntry {
    pub from: String,
    pub to: String,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "fabsync", "fabsync").map_or_else(
        || home_fallback(".config").join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default location of the persisted sync state.
pub fn default_state_path() -> PathBuf {
    ProjectDirs::from("io", "fabsync", "fabsync").map_or_else(
        || home_fallback(".local/share").join("state.json"),
        |dirs| dirs.data_dir().join("state.json"),
    )
}

fn home_fallback(dir: &str) -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(dir);
    p.push("fabsync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load and validate the configuration.
///
/// An explicit `path` must exist; the default path may be absent, in
/// which case only defaults and environment overrides apply.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = match path {
        Some(p) if !p.exists() => {
            return Err(ConfigError::NotFound { path: p.to_owned() });
        }
        Some(p) => p.to_owned(),
        None => config_path(),
    };
    debug!(path = %path.display(), "loading configuration");

    let config: Config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("FABSYNC_").split("__"))
        .extract()?;
    config.validate()?;
    Ok(config)
}

impl Config {
    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let e = &self.engine;
        if e.tick_interval == 0 {
            return Err(invalid("engine.tick_interval", "must be at least 1 second"));
        }
        if e.max_concurrent == 0 {
            return Err(invalid("engine.max_concurrent", "must be at least 1"));
        }
        if e.run_timeout == 0 || e.apply_timeout == 0 {
            return Err(invalid("engine timeouts", "must be at least 1 second"));
        }
        if e.lock_expiry.is_some_and(|expiry| expiry < e.run_timeout) {
            return Err(invalid(
                "engine.lock_expiry",
                "must not be shorter than engine.run_timeout",
            ));
        }
        if !(0.0..=1.0).contains(&e.retry_jitter) {
            return Err(invalid("engine.retry_jitter", "must be between 0.0 and 1.0"));
        }
        if e.retry_base == 0 || e.retry_cap < e.retry_base {
            return Err(invalid(
                "engine.retry_base",
                "must be at least 1 second and not above engine.retry_cap",
            ));
        }

        let mut seen = HashSet::new();
        for fabric in &self.fabrics {
            if fabric.id.trim().is_empty() {
                return Err(invalid("fabrics.id", "must not be empty"));
            }
            if !seen.insert(fabric.id.as_str()) {
                return Err(invalid(
                    "fabrics.id",
                    format!("duplicate fabric '{}'", fabric.id),
                ));
            }
            if fabric.interval == 0 {
                return Err(invalid(
                    format!("fabrics.{}.interval", fabric.id),
                    "must be at least 1 second",
                ));
            }
        }
        Ok(())
    }

    pub fn fabric(&self, id: &str) -> Option<&FabricEntry> {
        self.fabrics.iter().find(|f| f.id == id)
    }

    /// Engine knobs as core types.
    pub fn engine_config(&self) -> EngineConfig {
        let e = &self.engine;
        let run_timeout = Duration::from_secs(e.run_timeout);
        EngineConfig {
            tick_interval: Duration::from_secs(e.tick_interval),
            max_concurrent: e.max_concurrent,
            run_timeout,
            apply_timeout: Duration::from_secs(e.apply_timeout),
            lock_expiry: e
                .lock_expiry
                .map_or(run_timeout * 2, Duration::from_secs),
            grace_multiplier: e.grace_multiplier,
            retry: RetryPolicy {
                base: Duration::from_secs(e.retry_base),
                cap: Duration::from_secs(e.retry_cap),
                jitter: e.retry_jitter,
            },
            shutdown_timeout: Duration::from_secs(e.shutdown_timeout),
        }
    }

    pub fn fabric_settings(&self) -> Vec<FabricSettings> {
        self.fabrics.iter().map(FabricEntry::settings).collect()
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_file.clone().unwrap_or_else(default_state_path)
    }

    /// Shared HTTP transport settings.
    pub fn transport(&self) -> TransportConfig {
        let tls = if self.cluster.insecure {
            TlsMode::DangerAcceptInvalid
        } else if let Some(ref ca) = self.cluster.ca_cert {
            TlsMode::CustomCa(ca.clone())
        } else {
            TlsMode::System
        };
        TransportConfig {
            tls,
            timeout: Duration::from_secs(self.cluster.timeout),
        }
    }

    /// Production connector with every resolvable token attached.
    pub fn connector(&self) -> HttpConnector {
        let mut connector = HttpConnector::new(self.transport());
        if let Some(token) = resolve_token(
            self.cluster.token_env.as_deref(),
            DEFAULT_TOKEN_ACCOUNT,
            self.cluster.token.as_deref(),
        ) {
            connector = connector.with_default_token(token);
        }
        for fabric in &self.fabrics {
            if let Some(token) = resolve_token(
                fabric.token_env.as_deref(),
                &fabric.id,
                fabric.token.as_deref(),
            ) {
                connector = connector.with_token(FabricId::from(fabric.id.as_str()), token);
            }
        }
        connector
    }

    /// A copy safe to print: plaintext tokens masked.
    pub fn redacted(&self) -> Self {
        let mask = |t: &Option<String>| t.as_ref().map(|_| REDACTED.to_owned());
        let mut copy = self.clone();
        copy.cluster.token = mask(&self.cluster.token);
        for fabric in &mut copy.fabrics {
            fabric.token = mask(&fabric.token);
        }
        copy
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

impl FabricEntry {
    pub fn settings(&self) -> FabricSettings {
        FabricSettings::new(self.id.as_str())
            .name(self.name.clone().unwrap_or_else(|| self.id.clone()))
            .endpoint(self.endpoint.clone())
            .namespace(self.namespace.clone())
            .enabled(self.enabled)
            .interval_secs(self.interval)
    }
}

// ── Credential resolution ───────────────────────────────────────────

/// Keyring account for a fabric's token (`<fabric>/token`).
pub fn keyring_account(fabric: &str) -> String {
    format!("{fabric}/token")
}

/// Resolve a bearer token: `token_env` variable, then the system keyring
/// (`fabsync` / `<account>/token`), then the plaintext value.
pub fn resolve_token(
    token_env: Option<&str>,
    account: &str,
    plaintext: Option<&str>,
) -> Option<SecretString> {
    resolve_token_with(
        token_env,
        account,
        plaintext,
        |name| std::env::var(name).ok(),
        |account| {
            keyring::Entry::new(KEYRING_SERVICE, &keyring_account(account))
                .and_then(|entry| entry.get_password())
                .ok()
        },
    )
}

fn resolve_token_with(
    token_env: Option<&str>,
    account: &str,
    plaintext: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
    keyring: impl Fn(&str) -> Option<String>,
) -> Option<SecretString> {
    // 1. Named environment variable
    if let Some(value) = token_env.and_then(&env) {
        debug!(account, "token from environment");
        return Some(SecretString::from(value));
    }

    // 2. System keyring
    if let Some(value) = keyring(account) {
        debug!(account, "token from keyring");
        return Some(SecretString::from(value));
    }

    // 3. Plaintext in config
    plaintext.map(|t| SecretString::from(t.to_owned()))
}

/// Store a token in the system keyring under `<account>/token`.
pub fn store_token(account: &str, token: &str) -> Result<(), ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, &keyring_account(account))?.set_password(token)?;
    Ok(())
}
