// ── Run results ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::classify::ErrorKind;
use crate::model::{FabricId, LastError, ResourceKey};

/// Terminal outcome of one `reconcile` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SyncOutcome {
    /// Every desired resource is in place.
    Success,
    /// Some resources applied, some failed.
    Partial,
    /// Nothing applied, or a fabric-level step failed.
    Failed,
    /// Another run held the lock. Nothing was touched.
    SkippedConcurrent,
}

/// What happened to one desired resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResourceOutcome {
    Created,
    Updated,
    Unchanged,
    Failed { kind: ErrorKind, message: String },
    /// Not attempted: the run was cancelled or hit its deadline first.
    Aborted,
}

impl ResourceOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::Aborted)
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Created | Self::Updated)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceResult {
    pub resource: ResourceKey,
    #[serde(flatten)]
    pub outcome: ResourceOutcome,
    /// Apply calls made (conflict retries included).
    pub attempts: u32,
}

/// Summary of one run, broadcast on the engine's event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub fabric_id: FabricId,
    pub outcome: SyncOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Remote objects carrying this fabric's label that are no longer
    /// desired. Reported, never deleted.
    pub orphaned: Vec<ResourceKey>,
    pub resources: Vec<ResourceResult>,
    /// The error written to the fabric, if any.
    pub error: Option<LastError>,
}

impl SyncResult {
    pub(crate) fn skipped(fabric_id: FabricId, at: DateTime<Utc>) -> Self {
        Self {
            fabric_id,
            outcome: SyncOutcome::SkippedConcurrent,
            started_at: at,
            finished_at: at,
            created: 0,
            updated: 0,
            unchanged: 0,
            orphaned: Vec::new(),
            resources: Vec::new(),
            error: None,
        }
    }

    pub fn failed(&self) -> usize {
        self.resources.iter().filter(|r| r.outcome.is_failure()).count()
    }
}

// ── SyncAttempt ─────────────────────────────────────────────────────

/// Why a run stopped before visiting every resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Interrupt {
    Cancelled,
    DeadlineExceeded,
}

impl Interrupt {
    pub fn kind(self) -> ErrorKind {
        match self {
            Self::Cancelled => ErrorKind::Cancelled,
            Self::DeadlineExceeded => ErrorKind::Timeout,
        }
    }
}

/// Per-run scratch state. Owned by exactly one run and folded into a
/// `SyncResult` at the end.
#[derive(Debug)]
pub(crate) struct SyncAttempt {
    pub fabric_id: FabricId,
    pub revision: u64,
    pub started_at: DateTime<Utc>,
    pub results: Vec<ResourceResult>,
    pub orphaned: Vec<ResourceKey>,
    pub interrupted: Option<Interrupt>,
    /// Set when a step before applying failed (validation, connect, list).
    pub fabric_error: Option<(ErrorKind, String, Option<u64>)>,
}

impl SyncAttempt {
    pub fn new(fabric_id: FabricId, revision: u64, started_at: DateTime<Utc>) -> Self {
        Self {
            fabric_id,
            revision,
            started_at,
            results: Vec::new(),
            orphaned: Vec::new(),
            interrupted: None,
            fabric_error: None,
        }
    }

    pub fn push(&mut self, resource: ResourceKey, outcome: ResourceOutcome, attempts: u32) {
        self.results.push(ResourceResult {
            resource,
            outcome,
            attempts,
        });
    }

    pub fn fail_fabric(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.fabric_error = Some((kind, message.into(), None));
    }

    pub fn outcome(&self) -> SyncOutcome {
        if self.fabric_error.is_some() {
            return SyncOutcome::Failed;
        }
        let failed = self.results.iter().any(|r| r.outcome.is_failure());
        let applied = self.results.iter().any(|r| r.outcome.is_applied());
        match (failed, applied) {
            (false, _) => SyncOutcome::Success,
            (true, true) => SyncOutcome::Partial,
            (true, false) => SyncOutcome::Failed,
        }
    }

    /// The error to record for this run, stamped at `at`.
    pub fn summary_error(&self, at: DateTime<Utc>) -> Option<LastError> {
        let error = |kind, message, resource, retry_after_secs| LastError {
            kind,
            message,
            at,
            resource,
            retry_after_secs,
            config_revision: self.revision,
        };

        if let Some((kind, message, retry_after)) = &self.fabric_error {
            return Some(error(*kind, message.clone(), None, *retry_after));
        }

        let failures: Vec<&ResourceResult> = self
            .results
            .iter()
            .filter(|r| r.outcome.is_failure())
            .collect();
        let first = failures.first()?;

        let details: Vec<String> = failures
            .iter()
            .map(|r| match &r.outcome {
                ResourceOutcome::Failed { kind, message } => {
                    format!("{} ({kind}: {message})", r.resource)
                }
                _ => format!("{} (aborted)", r.resource),
            })
            .collect();
        let message = format!(
            "{} of {} resources failed: {}",
            failures.len(),
            self.results.len(),
            details.join("; ")
        );

        // An interruption decides the kind; otherwise prefer a failure the
        // operator has to fix over a retryable one.
        let kind = self.interrupted.map(Interrupt::kind).unwrap_or_else(|| {
            let kind_of = |r: &&ResourceResult| match &r.outcome {
                ResourceOutcome::Failed { kind, .. } => Some(*kind),
                _ => None,
            };
            failures
                .iter()
                .filter_map(kind_of)
                .find(|k| k.needs_operator())
                .or_else(|| kind_of(first))
                .unwrap_or(ErrorKind::Unknown)
        });
        let resource = failures
            .iter()
            .find(|r| matches!(&r.outcome, ResourceOutcome::Failed { kind: k, .. } if *k == kind))
            .unwrap_or(first)
            .resource
            .to_string();

        Some(error(kind, message, Some(resource), None))
    }

    pub fn finish(self, finished_at: DateTime<Utc>, error: Option<LastError>) -> SyncResult {
        let count = |want: &ResourceOutcome| self.results.iter().filter(|r| &r.outcome == want).count();
        SyncResult {
            outcome: self.outcome(),
            created: count(&ResourceOutcome::Created),
            updated: count(&ResourceOutcome::Updated),
            unchanged: count(&ResourceOutcome::Unchanged),
            fabric_id: self.fabric_id,
            started_at: self.started_at,
            finished_at,
            orphaned: self.orphaned,
            resources: self.results,
            error,
        }
    }
}
