// ── Calculated sync status ──
//
// The one place a fabric's status is decided. Every caller (scheduler,
// CLI, event consumers) goes through `StatusCalculator::calculate`; the
// stored `sync_status` field is an audit trail and never consulted here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::model::FabricConfig;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CalculatedSyncStatus {
    NotConfigured,
    Disabled,
    NeverSynced,
    Syncing,
    InSync,
    OutOfSync,
    Error,
}

/// Pure status derivation.
///
/// Decision order, first match wins:
///
/// 1. endpoint empty or whitespace: `not_configured`
/// 2. sync disabled: `disabled`
/// 3. a current error newer than the last sync: `error`
/// 4. never synced: `never_synced`
/// 5. a run holds the lock: `syncing`
/// 6. `now - last_sync_at <= interval * grace_multiplier`: `in_sync`
/// 7. otherwise `out_of_sync`
///
/// An error is current when it was recorded against the fabric's present
/// configuration revision (see [`crate::model::SyncState::current_error`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCalculator {
    grace_multiplier: u32,
}

impl Default for StatusCalculator {
    fn default() -> Self {
        Self { grace_multiplier: 1 }
    }
}

impl StatusCalculator {
    /// A multiplier of 0 is treated as 1.
    pub fn new(grace_multiplier: u32) -> Self {
        Self {
            grace_multiplier: grace_multiplier.max(1),
        }
    }

    pub fn grace_multiplier(&self) -> u32 {
        self.grace_multiplier
    }

    pub fn calculate(
        &self,
        cfg: &FabricConfig,
        now: DateTime<Utc>,
        in_flight: bool,
    ) -> CalculatedSyncStatus {
        if !cfg.is_configured() {
            return CalculatedSyncStatus::NotConfigured;
        }
        if !cfg.sync_enabled {
            return CalculatedSyncStatus::Disabled;
        }
        if cfg.state.current_error(cfg.revision).is_some() {
            return CalculatedSyncStatus::Error;
        }
        let Some(last_sync) = cfg.state.last_sync_at else {
            return CalculatedSyncStatus::NeverSynced;
        };
        if in_flight {
            return CalculatedSyncStatus::Syncing;
        }

        let window = cfg
            .sync_interval()
            .checked_mul(i32::try_from(self.grace_multiplier).unwrap_or(i32::MAX))
            .unwrap_or(chrono::TimeDelta::MAX);
        if now.signed_duration_since(last_sync) <= window {
            CalculatedSyncStatus::InSync
        } else {
            CalculatedSyncStatus::OutOfSync
        }
    }
}
