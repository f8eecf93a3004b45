//! Best-chain state snapshots and download-status derivation.
//!
//! Pure data and derivation logic: this module only computes, the
//! orchestrator broadcasts.

use crate::engine::ChainEngine;
use crate::sync::resource_gate::ResourceState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::ops::BitOr;
use tracing::warn;

/// Bitmask of independent conditions impairing block download.
///
/// An empty mask means healthy sync conditions. The mask is recomputed from
/// the current [`ResourceState`] on every evaluation, never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DownloadStatus(u32);

impl DownloadStatus {
    pub const OK: DownloadStatus = DownloadStatus(0);
    pub const STORAGE_PROBLEM: DownloadStatus = DownloadStatus(1);
    pub const POWER_PROBLEM: DownloadStatus = DownloadStatus(2);
    pub const NETWORK_PROBLEM: DownloadStatus = DownloadStatus(4);

    /// Derive the mask from current resource conditions.
    pub fn from_resources(resources: &ResourceState) -> Self {
        let mut status = Self::OK;
        if !resources.has_storage {
            status = status | Self::STORAGE_PROBLEM;
        }
        if !resources.has_power {
            status = status | Self::POWER_PROBLEM;
        }
        if !resources.has_connectivity {
            status = status | Self::NETWORK_PROBLEM;
        }
        status
    }

    pub fn is_ok(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, flag: DownloadStatus) -> bool {
        self.0 & flag.0 == flag.0
    }

    /// Raw bitmask value as carried in broadcasts.
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for DownloadStatus {
    type Output = DownloadStatus;

    fn bitor(self, rhs: DownloadStatus) -> DownloadStatus {
        DownloadStatus(self.0 | rhs.0)
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return f.write_str("ok");
        }
        let mut parts = Vec::new();
        if self.contains(Self::STORAGE_PROBLEM) {
            parts.push("storage");
        }
        if self.contains(Self::POWER_PROBLEM) {
            parts.push("power");
        }
        if self.contains(Self::NETWORK_PROBLEM) {
            parts.push("network");
        }
        f.write_str(&parts.join("|"))
    }
}

/// Consolidated chain position published to consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainStateSnapshot {
    pub best_chain_date: DateTime<Utc>,
    pub best_chain_height: u64,
    pub download: DownloadStatus,
}

impl ChainStateSnapshot {
    /// Observe the engine's current chain position.
    ///
    /// Returns `None` while the engine reports no chain head, which
    /// suppresses all chain-state broadcasts.
    pub fn observe(engine: &dyn ChainEngine, download: DownloadStatus) -> Option<Self> {
        let head = engine.chain_head()?;

        let Some(best_chain_date) = DateTime::from_timestamp(head.timestamp_seconds as i64, 0)
        else {
            warn!(
                timestamp = head.timestamp_seconds,
                "chain head carries an unrepresentable timestamp"
            );
            return None;
        };

        Some(Self {
            best_chain_date,
            best_chain_height: engine.best_chain_height(),
            download,
        })
    }
}
