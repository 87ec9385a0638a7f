//! Replication status monitoring.
//!
//! Data replication itself is performed by an external engine. This module
//! keeps the latest status it reports for each (source, target) pair and
//! raises a lag warning whenever a report exceeds the configured maximum.

use crate::core::{RegionId, Timestamp};
use crate::monitoring::events::{EventBus, HaEvent};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Replication mode between two regions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationMode {
    Synchronous,
    Asynchronous,
    SemiSynchronous,
}

/// Status snapshot reported by the replication engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplicationStatus {
    /// Region data is copied from
    pub source_region: RegionId,
    /// Region data is copied to
    pub target_region: RegionId,
    /// Replication mode
    pub mode: ReplicationMode,
    /// Staleness of the target (ms)
    pub lag_ms: u64,
    /// Bytes replicated so far
    pub bytes_replicated: u64,
    /// Last successful replication
    pub last_replicated_at: Option<Timestamp>,
    /// Engine-reported health
    pub healthy: bool,
    /// Engine-reported error
    pub error: Option<String>,
}

impl ReplicationStatus {
    /// Create a healthy status with the given lag.
    pub fn new(source: &str, target: &str, mode: ReplicationMode, lag_ms: u64) -> Self {
        Self {
            source_region: source.to_string(),
            target_region: target.to_string(),
            mode,
            lag_ms,
            bytes_replicated: 0,
            last_replicated_at: None,
            healthy: true,
            error: None,
        }
    }

    fn key(&self) -> (RegionId, RegionId) {
        (self.source_region.clone(), self.target_region.clone())
    }
}

/// Replication monitoring configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Lag above which a warning is raised (ms)
    pub max_lag_ms: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self { max_lag_ms: 5000 }
    }
}

/// Latest replication status per region pair.
pub struct ReplicationMonitor {
    config: ReplicationConfig,
    statuses: RwLock<HashMap<(RegionId, RegionId), ReplicationStatus>>,
    events: EventBus,
}

impl ReplicationMonitor {
    /// Create a new monitor.
    pub fn new(config: ReplicationConfig, events: EventBus) -> Self {
        Self {
            config,
            statuses: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Record a status report, overwriting the previous one for the pair.
    ///
    /// Returns true and emits one [`HaEvent::ReplicationLagWarning`] when the
    /// reported lag exceeds `max_lag_ms`.
    pub fn update(&self, status: ReplicationStatus) -> bool {
        let lagging = status.lag_ms > self.config.max_lag_ms;
        self.statuses.write().insert(status.key(), status.clone());

        if lagging {
            warn!(
                source = %status.source_region,
                target = %status.target_region,
                lag_ms = status.lag_ms,
                max_lag_ms = self.config.max_lag_ms,
                "replication lag above threshold"
            );
            self.events.emit(HaEvent::ReplicationLagWarning {
                status,
                max_lag_ms: self.config.max_lag_ms,
            });
        }
        lagging
    }

    /// Get the status for a pair.
    pub fn get(&self, source: &str, target: &str) -> Option<ReplicationStatus> {
        self.statuses
            .read()
            .get(&(source.to_string(), target.to_string()))
            .cloned()
    }

    /// All known statuses.
    pub fn statuses(&self) -> Vec<ReplicationStatus> {
        self.statuses.read().values().cloned().collect()
    }

    /// Pairs whose last report exceeded the lag threshold.
    pub fn lagging(&self) -> Vec<ReplicationStatus> {
        self.statuses
            .read()
            .values()
            .filter(|s| s.lag_ms > self.config.max_lag_ms)
            .cloned()
            .collect()
    }

    /// Drop every pair involving a region.
    pub fn remove_region(&self, region_id: &str) -> usize {
        let mut statuses = self.statuses.write();
        let before = statuses.len();
        statuses.retain(|(source, target), _| source != region_id && target != region_id);
        before - statuses.len()
    }
}
