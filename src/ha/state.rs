//! Aggregated HA read model.

use crate::core::{RegionId, Timestamp};
use crate::region::failover::FailoverEvent;
use crate::region::health::HealthCheckResult;
use crate::region::manager::RegionConfig;
use crate::region::sync::ReplicationStatus;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Point-in-time view of the control plane.
///
/// Each field is read from its owning component in turn, without a global
/// lock. A probe cycle or failover that lands between those reads can leave
/// the view briefly inconsistent, e.g. `primary_region` already reflecting a
/// failover that `last_failover` does not show yet. Treat it as a dashboard
/// snapshot, not as input to a decision that needs atomicity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HaState {
    /// Current primary
    pub primary_region: Option<RegionId>,
    /// Regions currently eligible for routing
    pub active_regions: Vec<RegionId>,
    /// Region table
    pub regions: Vec<RegionConfig>,
    /// Latest probe result per region
    pub health: HashMap<RegionId, HealthCheckResult>,
    /// Latest replication report per pair
    pub replication: Vec<ReplicationStatus>,
    /// Most recent failover
    pub last_failover: Option<FailoverEvent>,
    /// Failovers started in the trailing 24 hours
    pub failovers_last_24h: usize,
    /// Failovers awaiting approval
    pub pending_approvals: Vec<FailoverEvent>,
    /// Mean latency of healthy regions (ms)
    pub global_latency_ms: f64,
    /// Percentage of regions not known unhealthy
    pub global_availability: f64,
    /// When the reads started
    pub captured_at: Timestamp,
}

impl HaState {
    /// Whether a primary is assigned.
    pub fn has_primary(&self) -> bool {
        self.primary_region.is_some()
    }

    /// Latest probe result for a region.
    pub fn health_of(&self, region_id: &str) -> Option<&HealthCheckResult> {
        self.health.get(region_id)
    }
}
