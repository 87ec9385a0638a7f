//! Region table for multi-region deployments.
//!
//! Holds the authoritative region configuration and enforces the
//! single-primary rule on every mutation.

use crate::core::{Error, RegionId, Result};
use serde::{Deserialize, Serialize};

/// Default routing weight for a region.
pub const DEFAULT_WEIGHT: u32 = 100;

/// Maximum routing weight for a region.
pub const MAX_WEIGHT: u32 = 100;

/// Region status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionStatus {
    /// Serving traffic
    Active,
    /// Healthy, eligible as a failover target
    Standby,
    /// Failing health checks
    Degraded,
    /// Unreachable or taken out of service
    Offline,
    /// Finishing in-flight work, no new traffic
    Draining,
}

impl RegionStatus {
    /// Whether new traffic may be routed to a region in this status.
    pub fn is_routable(&self) -> bool {
        !matches!(self, RegionStatus::Offline | RegionStatus::Draining)
    }

    /// Whether this status may hold the primary role.
    pub fn can_be_primary(&self) -> bool {
        matches!(self, RegionStatus::Active | RegionStatus::Standby)
    }
}

impl std::fmt::Display for RegionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegionStatus::Active => write!(f, "active"),
            RegionStatus::Standby => write!(f, "standby"),
            RegionStatus::Degraded => write!(f, "degraded"),
            RegionStatus::Offline => write!(f, "offline"),
            RegionStatus::Draining => write!(f, "draining"),
        }
    }
}

fn default_weight() -> u32 {
    DEFAULT_WEIGHT
}

fn default_status() -> RegionStatus {
    RegionStatus::Standby
}

/// Configuration of a geographic region.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Region ID
    pub id: RegionId,
    /// Base URL traffic is routed to
    pub endpoint: String,
    /// Dedicated health check URL, overrides `endpoint + path`
    #[serde(default)]
    pub health_endpoint: Option<String>,
    /// Current status
    #[serde(default = "default_status")]
    pub status: RegionStatus,
    /// Is primary region
    #[serde(default)]
    pub is_primary: bool,
    /// Routing weight (0-100)
    #[serde(default = "default_weight")]
    pub weight: u32,
}

impl RegionConfig {
    /// Create a new standby region.
    pub fn new(id: &str, endpoint: &str) -> Self {
        Self {
            id: id.to_string(),
            endpoint: endpoint.to_string(),
            health_endpoint: None,
            status: RegionStatus::Standby,
            is_primary: false,
            weight: DEFAULT_WEIGHT,
        }
    }

    /// Set as primary.
    pub fn as_primary(mut self) -> Self {
        self.is_primary = true;
        self.status = RegionStatus::Active;
        self
    }

    /// Set routing weight, clamped to 0-100.
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight.min(MAX_WEIGHT);
        self
    }

    /// Set a dedicated health check URL.
    pub fn with_health_endpoint(mut self, url: &str) -> Self {
        self.health_endpoint = Some(url.to_string());
        self
    }

    /// Set status.
    pub fn with_status(mut self, status: RegionStatus) -> Self {
        self.status = status;
        self
    }

    /// Check if region can receive new traffic.
    pub fn is_routable(&self) -> bool {
        self.status.is_routable()
    }

    /// URL probed by the health checker.
    pub fn health_url(&self, path: &str) -> String {
        match &self.health_endpoint {
            Some(url) => url.clone(),
            None => format!("{}{}", self.endpoint.trim_end_matches('/'), path),
        }
    }

    /// Validate this region's settings.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::config("region id must not be empty"));
        }
        if self.endpoint.trim().is_empty() {
            return Err(Error::config(format!("region {} has no endpoint", self.id)));
        }
        if self.weight > MAX_WEIGHT {
            return Err(Error::config(format!(
                "region {} weight {} exceeds {}",
                self.id, self.weight, MAX_WEIGHT
            )));
        }
        Ok(())
    }
}

/// A status or primary flag change applied to the table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusChange {
    /// Region that changed
    pub region: RegionId,
    /// Previous status
    pub from: RegionStatus,
    /// New status
    pub to: RegionStatus,
    /// Primary flag after the change
    pub is_primary: bool,
}

/// Ordered region table.
///
/// Insertion order is preserved so that round-robin and tie-breaks are
/// deterministic. At most one region carries `is_primary` after any
/// mutation made through this type.
#[derive(Clone, Debug, Default)]
pub struct RegionRegistry {
    regions: Vec<RegionConfig>,
}

impl RegionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a region.
    ///
    /// A region may only be added as primary while no primary exists; it is
    /// then marked active. Moving the primary role is a failover.
    pub fn add_region(&mut self, mut region: RegionConfig) -> Result<()> {
        region.validate()?;
        if self.contains(&region.id) {
            return Err(Error::RegionExists(region.id));
        }
        if region.is_primary {
            if let Some(current) = self.primary() {
                return Err(Error::config(format!(
                    "cannot add {} as primary while {} is primary",
                    region.id, current.id
                )));
            }
            if region.status == RegionStatus::Standby {
                region.status = RegionStatus::Active;
            }
        }

        self.regions.push(region);
        Ok(())
    }

    /// Remove a region, re-electing a primary if it was the primary.
    ///
    /// Returns the removed config and any changes made by re-election.
    pub fn remove_region(&mut self, region_id: &str) -> Result<(RegionConfig, Vec<StatusChange>)> {
        let idx = self
            .position(region_id)
            .ok_or_else(|| Error::RegionNotFound(region_id.to_string()))?;
        let removed = self.regions.remove(idx);

        let changes = if removed.is_primary {
            self.elect_primary().into_iter().collect()
        } else {
            Vec::new()
        };
        Ok((removed, changes))
    }

    /// Get a region.
    pub fn get(&self, region_id: &str) -> Option<&RegionConfig> {
        self.regions.iter().find(|r| r.id == region_id)
    }

    /// Check whether a region is registered.
    pub fn contains(&self, region_id: &str) -> bool {
        self.position(region_id).is_some()
    }

    /// Get the primary region.
    pub fn primary(&self) -> Option<&RegionConfig> {
        self.regions.iter().find(|r| r.is_primary)
    }

    /// List all regions in insertion order.
    pub fn list(&self) -> &[RegionConfig] {
        &self.regions
    }

    /// Get region count.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Update region status.
    pub fn set_status(&mut self, region_id: &str, status: RegionStatus) -> Result<Option<StatusChange>> {
        let region = self
            .get_mut(region_id)
            .ok_or_else(|| Error::RegionNotFound(region_id.to_string()))?;
        if region.status == status {
            return Ok(None);
        }
        let from = region.status;
        region.status = status;
        Ok(Some(StatusChange {
            region: region.id.clone(),
            from,
            to: status,
            is_primary: region.is_primary,
        }))
    }

    /// Make `region_id` the only primary and mark it active.
    pub fn set_primary(&mut self, region_id: &str) -> Result<Vec<StatusChange>> {
        if !self.contains(region_id) {
            return Err(Error::RegionNotFound(region_id.to_string()));
        }

        let mut changes: Vec<StatusChange> = self
            .clear_primary()
            .into_iter()
            .filter(|c| c.region != region_id)
            .collect();

        if let Some(region) = self.get_mut(region_id) {
            let from = region.status;
            region.is_primary = true;
            region.status = RegionStatus::Active;
            changes.push(StatusChange {
                region: region.id.clone(),
                from,
                to: RegionStatus::Active,
                is_primary: true,
            });
        }
        Ok(changes)
    }

    /// Overwrite status and primary flag for a region, used by rollback.
    pub(crate) fn restore(&mut self, region_id: &str, status: RegionStatus, is_primary: bool) {
        if is_primary {
            for other in self.regions.iter_mut().filter(|r| r.id != region_id) {
                other.is_primary = false;
            }
        }
        if let Some(region) = self.get_mut(region_id) {
            region.status = status;
            region.is_primary = is_primary;
        }
    }

    /// Elect the highest-weight active/standby region as primary.
    ///
    /// Ties are broken by insertion order. Returns `None` and leaves the
    /// table without a primary when no region is eligible.
    pub fn elect_primary(&mut self) -> Option<StatusChange> {
        let candidate = self
            .regions
            .iter()
            .filter(|r| r.status.can_be_primary())
            .fold(None::<&RegionConfig>, |best, r| match best {
                Some(b) if b.weight >= r.weight => Some(b),
                _ => Some(r),
            })
            .map(|r| r.id.clone())?;

        let mut changes = self.set_primary(&candidate).ok()?;
        changes.pop()
    }

    fn clear_primary(&mut self) -> Vec<StatusChange> {
        let mut changes = Vec::new();
        for region in self.regions.iter_mut().filter(|r| r.is_primary) {
            let from = region.status;
            region.is_primary = false;
            if region.status == RegionStatus::Active {
                region.status = RegionStatus::Standby;
            }
            changes.push(StatusChange {
                region: region.id.clone(),
                from,
                to: region.status,
                is_primary: false,
            });
        }
        changes
    }

    fn get_mut(&mut self, region_id: &str) -> Option<&mut RegionConfig> {
        self.regions.iter_mut().find(|r| r.id == region_id)
    }

    fn position(&self, region_id: &str) -> Option<usize> {
        self.regions.iter().position(|r| r.id == region_id)
    }
}
