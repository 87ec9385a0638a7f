//! HA manager configuration.

use crate::core::{Error, Result};
use crate::monitoring::alerts::MonitoringConfig;
use crate::monitoring::events::DEFAULT_EVENT_CAPACITY;
use crate::region::balancer::LoadBalancerConfig;
use crate::region::failover::FailoverConfig;
use crate::region::health::HealthCheckConfig;
use crate::region::manager::RegionConfig;
use crate::region::sync::ReplicationConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Complete control plane configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HaConfig {
    /// Initial regions
    pub regions: Vec<RegionConfig>,
    /// Health probing
    pub health_check: HealthCheckConfig,
    /// Routing
    pub routing: LoadBalancerConfig,
    /// Failover
    pub failover: FailoverConfig,
    /// Alert thresholds
    pub monitoring: MonitoringConfig,
    /// Replication lag limits
    pub replication: ReplicationConfig,
    /// Per-subscriber event buffer
    pub event_capacity: usize,
}

impl Default for HaConfig {
    fn default() -> Self {
        Self {
            regions: Vec::new(),
            health_check: HealthCheckConfig::default(),
            routing: LoadBalancerConfig::default(),
            failover: FailoverConfig::default(),
            monitoring: MonitoringConfig::default(),
            replication: ReplicationConfig::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl HaConfig {
    /// Create a configuration with default tuning.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from JSON; missing sections take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Add an initial region.
    pub fn with_region(mut self, region: RegionConfig) -> Self {
        self.regions.push(region);
        self
    }

    /// Set health check tuning.
    pub fn with_health_check(mut self, config: HealthCheckConfig) -> Self {
        self.health_check = config;
        self
    }

    /// Set routing.
    pub fn with_routing(mut self, config: LoadBalancerConfig) -> Self {
        self.routing = config;
        self
    }

    /// Set failover tuning.
    pub fn with_failover(mut self, config: FailoverConfig) -> Self {
        self.failover = config;
        self
    }

    /// Set alert thresholds.
    pub fn with_monitoring(mut self, config: MonitoringConfig) -> Self {
        self.monitoring = config;
        self
    }

    /// Set replication limits.
    pub fn with_replication(mut self, config: ReplicationConfig) -> Self {
        self.replication = config;
        self
    }

    /// Check the configuration for values the control plane cannot run with.
    pub fn validate(&self) -> Result<()> {
        let health = &self.health_check;
        if health.interval_ms == 0 || health.timeout_ms == 0 {
            return Err(Error::config("health check interval and timeout must be positive"));
        }
        if health.unhealthy_threshold == 0 || health.healthy_threshold == 0 {
            return Err(Error::config("health check thresholds must be positive"));
        }
        if !health.path.is_empty() && !health.path.starts_with('/') {
            return Err(Error::config(format!("health path {:?} must start with '/'", health.path)));
        }

        let failover = &self.failover;
        if failover.failure_threshold == 0 || failover.recovery_threshold == 0 {
            return Err(Error::config("failover thresholds must be positive"));
        }
        if failover.max_failovers_per_hour == 0 {
            return Err(Error::config("max_failovers_per_hour must be positive"));
        }
        if failover.max_history < failover.max_failovers_per_hour as usize {
            return Err(Error::config(format!(
                "max_history {} cannot hold max_failovers_per_hour {}",
                failover.max_history, failover.max_failovers_per_hour
            )));
        }

        if let Some(affinity) = &self.routing.session_affinity {
            if affinity.ttl_ms == 0 {
                return Err(Error::config("session affinity ttl must be positive"));
            }
        }
        if self.monitoring.interval_ms == 0 {
            return Err(Error::config("monitoring interval must be positive"));
        }

        let mut seen = HashSet::new();
        for region in &self.regions {
            region.validate()?;
            if !seen.insert(region.id.as_str()) {
                return Err(Error::config(format!("duplicate region id {}", region.id)));
            }
        }
        let primaries = self.regions.iter().filter(|r| r.is_primary).count();
        if primaries > 1 {
            return Err(Error::config(format!("{} regions marked primary", primaries)));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::balancer::RoutingStrategy;
    use crate::region::failover::FailoverMode;

    #[test]
    fn test_defaults() {
        let config = HaConfig::default();
        assert_eq!(config.health_check.interval_ms, 30_000);
        assert_eq!(config.health_check.timeout_ms, 5_000);
        assert_eq!(config.routing.strategy, RoutingStrategy::LatencyBased);
        assert!(config.routing.session_affinity.is_none());
        assert_eq!(config.failover.mode, FailoverMode::Automatic);
        assert_eq!(config.failover.cooldown_ms, 300_000);
        assert_eq!(config.monitoring.interval_ms, 60_000);
        assert_eq!(config.replication.max_lag_ms, 5_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = HaConfig::from_json(
            r#"{
                "regions": [
                    {"id": "us-east-1", "endpoint": "https://us.example.com", "is_primary": true, "status": "active"},
                    {"id": "eu-west-1", "endpoint": "https://eu.example.com", "weight": 80}
                ],
                "routing": {"strategy": "weighted", "session_affinity": {"ttl_ms": 60000}},
                "failover": {"mode": "semi_automatic", "cooldown_ms": 1000}
            }"#,
        )
        .unwrap();

        assert_eq!(config.regions.len(), 2);
        assert_eq!(config.regions[1].weight, 80);
        assert_eq!(config.routing.strategy, RoutingStrategy::Weighted);
        assert_eq!(config.routing.session_affinity.as_ref().unwrap().key, "session_id");
        assert_eq!(config.failover.mode, FailoverMode::SemiAutomatic);
        assert_eq!(config.failover.max_failovers_per_hour, 3);
        assert_eq!(config.health_check.path, "/health");
        assert!(config.validate().is_ok());

        let back = HaConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_from_json_invalid() {
        assert!(matches!(
            HaConfig::from_json("{\"regions\": 5}"),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_validate_rejects() {
        let zero_interval = HaConfig::default().with_health_check(HealthCheckConfig::default().with_interval_ms(0));
        assert!(zero_interval.validate().is_err());

        let duplicate = HaConfig::default()
            .with_region(RegionConfig::new("a", "http://a"))
            .with_region(RegionConfig::new("a", "http://a2"));
        assert!(duplicate.validate().is_err());

        let two_primaries = HaConfig::default()
            .with_region(RegionConfig::new("a", "http://a").as_primary())
            .with_region(RegionConfig::new("b", "http://b").as_primary());
        assert!(two_primaries.validate().is_err());

        let mut heavy = RegionConfig::new("a", "http://a");
        heavy.weight = 150;
        assert!(HaConfig::default().with_region(heavy).validate().is_err());

        let short_history = HaConfig::default().with_failover(FailoverConfig {
            max_history: 2,
            ..Default::default()
        });
        assert!(short_history.validate().is_err());
    }
}
