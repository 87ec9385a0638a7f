//! Region Module
//!
//! Provides the regional control plane:
//! - Region table and primary election
//! - Health checking
//! - Load balancing
//! - Failover
//! - Replication status monitoring

pub mod balancer;
pub mod failover;
pub mod health;
pub mod manager;
pub mod sync;

pub use balancer::{
    BalancerStats, GeoArea, LoadBalancer, LoadBalancerConfig, RouteDecision, RouteReason, RoutingHints,
    RoutingStrategy, SessionAffinityConfig,
};
pub use failover::{
    FailoverConfig, FailoverEvent, FailoverHook, FailoverManager, FailoverMode, FailoverStats, FailoverStatus,
    FailoverTrigger, RemovedRegion,
};
pub use health::{
    HealthBatch, HealthCheckConfig, HealthCheckResult, HealthChecker, HealthProbe, HealthSink, HealthStats, HttpProbe,
};
pub use manager::{RegionConfig, RegionRegistry, RegionStatus, StatusChange};
pub use sync::{ReplicationConfig, ReplicationMode, ReplicationMonitor, ReplicationStatus};
