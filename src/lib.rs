//! # regionguard - multi-region high availability control plane
//!
//! Keeps a fleet of regional deployments serving traffic:
//! - **Health checking**: concurrent probes with hysteresis
//! - **Load balancing**: strategy-based routing with session affinity
//! - **Failover**: single-primary state machine with cooldown, rate limit,
//!   approval workflow and rollback
//! - **HA manager**: wires the above together and exposes one read model
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use regionguard::ha::{HaConfig, HaManager};
//! use regionguard::region::{RegionConfig, RoutingHints};
//!
//! #[tokio::main]
//! async fn main() -> regionguard::Result<()> {
//!     regionguard::telemetry::init_tracing(regionguard::telemetry::DEFAULT_FILTER);
//!
//!     let config = HaConfig::default()
//!         .with_region(RegionConfig::new("us-east-1", "https://us.example.com").as_primary())
//!         .with_region(RegionConfig::new("eu-west-1", "https://eu.example.com").with_weight(80));
//!     let manager = HaManager::new(config)?;
//!     manager.start();
//!
//!     if let Some(decision) = manager.route(&RoutingHints::session("user-42")) {
//!         println!("routing to {} ({})", decision.region, decision.endpoint);
//!     }
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod ha;
pub mod monitoring;
pub mod region;
pub mod telemetry;

pub use core::error::{Error, Result};
pub use ha::{HaConfig, HaManager, HaState};
pub use monitoring::{EventBus, HaEvent};
