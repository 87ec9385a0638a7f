//! HA Module
//!
//! Composition root of the control plane:
//! - Configuration
//! - HA manager
//! - Aggregated state

pub mod config;
pub mod manager;
pub mod state;

pub use config::HaConfig;
pub use manager::HaManager;
pub use state::HaState;
