//! Monitoring Module
//!
//! Provides observability for the control plane:
//! - Typed event bus
//! - Threshold alerting

pub mod alerts;
pub mod events;

pub use alerts::{Alert, AlertCondition, AlertManager, AlertRule, AlertSeverity, AlertState, HaMetrics, MonitoringConfig};
pub use events::{EventBus, HaEvent, DEFAULT_EVENT_CAPACITY};
