//! Typed control plane events.
//!
//! Every observable event is one [`HaEvent`] variant. Serialized with an
//! internal `type` tag, e.g. `{"type":"failover_completed","event":{..}}`;
//! downstream alerting depends on these payload shapes.

use crate::core::{RegionId, Timestamp};
use crate::monitoring::alerts::Alert;
use crate::region::failover::FailoverEvent;
use crate::region::health::{HealthBatch, HealthCheckResult};
use crate::region::manager::{RegionConfig, RegionStatus, StatusChange};
use crate::region::sync::ReplicationStatus;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Default event channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Control plane event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HaEvent {
    /// A probe cycle finished
    HealthChecked { batch: HealthBatch },
    /// A region's failure streak crossed the unhealthy threshold
    HealthDegraded { region: RegionId, result: HealthCheckResult },
    /// A region's success streak crossed the healthy threshold
    HealthRecovered { region: RegionId, result: HealthCheckResult },
    /// A region was registered
    RegionAdded { region: RegionConfig },
    /// A region was deregistered
    RegionRemoved {
        region: RegionId,
        was_primary: bool,
        new_primary: Option<RegionId>,
    },
    /// A region's status or primary flag changed
    RegionStatusChanged {
        region: RegionId,
        from: RegionStatus,
        to: RegionStatus,
        is_primary: bool,
    },
    /// No region holds the primary role
    PrimaryLost { previous: RegionId, timestamp: Timestamp },
    /// A failover was created
    FailoverStarted { event: FailoverEvent },
    /// A failover is parked until an operator approves or rejects it
    FailoverApprovalRequired { event: FailoverEvent },
    /// A failover finished and the target is primary
    FailoverCompleted { event: FailoverEvent },
    /// A failover failed, was rolled back, or was rejected
    FailoverFailed { event: FailoverEvent },
    /// Reported replication lag exceeded the configured maximum
    ReplicationLagWarning {
        status: ReplicationStatus,
        max_lag_ms: u64,
    },
    /// A monitoring threshold was breached
    AlertRaised { alert: Alert },
}

impl HaEvent {
    /// Stable event name, matching the serialized `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            HaEvent::HealthChecked { .. } => "health_checked",
            HaEvent::HealthDegraded { .. } => "health_degraded",
            HaEvent::HealthRecovered { .. } => "health_recovered",
            HaEvent::RegionAdded { .. } => "region_added",
            HaEvent::RegionRemoved { .. } => "region_removed",
            HaEvent::RegionStatusChanged { .. } => "region_status_changed",
            HaEvent::PrimaryLost { .. } => "primary_lost",
            HaEvent::FailoverStarted { .. } => "failover_started",
            HaEvent::FailoverApprovalRequired { .. } => "failover_approval_required",
            HaEvent::FailoverCompleted { .. } => "failover_completed",
            HaEvent::FailoverFailed { .. } => "failover_failed",
            HaEvent::ReplicationLagWarning { .. } => "replication_lag_warning",
            HaEvent::AlertRaised { .. } => "alert_raised",
        }
    }
}

impl From<StatusChange> for HaEvent {
    fn from(change: StatusChange) -> Self {
        HaEvent::RegionStatusChanged {
            region: change.region,
            from: change.from,
            to: change.to,
            is_primary: change.is_primary,
        }
    }
}

/// Broadcast bus shared by all components.
///
/// Emitting never blocks; with no subscribers the event is dropped. Slow
/// subscribers observe `RecvError::Lagged` rather than stalling the emitter.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<HaEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event.
    pub fn emit(&self, event: HaEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<HaEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::now;

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        bus.emit(HaEvent::PrimaryLost {
            previous: "us-east-1".to_string(),
            timestamp: now(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_receives() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        bus.emit(HaEvent::RegionAdded {
            region: RegionConfig::new("us-east-1", "http://us"),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "region_added");
    }

    #[test]
    fn test_serialized_tag_matches_name() {
        let event: HaEvent = StatusChange {
            region: "eu-west-1".to_string(),
            from: RegionStatus::Standby,
            to: RegionStatus::Active,
            is_primary: true,
        }
        .into();

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.name());
        assert_eq!(json["region"], "eu-west-1");
        assert_eq!(json["from"], "standby");
        assert_eq!(json["to"], "active");

        let back: HaEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
