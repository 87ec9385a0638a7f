//! End-to-end control plane scenarios driven by a scripted probe.

use async_trait::async_trait;
use parking_lot::Mutex;
use regionguard::ha::{HaConfig, HaManager};
use regionguard::monitoring::HaEvent;
use regionguard::region::{
    FailoverConfig, FailoverStatus, FailoverTrigger, HealthProbe, LoadBalancerConfig, RegionConfig, RegionStatus,
    ReplicationConfig, ReplicationMode, ReplicationStatus, RoutingHints, RoutingStrategy,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast::Receiver;
use tokio_test::{assert_err, assert_ok};

#[derive(Default)]
struct Script {
    outcomes: Mutex<HashMap<String, VecDeque<Result<u16, String>>>>,
}

impl Script {
    fn fail(&self, url: &str, times: usize) {
        let mut outcomes = self.outcomes.lock();
        let queue = outcomes.entry(url.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(Err("connection refused".to_string()));
        }
    }
}

#[async_trait]
impl HealthProbe for Script {
    async fn probe(&self, url: &str) -> Result<u16, String> {
        self.outcomes
            .lock()
            .get_mut(url)
            .and_then(|q| q.pop_front())
            .unwrap_or(Ok(200))
    }
}

fn fleet() -> HaConfig {
    HaConfig::default()
        .with_region(RegionConfig::new("us-east-1", "http://us-east-1.internal").as_primary())
        .with_region(RegionConfig::new("eu-west-1", "http://eu-west-1.internal").with_weight(80))
        .with_region(RegionConfig::new("ap-northeast-1", "http://ap-northeast-1.internal").with_weight(60))
}

fn start(config: HaConfig) -> (HaManager, Arc<Script>) {
    let script = Arc::new(Script::default());
    let manager = assert_ok!(HaManager::with_probe(config, script.clone()));
    (manager, script)
}

fn drain(rx: &mut Receiver<HaEvent>) -> Vec<HaEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn names(events: &[HaEvent]) -> Vec<&'static str> {
    events.iter().map(HaEvent::name).collect()
}

#[tokio::test]
async fn test_primary_failure_promotes_standby() {
    let (manager, script) = start(fleet());
    let mut rx = manager.subscribe();
    script.fail("http://us-east-1.internal/health", 3);

    manager.check_now().await;
    manager.check_now().await;
    assert_eq!(manager.primary().unwrap().id, "us-east-1");
    manager.check_now().await;

    let old = manager.region("us-east-1").unwrap();
    assert_eq!(old.status, RegionStatus::Standby);
    assert!(!old.is_primary);
    let new = manager.region("eu-west-1").unwrap();
    assert_eq!(new.status, RegionStatus::Active);
    assert!(new.is_primary);

    let events = drain(&mut rx);
    let completed: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            HaEvent::FailoverCompleted { event } => Some(event),
            _ => None,
        })
        .collect();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].from_region.as_deref(), Some("us-east-1"));
    assert_eq!(completed[0].to_region, "eu-west-1");
    assert!(names(&events).contains(&"health_degraded"));

    let decision = manager.route(&RoutingHints::default()).unwrap();
    assert_ne!(decision.region, "us-east-1");
}

#[tokio::test]
async fn test_approval_required_parks_failover() {
    let config = fleet().with_failover(FailoverConfig::default().with_approval(true));
    let (manager, script) = start(config);
    let mut rx = manager.subscribe();
    script.fail("http://us-east-1.internal/health", 3);

    for _ in 0..3 {
        manager.check_now().await;
    }

    let pending = manager.pending_failovers();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, FailoverStatus::InProgress);
    assert_eq!(manager.primary().unwrap().id, "us-east-1");
    assert!(manager.failover_history().is_empty());
    assert!(names(&drain(&mut rx)).contains(&"failover_approval_required"));

    let event = assert_ok!(manager.approve_failover(&pending[0].id));
    assert_eq!(event.status, FailoverStatus::Completed);
    assert_eq!(manager.primary().unwrap().id, "eu-west-1");
    assert!(manager.pending_failovers().is_empty());
    assert_err!(manager.reject_failover(&pending[0].id, "too late"));
}

#[test]
fn test_weighted_routing_ignores_zero_weight() {
    let config = HaConfig::default()
        .with_region(RegionConfig::new("heavy", "http://heavy").with_weight(100))
        .with_region(RegionConfig::new("empty", "http://empty").with_weight(0))
        .with_routing(LoadBalancerConfig::default().with_strategy(RoutingStrategy::Weighted));
    let (manager, _script) = start(config);

    for _ in 0..1000 {
        let decision = manager.route(&RoutingHints::default()).unwrap();
        assert_eq!(decision.region, "heavy");
    }
    assert_eq!(manager.balancer_stats().routes_by_region["heavy"], 1000);
}

#[test]
fn test_back_to_back_triggers_within_cooldown() {
    let (manager, _script) = start(fleet());

    let first = assert_ok!(manager.evaluate_failover("us-east-1", FailoverTrigger::HealthCheck));
    assert_eq!(first.unwrap().status, FailoverStatus::Completed);

    let regions = manager.regions();
    let mut rx = manager.subscribe();
    let second = assert_ok!(manager.evaluate_failover("eu-west-1", FailoverTrigger::HealthCheck));

    assert!(second.is_none());
    assert!(drain(&mut rx).is_empty());
    assert_eq!(manager.regions(), regions);
    assert_eq!(manager.failover_history().len(), 1);
}

#[test]
fn test_replication_lag_alert_per_update() {
    let config = fleet().with_replication(ReplicationConfig { max_lag_ms: 1000 });
    let (manager, _script) = start(config);
    let mut rx = manager.subscribe();

    let lagging = ReplicationStatus::new("us-east-1", "eu-west-1", ReplicationMode::Asynchronous, 4500);
    assert!(assert_ok!(manager.update_replication_status(lagging.clone())));
    assert_eq!(names(&drain(&mut rx)), vec!["replication_lag_warning"]);

    assert!(assert_ok!(manager.update_replication_status(lagging)));
    assert_eq!(names(&drain(&mut rx)), vec!["replication_lag_warning"]);

    let caught_up = ReplicationStatus::new("us-east-1", "eu-west-1", ReplicationMode::Asynchronous, 10);
    assert!(!assert_ok!(manager.update_replication_status(caught_up)));
    assert!(drain(&mut rx).is_empty());
    assert_eq!(manager.replication_statuses().len(), 1);
}

#[tokio::test]
async fn test_add_then_remove_region() {
    let (manager, script) = start(fleet());
    let region = RegionConfig::new("sa-east-1", "http://sa-east-1.internal").with_weight(90);
    assert_ok!(manager.add_region(region));
    script.fail("http://sa-east-1.internal/health", 1);
    manager.check_now().await;

    assert_ok!(manager.remove_region("sa-east-1"));
    let state = manager.get_state();
    assert!(state.regions.iter().all(|r| r.id != "sa-east-1"));
    assert!(state.health_of("sa-east-1").is_none());
    assert_eq!(state.global_availability, 100.0);

    let batch = manager.check_now().await;
    assert_eq!(batch.results.len(), 3);
}

#[test]
fn test_add_primary_then_remove_restores_fleet() {
    let config = HaConfig::default()
        .with_region(RegionConfig::new("eu-west-1", "http://eu-west-1.internal").as_primary().with_weight(80))
        .with_region(RegionConfig::new("us-east-1", "http://us-east-1.internal").with_weight(100));
    let (manager, _script) = start(config);
    let regions = manager.regions();
    let health = manager.health_stats();
    let routing = manager.balancer_stats();

    let rejected = manager.add_region(RegionConfig::new("x-1", "http://x-1.internal").as_primary());
    assert!(matches!(rejected, Err(regionguard::Error::InvalidConfig(_))));
    assert_eq!(manager.regions(), regions);

    assert_ok!(manager.add_region(RegionConfig::new("x-1", "http://x-1.internal")));
    assert_ok!(manager.remove_region("x-1"));

    assert_eq!(manager.regions(), regions);
    assert_eq!(manager.primary().unwrap().id, "eu-west-1");
    assert_eq!(manager.health_stats(), health);
    assert_eq!(manager.balancer_stats(), routing);
}

#[tokio::test]
async fn test_state_components_update_independently() {
    let (manager, script) = start(fleet());
    script.fail("http://us-east-1.internal/health", 1);
    manager.check_now().await;

    // The probe result is already unhealthy while the region table still
    // carries an active primary: each component reports its own view.
    let state = manager.get_state();
    assert!(!state.health_of("us-east-1").unwrap().healthy);
    assert_eq!(state.primary_region.as_deref(), Some("us-east-1"));
    assert_eq!(
        state.regions.iter().find(|r| r.id == "us-east-1").unwrap().status,
        RegionStatus::Active
    );
    assert!(!state.active_regions.contains(&"us-east-1".to_string()));
    assert!(state.global_availability < 100.0);
}

#[test]
fn test_config_from_json() {
    let config = assert_ok!(HaConfig::from_json(
        r#"{
            "regions": [
                {"id": "us-east-1", "endpoint": "http://us", "is_primary": true, "status": "active"},
                {"id": "eu-west-1", "endpoint": "http://eu", "weight": 50}
            ],
            "health_check": {"interval_ms": 1000, "path": "/ready"},
            "failover": {"mode": "manual"}
        }"#
    ));
    let (manager, _script) = start(config);

    assert_eq!(manager.regions().len(), 2);
    assert_eq!(manager.config().health_check.path, "/ready");
    let event = assert_ok!(manager.trigger_failover("eu-west-1", "operator drill"));
    assert!(!event.automatic);
    assert_eq!(manager.primary().unwrap().id, "eu-west-1");
}
