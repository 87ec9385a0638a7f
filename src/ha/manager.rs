//! HA manager - composition root of the control plane.
//!
//! Wires probe results into the load balancer and the failover manager,
//! runs the metrics/alert loop and exposes the routing and failover API.
//! The failover manager owns the region table; the balancer and the read
//! model always read regions from it, so there is no second copy to keep
//! in sync.

use crate::core::{now, Error, RegionId, Result};
use crate::ha::config::HaConfig;
use crate::ha::state::HaState;
use crate::monitoring::alerts::{Alert, AlertManager, HaMetrics};
use crate::monitoring::events::{EventBus, HaEvent};
use crate::region::balancer::{BalancerStats, LoadBalancer, RouteDecision, RoutingHints};
use crate::region::failover::{
    FailoverEvent, FailoverHook, FailoverManager, FailoverStats, FailoverTrigger,
};
use crate::region::health::{
    HealthBatch, HealthCheckResult, HealthChecker, HealthProbe, HealthSink, HealthStats,
};
use crate::region::manager::{RegionConfig, RegionStatus};
use crate::region::sync::{ReplicationMonitor, ReplicationStatus};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// Routes each probe result to the balancer, then to failover evaluation.
struct HealthFanout {
    balancer: Arc<LoadBalancer>,
    failover: Arc<FailoverManager>,
}

impl HealthFanout {
    fn apply(&self, result: &HealthCheckResult) {
        self.balancer.update_health(result);
        if let Some(event) = self.failover.record_health_result(result) {
            debug!(event_id = %event.id, status = ?event.status, "health result produced failover");
        }
    }
}

impl HealthSink for HealthFanout {
    fn on_health_batch(&self, batch: &HealthBatch) {
        for result in &batch.results {
            self.apply(result);
        }
    }
}

/// Periodic metrics evaluation.
struct MetricsMonitor {
    health: Arc<HealthChecker>,
    balancer: Arc<LoadBalancer>,
    alerts: Mutex<AlertManager>,
    events: EventBus,
}

impl MetricsMonitor {
    fn metrics(&self) -> HaMetrics {
        HaMetrics {
            latency_ms: self.health.average_latency(),
            error_rate: self.health.error_rate(),
            availability: self.health.availability(),
        }
    }

    fn run_once(&self) -> Vec<Alert> {
        let swept = self.balancer.sweep_expired_sessions();
        if swept > 0 {
            debug!(swept, "expired session pins removed");
        }

        let metrics = self.metrics();
        let raised = self.alerts.lock().evaluate_metrics(&metrics);
        for alert in &raised {
            warn!(
                alert = %alert.name,
                metric = %alert.metric,
                value = alert.value,
                threshold = alert.threshold,
                "alert raised"
            );
            self.events.emit(HaEvent::AlertRaised {
                alert: alert.clone(),
            });
        }
        raised
    }
}

/// High availability manager.
pub struct HaManager {
    config: HaConfig,
    events: EventBus,
    health: Arc<HealthChecker>,
    balancer: Arc<LoadBalancer>,
    failover: Arc<FailoverManager>,
    replication: ReplicationMonitor,
    fanout: Arc<HealthFanout>,
    monitor: Arc<MetricsMonitor>,
    running: AtomicBool,
    shutdown: Arc<Notify>,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
}

impl HaManager {
    /// Create a manager probing regions over HTTP.
    pub fn new(config: HaConfig) -> Result<Self> {
        config.validate()?;
        let events = EventBus::new(config.event_capacity);
        let health = HealthChecker::new(config.health_check.clone(), events.clone());
        Self::build(config, events, health)
    }

    /// Create a manager with a custom probe.
    pub fn with_probe(config: HaConfig, probe: Arc<dyn HealthProbe>) -> Result<Self> {
        config.validate()?;
        let events = EventBus::new(config.event_capacity);
        let health = HealthChecker::with_probe(config.health_check.clone(), probe, events.clone());
        Self::build(config, events, health)
    }

    fn build(config: HaConfig, events: EventBus, health: HealthChecker) -> Result<Self> {
        let health = Arc::new(health);
        let balancer = Arc::new(LoadBalancer::new(config.routing.clone()));
        let failover = Arc::new(FailoverManager::new(config.failover.clone(), events.clone()));
        let replication = ReplicationMonitor::new(config.replication.clone(), events.clone());
        let fanout = Arc::new(HealthFanout {
            balancer: Arc::clone(&balancer),
            failover: Arc::clone(&failover),
        });
        let monitor = Arc::new(MetricsMonitor {
            health: Arc::clone(&health),
            balancer: Arc::clone(&balancer),
            alerts: Mutex::new(AlertManager::from_config(&config.monitoring)),
            events: events.clone(),
        });

        let manager = Self {
            config,
            events,
            health,
            balancer,
            failover,
            replication,
            fanout,
            monitor,
            running: AtomicBool::new(false),
            shutdown: Arc::new(Notify::new()),
            monitor_task: Mutex::new(None),
        };
        for region in manager.config.regions.clone() {
            manager.add_region(region)?;
        }
        Ok(manager)
    }

    /// Get the configuration.
    pub fn config(&self) -> &HaConfig {
        &self.config
    }

    /// Subscribe to control plane events.
    pub fn subscribe(&self) -> broadcast::Receiver<HaEvent> {
        self.events.subscribe()
    }

    /// Start health checking and the metrics loop.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("ha manager already running");
            return;
        }

        let sink: Arc<dyn HealthSink> = self.fanout.clone();
        self.health.start(sink);

        let monitor = Arc::clone(&self.monitor);
        let shutdown = Arc::clone(&self.shutdown);
        let period = crate::core::ms(self.config.monitoring.interval_ms);
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately; no metrics exist yet.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    _ = ticker.tick() => {
                        monitor.run_once();
                    }
                }
            }
        });
        *self.monitor_task.lock() = Some(handle);

        info!(
            regions = self.failover.regions().len(),
            monitoring_interval_ms = self.config.monitoring.interval_ms,
            "ha manager started"
        );
    }

    /// Stop all loops.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.health.stop();
        self.shutdown.notify_waiters();
        if let Some(handle) = self.monitor_task.lock().take() {
            handle.abort();
        }
        info!("ha manager stopped");
    }

    /// Whether the loops are running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one probe cycle now and apply its results.
    pub async fn check_now(&self) -> HealthBatch {
        let batch = self.health.check_all_regions().await;
        self.fanout.on_health_batch(&batch);
        batch
    }

    /// Evaluate alert thresholds now.
    pub fn evaluate_alerts(&self) -> Vec<Alert> {
        self.monitor.run_once()
    }

    /// Current aggregate metrics.
    pub fn metrics(&self) -> HaMetrics {
        self.monitor.metrics()
    }

    // Regions

    /// Register a region with every component.
    pub fn add_region(&self, region: RegionConfig) -> Result<()> {
        region.validate()?;
        self.failover.add_region(region.clone())?;
        self.health.add_region(&region);
        self.balancer.add_region(&region.id);

        info!(region = %region.id, primary = region.is_primary, weight = region.weight, "region added");
        self.events.emit(HaEvent::RegionAdded { region });
        Ok(())
    }

    /// Deregister a region from every component.
    pub fn remove_region(&self, region_id: &str) -> Result<RegionConfig> {
        let removed = self.failover.remove_region(region_id)?;
        self.health.remove_region(region_id);
        self.balancer.remove_region(region_id);
        self.replication.remove_region(region_id);

        info!(region = %region_id, "region removed");
        self.events.emit(HaEvent::RegionRemoved {
            region: region_id.to_string(),
            was_primary: removed.config.is_primary,
            new_primary: removed.new_primary,
        });
        Ok(removed.config)
    }

    /// Get a region.
    pub fn region(&self, region_id: &str) -> Option<RegionConfig> {
        self.failover.region(region_id)
    }

    /// All regions.
    pub fn regions(&self) -> Vec<RegionConfig> {
        self.failover.regions()
    }

    /// Current primary.
    pub fn primary(&self) -> Option<RegionConfig> {
        self.failover.primary()
    }

    /// Operator status override.
    pub fn set_region_status(&self, region_id: &str, status: RegionStatus) -> Result<()> {
        self.failover.set_region_status(region_id, status)
    }

    // Routing

    /// Pick a region for a request. `None` when no region is available.
    pub fn route(&self, hints: &RoutingHints) -> Option<RouteDecision> {
        let regions = self.failover.regions();
        let decision = self.balancer.route(&regions, hints);
        if decision.is_none() {
            warn!(regions = regions.len(), "no region available for routing");
        }
        decision
    }

    /// Count a connection opened against a region.
    pub fn increment_connections(&self, region_id: &str) {
        self.balancer.increment_connections(region_id);
    }

    /// Count a connection closed against a region.
    pub fn decrement_connections(&self, region_id: &str) {
        self.balancer.decrement_connections(region_id);
    }

    // Failover

    /// Operator-initiated failover to `to_region`.
    pub fn trigger_failover(&self, to_region: &str, reason: &str) -> Result<FailoverEvent> {
        self.failover.manual_failover(to_region, reason)
    }

    /// Run the automatic gates for a trigger away from `from_region`.
    pub fn evaluate_failover(&self, from_region: &str, trigger: FailoverTrigger) -> Result<Option<FailoverEvent>> {
        self.failover.evaluate_failover(from_region, trigger)
    }

    /// Approve a pending failover.
    pub fn approve_failover(&self, event_id: &str) -> Result<FailoverEvent> {
        self.failover.approve_failover(event_id)
    }

    /// Reject a pending failover.
    pub fn reject_failover(&self, event_id: &str, reason: &str) -> Result<FailoverEvent> {
        self.failover.reject_failover(event_id, reason)
    }

    /// Failovers awaiting approval.
    pub fn pending_failovers(&self) -> Vec<FailoverEvent> {
        self.failover.pending_approvals()
    }

    /// Failover history, oldest first.
    pub fn failover_history(&self) -> Vec<FailoverEvent> {
        self.failover.history()
    }

    /// Register a post-flip failover hook.
    pub fn add_failover_hook(&self, hook: Arc<dyn FailoverHook>) {
        self.failover.add_hook(hook);
    }

    // Replication

    /// Record a replication report; returns true when a lag warning was raised.
    pub fn update_replication_status(&self, status: ReplicationStatus) -> Result<bool> {
        for region in [&status.source_region, &status.target_region] {
            if self.failover.region(region).is_none() {
                return Err(Error::RegionNotFound(region.clone()));
            }
        }
        Ok(self.replication.update(status))
    }

    /// Latest replication reports.
    pub fn replication_statuses(&self) -> Vec<ReplicationStatus> {
        self.replication.statuses()
    }

    // Read model

    /// Assemble the current state from each component.
    ///
    /// Not an atomic snapshot, see [`HaState`].
    pub fn get_state(&self) -> HaState {
        let captured_at = now();
        let regions = self.failover.regions();
        let health = self.health.all_results();

        let primary_region = regions.iter().find(|r| r.is_primary).map(|r| r.id.clone());
        let active_regions: Vec<RegionId> = regions
            .iter()
            .filter(|r| r.is_routable())
            .filter(|r| health.get(&r.id).map_or(true, |h| h.healthy))
            .map(|r| r.id.clone())
            .collect();

        HaState {
            primary_region,
            active_regions,
            regions,
            health,
            replication: self.replication.statuses(),
            last_failover: self.failover.last_failover(),
            failovers_last_24h: self.failover.failovers_within(DAY_MS),
            pending_approvals: self.failover.pending_approvals(),
            global_latency_ms: self.health.average_latency(),
            global_availability: self.health.availability(),
            captured_at,
        }
    }

    /// Health checker statistics.
    pub fn health_stats(&self) -> HealthStats {
        self.health.stats()
    }

    /// Routing statistics.
    pub fn balancer_stats(&self) -> BalancerStats {
        self.balancer.stats()
    }

    /// Failover statistics.
    pub fn failover_stats(&self) -> FailoverStats {
        self.failover.stats()
    }
}

impl Drop for HaManager {
    fn drop(&mut self) {
        self.health.stop();
        if let Some(handle) = self.monitor_task.get_mut().take() {
            handle.abort();
        }
    }
}
