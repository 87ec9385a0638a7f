//! Active health probing for regions.
//!
//! Every tick probes all registered regions concurrently, each probe bounded
//! by its own timeout. Consecutive failure/success streaks drive hysteresis:
//! `health_degraded` / `health_recovered` only fire once a streak crosses
//! its threshold.

use crate::core::{now, RegionId, Result, Timestamp};
use crate::monitoring::events::{EventBus, HaEvent};
use crate::region::manager::RegionConfig;
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Health check tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Time between probe cycles (ms)
    pub interval_ms: u64,
    /// Per-probe timeout (ms)
    pub timeout_ms: u64,
    /// Consecutive failures before a region is reported degraded
    pub unhealthy_threshold: u32,
    /// Consecutive successes before a degraded region is reported recovered
    pub healthy_threshold: u32,
    /// Path appended to the region endpoint
    pub path: String,
    /// Status code that counts as healthy
    pub expected_status: u16,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            timeout_ms: 5_000,
            unhealthy_threshold: 3,
            healthy_threshold: 2,
            path: "/health".to_string(),
            expected_status: 200,
        }
    }
}

impl HealthCheckConfig {
    /// Set probe interval.
    pub fn with_interval_ms(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    /// Set probe timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set hysteresis thresholds.
    pub fn with_thresholds(mut self, unhealthy: u32, healthy: u32) -> Self {
        self.unhealthy_threshold = unhealthy;
        self.healthy_threshold = healthy;
        self
    }

    /// Probe interval as a duration.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Probe timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Latest health snapshot for one region.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Region ID
    pub region: RegionId,
    /// Outcome of this probe
    pub healthy: bool,
    /// Probe round-trip time (ms)
    pub latency_ms: u64,
    /// HTTP status code, absent on transport error or timeout
    pub status_code: Option<u16>,
    /// Failure description
    pub message: Option<String>,
    /// URL that was probed
    pub url: String,
    /// When the probe completed
    pub timestamp: Timestamp,
    /// Current failure streak
    pub consecutive_failures: u32,
    /// Current success streak
    pub consecutive_successes: u32,
    /// Last healthy probe
    pub last_success: Option<Timestamp>,
    /// Last unhealthy probe
    pub last_failure: Option<Timestamp>,
}

/// Results of one probe cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthBatch {
    /// One result per region probed
    pub results: Vec<HealthCheckResult>,
    /// When the cycle finished
    pub timestamp: Timestamp,
    /// Wall time of the cycle (ms)
    pub duration_ms: u64,
}

/// Issues a single health request.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Probe `url`, returning the response status code or a transport error.
    async fn probe(&self, url: &str) -> std::result::Result<u16, String>;
}

/// HTTP GET probe.
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    /// Create a probe whose client enforces `timeout`.
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self { client }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, url: &str) -> std::result::Result<u16, String> {
        self.client
            .get(url)
            .send()
            .await
            .map(|response| response.status().as_u16())
            .map_err(|e| e.to_string())
    }
}

/// Receives every completed probe cycle.
pub trait HealthSink: Send + Sync {
    /// Called once per tick with the aggregated batch.
    fn on_health_batch(&self, batch: &HealthBatch);
}

/// Health checker statistics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthStats {
    pub regions: usize,
    pub healthy_regions: usize,
    pub unhealthy_regions: usize,
    pub total_checks: u64,
    pub failed_checks: u64,
    pub average_latency_ms: f64,
    pub availability: f64,
}

/// Per-region probe bookkeeping.
#[derive(Clone, Debug)]
struct RegionCounters {
    url: String,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_success: Option<Timestamp>,
    last_failure: Option<Timestamp>,
    /// Hysteresis state, flips only when a streak crosses its threshold
    reported_healthy: bool,
}

/// Raw probe outcome before bookkeeping.
struct ProbeOutcome {
    region: RegionId,
    url: String,
    healthy: bool,
    latency_ms: u64,
    status_code: Option<u16>,
    message: Option<String>,
}

#[derive(Default)]
struct CheckerState {
    /// Registration order
    order: Vec<RegionId>,
    counters: HashMap<RegionId, RegionCounters>,
    results: HashMap<RegionId, HealthCheckResult>,
    total_checks: u64,
    failed_checks: u64,
}

/// Periodic health checker.
pub struct HealthChecker {
    config: HealthCheckConfig,
    probe: Arc<dyn HealthProbe>,
    events: EventBus,
    state: Mutex<CheckerState>,
    running: AtomicBool,
    /// Bumped on every start; a loop only runs while it owns the current value
    generation: AtomicU64,
    shutdown: Notify,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthChecker {
    /// Create a checker using HTTP probes.
    pub fn new(config: HealthCheckConfig, events: EventBus) -> Self {
        let probe = Arc::new(HttpProbe::new(config.timeout()));
        Self::with_probe(config, probe, events)
    }

    /// Create a checker with a custom probe.
    pub fn with_probe(config: HealthCheckConfig, probe: Arc<dyn HealthProbe>, events: EventBus) -> Self {
        Self {
            config,
            probe,
            events,
            state: Mutex::new(CheckerState::default()),
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            shutdown: Notify::new(),
            task: Mutex::new(None),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    /// Register a region. Re-registering replaces its probe URL and resets counters.
    pub fn add_region(&self, region: &RegionConfig) {
        let mut state = self.state.lock();
        if !state.counters.contains_key(&region.id) {
            state.order.push(region.id.clone());
        }
        state.counters.insert(
            region.id.clone(),
            RegionCounters {
                url: region.health_url(&self.config.path),
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_success: None,
                last_failure: None,
                reported_healthy: true,
            },
        );
        state.results.remove(&region.id);
    }

    /// Deregister a region and drop its counters and snapshot.
    pub fn remove_region(&self, region_id: &str) -> bool {
        let mut state = self.state.lock();
        state.order.retain(|id| id != region_id);
        state.results.remove(region_id);
        state.counters.remove(region_id).is_some()
    }

    /// Registered region IDs in registration order.
    pub fn regions(&self) -> Vec<RegionId> {
        self.state.lock().order.clone()
    }

    /// Probe one region and record the outcome.
    pub async fn check_region(&self, region_id: &str) -> Result<HealthCheckResult> {
        let url = self
            .state
            .lock()
            .counters
            .get(region_id)
            .map(|c| c.url.clone())
            .ok_or_else(|| crate::core::Error::RegionNotFound(region_id.to_string()))?;

        let outcome = self.run_probe(region_id.to_string(), url).await;
        self.record(outcome)
            .ok_or_else(|| crate::core::Error::RegionNotFound(region_id.to_string()))
    }

    /// Probe every registered region concurrently.
    ///
    /// The region set is snapshotted up front; results for regions removed
    /// while their probe was in flight are discarded.
    pub async fn check_all_regions(&self) -> HealthBatch {
        let started = Instant::now();
        let targets: Vec<(RegionId, String)> = {
            let state = self.state.lock();
            state
                .order
                .iter()
                .filter_map(|id| state.counters.get(id).map(|c| (id.clone(), c.url.clone())))
                .collect()
        };

        let outcomes = join_all(
            targets
                .into_iter()
                .map(|(region, url)| self.run_probe(region, url)),
        )
        .await;

        let results: Vec<HealthCheckResult> = outcomes
            .into_iter()
            .filter_map(|outcome| self.record(outcome))
            .collect();

        let batch = HealthBatch {
            results,
            timestamp: now(),
            duration_ms: started.elapsed().as_millis() as u64,
        };

        debug!(
            regions = batch.results.len(),
            duration_ms = batch.duration_ms,
            "health check cycle complete"
        );
        self.events.emit(HaEvent::HealthChecked {
            batch: batch.clone(),
        });
        batch
    }

    /// Start periodic checking: an immediate cycle, then one per interval.
    ///
    /// Cycles never overlap. A tick that comes due while a cycle is still
    /// running is skipped.
    pub fn start(self: &Arc<Self>, sink: Arc<dyn HealthSink>) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("health checker already running");
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let checker = Arc::clone(self);
        let period = self.config.interval();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = checker.shutdown.notified() => break,
                    _ = ticker.tick() => {}
                }
                if !checker.owns_loop(generation) {
                    break;
                }

                let batch = checker.check_all_regions().await;
                if !checker.owns_loop(generation) {
                    debug!("discarding health batch completed after stop");
                    break;
                }
                sink.on_health_batch(&batch);
            }
        });

        if let Some(previous) = self.task.lock().replace(handle) {
            previous.abort();
        }
        info!(interval_ms = self.config.interval_ms, "health checker started");
    }

    /// Stop periodic checking. An in-flight cycle is cancelled and its
    /// results are never recorded.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.notify_waiters();
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
        info!("health checker stopped");
    }

    fn owns_loop(&self, generation: u64) -> bool {
        self.is_running() && self.generation.load(Ordering::SeqCst) == generation
    }

    /// Whether the periodic loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Latest snapshot for a region.
    pub fn get_result(&self, region_id: &str) -> Option<HealthCheckResult> {
        self.state.lock().results.get(region_id).cloned()
    }

    /// Latest snapshots for all probed regions.
    pub fn all_results(&self) -> HashMap<RegionId, HealthCheckResult> {
        self.state.lock().results.clone()
    }

    /// Regions whose latest probe succeeded.
    pub fn healthy_regions(&self) -> Vec<RegionId> {
        self.regions_where(true)
    }

    /// Regions whose latest probe failed.
    pub fn unhealthy_regions(&self) -> Vec<RegionId> {
        self.regions_where(false)
    }

    /// Mean latency over regions whose latest probe succeeded, 0 if none.
    pub fn average_latency(&self) -> f64 {
        let state = self.state.lock();
        let latencies: Vec<u64> = state
            .results
            .values()
            .filter(|r| r.healthy)
            .map(|r| r.latency_ms)
            .collect();
        if latencies.is_empty() {
            return 0.0;
        }
        latencies.iter().sum::<u64>() as f64 / latencies.len() as f64
    }

    /// Percentage of regions not known to be unhealthy, 100 with no regions.
    pub fn availability(&self) -> f64 {
        let state = self.state.lock();
        let total = state.order.len();
        if total == 0 {
            return 100.0;
        }
        let unhealthy = state.results.values().filter(|r| !r.healthy).count();
        (total - unhealthy.min(total)) as f64 / total as f64 * 100.0
    }

    /// Percentage of regions whose latest probe failed.
    pub fn error_rate(&self) -> f64 {
        100.0 - self.availability()
    }

    /// Get statistics.
    pub fn stats(&self) -> HealthStats {
        let (regions, total_checks, failed_checks) = {
            let state = self.state.lock();
            (state.order.len(), state.total_checks, state.failed_checks)
        };
        HealthStats {
            regions,
            healthy_regions: self.healthy_regions().len(),
            unhealthy_regions: self.unhealthy_regions().len(),
            total_checks,
            failed_checks,
            average_latency_ms: self.average_latency(),
            availability: self.availability(),
        }
    }

    fn regions_where(&self, healthy: bool) -> Vec<RegionId> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .filter(|id| state.results.get(*id).map(|r| r.healthy) == Some(healthy))
            .cloned()
            .collect()
    }

    async fn run_probe(&self, region: RegionId, url: String) -> ProbeOutcome {
        let expected = self.config.expected_status;
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.config.timeout(), self.probe.probe(&url)).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let (healthy, status_code, message) = match outcome {
            Ok(Ok(code)) if code == expected => (true, Some(code), None),
            Ok(Ok(code)) => (
                false,
                Some(code),
                Some(format!("unexpected status {}, expected {}", code, expected)),
            ),
            Ok(Err(e)) => (false, None, Some(e)),
            Err(_) => (
                false,
                None,
                Some(format!("health check timed out after {}ms", self.config.timeout_ms)),
            ),
        };

        debug!(region = %region, healthy, latency_ms, "health probe finished");
        ProbeOutcome {
            region,
            url,
            healthy,
            latency_ms,
            status_code,
            message,
        }
    }

    /// Fold a probe outcome into the counters. `None` if the region is gone.
    fn record(&self, outcome: ProbeOutcome) -> Option<HealthCheckResult> {
        let timestamp = now();
        let mut state = self.state.lock();
        let counters = state.counters.get_mut(&outcome.region)?;

        let mut transition = None;
        if outcome.healthy {
            counters.consecutive_successes += 1;
            counters.consecutive_failures = 0;
            counters.last_success = Some(timestamp);
            if !counters.reported_healthy
                && counters.consecutive_successes >= self.config.healthy_threshold
            {
                counters.reported_healthy = true;
                transition = Some(true);
            }
        } else {
            counters.consecutive_failures += 1;
            counters.consecutive_successes = 0;
            counters.last_failure = Some(timestamp);
            if counters.reported_healthy
                && counters.consecutive_failures >= self.config.unhealthy_threshold
            {
                counters.reported_healthy = false;
                transition = Some(false);
            }
        }

        let result = HealthCheckResult {
            region: outcome.region.clone(),
            healthy: outcome.healthy,
            latency_ms: outcome.latency_ms,
            status_code: outcome.status_code,
            message: outcome.message,
            url: outcome.url,
            timestamp,
            consecutive_failures: counters.consecutive_failures,
            consecutive_successes: counters.consecutive_successes,
            last_success: counters.last_success,
            last_failure: counters.last_failure,
        };

        state.total_checks += 1;
        if !result.healthy {
            state.failed_checks += 1;
        }
        state.results.insert(outcome.region, result.clone());
        drop(state);

        match transition {
            Some(false) => {
                warn!(
                    region = %result.region,
                    failures = result.consecutive_failures,
                    message = result.message.as_deref().unwrap_or(""),
                    "region health degraded"
                );
                self.events.emit(HaEvent::HealthDegraded {
                    region: result.region.clone(),
                    result: result.clone(),
                });
            }
            Some(true) => {
                info!(region = %result.region, "region health recovered");
                self.events.emit(HaEvent::HealthRecovered {
                    region: result.region.clone(),
                    result: result.clone(),
                });
            }
            None => {}
        }

        Some(result)
    }
}

impl Drop for HealthChecker {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    /// Scripted probe: pops queued outcomes per URL, defaulting to 200.
    #[derive(Default)]
    pub(crate) struct ScriptedProbe {
        script: Mutex<HashMap<String, VecDeque<std::result::Result<u16, String>>>>,
        delays: Mutex<HashMap<String, Duration>>,
        pub(crate) calls: AtomicUsize,
    }

    impl ScriptedProbe {
        pub(crate) fn push(&self, url: &str, outcome: std::result::Result<u16, String>) {
            self.script
                .lock()
                .entry(url.to_string())
                .or_default()
                .push_back(outcome);
        }

        pub(crate) fn fail(&self, url: &str, times: usize) {
            for _ in 0..times {
                self.push(url, Err("connection refused".to_string()));
            }
        }

        pub(crate) fn delay(&self, url: &str, delay: Duration) {
            self.delays.lock().insert(url.to_string(), delay);
        }
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn probe(&self, url: &str) -> std::result::Result<u16, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = self.delays.lock().get(url).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.script
                .lock()
                .get_mut(url)
                .and_then(|q| q.pop_front())
                .unwrap_or(Ok(200))
        }
    }

    fn checker(config: HealthCheckConfig) -> (Arc<HealthChecker>, Arc<ScriptedProbe>, EventBus) {
        let probe = Arc::new(ScriptedProbe::default());
        let events = EventBus::new(64);
        let checker = Arc::new(HealthChecker::with_probe(config, probe.clone(), events.clone()));
        checker.add_region(&RegionConfig::new("us-east-1", "http://us"));
        checker.add_region(&RegionConfig::new("eu-west-1", "http://eu"));
        (checker, probe, events)
    }

    #[tokio::test]
    async fn test_healthy_probe() {
        let (checker, _, _) = checker(HealthCheckConfig::default());
        let result = checker.check_region("us-east-1").await.unwrap();

        assert!(result.healthy);
        assert_eq!(result.status_code, Some(200));
        assert_eq!(result.url, "http://us/health");
        assert_eq!(result.consecutive_successes, 1);
        assert!(result.last_success.is_some());
    }

    #[tokio::test]
    async fn test_status_mismatch_is_unhealthy() {
        let (checker, probe, _) = checker(HealthCheckConfig::default());
        probe.push("http://us/health", Ok(503));

        let result = checker.check_region("us-east-1").await.unwrap();
        assert!(!result.healthy);
        assert_eq!(result.status_code, Some(503));
        assert!(result.message.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_transport_error_is_unhealthy() {
        let (checker, probe, _) = checker(HealthCheckConfig::default());
        probe.fail("http://us/health", 1);

        let result = checker.check_region("us-east-1").await.unwrap();
        assert!(!result.healthy);
        assert_eq!(result.status_code, None);
        assert_eq!(result.message.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn test_timeout_is_unhealthy_and_isolated() {
        let config = HealthCheckConfig::default().with_timeout_ms(20);
        let (checker, probe, _) = checker(config);
        probe.delay("http://us/health", Duration::from_millis(200));

        let batch = checker.check_all_regions().await;
        assert_eq!(batch.results.len(), 2);

        let us = batch.results.iter().find(|r| r.region == "us-east-1").unwrap();
        assert!(!us.healthy);
        assert!(us.message.as_deref().unwrap().contains("timed out"));

        let eu = batch.results.iter().find(|r| r.region == "eu-west-1").unwrap();
        assert!(eu.healthy);
    }

    #[tokio::test]
    async fn test_unknown_region() {
        let (checker, _, _) = checker(HealthCheckConfig::default());
        assert!(checker.check_region("nowhere").await.is_err());
    }

    #[tokio::test]
    async fn test_hysteresis_degraded_fires_once() {
        let (checker, probe, events) = checker(HealthCheckConfig::default().with_thresholds(3, 2));
        let mut rx = events.subscribe();
        probe.fail("http://us/health", 5);

        for _ in 0..5 {
            checker.check_region("us-east-1").await.unwrap();
        }

        let mut degraded = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, HaEvent::HealthDegraded { .. }) {
                degraded += 1;
            }
        }
        assert_eq!(degraded, 1);
    }

    #[tokio::test]
    async fn test_single_blip_does_not_degrade() {
        let (checker, probe, events) = checker(HealthCheckConfig::default().with_thresholds(3, 2));
        let mut rx = events.subscribe();
        probe.fail("http://us/health", 2);
        probe.push("http://us/health", Ok(200));
        probe.fail("http://us/health", 2);

        for _ in 0..5 {
            checker.check_region("us-east-1").await.unwrap();
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_recovery_requires_healthy_streak() {
        let (checker, probe, events) = checker(HealthCheckConfig::default().with_thresholds(2, 2));
        probe.fail("http://us/health", 2);
        checker.check_region("us-east-1").await.unwrap();
        checker.check_region("us-east-1").await.unwrap();

        let mut rx = events.subscribe();
        checker.check_region("us-east-1").await.unwrap();
        assert!(rx.try_recv().is_err());

        checker.check_region("us-east-1").await.unwrap();
        assert!(matches!(rx.try_recv(), Ok(HaEvent::HealthRecovered { .. })));
    }

    #[tokio::test]
    async fn test_availability_and_latency() {
        let (checker, probe, _) = checker(HealthCheckConfig::default());
        assert_eq!(checker.availability(), 100.0);

        probe.fail("http://us/health", 1);
        checker.check_all_regions().await;

        assert_eq!(checker.availability(), 50.0);
        assert_eq!(checker.error_rate(), 50.0);
        assert_eq!(checker.healthy_regions(), vec!["eu-west-1".to_string()]);
        assert_eq!(checker.unhealthy_regions(), vec!["us-east-1".to_string()]);
        assert!(checker.average_latency() >= 0.0);
    }

    #[test]
    fn test_availability_no_regions() {
        let checker = HealthChecker::with_probe(
            HealthCheckConfig::default(),
            Arc::new(ScriptedProbe::default()),
            EventBus::new(8),
        );
        assert_eq!(checker.availability(), 100.0);
        assert_eq!(checker.average_latency(), 0.0);
    }

    #[tokio::test]
    async fn test_add_then_remove_leaves_no_trace() {
        let (checker, _, _) = checker(HealthCheckConfig::default());
        let before = checker.stats();

        checker.add_region(&RegionConfig::new("ap-northeast-1", "http://ap"));
        assert!(checker.remove_region("ap-northeast-1"));

        assert_eq!(checker.stats(), before);
        assert!(checker.get_result("ap-northeast-1").is_none());
        assert_eq!(checker.regions().len(), 2);
    }

    #[tokio::test]
    async fn test_removed_mid_cycle_is_discarded() {
        let (checker, probe, _) = checker(HealthCheckConfig::default());
        probe.delay("http://us/health", Duration::from_millis(50));

        let cycle = {
            let checker = Arc::clone(&checker);
            tokio::spawn(async move { checker.check_all_regions().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        checker.remove_region("us-east-1");

        let batch = cycle.await.unwrap();
        assert_eq!(batch.results.len(), 1);
        assert!(checker.get_result("us-east-1").is_none());
    }

    struct CountingSink(AtomicUsize);

    impl HealthSink for CountingSink {
        fn on_health_batch(&self, _batch: &HealthBatch) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let (checker, _, _) = checker(HealthCheckConfig::default().with_interval_ms(20));
        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));

        checker.start(sink.clone());
        assert!(checker.is_running());
        tokio::time::sleep(Duration::from_millis(70)).await;
        checker.stop();
        assert!(!checker.is_running());

        let delivered = sink.0.load(Ordering::SeqCst);
        assert!(delivered >= 2, "expected immediate + interval ticks, got {}", delivered);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(sink.0.load(Ordering::SeqCst), delivered);
    }

    /// Tracks how many probes run at once.
    #[derive(Default)]
    struct SlowEndpoint {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    struct InFlight<'a>(&'a AtomicUsize);

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl HealthProbe for SlowEndpoint {
        async fn probe(&self, _url: &str) -> std::result::Result<u16, String> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            let _guard = InFlight(&self.in_flight);
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(200)
        }
    }

    #[tokio::test]
    async fn test_restart_does_not_overlap() {
        let endpoint = Arc::new(SlowEndpoint::default());
        let checker = Arc::new(HealthChecker::with_probe(
            HealthCheckConfig::default().with_interval_ms(20),
            endpoint.clone(),
            EventBus::new(64),
        ));
        checker.add_region(&RegionConfig::new("us-east-1", "http://us"));
        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));

        checker.start(sink.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;
        checker.stop();
        checker.start(sink.clone());
        tokio::time::sleep(Duration::from_millis(500)).await;
        checker.stop();

        assert_eq!(endpoint.max_in_flight.load(Ordering::SeqCst), 1);
        assert!(sink.0.load(Ordering::SeqCst) >= 2);
    }
}
