//! Failover management for high availability.
//!
//! Owns the region table and the single-primary state machine. Trigger
//! evaluation is gated in order: mode, cooldown, hourly rate, duplicate
//! pending, target selection, approval. Gates and execution run inside one
//! critical section, so two concurrent triggers can never both pass the
//! cooldown check, and every primary flag change goes through here.

use crate::core::{millis_between, now, Error, RegionId, Result, Timestamp};
use crate::monitoring::events::{EventBus, HaEvent};
use crate::region::health::HealthCheckResult;
use crate::region::manager::{RegionConfig, RegionRegistry, RegionStatus, StatusChange};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Window used by the hourly rate gate (ms).
const RATE_WINDOW_MS: u64 = 60 * 60 * 1000;

/// Failover decision mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverMode {
    /// Health triggers execute without operator involvement
    Automatic,
    /// Health triggers always wait for approval
    SemiAutomatic,
    /// Only operator-initiated failovers
    Manual,
}

/// What caused a failover.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverTrigger {
    HealthCheck,
    Manual,
    Scheduled,
    Capacity,
}

impl std::fmt::Display for FailoverTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailoverTrigger::HealthCheck => write!(f, "health_check"),
            FailoverTrigger::Manual => write!(f, "manual"),
            FailoverTrigger::Scheduled => write!(f, "scheduled"),
            FailoverTrigger::Capacity => write!(f, "capacity"),
        }
    }
}

/// Failover lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverStatus {
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

impl FailoverStatus {
    /// Whether the event can no longer change.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FailoverStatus::InProgress)
    }
}

/// Failover event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailoverEvent {
    /// Event ID
    pub id: String,
    /// Region losing the primary role, absent when there was no primary
    pub from_region: Option<RegionId>,
    /// Region taking the primary role
    pub to_region: RegionId,
    /// Reason for failover
    pub reason: String,
    /// Trigger
    pub trigger: FailoverTrigger,
    /// Was automatic
    pub automatic: bool,
    /// When the event was created
    pub started_at: Timestamp,
    /// When the event reached a terminal status
    pub completed_at: Option<Timestamp>,
    /// Current status
    pub status: FailoverStatus,
    /// Failure or rejection reason
    pub error: Option<String>,
}

impl FailoverEvent {
    fn new(from: Option<&str>, to: &str, reason: String, trigger: FailoverTrigger) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            from_region: from.map(str::to_string),
            to_region: to.to_string(),
            reason,
            trigger,
            automatic: trigger != FailoverTrigger::Manual,
            started_at: now(),
            completed_at: None,
            status: FailoverStatus::InProgress,
            error: None,
        }
    }

    /// Time from creation to terminal status (ms).
    pub fn duration_ms(&self) -> Option<u64> {
        self.completed_at
            .map(|done| millis_between(self.started_at, done))
    }
}

/// Failover tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    /// Decision mode
    pub mode: FailoverMode,
    /// Consecutive failed probes before a region triggers failover or is marked degraded
    pub failure_threshold: u32,
    /// Consecutive healthy probes before a degraded region is restored
    pub recovery_threshold: u32,
    /// Minimum time between failovers (ms)
    pub cooldown_ms: u64,
    /// Maximum failovers in any trailing hour
    pub max_failovers_per_hour: u32,
    /// Park automatic failovers until approved
    pub require_approval: bool,
    /// Restore the prior assignment when execution fails
    pub rollback_on_failure: bool,
    /// Retained history entries
    pub max_history: usize,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            mode: FailoverMode::Automatic,
            failure_threshold: 3,
            recovery_threshold: 2,
            cooldown_ms: 300_000,
            max_failovers_per_hour: 3,
            require_approval: false,
            rollback_on_failure: true,
            max_history: 100,
        }
    }
}

impl FailoverConfig {
    /// Set mode.
    pub fn with_mode(mut self, mode: FailoverMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set failure threshold.
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set cooldown.
    pub fn with_cooldown_ms(mut self, cooldown_ms: u64) -> Self {
        self.cooldown_ms = cooldown_ms;
        self
    }

    /// Set hourly limit.
    pub fn with_max_per_hour(mut self, max: u32) -> Self {
        self.max_failovers_per_hour = max;
        self
    }

    /// Require approval.
    pub fn with_approval(mut self, required: bool) -> Self {
        self.require_approval = required;
        self
    }

    /// Set rollback behaviour.
    pub fn with_rollback(mut self, rollback: bool) -> Self {
        self.rollback_on_failure = rollback;
        self
    }

    fn needs_approval(&self) -> bool {
        self.require_approval || self.mode == FailoverMode::SemiAutomatic
    }
}

/// Side effect run after the in-memory primary flip, e.g. a DNS update.
///
/// Hooks run inside the failover critical section: keep them short and never
/// call back into the [`FailoverManager`]. An error fails the execution.
pub trait FailoverHook: Send + Sync {
    /// Apply the failover externally.
    fn on_failover(&self, event: &FailoverEvent) -> Result<()>;
}

/// Region removal outcome.
#[derive(Clone, Debug)]
pub struct RemovedRegion {
    /// Config of the removed region
    pub config: RegionConfig,
    /// Primary elected to replace it, if it was primary
    pub new_primary: Option<RegionId>,
}

/// Failover statistics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FailoverStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub rolled_back: usize,
    pub pending: usize,
    pub last_hour: usize,
    pub last_24h: usize,
    pub last_failover_at: Option<Timestamp>,
}

struct FailoverState {
    regions: RegionRegistry,
    failure_counts: HashMap<RegionId, u32>,
    success_counts: HashMap<RegionId, u32>,
    history: VecDeque<FailoverEvent>,
    pending: Vec<FailoverEvent>,
    last_failover_at: Option<Timestamp>,
}

/// Failover manager.
pub struct FailoverManager {
    config: FailoverConfig,
    events: EventBus,
    state: Mutex<FailoverState>,
    hooks: RwLock<Vec<Arc<dyn FailoverHook>>>,
}

impl FailoverManager {
    /// Create a new failover manager.
    pub fn new(config: FailoverConfig, events: EventBus) -> Self {
        Self {
            config,
            events,
            state: Mutex::new(FailoverState {
                regions: RegionRegistry::new(),
                failure_counts: HashMap::new(),
                success_counts: HashMap::new(),
                history: VecDeque::new(),
                pending: Vec::new(),
                last_failover_at: None,
            }),
            hooks: RwLock::new(Vec::new()),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &FailoverConfig {
        &self.config
    }

    /// Register a post-flip hook.
    pub fn add_hook(&self, hook: Arc<dyn FailoverHook>) {
        self.hooks.write().push(hook);
    }

    /// Add a region. Adding a primary while one exists is rejected.
    pub fn add_region(&self, region: RegionConfig) -> Result<()> {
        let mut state = self.state.lock();
        let id = region.id.clone();
        state.regions.add_region(region)?;
        state.failure_counts.insert(id.clone(), 0);
        state.success_counts.insert(id, 0);
        Ok(())
    }

    /// Remove a region, re-electing a primary if needed.
    ///
    /// Pending failovers involving the region are failed. Losing the last
    /// eligible primary emits [`HaEvent::PrimaryLost`].
    pub fn remove_region(&self, region_id: &str) -> Result<RemovedRegion> {
        let mut state = self.state.lock();
        let (config, changes) = state.regions.remove_region(region_id)?;
        state.failure_counts.remove(region_id);
        state.success_counts.remove(region_id);

        let (orphaned, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut state.pending)
            .into_iter()
            .partition(|e| e.to_region == region_id || e.from_region.as_deref() == Some(region_id));
        state.pending = pending;
        for mut event in orphaned {
            event.status = FailoverStatus::Failed;
            event.error = Some(format!("region {} removed", region_id));
            event.completed_at = Some(now());
            self.record_history(&mut state, event.clone());
            self.events.emit(HaEvent::FailoverFailed { event });
        }

        let new_primary = changes
            .iter()
            .find(|c| c.is_primary)
            .map(|c| c.region.clone());
        self.emit_changes(changes);

        if config.is_primary {
            match &new_primary {
                Some(primary) => {
                    info!(removed = %region_id, primary = %primary, "re-elected primary after removal")
                }
                None => {
                    warn!(removed = %region_id, "primary removed and no eligible region remains");
                    self.events.emit(HaEvent::PrimaryLost {
                        previous: region_id.to_string(),
                        timestamp: now(),
                    });
                }
            }
        }

        Ok(RemovedRegion { config, new_primary })
    }

    /// Snapshot of all regions.
    pub fn regions(&self) -> Vec<RegionConfig> {
        self.state.lock().regions.list().to_vec()
    }

    /// Get a region.
    pub fn region(&self, region_id: &str) -> Option<RegionConfig> {
        self.state.lock().regions.get(region_id).cloned()
    }

    /// Current primary region.
    pub fn primary(&self) -> Option<RegionConfig> {
        self.state.lock().regions.primary().cloned()
    }

    /// Operator status override, e.g. draining a region.
    pub fn set_region_status(&self, region_id: &str, status: RegionStatus) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(change) = state.regions.set_status(region_id, status)? {
            if change.is_primary && !status.can_be_primary() {
                warn!(region = %region_id, %status, "primary region is no longer serving");
            }
            self.events.emit(change.into());
        }
        Ok(())
    }

    /// Consecutive failures currently counted for a region.
    pub fn failure_count(&self, region_id: &str) -> u32 {
        self.state
            .lock()
            .failure_counts
            .get(region_id)
            .copied()
            .unwrap_or(0)
    }

    /// Fold a probe result into the failure counters.
    ///
    /// A primary crossing the failure threshold triggers an automatic
    /// evaluation; when no failover results it is marked degraded but keeps
    /// the primary role. Any other region crossing the threshold is marked
    /// degraded, and restored after `recovery_threshold` healthy probes.
    pub fn record_health_result(&self, result: &HealthCheckResult) -> Option<FailoverEvent> {
        let mut state = self.state.lock();
        let region = state.regions.get(&result.region).cloned()?;

        if result.healthy {
            state.failure_counts.insert(region.id.clone(), 0);
            let successes = {
                let count = state.success_counts.entry(region.id.clone()).or_insert(0);
                *count += 1;
                *count
            };
            if region.status == RegionStatus::Degraded && successes >= self.config.recovery_threshold {
                let restored = if region.is_primary {
                    RegionStatus::Active
                } else {
                    RegionStatus::Standby
                };
                if let Ok(Some(change)) = state.regions.set_status(&region.id, restored) {
                    info!(region = %region.id, status = %restored, "region restored after recovery");
                    self.events.emit(change.into());
                }
            }
            return None;
        }

        state.success_counts.insert(region.id.clone(), 0);
        let failures = {
            let count = state.failure_counts.entry(region.id.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if failures < self.config.failure_threshold {
            return None;
        }

        if region.is_primary {
            let awaiting = state
                .pending
                .iter()
                .any(|e| e.from_region.as_deref() == Some(region.id.as_str()));
            if awaiting {
                return None;
            }
            if self.config.mode != FailoverMode::Manual {
                match self.evaluate_locked(&mut state, &region.id, FailoverTrigger::HealthCheck) {
                    Ok(Some(event)) => return Some(event),
                    Ok(None) => {}
                    Err(e) => warn!(region = %region.id, error = %e, "failover evaluation failed"),
                }
            }
        }

        let still_serving = state
            .regions
            .get(&region.id)
            .map_or(false, |r| r.status.can_be_primary());
        if still_serving {
            if let Ok(Some(change)) = state.regions.set_status(&region.id, RegionStatus::Degraded) {
                warn!(region = %region.id, failures, "region marked degraded");
                self.events.emit(change.into());
            }
        }
        None
    }

    /// Evaluate an automatic failover away from `from_region`.
    ///
    /// Returns `Ok(None)` when a gate rejects the trigger or no target is
    /// eligible, and an in-progress event when it was parked for approval.
    pub fn evaluate_failover(&self, from_region: &str, trigger: FailoverTrigger) -> Result<Option<FailoverEvent>> {
        let mut state = self.state.lock();
        self.evaluate_locked(&mut state, from_region, trigger)
    }

    /// Operator-initiated failover to `to_region`.
    ///
    /// Bypasses the mode, cooldown, rate and approval gates. The event is
    /// still recorded and counts toward the windows later triggers see.
    pub fn manual_failover(&self, to_region: &str, reason: &str) -> Result<FailoverEvent> {
        let mut state = self.state.lock();
        let target = state
            .regions
            .get(to_region)
            .cloned()
            .ok_or_else(|| Error::RegionNotFound(to_region.to_string()))?;
        if !target.is_routable() {
            return Err(Error::config(format!(
                "region {} is {} and cannot become primary",
                target.id, target.status
            )));
        }
        if target.is_primary {
            return Err(Error::config(format!("region {} is already primary", target.id)));
        }

        let from = state.regions.primary().map(|r| r.id.clone());
        warn!(
            from = from.as_deref().unwrap_or("none"),
            to = %to_region,
            reason,
            "manual failover bypassing cooldown, rate and approval gates"
        );

        let event = FailoverEvent::new(from.as_deref(), to_region, reason.to_string(), FailoverTrigger::Manual);
        self.events.emit(HaEvent::FailoverStarted { event: event.clone() });
        Ok(self.execute(&mut state, event))
    }

    /// Approve a pending failover and execute it.
    pub fn approve_failover(&self, event_id: &str) -> Result<FailoverEvent> {
        let mut state = self.state.lock();
        let event = Self::take_pending(&mut state, event_id)?;
        info!(event_id, to = %event.to_region, "failover approved");
        Ok(self.execute(&mut state, event))
    }

    /// Reject a pending failover. Region statuses are left untouched.
    pub fn reject_failover(&self, event_id: &str, reason: &str) -> Result<FailoverEvent> {
        let mut state = self.state.lock();
        let mut event = Self::take_pending(&mut state, event_id)?;
        event.status = FailoverStatus::Failed;
        event.error = Some(format!("rejected: {}", reason));
        event.completed_at = Some(now());

        info!(event_id, reason, "failover rejected");
        self.record_history(&mut state, event.clone());
        self.events.emit(HaEvent::FailoverFailed { event: event.clone() });
        Ok(event)
    }

    /// Failovers awaiting approval.
    pub fn pending_approvals(&self) -> Vec<FailoverEvent> {
        self.state.lock().pending.clone()
    }

    /// Get failover history, oldest first.
    pub fn history(&self) -> Vec<FailoverEvent> {
        self.state.lock().history.iter().cloned().collect()
    }

    /// Get recent failovers (last n), newest first.
    pub fn recent_failovers(&self, n: usize) -> Vec<FailoverEvent> {
        self.state.lock().history.iter().rev().take(n).cloned().collect()
    }

    /// Most recent history entry.
    pub fn last_failover(&self) -> Option<FailoverEvent> {
        self.state.lock().history.back().cloned()
    }

    /// History entries started within the trailing `window_ms`.
    pub fn failovers_within(&self, window_ms: u64) -> usize {
        let state = self.state.lock();
        Self::count_within(&state, window_ms, now())
    }

    /// Get statistics.
    pub fn stats(&self) -> FailoverStats {
        let state = self.state.lock();
        let at = now();
        let count = |status: FailoverStatus| state.history.iter().filter(|e| e.status == status).count();
        FailoverStats {
            total: state.history.len(),
            completed: count(FailoverStatus::Completed),
            failed: count(FailoverStatus::Failed),
            rolled_back: count(FailoverStatus::RolledBack),
            pending: state.pending.len(),
            last_hour: Self::count_within(&state, RATE_WINDOW_MS, at),
            last_24h: Self::count_within(&state, 24 * RATE_WINDOW_MS, at),
            last_failover_at: state.last_failover_at,
        }
    }

    fn evaluate_locked(
        &self,
        state: &mut FailoverState,
        from_region: &str,
        trigger: FailoverTrigger,
    ) -> Result<Option<FailoverEvent>> {
        if !state.regions.contains(from_region) {
            return Err(Error::RegionNotFound(from_region.to_string()));
        }
        if self.config.mode == FailoverMode::Manual {
            debug!(region = %from_region, "automatic failover disabled in manual mode");
            return Ok(None);
        }

        let at = now();
        if let Some(last) = state.last_failover_at {
            let elapsed = millis_between(last, at);
            if elapsed < self.config.cooldown_ms {
                info!(
                    region = %from_region,
                    elapsed_ms = elapsed,
                    cooldown_ms = self.config.cooldown_ms,
                    "failover suppressed by cooldown"
                );
                return Ok(None);
            }
        }

        let recent = Self::count_within(state, RATE_WINDOW_MS, at);
        if recent >= self.config.max_failovers_per_hour as usize {
            warn!(
                region = %from_region,
                recent,
                max = self.config.max_failovers_per_hour,
                "failover suppressed by hourly limit"
            );
            return Ok(None);
        }

        if state
            .pending
            .iter()
            .any(|e| e.from_region.as_deref() == Some(from_region))
        {
            debug!(region = %from_region, "failover already awaiting approval");
            return Ok(None);
        }

        let Some(target) = self.select_target(state, from_region) else {
            warn!(region = %from_region, %trigger, "no eligible failover target");
            return Ok(None);
        };

        let reason = format!("{} trigger on region {}", trigger, from_region);
        let event = FailoverEvent::new(Some(from_region), &target, reason, trigger);
        info!(event_id = %event.id, from = %from_region, to = %target, %trigger, "failover started");
        self.events.emit(HaEvent::FailoverStarted { event: event.clone() });

        if self.config.needs_approval() {
            info!(event_id = %event.id, "failover awaiting approval");
            state.pending.push(event.clone());
            self.events.emit(HaEvent::FailoverApprovalRequired { event: event.clone() });
            return Ok(Some(event));
        }

        Ok(Some(self.execute(state, event)))
    }

    /// Highest-weight region other than `from` that is routable and below the
    /// failure threshold. Ties keep insertion order.
    fn select_target(&self, state: &FailoverState, from_region: &str) -> Option<RegionId> {
        state
            .regions
            .list()
            .iter()
            .filter(|r| r.id != from_region && r.is_routable())
            .filter(|r| {
                state.failure_counts.get(&r.id).copied().unwrap_or(0) < self.config.failure_threshold
            })
            .fold(None::<&RegionConfig>, |best, r| match best {
                Some(b) if b.weight >= r.weight => Some(b),
                _ => Some(r),
            })
            .map(|r| r.id.clone())
    }

    fn execute(&self, state: &mut FailoverState, mut event: FailoverEvent) -> FailoverEvent {
        // Cooldown runs from the event's start, never moving backwards.
        let started = event.started_at;
        state.last_failover_at = Some(state.last_failover_at.map_or(started, |last| last.max(started)));
        let snapshot: Vec<(RegionId, RegionStatus, bool)> = state
            .regions
            .list()
            .iter()
            .map(|r| (r.id.clone(), r.status, r.is_primary))
            .collect();

        match self.apply(state, &event) {
            Ok(changes) => {
                event.status = FailoverStatus::Completed;
                event.completed_at = Some(now());
                info!(
                    event_id = %event.id,
                    to = %event.to_region,
                    duration_ms = event.duration_ms().unwrap_or(0),
                    "failover completed"
                );
                self.emit_changes(changes);
                self.record_history(state, event.clone());
                self.events.emit(HaEvent::FailoverCompleted { event: event.clone() });
            }
            Err(e) => {
                error!(event_id = %event.id, error = %e, "failover execution failed");
                event.error = Some(e.to_string());
                event.completed_at = Some(now());
                event.status = FailoverStatus::Failed;

                if self.config.rollback_on_failure {
                    for (id, status, is_primary) in &snapshot {
                        state.regions.restore(id, *status, *is_primary);
                    }
                    event.status = FailoverStatus::RolledBack;
                    warn!(event_id = %event.id, "prior primary assignment restored");
                }
                self.record_history(state, event.clone());
                self.events.emit(HaEvent::FailoverFailed { event: event.clone() });
            }
        }
        event
    }

    fn apply(&self, state: &mut FailoverState, event: &FailoverEvent) -> Result<Vec<StatusChange>> {
        let target = state
            .regions
            .get(&event.to_region)
            .ok_or_else(|| Error::execution(format!("target region {} no longer exists", event.to_region)))?;
        if !target.is_routable() {
            return Err(Error::execution(format!(
                "target region {} is {}",
                target.id, target.status
            )));
        }

        let mut changes = state.regions.set_primary(&event.to_region)?;
        if let Some(from) = event.from_region.as_deref() {
            if let Some(change) = state.regions.set_status(from, RegionStatus::Standby)? {
                changes.push(change);
            }
        }

        for hook in self.hooks.read().iter() {
            hook.on_failover(event)?;
        }
        Ok(coalesce(changes))
    }

    fn take_pending(state: &mut FailoverState, event_id: &str) -> Result<FailoverEvent> {
        match state.pending.iter().position(|e| e.id == event_id) {
            Some(idx) => Ok(state.pending.remove(idx)),
            None if state.history.iter().any(|e| e.id == event_id) => {
                Err(Error::FailoverNotPending(event_id.to_string()))
            }
            None => Err(Error::FailoverNotFound(event_id.to_string())),
        }
    }

    fn record_history(&self, state: &mut FailoverState, event: FailoverEvent) {
        state.history.push_back(event);
        while state.history.len() > self.config.max_history.max(1) {
            state.history.pop_front();
        }
    }

    fn count_within(state: &FailoverState, window_ms: u64, at: Timestamp) -> usize {
        state
            .history
            .iter()
            .filter(|e| millis_between(e.started_at, at) < window_ms)
            .count()
    }

    fn emit_changes(&self, changes: Vec<StatusChange>) {
        for change in changes {
            self.events.emit(change.into());
        }
    }
}

/// Merge successive changes to one region into a single change.
fn coalesce(changes: Vec<StatusChange>) -> Vec<StatusChange> {
    let mut merged: Vec<StatusChange> = Vec::new();
    for change in changes {
        match merged.iter_mut().find(|c| c.region == change.region) {
            Some(existing) => {
                existing.to = change.to;
                existing.is_primary = change.is_primary;
            }
            None => merged.push(change),
        }
    }
    merged
}
