//! Region selection for inbound requests.
//!
//! Selection precedence:
//! 1. drop excluded, offline/draining and known-unhealthy regions
//! 2. honor an unexpired session pin
//! 3. honor a preferred region
//! 4. apply the configured [`RoutingStrategy`]
//!
//! An empty candidate set yields `None`, never an error.

use crate::core::RegionId;
use crate::region::health::HealthCheckResult;
use crate::region::manager::RegionConfig;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Maximum number of fallback regions attached to a decision.
const MAX_FALLBACKS: usize = 2;

/// Routing strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Cycle through available regions
    RoundRobin,
    /// Random draw proportional to region weight
    Weighted,
    /// Fewest open connections
    LeastConnections,
    /// Lowest last probe latency
    LatencyBased,
    /// Closest region to the caller, else lowest latency
    GeoProximity,
    /// Highest-weight primary, else highest-weight region
    Failover,
}

/// Why a region was selected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteReason {
    SessionAffinity,
    Preferred,
    RoundRobin,
    Weighted,
    LeastConnections,
    LatencyBased,
    GeoProximity,
    Failover,
}

/// Coarse geographic grouping used by geo-proximity routing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoArea {
    NorthAmerica,
    SouthAmerica,
    Europe,
    AsiaPacific,
    MiddleEast,
    Africa,
}

impl GeoArea {
    /// Derive the area from a region ID prefix such as `eu-west-1`.
    pub fn from_region_id(region_id: &str) -> Option<Self> {
        let prefix = region_id.split('-').next()?.to_ascii_lowercase();
        match prefix.as_str() {
            "us" | "ca" | "na" => Some(GeoArea::NorthAmerica),
            "sa" => Some(GeoArea::SouthAmerica),
            "eu" => Some(GeoArea::Europe),
            "ap" => Some(GeoArea::AsiaPacific),
            "me" => Some(GeoArea::MiddleEast),
            "af" => Some(GeoArea::Africa),
            _ => None,
        }
    }

    /// Resolve a caller origin hint: an ISO country code, a region ID, or an area name.
    pub fn from_hint(hint: &str) -> Option<Self> {
        let hint = hint.trim();
        match hint.to_ascii_uppercase().as_str() {
            "US" | "CA" | "MX" => return Some(GeoArea::NorthAmerica),
            "BR" | "AR" | "CL" | "CO" | "PE" => return Some(GeoArea::SouthAmerica),
            "GB" | "UK" | "DE" | "FR" | "IE" | "NL" | "ES" | "IT" | "SE" | "PL" | "CH" => {
                return Some(GeoArea::Europe)
            }
            "JP" | "KR" | "CN" | "SG" | "IN" | "AU" | "NZ" | "HK" | "TW" | "ID" => {
                return Some(GeoArea::AsiaPacific)
            }
            "AE" | "SA" | "IL" | "QA" | "BH" => return Some(GeoArea::MiddleEast),
            "ZA" | "NG" | "KE" | "EG" => return Some(GeoArea::Africa),
            _ => {}
        }
        if let Ok(area) = serde_json::from_value(serde_json::Value::String(hint.to_ascii_lowercase())) {
            return Some(area);
        }
        if hint.contains('-') {
            return Self::from_region_id(hint);
        }
        None
    }
}

/// Session affinity settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionAffinityConfig {
    /// How long a pin lasts (ms)
    pub ttl_ms: u64,
    /// Request attribute carrying the session ID, informational for the caller
    pub key: String,
}

impl Default for SessionAffinityConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 3_600_000,
            key: "session_id".to_string(),
        }
    }
}

/// Load balancer configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalancerConfig {
    /// Strategy used when no pin or preference applies
    pub strategy: RoutingStrategy,
    /// Session affinity, disabled when absent
    pub session_affinity: Option<SessionAffinityConfig>,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            strategy: RoutingStrategy::LatencyBased,
            session_affinity: None,
        }
    }
}

impl LoadBalancerConfig {
    /// Set strategy.
    pub fn with_strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Enable session affinity with the given TTL.
    pub fn with_session_affinity(mut self, ttl: Duration) -> Self {
        self.session_affinity = Some(SessionAffinityConfig {
            ttl_ms: ttl.as_millis() as u64,
            ..Default::default()
        });
        self
    }
}

/// Per-request routing hints.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingHints {
    /// Session to pin
    pub session_id: Option<String>,
    /// Region the caller would like, if available
    pub preferred_region: Option<RegionId>,
    /// Regions that must not be selected
    pub exclude: Vec<RegionId>,
    /// Caller origin (country code, region ID or area)
    pub client_origin: Option<String>,
    /// Overrides the configured strategy
    pub strategy: Option<RoutingStrategy>,
}

impl RoutingHints {
    /// Hints for a session.
    pub fn session(session_id: &str) -> Self {
        Self {
            session_id: Some(session_id.to_string()),
            ..Default::default()
        }
    }

    /// Override the strategy.
    pub fn with_strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Prefer a region.
    pub fn prefer(mut self, region_id: &str) -> Self {
        self.preferred_region = Some(region_id.to_string());
        self
    }

    /// Exclude a region.
    pub fn exclude(mut self, region_id: &str) -> Self {
        self.exclude.push(region_id.to_string());
        self
    }

    /// Set caller origin.
    pub fn from_origin(mut self, origin: &str) -> Self {
        self.client_origin = Some(origin.to_string());
        self
    }
}

/// Routing decision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    /// Selected region
    pub region: RegionId,
    /// Endpoint of the selected region
    pub endpoint: String,
    /// Selection reason
    pub reason: RouteReason,
    /// Up to two alternates, lowest known latency first
    pub fallbacks: Vec<RegionId>,
}

/// Routing statistics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BalancerStats {
    pub total_routes: u64,
    pub successful_routes: u64,
    pub no_region_available: u64,
    pub routes_by_region: HashMap<RegionId, u64>,
    pub active_connections: HashMap<RegionId, u64>,
    pub active_sessions: usize,
}

#[derive(Clone, Debug)]
struct SessionPin {
    region: RegionId,
    expires_at: Instant,
}

#[derive(Clone, Debug)]
struct HealthSnapshot {
    healthy: bool,
    latency_ms: u64,
}

#[derive(Default)]
struct BalancerState {
    rr_index: usize,
    health: HashMap<RegionId, HealthSnapshot>,
    connections: HashMap<RegionId, u64>,
    sessions: HashMap<String, SessionPin>,
    stats: BalancerStats,
}

/// Region load balancer.
pub struct LoadBalancer {
    config: LoadBalancerConfig,
    state: Mutex<BalancerState>,
}

impl LoadBalancer {
    /// Create a new load balancer.
    pub fn new(config: LoadBalancerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BalancerState::default()),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &LoadBalancerConfig {
        &self.config
    }

    /// Start tracking a region.
    pub fn add_region(&self, region_id: &str) {
        self.state.lock().connections.entry(region_id.to_string()).or_insert(0);
    }

    /// Forget everything known about a region, including pins to it.
    pub fn remove_region(&self, region_id: &str) {
        let mut state = self.state.lock();
        state.health.remove(region_id);
        state.connections.remove(region_id);
        state.sessions.retain(|_, pin| pin.region != region_id);
        state.stats.routes_by_region.remove(region_id);
    }

    /// Record the latest health snapshot for a tracked region.
    ///
    /// Results for regions never added, or already removed, are ignored.
    pub fn update_health(&self, result: &HealthCheckResult) {
        let mut state = self.state.lock();
        if !state.connections.contains_key(&result.region) {
            trace!(region = %result.region, "ignoring health for untracked region");
            return;
        }
        state.health.insert(
            result.region.clone(),
            HealthSnapshot {
                healthy: result.healthy,
                latency_ms: result.latency_ms,
            },
        );
    }

    /// Record an opened connection against a tracked region.
    pub fn increment_connections(&self, region_id: &str) {
        if let Some(count) = self.state.lock().connections.get_mut(region_id) {
            *count += 1;
        }
    }

    /// Record a closed connection.
    pub fn decrement_connections(&self, region_id: &str) {
        if let Some(count) = self.state.lock().connections.get_mut(region_id) {
            *count = count.saturating_sub(1);
        }
    }

    /// Open connections recorded for a region.
    pub fn connections(&self, region_id: &str) -> u64 {
        self.state.lock().connections.get(region_id).copied().unwrap_or(0)
    }

    /// Region a session is pinned to, if the pin is unexpired.
    pub fn session_region(&self, session_id: &str) -> Option<RegionId> {
        let now = Instant::now();
        let mut state = self.state.lock();
        match state.sessions.get(session_id) {
            Some(pin) if pin.expires_at > now => Some(pin.region.clone()),
            Some(_) => {
                state.sessions.remove(session_id);
                None
            }
            None => None,
        }
    }

    /// Drop expired session pins. Returns how many were removed.
    pub fn sweep_expired_sessions(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();
        let before = state.sessions.len();
        state.sessions.retain(|_, pin| pin.expires_at > now);
        let removed = before - state.sessions.len();
        if removed > 0 {
            debug!(removed, "swept expired session pins");
        }
        removed
    }

    /// Select a region for a request.
    pub fn route(&self, regions: &[RegionConfig], hints: &RoutingHints) -> Option<RouteDecision> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.stats.total_routes += 1;

        let available: Vec<&RegionConfig> = regions
            .iter()
            .filter(|r| r.is_routable())
            .filter(|r| !hints.exclude.contains(&r.id))
            .filter(|r| state.health.get(&r.id).map_or(true, |h| h.healthy))
            .collect();

        if available.is_empty() {
            state.stats.no_region_available += 1;
            debug!("no region available for routing");
            return None;
        }

        let affinity = self.config.session_affinity.as_ref();
        let session_id = hints.session_id.as_deref().filter(|_| affinity.is_some());

        let mut selected: Option<(&RegionConfig, RouteReason)> = None;

        if let Some(session_id) = session_id {
            let pinned = match state.sessions.get(session_id) {
                Some(pin) if pin.expires_at > now => Some(pin.region.clone()),
                Some(_) => {
                    state.sessions.remove(session_id);
                    None
                }
                None => None,
            };
            if let Some(pinned) = pinned {
                selected = available
                    .iter()
                    .find(|r| r.id == pinned)
                    .map(|r| (*r, RouteReason::SessionAffinity));
            }
        }

        if selected.is_none() {
            if let Some(preferred) = hints.preferred_region.as_deref() {
                selected = available
                    .iter()
                    .find(|r| r.id == preferred)
                    .map(|r| (*r, RouteReason::Preferred));
            }
        }

        let (region, reason) = match selected {
            Some(found) => found,
            None => {
                let strategy = hints.strategy.unwrap_or(self.config.strategy);
                Self::apply_strategy(&mut state, strategy, &available, hints)?
            }
        };

        if let (Some(session_id), Some(affinity)) = (session_id, affinity) {
            if reason != RouteReason::SessionAffinity {
                state.sessions.insert(
                    session_id.to_string(),
                    SessionPin {
                        region: region.id.clone(),
                        expires_at: now + Duration::from_millis(affinity.ttl_ms),
                    },
                );
            }
        }

        let fallbacks = Self::fallbacks(&state, &available, &region.id);
        state.stats.successful_routes += 1;
        *state
            .stats
            .routes_by_region
            .entry(region.id.clone())
            .or_insert(0) += 1;

        trace!(region = %region.id, ?reason, "routed request");
        Some(RouteDecision {
            region: region.id.clone(),
            endpoint: region.endpoint.clone(),
            reason,
            fallbacks,
        })
    }

    /// Get statistics.
    pub fn stats(&self) -> BalancerStats {
        let now = Instant::now();
        let state = self.state.lock();
        let mut stats = state.stats.clone();
        stats.active_connections = state.connections.clone();
        stats.active_sessions = state
            .sessions
            .values()
            .filter(|pin| pin.expires_at > now)
            .count();
        stats
    }

    fn apply_strategy<'a>(
        state: &mut BalancerState,
        strategy: RoutingStrategy,
        available: &[&'a RegionConfig],
        hints: &RoutingHints,
    ) -> Option<(&'a RegionConfig, RouteReason)> {
        match strategy {
            RoutingStrategy::RoundRobin => {
                let idx = state.rr_index % available.len();
                state.rr_index = state.rr_index.wrapping_add(1);
                Some((available[idx], RouteReason::RoundRobin))
            }
            RoutingStrategy::Weighted => {
                Self::weighted_pick(available).map(|r| (r, RouteReason::Weighted))
            }
            RoutingStrategy::LeastConnections => available
                .iter()
                .min_by_key(|r| state.connections.get(&r.id).copied().unwrap_or(0))
                .map(|r| (*r, RouteReason::LeastConnections)),
            RoutingStrategy::LatencyBased => {
                Self::lowest_latency(state, available).map(|r| (r, RouteReason::LatencyBased))
            }
            RoutingStrategy::GeoProximity => {
                let area = hints.client_origin.as_deref().and_then(GeoArea::from_hint);
                let nearby: Vec<&RegionConfig> = match area {
                    Some(area) => available
                        .iter()
                        .filter(|r| GeoArea::from_region_id(&r.id) == Some(area))
                        .copied()
                        .collect(),
                    None => Vec::new(),
                };
                if nearby.is_empty() {
                    Self::lowest_latency(state, available).map(|r| (r, RouteReason::LatencyBased))
                } else {
                    Self::lowest_latency(state, &nearby).map(|r| (r, RouteReason::GeoProximity))
                }
            }
            RoutingStrategy::Failover => {
                let primary = available
                    .iter()
                    .filter(|r| r.is_primary)
                    .fold(None, Self::heavier);
                primary
                    .or_else(|| available.iter().fold(None, Self::heavier))
                    .map(|r| (r, RouteReason::Failover))
            }
        }
    }

    /// Keeps the earlier region on weight ties.
    fn heavier<'a>(best: Option<&'a RegionConfig>, r: &&'a RegionConfig) -> Option<&'a RegionConfig> {
        match best {
            Some(b) if b.weight >= r.weight => Some(b),
            _ => Some(*r),
        }
    }

    fn weighted_pick<'a>(available: &[&'a RegionConfig]) -> Option<&'a RegionConfig> {
        let total: u64 = available.iter().map(|r| r.weight as u64).sum();
        let mut rng = rand::thread_rng();
        if total == 0 {
            return available.get(rng.gen_range(0..available.len())).copied();
        }

        let draw = rng.gen_range(0..total);
        let mut cumulative = 0u64;
        for region in available {
            cumulative += region.weight as u64;
            if draw < cumulative {
                return Some(*region);
            }
        }
        available.last().copied()
    }

    fn latency_of(state: &BalancerState, region_id: &str) -> u64 {
        state
            .health
            .get(region_id)
            .map(|h| h.latency_ms)
            .unwrap_or(u64::MAX)
    }

    fn lowest_latency<'a>(state: &BalancerState, available: &[&'a RegionConfig]) -> Option<&'a RegionConfig> {
        available
            .iter()
            .min_by_key(|r| Self::latency_of(state, &r.id))
            .copied()
    }

    fn fallbacks(state: &BalancerState, available: &[&RegionConfig], selected: &str) -> Vec<RegionId> {
        let mut others: Vec<&RegionConfig> = available
            .iter()
            .filter(|r| r.id != selected)
            .copied()
            .collect();
        others.sort_by_key(|r| Self::latency_of(state, &r.id));
        others
            .into_iter()
            .take(MAX_FALLBACKS)
            .map(|r| r.id.clone())
            .collect()
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new(LoadBalancerConfig::default())
    }
}
