//! Threshold alerting for aggregate HA metrics.
//!
//! Rules compare the fleet-wide latency, error rate and availability
//! against configured thresholds. Alerts are raised only; delivery to
//! notification channels belongs to subscribers of the event bus.

use crate::core::{now, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Average probe latency (ms).
pub const METRIC_LATENCY: &str = "latency_ms";
/// Percentage of regions known unhealthy.
pub const METRIC_ERROR_RATE: &str = "error_rate";
/// Percentage of regions not known unhealthy.
pub const METRIC_AVAILABILITY: &str = "availability";

/// Monitoring loop configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Metrics evaluation interval (ms)
    pub interval_ms: u64,
    /// Average latency above which an alert is raised (ms)
    pub latency_threshold_ms: u64,
    /// Error rate above which an alert is raised (percent)
    pub error_rate_threshold: f64,
    /// Availability below which an alert is raised (percent)
    pub availability_threshold: f64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
            latency_threshold_ms: 1000,
            error_rate_threshold: 5.0,
            availability_threshold: 99.9,
        }
    }
}

impl MonitoringConfig {
    /// Set interval.
    pub fn with_interval_ms(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    /// Set latency threshold.
    pub fn with_latency_threshold_ms(mut self, threshold: u64) -> Self {
        self.latency_threshold_ms = threshold;
        self
    }

    /// Set availability threshold.
    pub fn with_availability_threshold(mut self, threshold: f64) -> Self {
        self.availability_threshold = threshold;
        self
    }
}

/// One sample of the aggregate metrics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HaMetrics {
    pub latency_ms: f64,
    pub error_rate: f64,
    pub availability: f64,
}

impl HaMetrics {
    fn value(&self, metric: &str) -> Option<f64> {
        match metric {
            METRIC_LATENCY => Some(self.latency_ms),
            METRIC_ERROR_RATE => Some(self.error_rate),
            METRIC_AVAILABILITY => Some(self.availability),
            _ => None,
        }
    }
}

/// Alert severity level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// Alert state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    /// Threshold exceeded but pending
    Pending,
    /// Actively firing
    Firing,
    /// Resolved
    Resolved,
}

/// Alert condition operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCondition {
    GreaterThan,
    LessThan,
}

/// An alert rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Rule name
    pub name: String,
    /// Metric to check
    pub metric: String,
    /// Condition
    pub condition: AlertCondition,
    /// Threshold value
    pub threshold: f64,
    /// Time the breach must persist before firing (ms)
    pub for_ms: u64,
    /// Severity
    pub severity: AlertSeverity,
    /// Annotations
    pub annotations: HashMap<String, String>,
}

impl AlertRule {
    /// Create a new alert rule.
    pub fn new(name: &str, metric: &str, condition: AlertCondition, threshold: f64) -> Self {
        Self {
            name: name.to_string(),
            metric: metric.to_string(),
            condition,
            threshold,
            for_ms: 0,
            severity: AlertSeverity::Warning,
            annotations: HashMap::new(),
        }
    }

    /// Set severity.
    pub fn with_severity(mut self, severity: AlertSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Set pending duration.
    pub fn with_for_ms(mut self, for_ms: u64) -> Self {
        self.for_ms = for_ms;
        self
    }

    /// Add annotation.
    pub fn with_annotation(mut self, key: &str, value: &str) -> Self {
        self.annotations.insert(key.to_string(), value.to_string());
        self
    }

    /// Check if value triggers this rule.
    pub fn evaluate(&self, value: f64) -> bool {
        match self.condition {
            AlertCondition::GreaterThan => value > self.threshold,
            AlertCondition::LessThan => value < self.threshold,
        }
    }
}

/// An alert instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Alert name (from rule)
    pub name: String,
    /// Metric that breached
    pub metric: String,
    /// Current state
    pub state: AlertState,
    /// Severity
    pub severity: AlertSeverity,
    /// Current metric value
    pub value: f64,
    /// Threshold that was crossed
    pub threshold: f64,
    /// When the breach was first seen
    pub started_at: Timestamp,
    /// When alert started firing
    pub fired_at: Option<Timestamp>,
    /// When alert resolved
    pub resolved_at: Option<Timestamp>,
    /// Annotations
    pub annotations: HashMap<String, String>,
}

impl Alert {
    /// Create from a rule.
    pub fn from_rule(rule: &AlertRule, value: f64) -> Self {
        Self {
            name: rule.name.clone(),
            metric: rule.metric.clone(),
            state: AlertState::Pending,
            severity: rule.severity,
            value,
            threshold: rule.threshold,
            started_at: now(),
            fired_at: None,
            resolved_at: None,
            annotations: rule.annotations.clone(),
        }
    }

    /// Transition to firing.
    pub fn fire(&mut self) {
        self.state = AlertState::Firing;
        self.fired_at = Some(now());
    }

    /// Resolve the alert.
    pub fn resolve(&mut self) {
        self.state = AlertState::Resolved;
        self.resolved_at = Some(now());
    }

    /// Check if firing.
    pub fn is_firing(&self) -> bool {
        self.state == AlertState::Firing
    }
}

/// Alert manager for handling alerts.
///
/// A breach raises one alert when it starts firing; it is not raised again
/// until the metric recovers and breaches anew.
pub struct AlertManager {
    rules: Vec<AlertRule>,
    alerts: HashMap<String, Alert>,
    history: Vec<Alert>,
    max_history: usize,
}

impl AlertManager {
    /// Create a new alert manager.
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            alerts: HashMap::new(),
            history: Vec::new(),
            max_history: 100,
        }
    }

    /// Create a manager with the latency, error rate and availability rules.
    pub fn from_config(config: &MonitoringConfig) -> Self {
        let mut manager = Self::new();
        manager.add_rule(
            AlertRule::new(
                "high_latency",
                METRIC_LATENCY,
                AlertCondition::GreaterThan,
                config.latency_threshold_ms as f64,
            )
            .with_annotation("summary", "average region latency above threshold"),
        );
        manager.add_rule(
            AlertRule::new(
                "high_error_rate",
                METRIC_ERROR_RATE,
                AlertCondition::GreaterThan,
                config.error_rate_threshold,
            )
            .with_severity(AlertSeverity::Critical),
        );
        manager.add_rule(
            AlertRule::new(
                "low_availability",
                METRIC_AVAILABILITY,
                AlertCondition::LessThan,
                config.availability_threshold,
            )
            .with_severity(AlertSeverity::Critical),
        );
        manager
    }

    /// Add an alert rule.
    pub fn add_rule(&mut self, rule: AlertRule) {
        self.rules.push(rule);
    }

    /// Evaluate a metric value against all rules.
    ///
    /// Returns alerts that started firing on this call.
    pub fn evaluate(&mut self, metric: &str, value: f64) -> Vec<Alert> {
        let mut raised = Vec::new();
        for rule in self.rules.iter().filter(|r| r.metric == metric) {
            if rule.evaluate(value) {
                let alert = self
                    .alerts
                    .entry(rule.name.clone())
                    .or_insert_with(|| Alert::from_rule(rule, value));
                alert.value = value;
                if alert.state == AlertState::Pending {
                    let elapsed = crate::core::millis_between(alert.started_at, now());
                    if elapsed >= rule.for_ms {
                        alert.fire();
                        raised.push(alert.clone());
                    }
                }
            } else if let Some(mut alert) = self.alerts.remove(&rule.name) {
                alert.value = value;
                alert.resolve();
                self.history.push(alert);
                if self.history.len() > self.max_history {
                    self.history.remove(0);
                }
            }
        }
        raised
    }

    /// Evaluate a full metrics sample.
    pub fn evaluate_metrics(&mut self, metrics: &HaMetrics) -> Vec<Alert> {
        [METRIC_LATENCY, METRIC_ERROR_RATE, METRIC_AVAILABILITY]
            .into_iter()
            .filter_map(|metric| metrics.value(metric).map(|v| (metric, v)))
            .flat_map(|(metric, value)| self.evaluate(metric, value))
            .collect()
    }

    /// Get firing alerts.
    pub fn firing_alerts(&self) -> Vec<&Alert> {
        self.alerts.values().filter(|a| a.is_firing()).collect()
    }

    /// Get all active alerts.
    pub fn active_alerts(&self) -> Vec<&Alert> {
        self.alerts.values().collect()
    }

    /// Get alert by name.
    pub fn get_alert(&self, name: &str) -> Option<&Alert> {
        self.alerts.get(name)
    }

    /// Get rules.
    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    /// Resolved alerts, oldest first.
    pub fn history(&self) -> &[Alert] {
        &self.history
    }
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new()
    }
}
