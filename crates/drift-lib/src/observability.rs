//! Observability infrastructure for the drift pipeline
//!
//! Provides:
//! - Prometheus metrics (tick latency, detections, savings, execution outcomes)
//! - Structured JSON logging with tracing, one event per domain occurrence

use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, Gauge, Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for tick latency (in seconds)
const TICK_LATENCY_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<DriftMetricsInner> = OnceLock::new();

struct DriftMetricsInner {
    tick_latency_seconds: Histogram,
    ticks_failed: IntCounter,
    detections: IntGauge,
    potential_savings: Gauge,
    executions: IntCounterVec,
    category_fetch_errors: IntCounter,
    audit_failures: IntCounter,
    policy_blocked: IntCounter,
    open_recommendations: IntGauge,
}

impl DriftMetricsInner {
    fn new() -> Self {
        Self {
            tick_latency_seconds: register_histogram!(
                "drift_tick_latency_seconds",
                "Wall time of one detect, gate and remediate run",
                TICK_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_latency_seconds"),

            ticks_failed: register_int_counter!(
                "drift_ticks_failed_total",
                "Ticks aborted by a pipeline-level error"
            )
            .expect("Failed to register ticks_failed"),

            detections: register_int_gauge!(
                "drift_detections",
                "Detections produced by the most recent tick"
            )
            .expect("Failed to register detections"),

            potential_savings: register_gauge!(
                "drift_potential_monthly_savings_usd",
                "Total potential monthly savings found by the most recent tick"
            )
            .expect("Failed to register potential_savings"),

            executions: register_int_counter_vec!(
                "drift_executions_total",
                "Remediation attempts by outcome",
                &["outcome"]
            )
            .expect("Failed to register executions"),

            category_fetch_errors: register_int_counter!(
                "drift_category_fetch_errors_total",
                "Resource categories that could not be read during detection"
            )
            .expect("Failed to register category_fetch_errors"),

            audit_failures: register_int_counter!(
                "drift_audit_failures_total",
                "Audit entries that could not be appended"
            )
            .expect("Failed to register audit_failures"),

            policy_blocked: register_int_counter!(
                "drift_policy_blocked_total",
                "Auto-safe detections held back by a policy lock"
            )
            .expect("Failed to register policy_blocked"),

            open_recommendations: register_int_gauge!(
                "drift_open_recommendations",
                "Recommendations in a non-terminal state"
            )
            .expect("Failed to register open_recommendations"),
        }
    }
}

/// Lightweight handle to the process-wide metrics
///
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct DriftMetrics {
    _private: (),
}

impl Default for DriftMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DriftMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriftMetrics").finish()
    }
}

impl DriftMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(DriftMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &DriftMetricsInner {
        GLOBAL_METRICS.get_or_init(DriftMetricsInner::new)
    }

    pub fn observe_tick_latency(&self, duration_secs: f64) {
        self.inner().tick_latency_seconds.observe(duration_secs);
    }

    pub fn inc_ticks_failed(&self) {
        self.inner().ticks_failed.inc();
    }

    /// Publish the headline numbers of the latest detection run
    pub fn set_detection_totals(&self, detections: usize, potential_savings: f64) {
        self.inner().detections.set(detections as i64);
        self.inner().potential_savings.set(potential_savings);
    }

    pub fn inc_execution(&self, outcome: &str) {
        self.inner().executions.with_label_values(&[outcome]).inc();
    }

    pub fn inc_category_fetch_errors(&self) {
        self.inner().category_fetch_errors.inc();
    }

    pub fn inc_audit_failures(&self) {
        self.inner().audit_failures.inc();
    }

    pub fn inc_policy_blocked(&self) {
        self.inner().policy_blocked.inc();
    }

    pub fn set_open_recommendations(&self, count: usize) {
        self.inner().open_recommendations.set(count as i64);
    }
}

/// Structured logger for pipeline events
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl Default for StructuredLogger {
    fn default() -> Self {
        Self::new("drift")
    }
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn log_tick_started(&self, tick_id: &str, mode: &str, mode_source: &str) {
        info!(
            event = "tick_started",
            instance = %self.instance,
            tick_id = %tick_id,
            mode = %mode,
            mode_source = %mode_source,
            "Drift tick started"
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_tick_completed(
        &self,
        tick_id: &str,
        detections: usize,
        auto_safe: usize,
        executed: usize,
        failed: usize,
        recommended: usize,
        total_ms: u64,
    ) {
        info!(
            event = "tick_completed",
            instance = %self.instance,
            tick_id = %tick_id,
            detections = detections,
            auto_safe = auto_safe,
            executed = executed,
            failed = failed,
            recommended = recommended,
            total_ms = total_ms,
            "Drift tick completed"
        );
    }

    pub fn log_tick_failed(&self, tick_id: &str, error: &str) {
        warn!(
            event = "tick_failed",
            instance = %self.instance,
            tick_id = %tick_id,
            error = %error,
            "Drift tick aborted"
        );
    }

    pub fn log_category_fetch_failed(&self, resource_type: &str, error: &str) {
        warn!(
            event = "category_fetch_failed",
            instance = %self.instance,
            resource_type = %resource_type,
            error = %error,
            "Resource category unavailable, contributing no detections"
        );
    }

    pub fn log_invalid_row(&self, resource_type: &str, resource_id: Option<&str>, reason: &str) {
        warn!(
            event = "invalid_row",
            instance = %self.instance,
            resource_type = %resource_type,
            resource_id = %resource_id.unwrap_or("-"),
            reason = %reason,
            "Skipping resource row that does not parse"
        );
    }

    pub fn log_insufficient_data(&self, scenario_id: &str, resource_id: &str, metric: &str) {
        info!(
            event = "insufficient_data",
            instance = %self.instance,
            scenario_id = %scenario_id,
            resource_id = %resource_id,
            metric = %metric,
            "Scenario skipped for missing metric"
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_action_executed(
        &self,
        resource_id: &str,
        scenario_id: &str,
        action: &str,
        trigger: &str,
        outcome: &str,
        message: &str,
        duration_ms: u64,
    ) {
        if outcome == "failed" || outcome == "skipped" {
            warn!(
                event = "action_executed",
                instance = %self.instance,
                resource_id = %resource_id,
                scenario_id = %scenario_id,
                action = %action,
                trigger = %trigger,
                outcome = %outcome,
                message = %message,
                duration_ms = duration_ms,
                "Remediation did not apply"
            );
        } else {
            info!(
                event = "action_executed",
                instance = %self.instance,
                resource_id = %resource_id,
                scenario_id = %scenario_id,
                action = %action,
                trigger = %trigger,
                outcome = %outcome,
                message = %message,
                duration_ms = duration_ms,
                "Remediation finished"
            );
        }
    }

    pub fn log_audit_failed(&self, resource_id: &str, error: &str) {
        warn!(
            event = "audit_append_failed",
            instance = %self.instance,
            resource_id = %resource_id,
            error = %error,
            "Failed to append audit entry"
        );
    }

    pub fn log_policy_blocked(&self, resource_id: &str, scenario_id: &str, reason: &str) {
        info!(
            event = "policy_blocked",
            instance = %self.instance,
            resource_id = %resource_id,
            scenario_id = %scenario_id,
            reason = %reason,
            "Auto-safe detection routed to review"
        );
    }

    pub fn log_recommendation_upserted(
        &self,
        recommendation_id: &str,
        resource_id: &str,
        scenario_id: &str,
        outcome: &str,
    ) {
        info!(
            event = "recommendation_upserted",
            instance = %self.instance,
            recommendation_id = %recommendation_id,
            resource_id = %resource_id,
            scenario_id = %scenario_id,
            outcome = %outcome,
            "Recommendation recorded"
        );
    }

    pub fn log_recommendation_transition(&self, recommendation_id: &str, from: &str, to: &str) {
        info!(
            event = "recommendation_transition",
            instance = %self.instance,
            recommendation_id = %recommendation_id,
            from = %from,
            to = %to,
            "Recommendation status changed"
        );
    }

    pub fn log_mode_changed(&self, mode: &str) {
        info!(
            event = "execution_mode_changed",
            instance = %self.instance,
            mode = %mode,
            "Execution mode updated"
        );
    }

    pub fn log_startup(&self, version: &str, scenarios: usize) {
        info!(
            event = "agent_started",
            instance = %self.instance,
            agent_version = %version,
            scenarios = scenarios,
            "Drift agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Drift agent shutting down"
        );
    }
}
