//! Drift-tick orchestrator
//!
//! One tick runs to completion and returns a [`TickReport`]:
//! detect, resolve the execution mode, gate auto-safe detections through the
//! policy lock, execute the eligible ones sequentially, then hand everything
//! else to the recommendation workflow.
//!
//! Ticks may overlap. Nothing here serializes them; the executor's
//! re-read-then-act step and its idempotent no-ops keep overlapping runs safe.

mod report;

#[cfg(test)]
mod tests;

pub use report::{
    ExecutionSkip, ModeSource, PhaseTiming, PolicyBlocked, ResolvedMode, TickReport,
};

use crate::catalog::ScenarioCatalog;
use crate::detector::WasteDetector;
use crate::error::{StoreError, TickError};
use crate::executor::{ExecutionParams, ExecutionTrigger, Executor, ExecutorConfig};
use crate::health::{components, HealthRegistry};
use crate::models::{Detection, ExecutionMode, OptimizationPolicy};
use crate::observability::{DriftMetrics, StructuredLogger};
use crate::policy::{allows_auto_remediation, effective_policy, get_lock_reason};
use crate::pricing::Pricing;
use crate::recommendation::{RecommendationStore, RecommendationWorkflow};
use crate::store::{read_mode, AuditLog, ResourceStore, SettingsStore};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Per-call options for a tick
#[derive(Debug, Clone, Copy, Default)]
pub struct TickOptions {
    /// Takes precedence over the persisted mode
    pub mode_override: Option<ExecutionMode>,
}

/// Detections split by where they go next
#[derive(Debug, Default)]
struct Routing {
    auto_safe_count: usize,
    ignored_count: usize,
    executable: Vec<(Detection, ExecutionParams)>,
    policy_blocked: Vec<PolicyBlocked>,
    for_review: Vec<Detection>,
}

/// The heartbeat pipeline
#[derive(Clone)]
pub struct DriftTick {
    store: Arc<dyn ResourceStore>,
    settings: Arc<dyn SettingsStore>,
    catalog: Arc<ScenarioCatalog>,
    detector: WasteDetector,
    executor: Executor,
    recommendations: RecommendationWorkflow,
    health: HealthRegistry,
    metrics: DriftMetrics,
    logger: StructuredLogger,
    sequence: Arc<AtomicU64>,
}

impl DriftTick {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        settings: Arc<dyn SettingsStore>,
        recommendation_store: Arc<dyn RecommendationStore>,
        audit: Arc<dyn AuditLog>,
        catalog: Arc<ScenarioCatalog>,
        pricing: Arc<dyn Pricing>,
    ) -> Self {
        Self {
            detector: WasteDetector::new(store.clone(), catalog.clone(), pricing),
            executor: Executor::new(store.clone(), audit, catalog.clone()),
            recommendations: RecommendationWorkflow::new(recommendation_store, catalog.clone()),
            store,
            settings,
            catalog,
            health: HealthRegistry::new(),
            metrics: DriftMetrics::new(),
            logger: StructuredLogger::default(),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.detector = self.detector.with_logger(logger.clone());
        self.executor = self.executor.with_logger(logger.clone());
        self.recommendations = self.recommendations.with_logger(logger.clone());
        self.logger = logger;
        self
    }

    pub fn with_executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor = self.executor.with_config(config);
        self
    }

    pub fn with_recommendation_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.recommendations = self.recommendations.with_ttl(ttl);
        self
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn recommendations(&self) -> &RecommendationWorkflow {
        &self.recommendations
    }

    pub fn catalog(&self) -> &ScenarioCatalog {
        &self.catalog
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    /// Override, else the persisted setting, else manual
    ///
    /// An unreadable setting falls back to manual rather than failing the tick.
    pub async fn resolve_mode(&self, mode_override: Option<ExecutionMode>) -> ResolvedMode {
        if let Some(mode) = mode_override {
            return ResolvedMode {
                mode,
                source: ModeSource::Override,
                last_updated: None,
            };
        }
        match read_mode(self.settings.as_ref()).await {
            Ok(Some(stored)) => ResolvedMode {
                mode: stored.mode,
                source: ModeSource::Settings,
                last_updated: Some(stored.last_updated),
            },
            Ok(None) => ResolvedMode {
                mode: ExecutionMode::Manual,
                source: ModeSource::Default,
                last_updated: None,
            },
            Err(e) => {
                warn!(
                    event = "mode_setting_unreadable",
                    error = %e,
                    "Falling back to manual execution mode"
                );
                ResolvedMode {
                    mode: ExecutionMode::Manual,
                    source: ModeSource::Default,
                    last_updated: None,
                }
            }
        }
    }

    /// Run one tick
    pub async fn run(&self, options: TickOptions) -> Result<TickReport, TickError> {
        let started = Instant::now();
        let started_at = Utc::now();
        let tick_id = format!(
            "tick-{}-{}",
            started_at.timestamp_millis(),
            self.sequence.fetch_add(1, Ordering::Relaxed)
        );

        if let Err(e) = self.store.check_connection().await {
            return Err(self.fail(&tick_id, e).await);
        }

        let phase = Instant::now();
        let run = self.detector.detect_all().await;
        let detect_ms = elapsed_ms(phase);
        self.record_detection_health(&run.summary).await;

        let phase = Instant::now();
        let resolved = self.resolve_mode(options.mode_override).await;
        let resolve_mode_ms = elapsed_ms(phase);
        self.logger.log_tick_started(
            &tick_id,
            resolved.mode.as_str(),
            resolved.source.as_str(),
        );

        let mut routing = self.route(&run.detections);

        let phase = Instant::now();
        let (execution_skipped, execution_results) = match resolved.mode {
            ExecutionMode::Manual => {
                // Nothing runs unattended; the eligible detections wait for review
                routing
                    .for_review
                    .extend(routing.executable.drain(..).map(|(detection, _)| detection));
                (Some(ExecutionSkip::ManualMode), Vec::new())
            }
            ExecutionMode::Automated if routing.executable.is_empty() => {
                (Some(ExecutionSkip::NoAutoSafeDetections), Vec::new())
            }
            ExecutionMode::Automated => {
                let batch = routing
                    .executable
                    .drain(..)
                    .map(|(_, params)| params)
                    .collect();
                (None, self.executor.execute_batch(batch).await)
            }
        };
        let execute_ms = elapsed_ms(phase);

        let phase = Instant::now();
        let mut recommendations = self
            .recommendations
            .record_detections(&routing.for_review)
            .await;
        recommendations.resolved = self
            .recommendations
            .close_remediated(&execution_results, Utc::now())
            .await
            .len();
        let recommend_ms = elapsed_ms(phase);

        let failed = execution_results.iter().filter(|r| !r.success).count();
        self.health
            .report(
                components::EXECUTOR,
                (failed > 0).then(|| format!("{} remediation(s) failed in last tick", failed)),
            )
            .await;
        self.health
            .report(
                components::RECOMMENDATIONS,
                (recommendations.failed > 0)
                    .then(|| format!("{} detection(s) not recorded", recommendations.failed)),
            )
            .await;
        self.health.set_ready(true).await;

        let total = started.elapsed();
        self.metrics.observe_tick_latency(total.as_secs_f64());

        let report = TickReport {
            tick_id,
            started_at,
            completed_at: Utc::now(),
            mode: resolved.mode,
            mode_source: resolved.source,
            summary: run.summary,
            auto_safe_count: routing.auto_safe_count,
            policy_blocked: routing.policy_blocked,
            ignored_count: routing.ignored_count,
            execution_skipped,
            execution_results,
            recommendations,
            timing: PhaseTiming {
                detect_ms,
                resolve_mode_ms,
                execute_ms,
                recommend_ms,
                total_ms: total.as_millis() as u64,
            },
            detections: run.detections,
            success: true,
        };

        self.logger.log_tick_completed(
            &report.tick_id,
            report.detections.len(),
            report.auto_safe_count,
            report.executed_count(),
            report.failed_count(),
            routing.for_review.len(),
            report.timing.total_ms,
        );
        Ok(report)
    }

    /// Split detections between the executor and human review
    ///
    /// The executor repeats the lock check right before mutating; this first
    /// pass only decides routing.
    fn route(&self, detections: &[Detection]) -> Routing {
        let mut routing = Routing::default();

        for detection in detections {
            let auto_safe = self
                .catalog
                .lookup(&detection.scenario_id)
                .map(|scenario| scenario.auto_safe)
                .unwrap_or(false);
            if auto_safe {
                routing.auto_safe_count += 1;
            }

            if effective_policy(&detection.policy) == OptimizationPolicy::Ignore {
                routing.ignored_count += 1;
                continue;
            }

            if !auto_safe {
                routing.for_review.push(detection.clone());
                continue;
            }

            if allows_auto_remediation(&detection.policy) {
                let action = match self.catalog.lookup(&detection.scenario_id) {
                    Ok(scenario) => scenario.action.clone(),
                    Err(_) => continue,
                };
                let params =
                    ExecutionParams::for_detection(detection, action, ExecutionTrigger::Auto);
                routing.executable.push((detection.clone(), params));
            } else {
                let reason = get_lock_reason(&detection.policy).unwrap_or_else(|| {
                    format!(
                        "optimization policy is {}",
                        effective_policy(&detection.policy)
                    )
                });
                self.metrics.inc_policy_blocked();
                self.logger
                    .log_policy_blocked(&detection.resource_id, &detection.scenario_id, &reason);
                routing.policy_blocked.push(PolicyBlocked {
                    detection_id: detection.id.clone(),
                    scenario_id: detection.scenario_id.clone(),
                    resource_id: detection.resource_id.clone(),
                    resource_type: detection.resource_type,
                    reason,
                });
                routing.for_review.push(detection.clone());
            }
        }
        routing
    }

    async fn record_detection_health(&self, summary: &crate::detector::DetectionSummary) {
        self.health.set_healthy(components::DETECTOR).await;
        let failed: Vec<&str> = summary
            .category_failures
            .iter()
            .map(|f| f.resource_type.as_str())
            .collect();
        self.health
            .report(
                components::RESOURCE_STORE,
                (!failed.is_empty())
                    .then(|| format!("unavailable categories: {}", failed.join(", "))),
            )
            .await;
    }

    async fn fail(&self, tick_id: &str, err: StoreError) -> TickError {
        self.metrics.inc_ticks_failed();
        self.logger.log_tick_failed(tick_id, &err.to_string());
        self.health
            .set_unhealthy(components::RESOURCE_STORE, err.to_string())
            .await;
        if err.is_configuration() {
            TickError::Configuration(err.to_string())
        } else {
            TickError::Internal(err.to_string())
        }
    }
}

impl std::fmt::Debug for DriftTick {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriftTick")
            .field("scenarios", &self.catalog.len())
            .field("executor", &self.executor)
            .finish()
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}
