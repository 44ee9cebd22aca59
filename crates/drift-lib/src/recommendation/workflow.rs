use super::{Recommendation, RecommendationStatus, RecommendationStore, ReviewAction, UpsertOutcome};
use crate::catalog::ScenarioCatalog;
use crate::error::TransitionError;
use crate::executor::{ExecutionParams, ExecutionResult, ExecutionTrigger, Executor};
use crate::models::Detection;
use crate::observability::{DriftMetrics, StructuredLogger};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Pending recommendations not re-detected for this long expire
pub const DEFAULT_RECOMMENDATION_TTL_HOURS: u64 = 168;

/// What happened to the detections handed over by one tick
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationSummary {
    pub created: usize,
    pub refreshed: usize,
    pub suppressed: usize,
    pub failed: usize,
    /// Open rows closed because an automatic run remediated their pair
    #[serde(default)]
    pub resolved: usize,
}

impl RecommendationSummary {
    pub fn total(&self) -> usize {
        self.created + self.refreshed + self.suppressed + self.failed
    }
}

/// Result of the externally driven maintenance pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub woken: Vec<String>,
    pub executed: Vec<ExecutionResult>,
    pub expired: Vec<String>,
}

/// Drives recommendations through review and execution
#[derive(Clone)]
pub struct RecommendationWorkflow {
    store: Arc<dyn RecommendationStore>,
    catalog: Arc<ScenarioCatalog>,
    ttl: Duration,
    metrics: DriftMetrics,
    logger: StructuredLogger,
}

impl RecommendationWorkflow {
    pub fn new(store: Arc<dyn RecommendationStore>, catalog: Arc<ScenarioCatalog>) -> Self {
        Self {
            store,
            catalog,
            ttl: Duration::hours(DEFAULT_RECOMMENDATION_TTL_HOURS as i64),
            metrics: DriftMetrics::new(),
            logger: StructuredLogger::default(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Create or refresh one recommendation per detection
    ///
    /// A detection whose scenario is no longer in the catalog, or that the
    /// store refuses, is counted as failed; the rest are still recorded.
    pub async fn record_detections(&self, detections: &[Detection]) -> RecommendationSummary {
        let now = Utc::now();
        let mut summary = RecommendationSummary::default();

        for detection in detections {
            let action = match self.catalog.lookup(&detection.scenario_id) {
                Ok(scenario) => scenario.action.clone(),
                Err(e) => {
                    warn!(
                        event = "recommendation_skipped",
                        resource_id = %detection.resource_id,
                        error = %e,
                        "Detection references an unknown scenario"
                    );
                    summary.failed += 1;
                    continue;
                }
            };

            match self.store.upsert_detection(detection, &action, now).await {
                Ok(outcome) => {
                    match &outcome {
                        UpsertOutcome::Created(_) => summary.created += 1,
                        UpsertOutcome::Refreshed(_) => summary.refreshed += 1,
                        UpsertOutcome::Suppressed(_) => summary.suppressed += 1,
                    }
                    self.logger.log_recommendation_upserted(
                        &outcome.recommendation().id,
                        &detection.resource_id,
                        &detection.scenario_id,
                        outcome.label(),
                    );
                }
                Err(e) => {
                    warn!(
                        event = "recommendation_upsert_failed",
                        resource_id = %detection.resource_id,
                        scenario_id = %detection.scenario_id,
                        error = %e,
                        "Failed to record recommendation"
                    );
                    summary.failed += 1;
                }
            }
        }

        self.refresh_open_gauge().await;
        summary
    }

    /// Close open recommendations for pairs an automatic run just fixed
    ///
    /// Only applied and no-op results count. Returns the ids that moved to
    /// `executed`; a row a reviewer changed in the meantime is left alone.
    pub async fn close_remediated(
        &self,
        results: &[ExecutionResult],
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let mut closed = Vec::new();
        for result in results.iter().filter(|r| r.outcome.is_success()) {
            let open = match self
                .store
                .open_for_pair(&result.resource_id, &result.scenario_id)
                .await
            {
                Ok(Some(open)) => open,
                Ok(None) => continue,
                Err(e) => {
                    warn!(
                        event = "recommendation_resolve_failed",
                        resource_id = %result.resource_id,
                        scenario_id = %result.scenario_id,
                        error = %e,
                        "Could not look up open recommendation"
                    );
                    continue;
                }
            };
            match self.store.resolve(&open.id, result, now).await {
                Ok(updated) => {
                    self.logger.log_recommendation_transition(
                        &updated.id,
                        open.status.as_str(),
                        updated.status.as_str(),
                    );
                    closed.push(updated.id);
                }
                Err(e) => warn!(
                    event = "recommendation_resolve_failed",
                    recommendation_id = %open.id,
                    error = %e,
                    "Open recommendation not closed"
                ),
            }
        }
        if !closed.is_empty() {
            self.refresh_open_gauge().await;
        }
        closed
    }

    pub async fn get(&self, id: &str) -> Result<Recommendation, TransitionError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| TransitionError::NotFound(id.to_string()))
    }

    pub async fn list(
        &self,
        status: Option<RecommendationStatus>,
    ) -> Result<Vec<Recommendation>, TransitionError> {
        Ok(self.store.list(status).await?)
    }

    pub async fn approve(&self, id: &str) -> Result<Recommendation, TransitionError> {
        self.apply(id, ReviewAction::Approve, Utc::now()).await
    }

    pub async fn reject(&self, id: &str) -> Result<Recommendation, TransitionError> {
        self.apply(id, ReviewAction::Reject, Utc::now()).await
    }

    pub async fn snooze(
        &self,
        id: &str,
        until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Recommendation, TransitionError> {
        require_future("snoozed_until", until, now)?;
        self.apply(id, ReviewAction::Snooze { until }, now).await
    }

    pub async fn schedule(
        &self,
        id: &str,
        at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Recommendation, TransitionError> {
        require_future("scheduled_for", at, now)?;
        self.apply(id, ReviewAction::Schedule { at }, now).await
    }

    /// Execute an approved recommendation on behalf of its reviewer
    pub async fn execute_approved(
        &self,
        id: &str,
        executor: &Executor,
    ) -> Result<Recommendation, TransitionError> {
        let recommendation = self.get(id).await?;
        if recommendation.status != RecommendationStatus::Approved {
            return Err(TransitionError::Invalid {
                from: recommendation.status.to_string(),
                action: ReviewAction::MarkExecuted.name().to_string(),
            });
        }
        self.execute(&recommendation, ExecutionTrigger::Approved, executor)
            .await
    }

    /// Move snoozed recommendations whose snooze elapsed back to pending
    pub async fn wake_snoozed(&self, now: DateTime<Utc>) -> Result<Vec<String>, TransitionError> {
        let mut woken = Vec::new();
        for recommendation in self.store.list(Some(RecommendationStatus::Snoozed)).await? {
            if recommendation.snoozed_until.map(|t| t <= now).unwrap_or(true)
                && self.apply_quietly(&recommendation.id, ReviewAction::Wake, now).await
            {
                woken.push(recommendation.id);
            }
        }
        Ok(woken)
    }

    /// Execute scheduled recommendations that came due, one at a time
    pub async fn run_due(
        &self,
        now: DateTime<Utc>,
        executor: &Executor,
    ) -> Result<Vec<ExecutionResult>, TransitionError> {
        let mut results = Vec::new();
        for recommendation in self.store.list(Some(RecommendationStatus::Scheduled)).await? {
            let due = recommendation.scheduled_for.map(|t| t <= now).unwrap_or(false);
            if !due {
                continue;
            }
            match self
                .execute(&recommendation, ExecutionTrigger::Scheduled, executor)
                .await
            {
                Ok(updated) => results.extend(updated.execution_result),
                Err(e) => warn!(
                    event = "scheduled_execution_failed",
                    recommendation_id = %recommendation.id,
                    error = %e,
                    "Could not record scheduled execution"
                ),
            }
        }
        Ok(results)
    }

    /// Expire pending recommendations not re-detected within the TTL
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<Vec<String>, TransitionError> {
        let cutoff = now - self.ttl;
        let mut expired = Vec::new();
        for recommendation in self.store.list(Some(RecommendationStatus::Pending)).await? {
            if recommendation.last_detected_at <= cutoff
                && self.apply_quietly(&recommendation.id, ReviewAction::Expire, now).await
            {
                expired.push(recommendation.id);
            }
        }
        self.refresh_open_gauge().await;
        Ok(expired)
    }

    /// Wake, run due schedules, then expire, in that order
    pub async fn run_maintenance(
        &self,
        now: DateTime<Utc>,
        executor: &Executor,
    ) -> Result<MaintenanceReport, TransitionError> {
        let woken = self.wake_snoozed(now).await?;
        let executed = self.run_due(now, executor).await?;
        let expired = self.expire_stale(now).await?;
        Ok(MaintenanceReport {
            woken,
            executed,
            expired,
        })
    }

    async fn execute(
        &self,
        recommendation: &Recommendation,
        trigger: ExecutionTrigger,
        executor: &Executor,
    ) -> Result<Recommendation, TransitionError> {
        let params = ExecutionParams::for_detection(
            &recommendation.detection,
            recommendation.action.clone(),
            trigger,
        );
        let result = executor.execute_action(params).await;
        let updated = self
            .store
            .record_execution(&recommendation.id, &result, Utc::now())
            .await?;
        if updated.status != recommendation.status {
            self.logger.log_recommendation_transition(
                &updated.id,
                recommendation.status.as_str(),
                updated.status.as_str(),
            );
        }
        self.refresh_open_gauge().await;
        Ok(updated)
    }

    async fn apply(
        &self,
        id: &str,
        action: ReviewAction,
        now: DateTime<Utc>,
    ) -> Result<Recommendation, TransitionError> {
        let before = self.get(id).await?.status;
        let updated = self.store.transition(id, &action, now).await?;
        self.logger
            .log_recommendation_transition(id, before.as_str(), updated.status.as_str());
        self.refresh_open_gauge().await;
        Ok(updated)
    }

    /// Maintenance transitions lose races with reviewers; log and move on
    async fn apply_quietly(&self, id: &str, action: ReviewAction, now: DateTime<Utc>) -> bool {
        match self.apply(id, action, now).await {
            Ok(_) => true,
            Err(e) => {
                warn!(
                    event = "recommendation_maintenance_skipped",
                    recommendation_id = %id,
                    error = %e,
                    "Maintenance transition not applied"
                );
                false
            }
        }
    }

    async fn refresh_open_gauge(&self) {
        if let Ok(all) = self.store.list(None).await {
            let open = all.iter().filter(|r| !r.status.is_terminal()).count();
            self.metrics.set_open_recommendations(open);
        }
    }
}

impl std::fmt::Debug for RecommendationWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecommendationWorkflow")
            .field("ttl_hours", &self.ttl.num_hours())
            .finish()
    }
}

fn require_future(
    field: &str,
    at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), TransitionError> {
    if at <= now {
        return Err(TransitionError::InvalidArgument {
            field: field.to_string(),
            reason: format!("{} is not in the future", at.to_rfc3339()),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutionOutcome;
    use crate::fixtures::{detection_for, eip, executor, rds, volume};
    use crate::models::ResourceKind;
    use crate::recommendation::MemoryRecommendationStore;
    use crate::store::{MemoryAuditLog, MemoryResourceStore};

    struct Harness {
        workflow: RecommendationWorkflow,
        store: Arc<MemoryResourceStore>,
        audit: Arc<MemoryAuditLog>,
    }

    impl Harness {
        fn new(resources: Vec<crate::models::Resource>) -> Self {
            Self {
                workflow: RecommendationWorkflow::new(
                    Arc::new(MemoryRecommendationStore::new()),
                    Arc::new(ScenarioCatalog::builtin().unwrap()),
                ),
                store: Arc::new(MemoryResourceStore::with_resources(resources)),
                audit: Arc::new(MemoryAuditLog::new()),
            }
        }

        fn executor(&self) -> Executor {
            executor(&self.store, &self.audit)
        }

        async fn only_id(&self) -> String {
            let all = self.workflow.list(None).await.unwrap();
            assert_eq!(all.len(), 1);
            all[0].id.clone()
        }
    }

    #[tokio::test]
    async fn test_record_detections_counts_outcomes() {
        let vol = volume("vol-1", "dev", "gp3", false);
        let ip = eip("eip-1", "dev", false);
        let h = Harness::new(vec![]);
        let detections = vec![
            detection_for(&vol, "unattached_ebs"),
            detection_for(&ip, "unassociated_eip"),
        ];

        let first = h.workflow.record_detections(&detections).await;
        assert_eq!(first.created, 2);

        let second = h.workflow.record_detections(&detections).await;
        assert_eq!(second.refreshed, 2);
        assert_eq!(second.created, 0);
        assert_eq!(h.workflow.list(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_scenario_counts_as_failed() {
        let ip = eip("eip-1", "dev", false);
        let h = Harness::new(vec![]);
        let mut detection = detection_for(&ip, "unassociated_eip");
        detection.scenario_id = "retired_scenario".to_string();

        let summary = h.workflow.record_detections(&[detection]).await;
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total(), 1);
        assert!(h.workflow.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_approved_recommendation_executes() {
        let db = rds("db-prod", "prod", 8.0, 0.0);
        let h = Harness::new(vec![db.clone()]);
        h.workflow
            .record_detections(&[detection_for(&db, "idle_rds")])
            .await;
        let id = h.only_id().await;

        h.workflow.approve(&id).await.unwrap();
        let done = h.workflow.execute_approved(&id, &h.executor()).await.unwrap();

        assert_eq!(done.status, RecommendationStatus::Executed);
        let result = done.execution_result.unwrap();
        assert_eq!(result.outcome, ExecutionOutcome::Applied);
        assert!(h
            .store
            .snapshot(ResourceKind::RdsInstance, "db-prod")
            .unwrap()
            .is_stopped());
        assert_eq!(h.audit.entries().await[0].trigger, ExecutionTrigger::Approved);
    }

    #[tokio::test]
    async fn test_pending_recommendation_cannot_execute() {
        let db = rds("db-1", "prod", 8.0, 0.0);
        let h = Harness::new(vec![db.clone()]);
        h.workflow
            .record_detections(&[detection_for(&db, "idle_rds")])
            .await;
        let id = h.only_id().await;

        let err = h.workflow.execute_approved(&id, &h.executor()).await.unwrap_err();
        assert!(matches!(err, TransitionError::Invalid { .. }));
        assert_eq!(h.store.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_execution_keeps_approved_status() {
        let ip = eip("eip-1", "dev", false);
        let h = Harness::new(vec![ip.clone()]);
        h.store.reject_mutations_for("eip-1", "address in use");
        h.workflow
            .record_detections(&[detection_for(&ip, "unassociated_eip")])
            .await;
        let id = h.only_id().await;
        h.workflow.approve(&id).await.unwrap();

        let after = h.workflow.execute_approved(&id, &h.executor()).await.unwrap();
        assert_eq!(after.status, RecommendationStatus::Approved);
        let result = after.execution_result.unwrap();
        assert!(!result.success);
        assert!(result.message.contains("address in use"));
    }

    #[tokio::test]
    async fn test_snooze_requires_future_time() {
        let ip = eip("eip-1", "dev", false);
        let h = Harness::new(vec![]);
        h.workflow
            .record_detections(&[detection_for(&ip, "unassociated_eip")])
            .await;
        let id = h.only_id().await;
        let now = Utc::now();

        let err = h
            .workflow
            .snooze(&id, now - Duration::hours(1), now)
            .await
            .unwrap_err();
        assert!(matches!(err, TransitionError::InvalidArgument { .. }));
        assert_eq!(
            h.workflow.get(&id).await.unwrap().status,
            RecommendationStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_wake_only_elapsed_snoozes() {
        let a = eip("eip-a", "dev", false);
        let b = eip("eip-b", "dev", false);
        let h = Harness::new(vec![]);
        h.workflow
            .record_detections(&[
                detection_for(&a, "unassociated_eip"),
                detection_for(&b, "unassociated_eip"),
            ])
            .await;
        let all = h.workflow.list(None).await.unwrap();
        let now = Utc::now();
        let (short, long) = if all[0].resource_id == "eip-a" {
            (all[0].id.clone(), all[1].id.clone())
        } else {
            (all[1].id.clone(), all[0].id.clone())
        };
        h.workflow.snooze(&short, now + Duration::hours(1), now).await.unwrap();
        h.workflow.snooze(&long, now + Duration::days(3), now).await.unwrap();

        let woken = h.workflow.wake_snoozed(now + Duration::hours(2)).await.unwrap();
        assert_eq!(woken, vec![short.clone()]);

        let short_rec = h.workflow.get(&short).await.unwrap();
        assert_eq!(short_rec.status, RecommendationStatus::Pending);
        assert!(short_rec.snoozed_until.is_none());
        assert_eq!(
            h.workflow.get(&long).await.unwrap().status,
            RecommendationStatus::Snoozed
        );
    }

    #[tokio::test]
    async fn test_due_schedule_runs_with_scheduled_trigger() {
        let vol = volume("vol-1", "staging", "gp3", false);
        let h = Harness::new(vec![vol.clone()]);
        h.workflow
            .record_detections(&[detection_for(&vol, "unattached_ebs")])
            .await;
        let id = h.only_id().await;
        let now = Utc::now();
        h.workflow
            .schedule(&id, now + Duration::minutes(30), now)
            .await
            .unwrap();

        let early = h.workflow.run_due(now, &h.executor()).await.unwrap();
        assert!(early.is_empty());

        let due = h
            .workflow
            .run_due(now + Duration::hours(1), &h.executor())
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert!(due[0].success);
        assert_eq!(
            h.workflow.get(&id).await.unwrap().status,
            RecommendationStatus::Executed
        );
        assert_eq!(h.audit.entries().await[0].trigger, ExecutionTrigger::Scheduled);
    }

    #[tokio::test]
    async fn test_stale_pending_recommendations_expire() {
        let ip = eip("eip-1", "dev", false);
        let h = Harness::new(vec![]);
        let workflow = h.workflow.clone().with_ttl(Duration::hours(24));
        workflow
            .record_detections(&[detection_for(&ip, "unassociated_eip")])
            .await;
        let id = h.only_id().await;

        assert!(workflow.expire_stale(Utc::now()).await.unwrap().is_empty());
        let expired = workflow
            .expire_stale(Utc::now() + Duration::hours(25))
            .await
            .unwrap();
        assert_eq!(expired, vec![id.clone()]);

        // Re-detection after expiry opens a new row
        let summary = workflow
            .record_detections(&[detection_for(&ip, "unassociated_eip")])
            .await;
        assert_eq!(summary.created, 1);
        assert_eq!(workflow.list(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_maintenance_pass_reports_each_step() {
        let ip = eip("eip-1", "dev", false);
        let h = Harness::new(vec![ip.clone()]);
        h.workflow
            .record_detections(&[detection_for(&ip, "unassociated_eip")])
            .await;
        let id = h.only_id().await;
        let now = Utc::now();
        h.workflow.snooze(&id, now + Duration::hours(1), now).await.unwrap();

        let report = h
            .workflow
            .run_maintenance(now + Duration::hours(2), &h.executor())
            .await
            .unwrap();
        assert_eq!(report.woken, vec![id]);
        assert!(report.executed.is_empty());
        assert!(report.expired.is_empty());
    }
}
