use super::*;
use crate::executor::ExecutionOutcome;
use crate::fixtures::{cache, eip, lambda, rds, volume};
use crate::health::ComponentStatus;
use crate::models::{Resource, ResourceKind};
use crate::pricing::StaticPricing;
use crate::recommendation::{MemoryRecommendationStore, RecommendationStatus};
use crate::store::{write_mode, MemoryAuditLog, MemoryResourceStore, MemorySettingsStore};

struct Harness {
    tick: DriftTick,
    store: Arc<MemoryResourceStore>,
    settings: Arc<MemorySettingsStore>,
    audit: Arc<MemoryAuditLog>,
}

fn harness(resources: Vec<Resource>) -> Harness {
    let store = Arc::new(MemoryResourceStore::with_resources(resources));
    let settings = Arc::new(MemorySettingsStore::new());
    let audit = Arc::new(MemoryAuditLog::new());
    let tick = DriftTick::new(
        store.clone(),
        settings.clone(),
        Arc::new(MemoryRecommendationStore::new()),
        audit.clone(),
        Arc::new(ScenarioCatalog::builtin().unwrap()),
        Arc::new(StaticPricing::default()),
    );
    Harness {
        tick,
        store,
        settings,
        audit,
    }
}

fn automated() -> TickOptions {
    TickOptions {
        mode_override: Some(ExecutionMode::Automated),
    }
}

fn mixed_fleet() -> Vec<Resource> {
    vec![
        cache("c-idle", "dev", 3.0, 1.0),
        rds("db-prod", "prod", 8.0, 0.0),
        volume("vol-orphan", "dev", "gp3", false),
        eip("eip-1", "staging", false),
        lambda("fn-big", 3008, 10.0),
    ]
}

#[tokio::test]
async fn test_manual_mode_never_mutates() {
    let h = harness(mixed_fleet());
    let report = h.tick.run(TickOptions::default()).await.unwrap();

    assert!(report.success);
    assert_eq!(report.mode, ExecutionMode::Manual);
    assert_eq!(report.mode_source, ModeSource::Default);
    assert_eq!(report.execution_skipped, Some(ExecutionSkip::ManualMode));
    assert!(report.execution_results.is_empty());
    assert_eq!(h.store.mutation_count(), 0);
    assert!(h.audit.entries().await.is_empty());

    // Every detection waits for review, auto-safe ones included
    assert_eq!(report.recommendations.created, report.detections.len());

    let sum: f64 = report.detections.iter().map(|d| d.potential_savings).sum();
    assert!((report.summary.total_potential_savings - sum).abs() < 0.005);
}

#[tokio::test]
async fn test_idle_cache_is_remediated_in_automated_mode() {
    let h = harness(vec![cache("c-idle", "dev", 3.0, 1.0)]);
    let report = h.tick.run(automated()).await.unwrap();

    assert_eq!(report.detections.len(), 1);
    assert!(report.detections[0].potential_savings > 0.0);
    assert_eq!(report.auto_safe_count, 1);
    assert_eq!(report.execution_results.len(), 1);
    let result = &report.execution_results[0];
    assert!(result.success, "{}", result.message);
    assert_eq!(result.outcome, ExecutionOutcome::Applied);
    assert_eq!(report.recommendations.created, 0);
}

#[tokio::test]
async fn test_prod_rds_goes_to_review_even_when_automated() {
    let h = harness(vec![rds("db-prod", "prod", 8.0, 0.0)]);
    let report = h.tick.run(automated()).await.unwrap();

    assert_eq!(report.detections.len(), 1);
    assert_eq!(report.detections[0].scenario_id, "idle_rds");
    assert!(report.execution_results.is_empty());
    assert_eq!(
        report.execution_skipped,
        Some(ExecutionSkip::NoAutoSafeDetections)
    );
    assert_eq!(report.policy_blocked.len(), 1);
    assert!(report.policy_blocked[0].reason.contains("Production"));
    assert_eq!(h.store.mutation_count(), 0);

    let pending = h
        .tick
        .recommendations()
        .list(Some(RecommendationStatus::Pending))
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].resource_id, "db-prod");
}

#[tokio::test]
async fn test_lambda_in_prod_is_still_auto_safe() {
    let h = harness(vec![lambda("fn-big", 3008, 10.0)]);
    let report = h.tick.run(automated()).await.unwrap();
    assert_eq!(report.execution_results.len(), 1);
    assert!(report.execution_results[0].success);
    assert!(report.policy_blocked.is_empty());
}

#[tokio::test]
async fn test_rerun_after_remediation_is_idempotent() {
    let h = harness(mixed_fleet());
    let first = h.tick.run(automated()).await.unwrap();
    let applied = first
        .execution_results
        .iter()
        .filter(|r| r.outcome == ExecutionOutcome::Applied)
        .count();
    assert!(applied > 0);
    let mutations = h.store.mutation_count();

    let second = h.tick.run(automated()).await.unwrap();
    assert!(second.execution_results.iter().all(|r| r.success));
    assert_eq!(h.store.mutation_count(), mutations);

    // An overlapping tick still holding the first tick's detections
    let stale: Vec<_> = first
        .detections
        .iter()
        .filter(|d| first.execution_results.iter().any(|r| r.detection_id == d.id))
        .map(|d| {
            let action = h.tick.catalog().lookup(&d.scenario_id).unwrap().action.clone();
            ExecutionParams::for_detection(d, action, ExecutionTrigger::Auto)
        })
        .collect();
    let replay = h.tick.executor().execute_batch(stale).await;
    assert_eq!(replay.len(), applied);
    for result in &replay {
        assert!(result.success);
        assert_eq!(result.outcome, ExecutionOutcome::NoOp, "{}", result.message);
    }
    assert_eq!(h.store.mutation_count(), mutations);
}

#[tokio::test]
async fn test_auto_remediation_closes_open_recommendation() {
    let h = harness(vec![cache("c-idle", "dev", 3.0, 1.0)]);
    let manual = h.tick.run(TickOptions::default()).await.unwrap();
    assert_eq!(manual.recommendations.created, 1);
    let workflow = h.tick.recommendations();
    let pending = workflow.list(Some(RecommendationStatus::Pending)).await.unwrap();
    assert_eq!(pending.len(), 1);

    let report = h.tick.run(automated()).await.unwrap();
    assert_eq!(report.execution_results[0].outcome, ExecutionOutcome::Applied);
    assert_eq!(report.recommendations.resolved, 1);

    assert!(workflow
        .list(Some(RecommendationStatus::Pending))
        .await
        .unwrap()
        .is_empty());
    let closed = workflow.get(&pending[0].id).await.unwrap();
    assert_eq!(closed.status, RecommendationStatus::Executed);
    let result = closed.execution_result.unwrap();
    assert_eq!(result.outcome, ExecutionOutcome::Applied);
}

#[tokio::test]
async fn test_rejected_recommendation_is_not_reopened_by_auto_run() {
    let h = harness(vec![cache("c-idle", "dev", 3.0, 1.0)]);
    h.tick.run(TickOptions::default()).await.unwrap();
    let workflow = h.tick.recommendations();
    let id = workflow.list(None).await.unwrap()[0].id.clone();
    workflow.reject(&id).await.unwrap();

    let report = h.tick.run(automated()).await.unwrap();
    assert_eq!(report.recommendations.resolved, 0);
    assert_eq!(
        workflow.get(&id).await.unwrap().status,
        RecommendationStatus::Rejected
    );
}

#[tokio::test]
async fn test_mode_resolution_order() {
    let h = harness(vec![]);
    assert_eq!(h.tick.resolve_mode(None).await.source, ModeSource::Default);

    write_mode(h.settings.as_ref(), ExecutionMode::Automated)
        .await
        .unwrap();
    let stored = h.tick.resolve_mode(None).await;
    assert_eq!(stored.mode, ExecutionMode::Automated);
    assert_eq!(stored.source, ModeSource::Settings);
    assert!(stored.last_updated.is_some());

    let forced = h.tick.resolve_mode(Some(ExecutionMode::Manual)).await;
    assert_eq!(forced.mode, ExecutionMode::Manual);
    assert_eq!(forced.source, ModeSource::Override);
}

#[tokio::test]
async fn test_unreadable_setting_falls_back_to_manual() {
    let h = harness(vec![cache("c-idle", "dev", 3.0, 1.0)]);
    h.settings.set_failing(true);
    let report = h.tick.run(TickOptions::default()).await.unwrap();
    assert_eq!(report.mode, ExecutionMode::Manual);
    assert_eq!(h.store.mutation_count(), 0);
}

#[tokio::test]
async fn test_disconnected_store_fails_the_tick() {
    let h = harness(mixed_fleet());
    h.store.disconnect();

    let err = h.tick.run(automated()).await.unwrap_err();
    assert!(err.is_configuration());
    let health = h.tick.health().health().await;
    assert_eq!(
        health.components[components::RESOURCE_STORE].status,
        ComponentStatus::Unhealthy
    );
    assert_eq!(h.store.mutation_count(), 0);
}

#[tokio::test]
async fn test_unavailable_category_degrades_but_completes() {
    let h = harness(vec![eip("eip-1", "dev", false)]);
    h.store.mark_unavailable(ResourceKind::S3Bucket);

    let report = h.tick.run(TickOptions::default()).await.unwrap();
    assert!(report.success);
    assert_eq!(report.detections.len(), 1);
    assert_eq!(report.summary.category_failures.len(), 1);

    let health = h.tick.health().health().await;
    assert_eq!(
        health.components[components::RESOURCE_STORE].status,
        ComponentStatus::Degraded
    );
    assert!(h.tick.health().readiness().await.ready);
}

#[tokio::test]
async fn test_ignored_resources_are_reported_not_routed() {
    let h = harness(vec![cache("c-idle", "dev", 3.0, 1.0)]);
    h.store.set_policy(
        ResourceKind::CacheCluster,
        "c-idle",
        Some(OptimizationPolicy::Ignore),
        None,
    );

    let report = h.tick.run(automated()).await.unwrap();
    assert_eq!(report.detections.len(), 1);
    assert_eq!(report.ignored_count, 1);
    assert!(report.execution_results.is_empty());
    assert_eq!(report.recommendations.total(), 0);
}

#[tokio::test]
async fn test_recommend_only_policy_blocks_auto_safe_scenario() {
    let h = harness(vec![cache("c-idle", "dev", 3.0, 1.0)]);
    h.store.set_policy(
        ResourceKind::CacheCluster,
        "c-idle",
        Some(OptimizationPolicy::RecommendOnly),
        None,
    );

    let report = h.tick.run(automated()).await.unwrap();
    assert!(report.execution_results.is_empty());
    assert_eq!(report.policy_blocked.len(), 1);
    assert!(report.policy_blocked[0].reason.contains("recommend_only"));
    assert_eq!(report.recommendations.created, 1);
}

#[tokio::test]
async fn test_failed_action_does_not_fail_the_tick() {
    let h = harness(vec![
        cache("c-1", "dev", 3.0, 1.0),
        cache("c-2", "dev", 2.0, 0.0),
    ]);
    h.store.reject_mutations_for("c-1", "cluster is modifying");

    let report = h.tick.run(automated()).await.unwrap();
    assert!(report.success);
    assert_eq!(report.execution_results.len(), 2);
    assert_eq!(report.failed_count(), 1);
    assert_eq!(report.executed_count(), 1);

    let health = h.tick.health().health().await;
    assert_eq!(
        health.components[components::EXECUTOR].status,
        ComponentStatus::Degraded
    );
}
