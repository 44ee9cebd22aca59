//! Drift agent: HTTP trigger surface and optional heartbeat around the
//! drift-tick pipeline

pub mod api;
pub mod config;
pub mod heartbeat;

use anyhow::{Context, Result};
use api::AppState;
use config::AgentConfig;
use drift_lib::{
    executor::ExecutorConfig,
    health::HealthRegistry,
    orchestrator::DriftTick,
    pricing::StaticPricing,
    store::{FileResourceStore, FileSettingsStore, JsonlAuditLog, ResourceStore, SettingsStore},
    MemoryRecommendationStore, ScenarioCatalog, StructuredLogger,
};
use std::sync::Arc;

/// Wire the file-backed collaborators into a pipeline
///
/// Fails when the catalog cannot be built; a missing data directory only
/// surfaces on the first tick, as a configuration error.
pub async fn build_state(config: &AgentConfig) -> Result<Arc<AppState>> {
    let catalog = ScenarioCatalog::builtin_without(&config.disabled_scenarios)
        .context("invalid scenario catalog")?;

    let store: Arc<dyn ResourceStore> = Arc::new(FileResourceStore::new(&config.data_dir));
    let settings: Arc<dyn SettingsStore> =
        Arc::new(FileSettingsStore::new(config.settings_path()));
    let audit = Arc::new(JsonlAuditLog::new(config.audit_log_path()));

    let health_registry = HealthRegistry::with_pipeline_components().await;
    let logger = StructuredLogger::new(&config.instance_name);

    let tick = DriftTick::new(
        store.clone(),
        settings.clone(),
        Arc::new(MemoryRecommendationStore::new()),
        audit,
        Arc::new(catalog),
        Arc::new(StaticPricing::default()),
    )
    .with_health(health_registry.clone())
    .with_logger(logger.clone())
    .with_executor_config(ExecutorConfig {
        action_timeout: config.action_timeout(),
    })
    .with_recommendation_ttl(config.recommendation_ttl());

    Ok(Arc::new(AppState {
        health_registry,
        tick,
        store,
        settings,
        logger,
    }))
}
