//! Resource rows and wiring shared by the unit tests

use crate::catalog::{Evaluation, ScenarioCatalog};
use crate::detector::detection_id;
use crate::executor::{ExecutionParams, ExecutionTrigger, Executor, ExecutorConfig};
use crate::models::{Detection, Resource, ResourceKind};
use crate::store::{MemoryAuditLog, MemoryResourceStore};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn row(kind: ResourceKind, value: Value) -> Resource {
    Resource::from_row(kind, value).unwrap()
}

pub fn ec2(id: &str, env: &str, cpu: Option<f64>, network_mb: Option<f64>) -> Resource {
    row(
        ResourceKind::Ec2Instance,
        json!({
            "id": id, "name": format!("{}-name", id), "env": env, "state": "running",
            "instance_type": "m5.xlarge", "avg_cpu_7d": cpu, "max_cpu_7d": cpu,
            "network_mb_7d": network_mb
        }),
    )
}

pub fn rds(id: &str, env: &str, cpu: f64, connections: f64) -> Resource {
    row(
        ResourceKind::RdsInstance,
        json!({
            "id": id, "name": format!("{}-name", id), "env": env, "status": "available",
            "instance_class": "db.m5.large", "engine": "postgres",
            "avg_cpu_7d": cpu, "avg_connections_7d": connections
        }),
    )
}

pub fn cache(id: &str, env: &str, cpu: f64, connections: f64) -> Resource {
    row(
        ResourceKind::CacheCluster,
        json!({
            "id": id, "name": format!("{}-name", id), "env": env, "status": "available",
            "node_type": "cache.t3.medium", "num_nodes": 2,
            "avg_cpu_7d": cpu, "avg_connections_7d": connections
        }),
    )
}

pub fn volume(id: &str, env: &str, volume_type: &str, attached: bool) -> Resource {
    let (state, attached_to) = if attached {
        ("in_use", Some("i-attached"))
    } else {
        ("available", None)
    };
    row(
        ResourceKind::EbsVolume,
        json!({
            "id": id, "name": format!("{}-name", id), "env": env,
            "state": state, "volume_type": volume_type, "size_gb": 500,
            "attached_to": attached_to
        }),
    )
}

pub fn bucket(id: &str, size_gb: f64, lifecycle_policy: bool) -> Resource {
    row(
        ResourceKind::S3Bucket,
        json!({
            "id": id, "name": format!("{}-name", id), "env": "prod",
            "size_gb": size_gb, "lifecycle_policy": lifecycle_policy
        }),
    )
}

pub fn eip(id: &str, env: &str, associated: bool) -> Resource {
    let association_id = associated.then_some("eipassoc-1");
    row(
        ResourceKind::ElasticIp,
        json!({
            "id": id, "name": format!("{}-name", id), "env": env,
            "public_ip": "203.0.113.10",
            "association_id": association_id
        }),
    )
}

pub fn lambda(id: &str, memory_mb: u32, used_pct: f64) -> Resource {
    row(
        ResourceKind::LambdaFunction,
        json!({
            "id": id, "name": format!("{}-name", id), "env": "dev",
            "memory_mb": memory_mb, "avg_memory_used_pct": used_pct, "invocations_7d": 1000
        }),
    )
}

pub fn with_lock(mut resource: Resource, locked: bool) -> Resource {
    resource.meta_mut().locked = Some(locked);
    resource
}

/// Executor over in-memory collaborators with the builtin catalog
pub fn executor(store: &Arc<MemoryResourceStore>, audit: &Arc<MemoryAuditLog>) -> Executor {
    executor_with_timeout(store, audit, Duration::from_secs(5))
}

pub fn executor_with_timeout(
    store: &Arc<MemoryResourceStore>,
    audit: &Arc<MemoryAuditLog>,
    action_timeout: Duration,
) -> Executor {
    Executor::new(
        store.clone(),
        audit.clone(),
        Arc::new(ScenarioCatalog::builtin().unwrap()),
    )
    .with_config(ExecutorConfig { action_timeout })
}

/// Detection for a resource known to match `scenario_id`, priced at a flat 10.0
pub fn detection_for(resource: &Resource, scenario_id: &str) -> Detection {
    let catalog = ScenarioCatalog::builtin().unwrap();
    let scenario = catalog.lookup(scenario_id).unwrap();
    let Evaluation::Match(finding) = scenario.evaluate(resource) else {
        panic!("{} does not match {}", resource.id(), scenario_id);
    };
    let mut details = finding.details;
    if let Some(target) = finding.target_size {
        details.insert("target_size".to_string(), target);
    }
    Detection {
        id: detection_id(scenario_id, resource.id()),
        scenario_id: scenario_id.to_string(),
        resource_id: resource.id().to_string(),
        resource_name: resource.name().to_string(),
        resource_type: resource.kind(),
        potential_savings: 10.0,
        current_cost: 10.0,
        details,
        observed_at: Utc::now(),
        policy: resource.policy_view(),
    }
}

/// Params the orchestrator would build for a matching resource
pub fn params_for(resource: &Resource, scenario_id: &str, trigger: ExecutionTrigger) -> ExecutionParams {
    let catalog = ScenarioCatalog::builtin().unwrap();
    let scenario = catalog.lookup(scenario_id).unwrap();
    ExecutionParams::for_detection(
        &detection_for(resource, scenario_id),
        scenario.action.clone(),
        trigger,
    )
}
