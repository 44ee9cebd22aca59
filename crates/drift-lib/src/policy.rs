//! Policy lock evaluation
//!
//! Pure functions deciding whether a resource may be placed into
//! auto-remediation. No I/O; identical input always yields identical output.
//! The orchestrator calls these when filtering detections and the executor
//! calls them again right before mutating.

use crate::error::{PolicyError, StoreError};
use crate::models::{OptimizationPolicy, PolicyResource, Resource, ResourceKind};
use crate::store::{FieldPatch, ResourceStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Non-destructive kinds that can always be toggled to auto-remediation
pub const ALWAYS_TOGGLEABLE: &[ResourceKind] =
    &[ResourceKind::S3Bucket, ResourceKind::LambdaFunction];

/// Kinds that are locked automatically in production
pub const PROD_LOCKED: &[ResourceKind] = &[
    ResourceKind::Ec2Instance,
    ResourceKind::RdsInstance,
    ResourceKind::CacheCluster,
    ResourceKind::EbsVolume,
    ResourceKind::LoadBalancer,
    ResourceKind::AutoScalingGroup,
    ResourceKind::ElasticIp,
];

pub const MANUAL_LOCK_ERROR: &str =
    "This resource is manually locked. Unlock it before enabling automatic remediation.";

pub const PROD_PROTECTION_ERROR: &str =
    "Production protection: this resource type cannot be auto-remediated in production. Use recommend_only and approve changes manually.";

/// Whether an environment name denotes production
pub fn is_prod_env(env: &str) -> bool {
    env.eq_ignore_ascii_case("prod") || env.eq_ignore_ascii_case("production")
}

/// Whether the resource is locked against auto-remediation
pub fn is_policy_locked(resource: &PolicyResource) -> bool {
    if resource.locked == Some(true) {
        return true;
    }
    if ALWAYS_TOGGLEABLE.contains(&resource.resource_type) {
        return false;
    }
    is_prod_env(&resource.env) && PROD_LOCKED.contains(&resource.resource_type)
}

/// Human-readable cause of the lock, following the same precedence
pub fn get_lock_reason(resource: &PolicyResource) -> Option<String> {
    if resource.locked == Some(true) {
        return Some("Manually locked by user".to_string());
    }
    if ALWAYS_TOGGLEABLE.contains(&resource.resource_type) {
        return None;
    }
    if is_prod_env(&resource.env) && PROD_LOCKED.contains(&resource.resource_type) {
        return Some(format!(
            "Production {} resources are protected from automatic remediation",
            resource.resource_type
        ));
    }
    None
}

/// Result of validating a policy change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyValidation {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PolicyValidation {
    fn ok() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    fn rejected(error: &str) -> Self {
        Self {
            valid: false,
            error: Some(error.to_string()),
        }
    }
}

/// Validate a user policy change; only `auto_safe` on a locked resource is refused
pub fn validate_policy_update(
    resource: &PolicyResource,
    new_policy: OptimizationPolicy,
) -> PolicyValidation {
    if new_policy != OptimizationPolicy::AutoSafe || !is_policy_locked(resource) {
        return PolicyValidation::ok();
    }
    if resource.locked == Some(true) {
        PolicyValidation::rejected(MANUAL_LOCK_ERROR)
    } else {
        PolicyValidation::rejected(PROD_PROTECTION_ERROR)
    }
}

/// Policy in force when the user has not chosen one
pub fn effective_policy(resource: &PolicyResource) -> OptimizationPolicy {
    match resource.optimization_policy {
        Some(policy) => policy,
        None if is_policy_locked(resource) => OptimizationPolicy::RecommendOnly,
        None => OptimizationPolicy::AutoSafe,
    }
}

/// Whether the executor may act on the resource without a human in the loop
pub fn allows_auto_remediation(resource: &PolicyResource) -> bool {
    !is_policy_locked(resource) && effective_policy(resource) == OptimizationPolicy::AutoSafe
}

/// Validate and persist a user's optimization policy change
pub async fn update_resource_policy(
    store: &dyn ResourceStore,
    kind: ResourceKind,
    id: &str,
    new_policy: OptimizationPolicy,
) -> Result<Resource, PolicyError> {
    let current = store
        .get(kind, id)
        .await?
        .ok_or_else(|| StoreError::NotFound {
            kind,
            id: id.to_string(),
        })?;

    let validation = validate_policy_update(&current.policy_view(), new_policy);
    if let Some(error) = validation.error {
        return Err(PolicyError::Rejected(error));
    }

    let mut patch = FieldPatch::new();
    patch.insert(
        "optimization_policy".to_string(),
        Value::from(new_policy.as_str()),
    );
    Ok(store.update(kind, id, &patch).await?)
}
