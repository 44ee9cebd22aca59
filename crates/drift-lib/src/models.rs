//! Core data models for waste detection and remediation
//!
//! Every resource category is an explicit variant of [`Resource`] with its
//! required fields typed and its utilization metrics optional. A missing
//! metric stays `None` all the way to the scenario predicates, which report
//! it as insufficient data instead of treating it as zero.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Resource categories known to the Resource Store (one table per kind)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Ec2Instance,
    RdsInstance,
    CacheCluster,
    EbsVolume,
    S3Bucket,
    LoadBalancer,
    AutoScalingGroup,
    ElasticIp,
    LambdaFunction,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 9] = [
        ResourceKind::Ec2Instance,
        ResourceKind::RdsInstance,
        ResourceKind::CacheCluster,
        ResourceKind::EbsVolume,
        ResourceKind::S3Bucket,
        ResourceKind::LoadBalancer,
        ResourceKind::AutoScalingGroup,
        ResourceKind::ElasticIp,
        ResourceKind::LambdaFunction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Ec2Instance => "ec2_instance",
            ResourceKind::RdsInstance => "rds_instance",
            ResourceKind::CacheCluster => "cache_cluster",
            ResourceKind::EbsVolume => "ebs_volume",
            ResourceKind::S3Bucket => "s3_bucket",
            ResourceKind::LoadBalancer => "load_balancer",
            ResourceKind::AutoScalingGroup => "auto_scaling_group",
            ResourceKind::ElasticIp => "elastic_ip",
            ResourceKind::LambdaFunction => "lambda_function",
        }
    }

    /// Name of the Resource Store table holding rows of this kind
    pub fn table_name(&self) -> &'static str {
        match self {
            ResourceKind::Ec2Instance => "ec2_instances",
            ResourceKind::RdsInstance => "rds_instances",
            ResourceKind::CacheCluster => "cache_clusters",
            ResourceKind::EbsVolume => "ebs_volumes",
            ResourceKind::S3Bucket => "s3_buckets",
            ResourceKind::LoadBalancer => "load_balancers",
            ResourceKind::AutoScalingGroup => "auto_scaling_groups",
            ResourceKind::ElasticIp => "elastic_ips",
            ResourceKind::LambdaFunction => "lambda_functions",
        }
    }

    /// Field holding the size dimension, if the kind has one
    pub fn size_field(&self) -> Option<&'static str> {
        match self {
            ResourceKind::Ec2Instance => Some("instance_type"),
            ResourceKind::RdsInstance => Some("instance_class"),
            ResourceKind::CacheCluster => Some("node_type"),
            ResourceKind::EbsVolume => Some("size_gb"),
            ResourceKind::AutoScalingGroup => Some("desired_capacity"),
            ResourceKind::LambdaFunction => Some("memory_mb"),
            ResourceKind::S3Bucket | ResourceKind::LoadBalancer | ResourceKind::ElasticIp => None,
        }
    }

    /// Field holding the run state for stoppable kinds
    pub fn state_field(&self) -> Option<&'static str> {
        match self {
            ResourceKind::Ec2Instance => Some("state"),
            ResourceKind::RdsInstance => Some("status"),
            _ => None,
        }
    }

    pub fn is_stoppable(&self) -> bool {
        self.state_field().is_some()
    }

    pub fn is_deletable(&self) -> bool {
        matches!(
            self,
            ResourceKind::EbsVolume | ResourceKind::LoadBalancer | ResourceKind::ElasticIp
        )
    }

    /// Fields an `update_field` remediation may write
    pub fn updatable_fields(&self) -> &'static [&'static str] {
        match self {
            ResourceKind::EbsVolume => &["volume_type"],
            ResourceKind::S3Bucket => &["lifecycle_policy", "storage_class"],
            ResourceKind::LambdaFunction => &["memory_mb"],
            ResourceKind::AutoScalingGroup => &["min_size", "desired_capacity"],
            _ => &[],
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s || kind.table_name() == s)
            .ok_or_else(|| format!("unknown resource type: {}", s))
    }
}

/// Per-resource optimization policy chosen by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationPolicy {
    AutoSafe,
    RecommendOnly,
    Ignore,
}

impl OptimizationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationPolicy::AutoSafe => "auto_safe",
            OptimizationPolicy::RecommendOnly => "recommend_only",
            OptimizationPolicy::Ignore => "ignore",
        }
    }
}

impl fmt::Display for OptimizationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto_safe" => Ok(OptimizationPolicy::AutoSafe),
            "recommend_only" => Ok(OptimizationPolicy::RecommendOnly),
            "ignore" => Ok(OptimizationPolicy::Ignore),
            other => Err(format!("unknown optimization policy: {}", other)),
        }
    }
}

/// Global execution mode for a tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Manual,
    Automated,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Manual => "manual",
            ExecutionMode::Automated => "automated",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "manual" => Ok(ExecutionMode::Manual),
            "automated" => Ok(ExecutionMode::Automated),
            other => Err(format!("unknown execution mode: {}", other)),
        }
    }
}

/// Metadata shared by every resource row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceMeta {
    pub id: String,
    pub name: String,
    pub env: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Explicit user lock; `None` means the lock is inferred
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimization_policy: Option<OptimizationPolicy>,
}

impl ResourceMeta {
    pub fn new(id: impl Into<String>, name: impl Into<String>, env: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            env: env.into(),
            region: None,
            locked: None,
            optimization_policy: None,
        }
    }
}

/// Run state of compute and database resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Available,
    Stopping,
    Stopped,
    Deleting,
    Terminated,
    #[serde(other)]
    Unknown,
}

impl RunState {
    pub fn is_active(&self) -> bool {
        matches!(self, RunState::Running | RunState::Available)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(
            self,
            RunState::Stopping | RunState::Stopped | RunState::Terminated
        )
    }
}

/// Attachment state of block storage volumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeState {
    Creating,
    Available,
    InUse,
    Deleting,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ec2Instance {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    pub state: RunState,
    pub instance_type: String,
    #[serde(default)]
    pub avg_cpu_7d: Option<f64>,
    #[serde(default)]
    pub max_cpu_7d: Option<f64>,
    #[serde(default)]
    pub network_mb_7d: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RdsInstance {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    pub status: RunState,
    pub instance_class: String,
    #[serde(default)]
    pub engine: Option<String>,
    #[serde(default)]
    pub avg_cpu_7d: Option<f64>,
    #[serde(default)]
    pub avg_connections_7d: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheCluster {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    pub status: RunState,
    pub node_type: String,
    #[serde(default = "default_node_count")]
    pub num_nodes: u32,
    #[serde(default)]
    pub avg_cpu_7d: Option<f64>,
    #[serde(default)]
    pub avg_connections_7d: Option<f64>,
}

fn default_node_count() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EbsVolume {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    pub state: VolumeState,
    pub volume_type: String,
    pub size_gb: u32,
    #[serde(default)]
    pub attached_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S3Bucket {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    pub size_gb: f64,
    pub lifecycle_policy: bool,
    #[serde(default = "default_storage_class")]
    pub storage_class: String,
}

fn default_storage_class() -> String {
    "standard".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancer {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    pub lb_type: String,
    #[serde(default)]
    pub request_count_7d: Option<f64>,
    #[serde(default)]
    pub healthy_targets: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoScalingGroup {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    pub instance_type: String,
    pub min_size: u32,
    pub max_size: u32,
    pub desired_capacity: u32,
    #[serde(default)]
    pub avg_cpu_7d: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElasticIp {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    pub public_ip: String,
    #[serde(default)]
    pub association_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LambdaFunction {
    #[serde(flatten)]
    pub meta: ResourceMeta,
    pub memory_mb: u32,
    #[serde(default)]
    pub avg_memory_used_pct: Option<f64>,
    #[serde(default)]
    pub invocations_7d: Option<f64>,
}

/// A row from the Resource Store, tagged by its category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Resource {
    Ec2Instance(Ec2Instance),
    RdsInstance(RdsInstance),
    CacheCluster(CacheCluster),
    EbsVolume(EbsVolume),
    S3Bucket(S3Bucket),
    LoadBalancer(LoadBalancer),
    AutoScalingGroup(AutoScalingGroup),
    ElasticIp(ElasticIp),
    LambdaFunction(LambdaFunction),
}

impl Resource {
    /// Parse an untagged table row of the given kind
    pub fn from_row(kind: ResourceKind, row: Value) -> Result<Self, serde_json::Error> {
        let mut row = row;
        if let Value::Object(map) = &mut row {
            map.insert("type".to_string(), Value::String(kind.as_str().to_string()));
        }
        serde_json::from_value(row)
    }

    /// Serialize to a table row (without the type tag)
    pub fn to_row(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.remove("type");
        }
        value
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Ec2Instance(_) => ResourceKind::Ec2Instance,
            Resource::RdsInstance(_) => ResourceKind::RdsInstance,
            Resource::CacheCluster(_) => ResourceKind::CacheCluster,
            Resource::EbsVolume(_) => ResourceKind::EbsVolume,
            Resource::S3Bucket(_) => ResourceKind::S3Bucket,
            Resource::LoadBalancer(_) => ResourceKind::LoadBalancer,
            Resource::AutoScalingGroup(_) => ResourceKind::AutoScalingGroup,
            Resource::ElasticIp(_) => ResourceKind::ElasticIp,
            Resource::LambdaFunction(_) => ResourceKind::LambdaFunction,
        }
    }

    pub fn meta(&self) -> &ResourceMeta {
        match self {
            Resource::Ec2Instance(r) => &r.meta,
            Resource::RdsInstance(r) => &r.meta,
            Resource::CacheCluster(r) => &r.meta,
            Resource::EbsVolume(r) => &r.meta,
            Resource::S3Bucket(r) => &r.meta,
            Resource::LoadBalancer(r) => &r.meta,
            Resource::AutoScalingGroup(r) => &r.meta,
            Resource::ElasticIp(r) => &r.meta,
            Resource::LambdaFunction(r) => &r.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ResourceMeta {
        match self {
            Resource::Ec2Instance(r) => &mut r.meta,
            Resource::RdsInstance(r) => &mut r.meta,
            Resource::CacheCluster(r) => &mut r.meta,
            Resource::EbsVolume(r) => &mut r.meta,
            Resource::S3Bucket(r) => &mut r.meta,
            Resource::LoadBalancer(r) => &mut r.meta,
            Resource::AutoScalingGroup(r) => &mut r.meta,
            Resource::ElasticIp(r) => &mut r.meta,
            Resource::LambdaFunction(r) => &mut r.meta,
        }
    }

    pub fn id(&self) -> &str {
        &self.meta().id
    }

    pub fn name(&self) -> &str {
        &self.meta().name
    }

    /// Current value of a top-level field, as stored
    pub fn field(&self, name: &str) -> Option<Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => map.remove(name).filter(|v| !v.is_null()),
            _ => None,
        }
    }

    /// Current value of the size dimension
    pub fn size(&self) -> Option<Value> {
        self.kind().size_field().and_then(|field| self.field(field))
    }

    /// True once a stoppable resource is stopped or on its way there
    pub fn is_stopped(&self) -> bool {
        match self {
            Resource::Ec2Instance(r) => r.state.is_stopped(),
            Resource::RdsInstance(r) => r.status.is_stopped(),
            _ => false,
        }
    }

    /// Snapshot of the fields the policy lock evaluator looks at
    pub fn policy_view(&self) -> PolicyResource {
        let meta = self.meta();
        PolicyResource {
            id: meta.id.clone(),
            resource_type: self.kind(),
            env: meta.env.clone(),
            optimization_policy: meta.optimization_policy,
            locked: meta.locked,
        }
    }
}

/// The subset of a resource relevant to policy decisions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyResource {
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceKind,
    pub env: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimization_policy: Option<OptimizationPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
}

/// A waste finding for one resource against one scenario
///
/// Detections are recomputed every tick and never persisted on their own;
/// a recommendation keeps a snapshot of the one it was created from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: String,
    pub scenario_id: String,
    pub resource_id: String,
    pub resource_name: String,
    pub resource_type: ResourceKind,
    pub potential_savings: f64,
    pub current_cost: f64,
    pub details: BTreeMap<String, Value>,
    pub observed_at: DateTime<Utc>,
    /// Policy fields as observed together with the metrics
    pub policy: PolicyResource,
}

/// Round a currency amount to whole cents, clamping negatives to zero
pub fn to_cents(amount: f64) -> i64 {
    if !amount.is_finite() || amount <= 0.0 {
        return 0;
    }
    (amount * 100.0).round() as i64
}

pub fn from_cents(cents: i64) -> f64 {
    cents as f64 / 100.0
}
