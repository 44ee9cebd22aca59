//! Built-in waste scenarios

use super::sizing::{next_smaller, smallest_in_family};
use super::{Check, Finding, MissingMetric, RemediationAction, SavingsModel, Scenario};
use crate::models::{Resource, ResourceKind, VolumeState};
use serde_json::Value;

const IDLE_EC2_MAX_CPU: f64 = 5.0;
const IDLE_EC2_MAX_NETWORK_MB: f64 = 50.0;
const OVERSIZED_EC2_MAX_AVG_CPU: f64 = 20.0;
const OVERSIZED_EC2_MAX_PEAK_CPU: f64 = 40.0;
const IDLE_RDS_MAX_CPU: f64 = 10.0;
const IDLE_RDS_MAX_CONNECTIONS: f64 = 1.0;
const IDLE_CACHE_MAX_CPU: f64 = 5.0;
const IDLE_CACHE_MAX_CONNECTIONS: f64 = 5.0;
const S3_LIFECYCLE_MIN_GB: f64 = 100.0;
const IDLE_LB_MAX_REQUESTS: f64 = 100.0;
const ASG_MAX_CPU: f64 = 20.0;
const LAMBDA_MIN_MEMORY_MB: u32 = 1024;
const LAMBDA_MAX_USED_PCT: f64 = 30.0;
const LAMBDA_FLOOR_MB: u32 = 128;

fn metric(value: Option<f64>, name: &'static str) -> Result<f64, MissingMetric> {
    value.ok_or(MissingMetric(name))
}

pub fn builtin_scenarios() -> Vec<Scenario> {
    vec![
        Scenario::new(
            "idle_ec2",
            ResourceKind::Ec2Instance,
            RemediationAction::Stop,
            true,
            idle_ec2,
        )
        .describe("Running instance with negligible CPU and network for 7 days"),
        Scenario::new(
            "oversized_ec2",
            ResourceKind::Ec2Instance,
            RemediationAction::Resize,
            false,
            oversized_ec2,
        )
        .describe("Instance whose peak CPU fits comfortably in the next size down"),
        Scenario::new(
            "idle_rds",
            ResourceKind::RdsInstance,
            RemediationAction::Stop,
            true,
            idle_rds,
        )
        .describe("Database with low CPU and no client connections for 7 days"),
        Scenario::new(
            "idle_cache",
            ResourceKind::CacheCluster,
            RemediationAction::Resize,
            true,
            idle_cache,
        )
        .describe("Cache cluster with negligible load, shrink to the smallest node"),
        Scenario::new(
            "unattached_ebs",
            ResourceKind::EbsVolume,
            RemediationAction::Delete,
            false,
            unattached_ebs,
        )
        .describe("Volume not attached to any instance"),
        Scenario::new(
            "gp2_ebs",
            ResourceKind::EbsVolume,
            RemediationAction::UpdateField {
                field: "volume_type".to_string(),
                value: Value::from("gp3"),
            },
            true,
            gp2_ebs,
        )
        .describe("Previous-generation gp2 volume, migrate to gp3")
        .with_savings(SavingsModel::ClassChange {
            to_class: "gp3".to_string(),
        }),
        Scenario::new(
            "s3_no_lifecycle",
            ResourceKind::S3Bucket,
            RemediationAction::UpdateField {
                field: "lifecycle_policy".to_string(),
                value: Value::Bool(true),
            },
            true,
            s3_no_lifecycle,
        )
        .describe("Large bucket without a lifecycle policy")
        .with_savings(SavingsModel::ClassChange {
            to_class: "intelligent_tiering".to_string(),
        }),
        Scenario::new(
            "idle_load_balancer",
            ResourceKind::LoadBalancer,
            RemediationAction::Delete,
            false,
            idle_load_balancer,
        )
        .describe("Load balancer serving almost no requests"),
        Scenario::new(
            "overprovisioned_asg",
            ResourceKind::AutoScalingGroup,
            RemediationAction::Resize,
            false,
            overprovisioned_asg,
        )
        .describe("Scaling group running above its minimum at low CPU"),
        Scenario::new(
            "unassociated_eip",
            ResourceKind::ElasticIp,
            RemediationAction::Delete,
            false,
            unassociated_eip,
        )
        .describe("Elastic IP not associated with any instance"),
        Scenario::new(
            "oversized_lambda",
            ResourceKind::LambdaFunction,
            RemediationAction::Resize,
            true,
            oversized_lambda,
        )
        .describe("Function using a small fraction of its configured memory"),
    ]
}

fn idle_ec2(resource: &Resource) -> Check {
    let Resource::Ec2Instance(r) = resource else {
        return Ok(None);
    };
    if !r.state.is_active() {
        return Ok(None);
    }
    let cpu = metric(r.avg_cpu_7d, "avg_cpu_7d")?;
    let network = metric(r.network_mb_7d, "network_mb_7d")?;
    if cpu >= IDLE_EC2_MAX_CPU || network >= IDLE_EC2_MAX_NETWORK_MB {
        return Ok(None);
    }
    Ok(Some(
        Finding::new()
            .detail("avg_cpu_7d", cpu)
            .detail("network_mb_7d", network)
            .detail("instance_type", r.instance_type.as_str()),
    ))
}

fn oversized_ec2(resource: &Resource) -> Check {
    let Resource::Ec2Instance(r) = resource else {
        return Ok(None);
    };
    if !r.state.is_active() {
        return Ok(None);
    }
    let cpu = metric(r.avg_cpu_7d, "avg_cpu_7d")?;
    let peak = metric(r.max_cpu_7d, "max_cpu_7d")?;
    // Below the idle threshold the instance is handled by idle_ec2
    if !(IDLE_EC2_MAX_CPU..OVERSIZED_EC2_MAX_AVG_CPU).contains(&cpu)
        || peak >= OVERSIZED_EC2_MAX_PEAK_CPU
    {
        return Ok(None);
    }
    let Some(target) = next_smaller(&r.instance_type) else {
        return Ok(None);
    };
    Ok(Some(
        Finding::new()
            .detail("avg_cpu_7d", cpu)
            .detail("max_cpu_7d", peak)
            .detail("instance_type", r.instance_type.as_str())
            .target(target),
    ))
}

fn idle_rds(resource: &Resource) -> Check {
    let Resource::RdsInstance(r) = resource else {
        return Ok(None);
    };
    if !r.status.is_active() {
        return Ok(None);
    }
    let cpu = metric(r.avg_cpu_7d, "avg_cpu_7d")?;
    let connections = metric(r.avg_connections_7d, "avg_connections_7d")?;
    if cpu >= IDLE_RDS_MAX_CPU || connections >= IDLE_RDS_MAX_CONNECTIONS {
        return Ok(None);
    }
    Ok(Some(
        Finding::new()
            .detail("avg_cpu_7d", cpu)
            .detail("avg_connections_7d", connections)
            .detail("instance_class", r.instance_class.as_str()),
    ))
}

fn idle_cache(resource: &Resource) -> Check {
    let Resource::CacheCluster(r) = resource else {
        return Ok(None);
    };
    if !r.status.is_active() {
        return Ok(None);
    }
    let cpu = metric(r.avg_cpu_7d, "avg_cpu_7d")?;
    let connections = metric(r.avg_connections_7d, "avg_connections_7d")?;
    if cpu >= IDLE_CACHE_MAX_CPU || connections >= IDLE_CACHE_MAX_CONNECTIONS {
        return Ok(None);
    }
    let Some(target) = smallest_in_family(&r.node_type) else {
        return Ok(None);
    };
    Ok(Some(
        Finding::new()
            .detail("avg_cpu_7d", cpu)
            .detail("avg_connections_7d", connections)
            .detail("node_type", r.node_type.as_str())
            .target(target),
    ))
}

fn unattached_ebs(resource: &Resource) -> Check {
    let Resource::EbsVolume(r) = resource else {
        return Ok(None);
    };
    if r.state != VolumeState::Available || r.attached_to.is_some() {
        return Ok(None);
    }
    Ok(Some(
        Finding::new()
            .detail("size_gb", r.size_gb)
            .detail("volume_type", r.volume_type.as_str()),
    ))
}

fn gp2_ebs(resource: &Resource) -> Check {
    let Resource::EbsVolume(r) = resource else {
        return Ok(None);
    };
    if r.volume_type != "gp2" || r.state == VolumeState::Deleting {
        return Ok(None);
    }
    Ok(Some(
        Finding::new()
            .detail("size_gb", r.size_gb)
            .detail("volume_type", "gp2"),
    ))
}

fn s3_no_lifecycle(resource: &Resource) -> Check {
    let Resource::S3Bucket(r) = resource else {
        return Ok(None);
    };
    if r.lifecycle_policy || r.size_gb < S3_LIFECYCLE_MIN_GB {
        return Ok(None);
    }
    Ok(Some(
        Finding::new()
            .detail("size_gb", r.size_gb)
            .detail("storage_class", r.storage_class.as_str()),
    ))
}

fn idle_load_balancer(resource: &Resource) -> Check {
    let Resource::LoadBalancer(r) = resource else {
        return Ok(None);
    };
    let requests = metric(r.request_count_7d, "request_count_7d")?;
    if requests >= IDLE_LB_MAX_REQUESTS {
        return Ok(None);
    }
    let mut finding = Finding::new()
        .detail("request_count_7d", requests)
        .detail("lb_type", r.lb_type.as_str());
    if let Some(targets) = r.healthy_targets {
        finding = finding.detail("healthy_targets", targets);
    }
    Ok(Some(finding))
}

fn overprovisioned_asg(resource: &Resource) -> Check {
    let Resource::AutoScalingGroup(r) = resource else {
        return Ok(None);
    };
    if r.desired_capacity <= r.min_size {
        return Ok(None);
    }
    let cpu = metric(r.avg_cpu_7d, "avg_cpu_7d")?;
    if cpu >= ASG_MAX_CPU {
        return Ok(None);
    }
    let target = r.min_size.max(r.desired_capacity.div_ceil(2));
    Ok(Some(
        Finding::new()
            .detail("avg_cpu_7d", cpu)
            .detail("desired_capacity", r.desired_capacity)
            .detail("min_size", r.min_size)
            .target(target),
    ))
}

fn unassociated_eip(resource: &Resource) -> Check {
    let Resource::ElasticIp(r) = resource else {
        return Ok(None);
    };
    if r.association_id.is_some() {
        return Ok(None);
    }
    Ok(Some(Finding::new().detail("public_ip", r.public_ip.as_str())))
}

fn oversized_lambda(resource: &Resource) -> Check {
    let Resource::LambdaFunction(r) = resource else {
        return Ok(None);
    };
    if r.memory_mb <= LAMBDA_MIN_MEMORY_MB {
        return Ok(None);
    }
    let used_pct = metric(r.avg_memory_used_pct, "avg_memory_used_pct")?;
    if used_pct >= LAMBDA_MAX_USED_PCT {
        return Ok(None);
    }
    let used_mb = (f64::from(r.memory_mb) * used_pct / 100.0).ceil() as u32;
    let target = used_mb
        .saturating_mul(2)
        .max(LAMBDA_FLOOR_MB)
        .next_power_of_two();
    if target >= r.memory_mb {
        return Ok(None);
    }
    Ok(Some(
        Finding::new()
            .detail("memory_mb", r.memory_mb)
            .detail("avg_memory_used_pct", used_pct)
            .target(target),
    ))
}
