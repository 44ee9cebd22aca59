//! Monthly cost estimation
//!
//! The detector never holds prices itself; it asks a [`Pricing`]
//! implementation for the cost of a size or class. [`StaticPricing`] ships
//! an on-demand list price table that can be overridden per class.

use crate::models::{Resource, ResourceKind};
use std::collections::HashMap;

/// Hours in an average month
const HOURS_PER_MONTH: f64 = 730.0;

/// What is being priced: a fixed class or a number of billable units of a class
#[derive(Debug, Clone, PartialEq)]
pub enum SizeOrClass {
    Class(String),
    Units { class: String, units: f64 },
}

impl SizeOrClass {
    pub fn class(&self) -> &str {
        match self {
            SizeOrClass::Class(class) => class,
            SizeOrClass::Units { class, .. } => class,
        }
    }

    pub fn units(&self) -> f64 {
        match self {
            SizeOrClass::Class(_) => 1.0,
            SizeOrClass::Units { units, .. } => *units,
        }
    }

    /// Same quantity, different class
    pub fn with_class(&self, class: impl Into<String>) -> Self {
        match self {
            SizeOrClass::Class(_) => SizeOrClass::Class(class.into()),
            SizeOrClass::Units { units, .. } => SizeOrClass::Units {
                class: class.into(),
                units: *units,
            },
        }
    }
}

/// Pure cost estimation collaborator
pub trait Pricing: Send + Sync {
    /// Estimated monthly cost in USD; never negative
    fn estimate_monthly_cost(
        &self,
        kind: ResourceKind,
        size: &SizeOrClass,
        utilization: Option<f64>,
    ) -> f64;
}

/// How a resource is billed, derived from its current row
pub fn pricing_basis(resource: &Resource) -> SizeOrClass {
    match resource {
        Resource::Ec2Instance(r) => SizeOrClass::Class(r.instance_type.clone()),
        Resource::RdsInstance(r) => SizeOrClass::Class(r.instance_class.clone()),
        Resource::CacheCluster(r) => SizeOrClass::Units {
            class: r.node_type.clone(),
            units: f64::from(r.num_nodes),
        },
        Resource::EbsVolume(r) => SizeOrClass::Units {
            class: r.volume_type.clone(),
            units: f64::from(r.size_gb),
        },
        Resource::S3Bucket(r) => SizeOrClass::Units {
            class: r.storage_class.clone(),
            units: r.size_gb,
        },
        Resource::LoadBalancer(r) => SizeOrClass::Class(r.lb_type.clone()),
        Resource::AutoScalingGroup(r) => SizeOrClass::Units {
            class: r.instance_type.clone(),
            units: f64::from(r.desired_capacity),
        },
        Resource::ElasticIp(_) => SizeOrClass::Class("elastic_ip".to_string()),
        Resource::LambdaFunction(r) => SizeOrClass::Units {
            class: "lambda_mb".to_string(),
            units: f64::from(r.memory_mb),
        },
    }
}

/// Billing basis after resizing to `target` (a class name or a unit count)
pub fn resized_basis(resource: &Resource, target: &serde_json::Value) -> Option<SizeOrClass> {
    let current = pricing_basis(resource);
    match resource.kind() {
        ResourceKind::Ec2Instance | ResourceKind::RdsInstance | ResourceKind::CacheCluster => {
            target.as_str().map(|class| current.with_class(class))
        }
        ResourceKind::EbsVolume | ResourceKind::AutoScalingGroup | ResourceKind::LambdaFunction => {
            target.as_f64().map(|units| SizeOrClass::Units {
                class: current.class().to_string(),
                units,
            })
        }
        _ => None,
    }
}

/// Average utilization as a 0..1 ratio, when the row reports one
pub fn utilization(resource: &Resource) -> Option<f64> {
    let pct = match resource {
        Resource::Ec2Instance(r) => r.avg_cpu_7d,
        Resource::RdsInstance(r) => r.avg_cpu_7d,
        Resource::CacheCluster(r) => r.avg_cpu_7d,
        Resource::AutoScalingGroup(r) => r.avg_cpu_7d,
        Resource::LambdaFunction(r) => r.avg_memory_used_pct,
        _ => None,
    };
    pct.map(|p| (p / 100.0).clamp(0.0, 1.0))
}

/// On-demand list prices keyed by kind and class
///
/// Compute classes are priced hourly and converted to a month; storage and
/// per-unit classes are monthly rates per unit. Utilization is accepted for
/// interface compatibility but list prices do not depend on it.
#[derive(Debug, Clone)]
pub struct StaticPricing {
    rates: HashMap<(ResourceKind, String), f64>,
}

impl StaticPricing {
    pub fn empty() -> Self {
        Self {
            rates: HashMap::new(),
        }
    }

    /// Set a monthly rate per unit for a class
    pub fn with_rate(mut self, kind: ResourceKind, class: &str, monthly: f64) -> Self {
        self.rates.insert((kind, class.to_string()), monthly.max(0.0));
        self
    }

    fn hourly_rates(self, kind: ResourceKind, rates: &[(&str, f64)]) -> Self {
        rates.iter().fold(self, |pricing, (class, hourly)| {
            pricing.with_rate(kind, class, hourly * HOURS_PER_MONTH)
        })
    }

    fn monthly_rates(self, kind: ResourceKind, rates: &[(&str, f64)]) -> Self {
        rates
            .iter()
            .fold(self, |pricing, (class, monthly)| pricing.with_rate(kind, class, *monthly))
    }

    fn rate(&self, kind: ResourceKind, class: &str) -> Option<f64> {
        // Scaling groups bill their instances at the EC2 rate
        let table = match kind {
            ResourceKind::AutoScalingGroup => ResourceKind::Ec2Instance,
            other => other,
        };
        self.rates.get(&(table, class.to_string())).copied()
    }
}

impl Default for StaticPricing {
    fn default() -> Self {
        Self::empty()
            .hourly_rates(
                ResourceKind::Ec2Instance,
                &[
                    ("t3.nano", 0.0052),
                    ("t3.micro", 0.0104),
                    ("t3.small", 0.0208),
                    ("t3.medium", 0.0416),
                    ("t3.large", 0.0832),
                    ("t3.xlarge", 0.1664),
                    ("t3.2xlarge", 0.3328),
                    ("m5.large", 0.096),
                    ("m5.xlarge", 0.192),
                    ("m5.2xlarge", 0.384),
                    ("m5.4xlarge", 0.768),
                    ("c5.large", 0.085),
                    ("c5.xlarge", 0.17),
                    ("c5.2xlarge", 0.34),
                    ("r5.large", 0.126),
                    ("r5.xlarge", 0.252),
                ],
            )
            .hourly_rates(
                ResourceKind::RdsInstance,
                &[
                    ("db.t3.micro", 0.017),
                    ("db.t3.small", 0.034),
                    ("db.t3.medium", 0.068),
                    ("db.t3.large", 0.136),
                    ("db.m5.large", 0.171),
                    ("db.m5.xlarge", 0.342),
                    ("db.r5.large", 0.24),
                    ("db.r5.xlarge", 0.48),
                ],
            )
            .hourly_rates(
                ResourceKind::CacheCluster,
                &[
                    ("cache.t3.micro", 0.017),
                    ("cache.t3.small", 0.034),
                    ("cache.t3.medium", 0.068),
                    ("cache.m5.large", 0.156),
                    ("cache.m5.xlarge", 0.311),
                    ("cache.r5.large", 0.216),
                    ("cache.r5.xlarge", 0.431),
                ],
            )
            .monthly_rates(
                ResourceKind::EbsVolume,
                &[
                    ("gp2", 0.10),
                    ("gp3", 0.08),
                    ("io1", 0.125),
                    ("st1", 0.045),
                    ("sc1", 0.015),
                    ("standard", 0.05),
                ],
            )
            .monthly_rates(
                ResourceKind::S3Bucket,
                &[
                    ("standard", 0.023),
                    ("intelligent_tiering", 0.0125),
                    ("standard_ia", 0.0125),
                    ("glacier", 0.004),
                ],
            )
            .hourly_rates(
                ResourceKind::LoadBalancer,
                &[("application", 0.0225), ("network", 0.0225), ("classic", 0.025)],
            )
            .hourly_rates(ResourceKind::ElasticIp, &[("elastic_ip", 0.005)])
            .monthly_rates(ResourceKind::LambdaFunction, &[("lambda_mb", 0.0167)])
    }
}

impl Pricing for StaticPricing {
    fn estimate_monthly_cost(
        &self,
        kind: ResourceKind,
        size: &SizeOrClass,
        _utilization: Option<f64>,
    ) -> f64 {
        match self.rate(kind, size.class()) {
            Some(rate) => (rate * size.units()).max(0.0),
            None => 0.0,
        }
    }
}
