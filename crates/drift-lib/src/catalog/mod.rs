//! Scenario catalog
//!
//! A static registry of detection rules. Each scenario names the resource
//! type it applies to, the predicate that detects waste, the remediation
//! action and whether that action is safe to run without human approval.
//!
//! The catalog is validated once when it is built and is read-only after
//! that: changing the set of scenarios means starting a new process.

mod builtin;
mod sizing;

pub use builtin::builtin_scenarios;
pub use sizing::{next_smaller, smallest_in_family};

use crate::error::CatalogError;
use crate::models::{Resource, ResourceKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Remediation performed when a scenario's detection is executed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemediationAction {
    Stop,
    Delete,
    /// Change the size dimension to the detection's `target_size`
    Resize,
    UpdateField { field: String, value: Value },
}

impl RemediationAction {
    pub fn name(&self) -> &'static str {
        match self {
            RemediationAction::Stop => "stop",
            RemediationAction::Delete => "delete",
            RemediationAction::Resize => "resize",
            RemediationAction::UpdateField { .. } => "update_field",
        }
    }

    /// Whether the action is structurally applicable to a resource type
    pub fn is_compatible_with(&self, kind: ResourceKind) -> bool {
        match self {
            RemediationAction::Stop => kind.is_stoppable(),
            RemediationAction::Delete => kind.is_deletable(),
            RemediationAction::Resize => kind.size_field().is_some(),
            RemediationAction::UpdateField { field, .. } => {
                kind.updatable_fields().contains(&field.as_str())
            }
        }
    }
}

impl fmt::Display for RemediationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemediationAction::UpdateField { field, value } => {
                write!(f, "update_field({}={})", field, value)
            }
            other => f.write_str(other.name()),
        }
    }
}

/// How potential savings are derived for a detection
#[derive(Debug, Clone, PartialEq)]
pub enum SavingsModel {
    /// The whole current cost goes away
    FullCost,
    /// Difference between current and target size
    ResizeDelta,
    /// Difference between current class and `to_class` at the same quantity
    ClassChange { to_class: String },
}

/// Metric a predicate needed but the row did not report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingMetric(pub &'static str);

/// Positive predicate result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Finding {
    pub details: BTreeMap<String, Value>,
    /// Size to resize to, for `Resize` scenarios
    pub target_size: Option<Value>,
}

impl Finding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn target(mut self, target: impl Into<Value>) -> Self {
        self.target_size = Some(target.into());
        self
    }
}

/// Raw predicate output: `Ok(None)` means the rule does not apply
pub type Check = Result<Option<Finding>, MissingMetric>;

pub type Predicate = fn(&Resource) -> Check;

/// Outcome of evaluating one scenario against one resource
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    Match(Finding),
    NoMatch,
    InsufficientData(&'static str),
}

/// A detection rule with its remediation and risk classification
#[derive(Debug, Clone)]
pub struct Scenario {
    pub id: String,
    pub resource_type: ResourceKind,
    pub description: String,
    pub action: RemediationAction,
    pub auto_safe: bool,
    pub savings: SavingsModel,
    predicate: Predicate,
}

impl Scenario {
    pub fn new(
        id: impl Into<String>,
        resource_type: ResourceKind,
        action: RemediationAction,
        auto_safe: bool,
        predicate: Predicate,
    ) -> Self {
        let savings = match action {
            RemediationAction::Resize => SavingsModel::ResizeDelta,
            _ => SavingsModel::FullCost,
        };
        Self {
            id: id.into(),
            resource_type,
            description: String::new(),
            action,
            auto_safe,
            savings,
            predicate,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_savings(mut self, savings: SavingsModel) -> Self {
        self.savings = savings;
        self
    }

    /// Evaluate the threshold predicate; other resource types never match
    pub fn evaluate(&self, resource: &Resource) -> Evaluation {
        if resource.kind() != self.resource_type {
            return Evaluation::NoMatch;
        }
        match (self.predicate)(resource) {
            Ok(Some(finding)) => Evaluation::Match(finding),
            Ok(None) => Evaluation::NoMatch,
            Err(MissingMetric(metric)) => Evaluation::InsufficientData(metric),
        }
    }

    pub fn info(&self) -> ScenarioInfo {
        ScenarioInfo {
            id: self.id.clone(),
            resource_type: self.resource_type,
            description: self.description.clone(),
            action: self.action.clone(),
            auto_safe: self.auto_safe,
        }
    }
}

/// Serializable description of a scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioInfo {
    pub id: String,
    pub resource_type: ResourceKind,
    pub description: String,
    pub action: RemediationAction,
    pub auto_safe: bool,
}

/// Validated, immutable set of scenarios
#[derive(Debug, Clone)]
pub struct ScenarioCatalog {
    scenarios: BTreeMap<String, Scenario>,
}

impl ScenarioCatalog {
    /// Build a catalog, rejecting duplicates and incompatible actions
    pub fn new(scenarios: Vec<Scenario>) -> Result<Self, CatalogError> {
        let mut map = BTreeMap::new();
        for scenario in scenarios {
            if !scenario.action.is_compatible_with(scenario.resource_type) {
                return Err(CatalogError::IncompatibleAction {
                    id: scenario.id.clone(),
                    action: scenario.action.to_string(),
                    kind: scenario.resource_type,
                });
            }
            if map.contains_key(&scenario.id) {
                return Err(CatalogError::Duplicate(scenario.id));
            }
            map.insert(scenario.id.clone(), scenario);
        }
        Ok(Self { scenarios: map })
    }

    pub fn builtin() -> Result<Self, CatalogError> {
        Self::new(builtin_scenarios())
    }

    /// Built-in catalog minus the listed scenario ids
    pub fn builtin_without(disabled: &[String]) -> Result<Self, CatalogError> {
        let scenarios = builtin_scenarios();
        if let Some(unknown) = disabled
            .iter()
            .find(|id| !scenarios.iter().any(|s| &s.id == *id))
        {
            return Err(CatalogError::NotFound(unknown.clone()));
        }
        Self::new(
            scenarios
                .into_iter()
                .filter(|s| !disabled.contains(&s.id))
                .collect(),
        )
    }

    pub fn lookup(&self, id: &str) -> Result<&Scenario, CatalogError> {
        self.scenarios
            .get(id)
            .ok_or_else(|| CatalogError::NotFound(id.to_string()))
    }

    pub fn list_auto_safe_ids(&self) -> BTreeSet<String> {
        self.scenarios
            .values()
            .filter(|s| s.auto_safe)
            .map(|s| s.id.clone())
            .collect()
    }

    pub fn for_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &Scenario> {
        self.scenarios
            .values()
            .filter(move |s| s.resource_type == kind)
    }

    /// Resource kinds that at least one scenario applies to
    pub fn kinds(&self) -> BTreeSet<ResourceKind> {
        self.scenarios.values().map(|s| s.resource_type).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scenario> {
        self.scenarios.values()
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn never(_: &Resource) -> Check {
        Ok(None)
    }

    #[test]
    fn test_builtin_catalog_is_valid() {
        let catalog = ScenarioCatalog::builtin().unwrap();
        assert_eq!(catalog.len(), builtin_scenarios().len());
        assert!(catalog.lookup("idle_cache").unwrap().auto_safe);
        assert!(!catalog.lookup("unattached_ebs").unwrap().auto_safe);
    }

    #[test]
    fn test_resize_on_sizeless_kind_is_fatal() {
        let bad = Scenario::new(
            "resize_bucket",
            ResourceKind::S3Bucket,
            RemediationAction::Resize,
            true,
            never,
        );
        let err = ScenarioCatalog::new(vec![bad]).unwrap_err();
        assert!(matches!(err, CatalogError::IncompatibleAction { .. }));
    }

    #[test]
    fn test_stop_and_update_compatibility() {
        let stop_volume = Scenario::new(
            "stop_volume",
            ResourceKind::EbsVolume,
            RemediationAction::Stop,
            false,
            never,
        );
        assert!(ScenarioCatalog::new(vec![stop_volume]).is_err());

        let bad_field = Scenario::new(
            "retag",
            ResourceKind::EbsVolume,
            RemediationAction::UpdateField {
                field: "name".to_string(),
                value: Value::from("x"),
            },
            false,
            never,
        );
        assert!(ScenarioCatalog::new(vec![bad_field]).is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let a = Scenario::new("dup", ResourceKind::ElasticIp, RemediationAction::Delete, false, never);
        let b = a.clone();
        assert_eq!(
            ScenarioCatalog::new(vec![a, b]).unwrap_err(),
            CatalogError::Duplicate("dup".to_string())
        );
    }

    #[test]
    fn test_lookup_unknown_is_not_found() {
        let catalog = ScenarioCatalog::builtin().unwrap();
        assert_eq!(
            catalog.lookup("nope").unwrap_err(),
            CatalogError::NotFound("nope".to_string())
        );
    }

    #[test]
    fn test_auto_safe_ids() {
        let catalog = ScenarioCatalog::builtin().unwrap();
        let ids = catalog.list_auto_safe_ids();
        assert!(ids.contains("idle_rds"));
        assert!(ids.contains("gp2_ebs"));
        assert!(!ids.contains("oversized_ec2"));
        assert!(!ids.contains("unassociated_eip"));
    }

    #[test]
    fn test_disabling_scenarios() {
        let catalog = ScenarioCatalog::builtin_without(&["idle_ec2".to_string()]).unwrap();
        assert!(catalog.lookup("idle_ec2").is_err());
        assert!(catalog.lookup("oversized_ec2").is_ok());

        let err = ScenarioCatalog::builtin_without(&["bogus".to_string()]).unwrap_err();
        assert_eq!(err, CatalogError::NotFound("bogus".to_string()));
    }
}
