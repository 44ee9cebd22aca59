//! Rule-based waste detector
//!
//! Reads every resource category from the Resource Store (in parallel, one
//! task per category), evaluates the catalog scenarios registered for that
//! category and prices each match. A category that cannot be read
//! contributes no detections and is reported in the summary.

use crate::catalog::{Evaluation, Finding, RemediationAction, SavingsModel, Scenario, ScenarioCatalog};
use crate::error::StoreError;
use crate::models::{from_cents, to_cents, Detection, Resource, ResourceKind};
use crate::observability::{DriftMetrics, StructuredLogger};
use crate::pricing::{pricing_basis, resized_basis, utilization, Pricing};
use crate::store::{RejectedRow, ResourceFilter, ResourceStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;


/// Stable id for a (scenario, resource) pair, identical across ticks
pub fn detection_id(scenario_id: &str, resource_id: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}", scenario_id, resource_id).as_bytes());
    format!("det-{}", &hex::encode(digest)[..16])
}

/// Count and savings for one scenario
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioTotals {
    pub count: usize,
    pub potential_savings: f64,
}

/// A resource category that could not be read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryFailure {
    pub resource_type: ResourceKind,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionSummary {
    pub total_potential_savings: f64,
    pub total_current_cost: f64,
    pub by_scenario: BTreeMap<String, ScenarioTotals>,
    pub resources_scanned: usize,
    pub categories_scanned: usize,
    pub category_failures: Vec<CategoryFailure>,
    /// Scenario evaluations skipped because a metric was missing
    pub insufficient_data: usize,
    /// Rows skipped because they did not parse; the rest of their table still counts
    #[serde(default)]
    pub invalid_rows: Vec<RejectedRow>,
}

impl DetectionSummary {
    /// Totals over a set of detections
    ///
    /// Sums are taken in whole cents, so the result does not depend on the
    /// order of `detections`.
    pub fn from_detections(detections: &[Detection]) -> Self {
        let mut savings_cents = 0i64;
        let mut cost_cents = 0i64;
        let mut by_scenario: BTreeMap<String, (usize, i64)> = BTreeMap::new();

        for detection in detections {
            let savings = to_cents(detection.potential_savings);
            savings_cents += savings;
            cost_cents += to_cents(detection.current_cost);
            let entry = by_scenario.entry(detection.scenario_id.clone()).or_default();
            entry.0 += 1;
            entry.1 += savings;
        }

        Self {
            total_potential_savings: from_cents(savings_cents),
            total_current_cost: from_cents(cost_cents),
            by_scenario: by_scenario
                .into_iter()
                .map(|(id, (count, cents))| {
                    (
                        id,
                        ScenarioTotals {
                            count,
                            potential_savings: from_cents(cents),
                        },
                    )
                })
                .collect(),
            ..Self::default()
        }
    }
}

/// Output of one detection pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionRun {
    pub detections: Vec<Detection>,
    pub summary: DetectionSummary,
}

/// Evaluates resources against the scenario catalog
#[derive(Clone)]
pub struct WasteDetector {
    store: Arc<dyn ResourceStore>,
    catalog: Arc<ScenarioCatalog>,
    pricing: Arc<dyn Pricing>,
    metrics: DriftMetrics,
    logger: StructuredLogger,
}

impl WasteDetector {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        catalog: Arc<ScenarioCatalog>,
        pricing: Arc<dyn Pricing>,
    ) -> Self {
        Self {
            store,
            catalog,
            pricing,
            metrics: DriftMetrics::new(),
            logger: StructuredLogger::default(),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Detect waste across every category the catalog covers
    pub async fn detect_all(&self) -> DetectionRun {
        let observed_at = Utc::now();

        let fetches: Vec<_> = self
            .catalog
            .kinds()
            .into_iter()
            .map(|kind| {
                let store = Arc::clone(&self.store);
                let handle =
                    tokio::spawn(async move { store.select(kind, &ResourceFilter::all()).await });
                (kind, handle)
            })
            .collect();

        let mut detections = Vec::new();
        let mut failures = Vec::new();
        let mut resources_scanned = 0;
        let mut categories_scanned = 0;
        let mut insufficient_data = 0;
        let mut invalid_rows = Vec::new();

        for (kind, handle) in fetches {
            let rows = match handle.await {
                Ok(Ok(selection)) => {
                    for rejected in &selection.rejected {
                        self.logger.log_invalid_row(
                            kind.as_str(),
                            rejected.id.as_deref(),
                            &rejected.reason,
                        );
                    }
                    invalid_rows.extend(selection.rejected);
                    selection.resources
                }
                Ok(Err(e)) => {
                    failures.push(self.category_failed(kind, &e));
                    continue;
                }
                Err(join_err) => {
                    let e = StoreError::TableUnavailable {
                        table: kind.table_name().to_string(),
                        reason: format!("fetch task failed: {}", join_err),
                    };
                    failures.push(self.category_failed(kind, &e));
                    continue;
                }
            };

            categories_scanned += 1;
            resources_scanned += rows.len();
            for resource in &rows {
                for scenario in self.catalog.for_kind(kind) {
                    match scenario.evaluate(resource) {
                        Evaluation::Match(finding) => {
                            detections.push(self.detection(scenario, resource, finding, observed_at));
                        }
                        Evaluation::NoMatch => {}
                        Evaluation::InsufficientData(metric) => {
                            insufficient_data += 1;
                            self.logger
                                .log_insufficient_data(&scenario.id, resource.id(), metric);
                        }
                    }
                }
            }
        }

        detections.sort_by(|a, b| {
            (a.scenario_id.as_str(), a.resource_id.as_str())
                .cmp(&(b.scenario_id.as_str(), b.resource_id.as_str()))
        });

        let mut summary = DetectionSummary::from_detections(&detections);
        summary.resources_scanned = resources_scanned;
        summary.categories_scanned = categories_scanned;
        summary.category_failures = failures;
        summary.insufficient_data = insufficient_data;
        summary.invalid_rows = invalid_rows;

        self.metrics
            .set_detection_totals(detections.len(), summary.total_potential_savings);

        DetectionRun {
            detections,
            summary,
        }
    }

    fn category_failed(&self, kind: ResourceKind, err: &StoreError) -> CategoryFailure {
        self.metrics.inc_category_fetch_errors();
        self.logger
            .log_category_fetch_failed(kind.as_str(), &err.to_string());
        CategoryFailure {
            resource_type: kind,
            error: err.to_string(),
        }
    }

    fn detection(
        &self,
        scenario: &Scenario,
        resource: &Resource,
        finding: Finding,
        observed_at: DateTime<Utc>,
    ) -> Detection {
        let kind = resource.kind();
        let basis = pricing_basis(resource);
        let usage = utilization(resource);
        let current_cost = self.pricing.estimate_monthly_cost(kind, &basis, usage).max(0.0);

        let cost_after = match &scenario.savings {
            SavingsModel::FullCost => 0.0,
            SavingsModel::ResizeDelta => finding
                .target_size
                .as_ref()
                .and_then(|target| resized_basis(resource, target))
                .map(|resized| self.pricing.estimate_monthly_cost(kind, &resized, usage))
                .unwrap_or(current_cost),
            SavingsModel::ClassChange { to_class } => {
                self.pricing
                    .estimate_monthly_cost(kind, &basis.with_class(to_class.as_str()), usage)
            }
        };
        let potential_savings = (current_cost - cost_after).max(0.0);

        let mut details = finding.details;
        if let Some(target) = finding.target_size {
            details.insert("target_size".to_string(), target);
        }
        if let RemediationAction::UpdateField { field, value } = &scenario.action {
            details.insert("field".to_string(), Value::from(field.as_str()));
            details.insert("value".to_string(), value.clone());
        }

        Detection {
            id: detection_id(&scenario.id, resource.id()),
            scenario_id: scenario.id.clone(),
            resource_id: resource.id().to_string(),
            resource_name: resource.name().to_string(),
            resource_type: kind,
            potential_savings: from_cents(to_cents(potential_savings)),
            current_cost: from_cents(to_cents(current_cost)),
            details,
            observed_at,
            policy: resource.policy_view(),
        }
    }
}

impl std::fmt::Debug for WasteDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasteDetector")
            .field("scenarios", &self.catalog.len())
            .finish()
    }
}
