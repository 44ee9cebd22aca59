//! Core library for cloud waste detection and remediation
//!
//! This crate provides the core functionality for:
//! - Rule-based waste detection against a static scenario catalog
//! - Policy lock evaluation (manual locks and production protection)
//! - Remediation with compare-and-act idempotence and an audit trail
//! - A human review queue for recommendations
//! - The drift-tick orchestrator tying them together
//! - Health checks and observability

pub mod catalog;
pub mod detector;
pub mod error;
pub mod executor;
pub mod health;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod policy;
pub mod pricing;
pub mod recommendation;
pub mod store;

#[cfg(test)]
mod fixtures;

pub use catalog::{RemediationAction, Scenario, ScenarioCatalog, ScenarioInfo};
pub use detector::{DetectionRun, DetectionSummary, WasteDetector};
pub use error::{CatalogError, ErrorKind, PolicyError, StoreError, TickError, TransitionError};
pub use executor::{ExecutionOutcome, ExecutionResult, ExecutionTrigger, Executor, ExecutorConfig};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{DriftMetrics, StructuredLogger};
pub use orchestrator::{DriftTick, TickOptions, TickReport};
pub use recommendation::{
    MemoryRecommendationStore, Recommendation, RecommendationStatus, RecommendationWorkflow,
};
