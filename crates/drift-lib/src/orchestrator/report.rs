use crate::detector::DetectionSummary;
use crate::executor::ExecutionResult;
use crate::models::{Detection, ExecutionMode, ResourceKind};
use crate::recommendation::RecommendationSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a tick's execution mode came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeSource {
    Override,
    Settings,
    Default,
}

impl ModeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModeSource::Override => "override",
            ModeSource::Settings => "settings",
            ModeSource::Default => "default",
        }
    }
}

/// Execution mode for one tick, resolved once and passed along
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolvedMode {
    pub mode: ExecutionMode,
    pub source: ModeSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Why the execution phase did not run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionSkip {
    ManualMode,
    NoAutoSafeDetections,
}

/// Auto-safe detection that the policy lock sent to review instead
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyBlocked {
    pub detection_id: String,
    pub scenario_id: String,
    pub resource_id: String,
    pub resource_type: ResourceKind,
    pub reason: String,
}

/// Wall-clock time spent in each phase, in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub detect_ms: u64,
    pub resolve_mode_ms: u64,
    pub execute_ms: u64,
    pub recommend_ms: u64,
    pub total_ms: u64,
}

/// Everything one drift tick did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub tick_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub mode: ExecutionMode,
    pub mode_source: ModeSource,
    pub detections: Vec<Detection>,
    pub summary: DetectionSummary,
    /// Detections whose scenario is auto-safe, before policy gating
    pub auto_safe_count: usize,
    pub policy_blocked: Vec<PolicyBlocked>,
    /// Detections dropped because their resource policy is `ignore`
    pub ignored_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_skipped: Option<ExecutionSkip>,
    pub execution_results: Vec<ExecutionResult>,
    pub recommendations: RecommendationSummary,
    pub timing: PhaseTiming,
    pub success: bool,
}

impl TickReport {
    pub fn executed_count(&self) -> usize {
        self.execution_results.iter().filter(|r| r.success).count()
    }

    pub fn failed_count(&self) -> usize {
        self.execution_results.iter().filter(|r| !r.success).count()
    }
}
