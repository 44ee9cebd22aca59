//! Human review queue for detections that are not executed automatically
//!
//! ```text
//!            approve            execute
//!   pending ─────────▶ approved ───────▶ executed
//!     │ │ │  schedule           due
//!     │ │ └──────────▶ scheduled ─────▶ executed
//!     │ │   snooze            wake
//!     │ └────────────▶ snoozed ───────▶ pending
//!     │   ttl
//!     └──────────────▶ expired
//! ```
//!
//! `pending`, `snoozed` and `scheduled` may also be rejected. `rejected`,
//! `executed` and `expired` are terminal. `executed` is only reachable from
//! `approved` or `scheduled`.

mod store;
mod workflow;

pub use store::{MemoryRecommendationStore, RecommendationStore, UpsertOutcome};
pub use workflow::{
    MaintenanceReport, RecommendationSummary, RecommendationWorkflow,
    DEFAULT_RECOMMENDATION_TTL_HOURS,
};

use crate::catalog::RemediationAction;
use crate::error::TransitionError;
use crate::executor::ExecutionResult;
use crate::models::{Detection, ResourceKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationStatus {
    Pending,
    Approved,
    Rejected,
    Snoozed,
    Scheduled,
    Executed,
    Expired,
}

impl RecommendationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationStatus::Pending => "pending",
            RecommendationStatus::Approved => "approved",
            RecommendationStatus::Rejected => "rejected",
            RecommendationStatus::Snoozed => "snoozed",
            RecommendationStatus::Scheduled => "scheduled",
            RecommendationStatus::Executed => "executed",
            RecommendationStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecommendationStatus::Rejected
                | RecommendationStatus::Executed
                | RecommendationStatus::Expired
        )
    }
}

impl fmt::Display for RecommendationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecommendationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RecommendationStatus::Pending),
            "approved" => Ok(RecommendationStatus::Approved),
            "rejected" => Ok(RecommendationStatus::Rejected),
            "snoozed" => Ok(RecommendationStatus::Snoozed),
            "scheduled" => Ok(RecommendationStatus::Scheduled),
            "executed" => Ok(RecommendationStatus::Executed),
            "expired" => Ok(RecommendationStatus::Expired),
            other => Err(format!("unknown recommendation status: {}", other)),
        }
    }
}

/// Event applied to a recommendation
#[derive(Debug, Clone, PartialEq)]
pub enum ReviewAction {
    Approve,
    Reject,
    Snooze { until: DateTime<Utc> },
    Schedule { at: DateTime<Utc> },
    /// Snooze period elapsed
    Wake,
    /// Remediation succeeded
    MarkExecuted,
    /// An automatic run remediated the pair while the row was still open
    Resolve,
    /// Not re-detected within the TTL
    Expire,
}

impl ReviewAction {
    pub fn name(&self) -> &'static str {
        match self {
            ReviewAction::Approve => "approve",
            ReviewAction::Reject => "reject",
            ReviewAction::Snooze { .. } => "snooze",
            ReviewAction::Schedule { .. } => "schedule",
            ReviewAction::Wake => "wake",
            ReviewAction::MarkExecuted => "execute",
            ReviewAction::Resolve => "resolve",
            ReviewAction::Expire => "expire",
        }
    }
}

/// The state machine, without side effects
pub fn next_status(
    from: RecommendationStatus,
    action: &ReviewAction,
) -> Result<RecommendationStatus, TransitionError> {
    use RecommendationStatus::*;

    let next = match (from, action) {
        (Pending, ReviewAction::Approve) => Approved,
        (Pending, ReviewAction::Snooze { .. }) => Snoozed,
        (Pending, ReviewAction::Schedule { .. }) => Scheduled,
        (Pending, ReviewAction::Expire) => Expired,
        (Pending | Snoozed | Scheduled, ReviewAction::Reject) => Rejected,
        (Snoozed, ReviewAction::Wake) => Pending,
        (Approved | Scheduled, ReviewAction::MarkExecuted) => Executed,
        (Pending | Approved | Snoozed | Scheduled, ReviewAction::Resolve) => Executed,
        _ => {
            return Err(TransitionError::Invalid {
                from: from.to_string(),
                action: action.name().to_string(),
            })
        }
    };
    Ok(next)
}

/// A detection waiting for, or past, human review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: String,
    pub detection_id: String,
    pub scenario_id: String,
    pub resource_id: String,
    pub resource_type: ResourceKind,
    pub action: RemediationAction,
    pub status: RecommendationStatus,
    /// Latest detection snapshot; refreshed in place on re-detection
    pub detection: Detection,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_detected_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snoozed_until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_result: Option<ExecutionResult>,
}
