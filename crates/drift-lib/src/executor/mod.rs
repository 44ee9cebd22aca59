//! Remediation executor
//!
//! Applies one scenario's remediation to one resource. Every call:
//! 1. re-reads the row and re-checks the policy lock,
//! 2. short-circuits to a no-op when the action is already applied or the
//!    detection condition no longer holds,
//! 3. mutates the Resource Store,
//! 4. appends an audit entry, whatever happened before.
//!
//! An action runs in its own task under a timeout, so a panic or a hung
//! store call becomes a failed [`ExecutionResult`] instead of escaping.

use crate::catalog::{Evaluation, RemediationAction, ScenarioCatalog};
use crate::error::{ErrorKind, StoreError};
use crate::models::{Detection, OptimizationPolicy, Resource, ResourceKind};
use crate::observability::{DriftMetrics, StructuredLogger};
use crate::policy::{effective_policy, get_lock_reason, is_policy_locked};
use crate::store::{AuditEntry, AuditLog, FieldPatch, ResourceStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};


/// Default upper bound for a single remediation call
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Who asked for the remediation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionTrigger {
    /// Auto-safe detection in automated mode
    Auto,
    /// Human approval of a recommendation
    Approved,
    /// A scheduled recommendation coming due
    Scheduled,
}

impl ExecutionTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionTrigger::Auto => "auto",
            ExecutionTrigger::Approved => "approved",
            ExecutionTrigger::Scheduled => "scheduled",
        }
    }

    pub fn is_human(&self) -> bool {
        !matches!(self, ExecutionTrigger::Auto)
    }
}

/// What an execution attempt amounted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// The store was mutated
    Applied,
    /// Nothing to do; already remediated or no longer wasteful
    NoOp,
    /// Not attempted (unknown scenario or action)
    Skipped,
    Failed,
}

impl ExecutionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionOutcome::Applied => "applied",
            ExecutionOutcome::NoOp => "no_op",
            ExecutionOutcome::Skipped => "skipped",
            ExecutionOutcome::Failed => "failed",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Applied | ExecutionOutcome::NoOp)
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the executor needs to act on one detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionParams {
    pub action: RemediationAction,
    pub resource_type: ResourceKind,
    pub resource_id: String,
    pub resource_name: String,
    pub detection_id: String,
    pub scenario_id: String,
    pub details: BTreeMap<String, Value>,
    pub trigger: ExecutionTrigger,
}

impl ExecutionParams {
    pub fn for_detection(
        detection: &Detection,
        action: RemediationAction,
        trigger: ExecutionTrigger,
    ) -> Self {
        Self {
            action,
            resource_type: detection.resource_type,
            resource_id: detection.resource_id.clone(),
            resource_name: detection.resource_name.clone(),
            detection_id: detection.id.clone(),
            scenario_id: detection.scenario_id.clone(),
            details: detection.details.clone(),
            trigger,
        }
    }

    fn target_size(&self) -> Option<&Value> {
        self.details.get("target_size").filter(|v| !v.is_null())
    }
}

/// Result of one remediation attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub resource_id: String,
    pub resource_type: ResourceKind,
    pub scenario_id: String,
    pub detection_id: String,
    pub action: String,
    pub success: bool,
    pub outcome: ExecutionOutcome,
    pub message: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub action_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            action_timeout: DEFAULT_ACTION_TIMEOUT,
        }
    }
}

/// Internal result of the guarded steps, before timing and audit
#[derive(Debug)]
struct Attempt {
    outcome: ExecutionOutcome,
    message: String,
    error_kind: Option<ErrorKind>,
    before: Option<Value>,
    after: Option<Value>,
}

impl Attempt {
    fn applied(message: impl Into<String>, before: &Resource, after: Option<Value>) -> Self {
        Self {
            outcome: ExecutionOutcome::Applied,
            message: message.into(),
            error_kind: None,
            before: Some(before.to_row()),
            after,
        }
    }

    fn no_op(message: impl Into<String>, before: Option<&Resource>) -> Self {
        Self {
            outcome: ExecutionOutcome::NoOp,
            message: message.into(),
            error_kind: None,
            before: before.map(Resource::to_row),
            after: None,
        }
    }

    fn skipped(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            outcome: ExecutionOutcome::Skipped,
            message: message.into(),
            error_kind: Some(kind),
            before: None,
            after: None,
        }
    }

    fn failed(kind: ErrorKind, message: impl Into<String>, before: Option<&Resource>) -> Self {
        Self {
            outcome: ExecutionOutcome::Failed,
            message: message.into(),
            error_kind: Some(kind),
            before: before.map(Resource::to_row),
            after: None,
        }
    }
}

/// Applies remediations against the Resource Store
#[derive(Clone)]
pub struct Executor {
    store: Arc<dyn ResourceStore>,
    audit: Arc<dyn AuditLog>,
    catalog: Arc<ScenarioCatalog>,
    config: ExecutorConfig,
    metrics: DriftMetrics,
    logger: StructuredLogger,
}

impl Executor {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        audit: Arc<dyn AuditLog>,
        catalog: Arc<ScenarioCatalog>,
    ) -> Self {
        Self {
            store,
            audit,
            catalog,
            config: ExecutorConfig::default(),
            metrics: DriftMetrics::new(),
            logger: StructuredLogger::default(),
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn catalog(&self) -> &ScenarioCatalog {
        &self.catalog
    }

    /// Run one action; never returns an error and never panics
    pub async fn execute_action(&self, params: ExecutionParams) -> ExecutionResult {
        let started = Instant::now();
        let executed_at = Utc::now();

        let worker = self.clone();
        let task_params = params.clone();
        let mut handle = tokio::spawn(async move { worker.attempt(&task_params).await });

        let attempt = match tokio::time::timeout(self.config.action_timeout, &mut handle).await {
            Ok(Ok(attempt)) => attempt,
            Ok(Err(join_err)) => Attempt::failed(
                ErrorKind::Panicked,
                format!("remediation task aborted: {}", join_err),
                None,
            ),
            Err(_) => {
                handle.abort();
                Attempt::failed(
                    ErrorKind::Timeout,
                    format!(
                        "remediation timed out after {} ms",
                        self.config.action_timeout.as_millis()
                    ),
                    None,
                )
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        self.finish(&params, attempt, executed_at, duration_ms).await
    }

    /// Run actions one after another; one result per input, in order
    pub async fn execute_batch(&self, batch: Vec<ExecutionParams>) -> Vec<ExecutionResult> {
        let mut results = Vec::with_capacity(batch.len());
        for params in batch {
            results.push(self.execute_action(params).await);
        }
        results
    }

    async fn finish(
        &self,
        params: &ExecutionParams,
        attempt: Attempt,
        executed_at: DateTime<Utc>,
        duration_ms: u64,
    ) -> ExecutionResult {
        let result = ExecutionResult {
            resource_id: params.resource_id.clone(),
            resource_type: params.resource_type,
            scenario_id: params.scenario_id.clone(),
            detection_id: params.detection_id.clone(),
            action: params.action.to_string(),
            success: attempt.outcome.is_success(),
            outcome: attempt.outcome,
            message: attempt.message,
            duration_ms,
            error_kind: attempt.error_kind,
            executed_at,
        };

        let entry = AuditEntry {
            id: AuditEntry::entry_id(&params.detection_id, params.action.name(), executed_at),
            at: executed_at,
            resource_id: params.resource_id.clone(),
            resource_type: params.resource_type,
            action: result.action.clone(),
            scenario_id: params.scenario_id.clone(),
            detection_id: params.detection_id.clone(),
            trigger: params.trigger,
            before: attempt.before,
            after: attempt.after,
            success: result.success,
            message: result.message.clone(),
            duration_ms,
        };
        if let Err(e) = self.audit.append(&entry).await {
            self.metrics.inc_audit_failures();
            self.logger
                .log_audit_failed(&params.resource_id, &e.to_string());
        }

        self.metrics.inc_execution(result.outcome.as_str());
        self.logger.log_action_executed(
            &result.resource_id,
            &result.scenario_id,
            &result.action,
            params.trigger.as_str(),
            result.outcome.as_str(),
            &result.message,
            duration_ms,
        );
        result
    }

    async fn attempt(&self, params: &ExecutionParams) -> Attempt {
        let scenario = match self.catalog.lookup(&params.scenario_id) {
            Ok(scenario) => scenario,
            Err(e) => return Attempt::skipped(ErrorKind::UnknownScenario, e.to_string()),
        };
        if scenario.resource_type != params.resource_type
            || scenario.action != params.action
            || !params.action.is_compatible_with(params.resource_type)
        {
            return Attempt::skipped(
                ErrorKind::UnknownAction,
                format!(
                    "action {} on {} does not belong to scenario {}",
                    params.action, params.resource_type, scenario.id
                ),
            );
        }

        let kind = params.resource_type;
        let current = match self.store.get(kind, &params.resource_id).await {
            Ok(Some(resource)) => resource,
            Ok(None) => {
                return Attempt::no_op(
                    format!("{} {} no longer exists; nothing to do", kind, params.resource_id),
                    None,
                )
            }
            Err(e) => {
                return Attempt::failed(
                    ErrorKind::Remediation,
                    format!("failed to read {} {}: {}", kind, params.resource_id, e),
                    None,
                )
            }
        };

        if let Some(reason) = self.lock_violation(&current, params.trigger) {
            return Attempt::failed(ErrorKind::PolicyViolation, reason, Some(&current));
        }

        if let Some(message) = already_applied(&current, params) {
            return Attempt::no_op(message, Some(&current));
        }

        match scenario.evaluate(&current) {
            Evaluation::Match(_) => {}
            Evaluation::NoMatch => {
                return Attempt::no_op(
                    format!("condition for {} no longer holds; nothing to do", scenario.id),
                    Some(&current),
                )
            }
            Evaluation::InsufficientData(metric) => {
                return Attempt::no_op(
                    format!("cannot confirm {}: {} not reported; nothing to do", scenario.id, metric),
                    Some(&current),
                )
            }
        }

        self.mutate(&current, params).await
    }

    /// Lock check right before mutating
    ///
    /// Automatic runs need an unlocked resource whose effective policy is
    /// `auto_safe`. A human approval already passed the review gate, so
    /// only an explicit manual lock stops it.
    fn lock_violation(&self, resource: &Resource, trigger: ExecutionTrigger) -> Option<String> {
        let view = resource.policy_view();
        if trigger.is_human() {
            return (view.locked == Some(true)).then(|| "Manually locked by user".to_string());
        }
        if is_policy_locked(&view) {
            return Some(
                get_lock_reason(&view).unwrap_or_else(|| "resource is locked".to_string()),
            );
        }
        match effective_policy(&view) {
            OptimizationPolicy::AutoSafe => None,
            other => Some(format!("optimization policy is {}", other)),
        }
    }

    async fn mutate(&self, current: &Resource, params: &ExecutionParams) -> Attempt {
        let kind = params.resource_type;
        let id = params.resource_id.as_str();

        let patch = match &params.action {
            RemediationAction::Delete => {
                return match self.store.delete(kind, id).await {
                    Ok(true) => Attempt::applied(format!("deleted {} {}", kind, id), current, None),
                    Ok(false) => Attempt::no_op(
                        format!("{} {} already deleted; nothing to do", kind, id),
                        Some(current),
                    ),
                    Err(e) => store_failure(e, current),
                };
            }
            RemediationAction::Stop => match kind.state_field() {
                Some(field) => single_field(field, Value::from("stopped")),
                None => {
                    return Attempt::skipped(
                        ErrorKind::UnknownAction,
                        format!("{} cannot be stopped", kind),
                    )
                }
            },
            RemediationAction::Resize => match (kind.size_field(), params.target_size()) {
                (Some(field), Some(target)) => single_field(field, target.clone()),
                (None, _) => {
                    return Attempt::skipped(
                        ErrorKind::UnknownAction,
                        format!("{} has no size dimension", kind),
                    )
                }
                (_, None) => {
                    return Attempt::failed(
                        ErrorKind::Remediation,
                        "detection carries no target_size",
                        Some(current),
                    )
                }
            },
            RemediationAction::UpdateField { field, value } => single_field(field, value.clone()),
        };

        match self.store.update(kind, id, &patch).await {
            Ok(updated) => Attempt::applied(
                format!("{} applied to {} {}", params.action, kind, id),
                current,
                Some(updated.to_row()),
            ),
            Err(e) => store_failure(e, current),
        }
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("scenarios", &self.catalog.len())
            .field("config", &self.config)
            .finish()
    }
}

fn single_field(field: &str, value: Value) -> FieldPatch {
    let mut patch = FieldPatch::new();
    patch.insert(field.to_string(), value);
    patch
}

/// A row vanishing under us is a no-op; anything else is a failed remediation
fn store_failure(err: StoreError, current: &Resource) -> Attempt {
    match err {
        StoreError::NotFound { kind, id } => Attempt::no_op(
            format!("{} {} disappeared before the change; nothing to do", kind, id),
            Some(current),
        ),
        other => Attempt::failed(ErrorKind::Remediation, other.to_string(), Some(current)),
    }
}

/// Message describing why the action is already in effect, if it is
fn already_applied(current: &Resource, params: &ExecutionParams) -> Option<String> {
    let kind = params.resource_type;
    let id = &params.resource_id;
    match &params.action {
        RemediationAction::Stop if current.is_stopped() => {
            Some(format!("{} {} already stopped; nothing to do", kind, id))
        }
        RemediationAction::Resize => {
            let target = params.target_size()?;
            same_value(current.size().as_ref(), target)
                .then(|| format!("{} {} already at {}; nothing to do", kind, id, target))
        }
        RemediationAction::UpdateField { field, value } => {
            same_value(current.field(field).as_ref(), value)
                .then(|| format!("{} {} already has {}={}; nothing to do", kind, id, field, value))
        }
        _ => None,
    }
}

/// Equality that treats 1024 and 1024.0 as the same size
fn same_value(current: Option<&Value>, target: &Value) -> bool {
    match (current, target) {
        (Some(Value::Number(a)), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Some(a), b) => a == b,
        (None, _) => false,
    }
}
