//! Error types for the detection and remediation pipeline
//!
//! Only [`TickError`] ever fails a whole tick. Everything else is absorbed
//! per item: category fetch failures land in the detection summary and
//! action failures in their [`ExecutionResult`](crate::executor::ExecutionResult).

use crate::models::ResourceKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised by the Resource Store, Settings and Audit collaborators
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("resource store not configured: {0}")]
    NotConfigured(String),

    #[error("table {table} unavailable: {reason}")]
    TableUnavailable { table: String, reason: String },

    #[error("{kind} {id} not found")]
    NotFound { kind: ResourceKind, id: String },

    #[error("mutation rejected: {0}")]
    Rejected(String),

    #[error("invalid row in {table}: {reason}")]
    InvalidRow { table: String, reason: String },

    #[error("I/O error: {0}")]
    Io(String),
}

impl StoreError {
    /// Whether the error means the store as a whole cannot be used
    pub fn is_configuration(&self) -> bool {
        matches!(self, StoreError::NotConfigured(_))
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}

/// Scenario catalog errors
///
/// Incompatible or duplicate entries are fatal at construction time;
/// `NotFound` is returned by lookups and handled as a skip by callers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    #[error("scenario {id}: action {action} is incompatible with resource type {kind}")]
    IncompatibleAction {
        id: String,
        action: String,
        kind: ResourceKind,
    },

    #[error("duplicate scenario id: {0}")]
    Duplicate(String),

    #[error("unknown scenario id: {0}")]
    NotFound(String),
}

/// Tick-level failures; these are the only errors a caller of a tick sees
#[derive(Error, Debug)]
pub enum TickError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TickError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, TickError::Configuration(_))
    }
}

/// Policy edit failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyError {
    /// The change is refused; the message tells the user what to do instead
    #[error("{0}")]
    Rejected(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Recommendation workflow errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransitionError {
    #[error("recommendation {0} not found")]
    NotFound(String),

    #[error("cannot {action} a recommendation that is {from}")]
    Invalid { from: String, action: String },

    #[error("invalid {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Classification of a failed or skipped remediation action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PolicyViolation,
    Remediation,
    Timeout,
    UnknownScenario,
    UnknownAction,
    Panicked,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::PolicyViolation => "policy_violation",
            ErrorKind::Remediation => "remediation",
            ErrorKind::Timeout => "timeout",
            ErrorKind::UnknownScenario => "unknown_scenario",
            ErrorKind::UnknownAction => "unknown_action",
            ErrorKind::Panicked => "panicked",
        };
        f.write_str(s)
    }
}
