//! Collaborator interfaces for persistence
//!
//! The core never embeds connection details. It talks to three narrow
//! contracts:
//! - [`ResourceStore`]: one table per resource kind, select/get/update/delete
//! - [`SettingsStore`]: key/value settings with last-writer-wins upserts
//! - [`AuditLog`]: append-only remediation audit trail
//!
//! In-memory implementations back the tests; file-backed implementations
//! back the agent.

mod audit;
mod file;
mod memory;
mod settings;

pub use audit::{AuditEntry, AuditLog, JsonlAuditLog, MemoryAuditLog};
pub use file::{FileResourceStore, FileSettingsStore};
pub use memory::{MemoryResourceStore, MemorySettingsStore};
pub use settings::{read_mode, write_mode, ModeSetting, SettingValue, EXECUTION_MODE_KEY};

use crate::error::StoreError;
use crate::models::{Resource, ResourceKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fields to overwrite on a row
pub type FieldPatch = Map<String, Value>;

/// Row filter for `select`
#[derive(Debug, Clone, Default)]
pub struct ResourceFilter {
    pub env: Option<String>,
    pub ids: Option<Vec<String>>,
}

impl ResourceFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn matches(&self, resource: &Resource) -> bool {
        let env_ok = self
            .env
            .as_ref()
            .map(|env| resource.meta().env.eq_ignore_ascii_case(env))
            .unwrap_or(true);
        let id_ok = self
            .ids
            .as_ref()
            .map(|ids| ids.iter().any(|id| id == resource.id()))
            .unwrap_or(true);
        env_ok && id_ok
    }
}

/// A stored row that exists but does not validate as its resource kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedRow {
    pub resource_type: ResourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub reason: String,
}

/// Result of `select`: the typed rows plus any rows skipped as invalid
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub resources: Vec<Resource>,
    pub rejected: Vec<RejectedRow>,
}

impl From<Vec<Resource>> for Selection {
    fn from(resources: Vec<Resource>) -> Self {
        Self {
            resources,
            rejected: Vec::new(),
        }
    }
}

/// System of record for resource state and metrics
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fail fast when the store cannot be used at all
    async fn check_connection(&self) -> Result<(), StoreError>;

    /// Rows of one table matching `filter`
    ///
    /// A row that fails validation is returned in `rejected` rather than
    /// failing the table; only an unreadable table is an error.
    async fn select(
        &self,
        kind: ResourceKind,
        filter: &ResourceFilter,
    ) -> Result<Selection, StoreError>;

    async fn get(&self, kind: ResourceKind, id: &str) -> Result<Option<Resource>, StoreError>;

    /// Overwrite fields on a row and return the updated row
    async fn update(
        &self,
        kind: ResourceKind,
        id: &str,
        fields: &FieldPatch,
    ) -> Result<Resource, StoreError>;

    /// Delete a row; `Ok(false)` when it was already gone
    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<bool, StoreError>;
}

/// Key/value settings collaborator
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<SettingValue>, StoreError>;

    async fn upsert(&self, key: &str, value: Value) -> Result<SettingValue, StoreError>;
}

/// Apply a patch to a row, re-validating the result as a typed resource
///
/// Identity and type cannot be patched.
pub fn apply_patch(resource: &Resource, fields: &FieldPatch) -> Result<Resource, StoreError> {
    let kind = resource.kind();
    let mut row = resource.to_row();
    let Value::Object(map) = &mut row else {
        return Err(StoreError::InvalidRow {
            table: kind.table_name().to_string(),
            reason: "row is not an object".to_string(),
        });
    };
    for (field, value) in fields {
        if field == "id" || field == "type" {
            return Err(StoreError::Rejected(format!("field {} is immutable", field)));
        }
        map.insert(field.clone(), value.clone());
    }
    Resource::from_row(kind, row).map_err(|e| StoreError::Rejected(e.to_string()))
}
