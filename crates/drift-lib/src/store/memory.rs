//! In-memory store implementations
//!
//! Used by tests and as a scratch backend. Besides the store contracts they
//! expose a few knobs for simulating outages: unavailable tables, rejected
//! mutations, slow mutations and a mutation counter.

use super::{
    apply_patch, FieldPatch, ResourceFilter, ResourceStore, Selection, SettingValue, SettingsStore,
};
use crate::error::StoreError;
use crate::models::{OptimizationPolicy, Resource, ResourceKind};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

/// Resource store backed by concurrent maps
#[derive(Debug, Default)]
pub struct MemoryResourceStore {
    tables: DashMap<ResourceKind, BTreeMap<String, Resource>>,
    unavailable: DashSet<ResourceKind>,
    rejected: DashMap<String, String>,
    mutation_delay: RwLock<Option<Duration>>,
    disconnected: AtomicBool,
    mutations: AtomicU64,
}

impl MemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resources(resources: impl IntoIterator<Item = Resource>) -> Self {
        let store = Self::new();
        for resource in resources {
            store.insert(resource);
        }
        store
    }

    /// Insert or replace a row
    pub fn insert(&self, resource: Resource) {
        self.tables
            .entry(resource.kind())
            .or_default()
            .insert(resource.id().to_string(), resource);
    }

    /// Make `select` on a table fail
    pub fn mark_unavailable(&self, kind: ResourceKind) {
        self.unavailable.insert(kind);
    }

    /// Make every mutation of a row fail with `reason`
    pub fn reject_mutations_for(&self, id: &str, reason: &str) {
        self.rejected.insert(id.to_string(), reason.to_string());
    }

    /// Delay every mutation by `delay`
    pub fn set_mutation_delay(&self, delay: Duration) {
        if let Ok(mut guard) = self.mutation_delay.write() {
            *guard = Some(delay);
        }
    }

    /// Simulate missing credentials or an unreachable backend
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    /// Change the stored policy fields of a row, as a user edit would
    pub fn set_policy(
        &self,
        kind: ResourceKind,
        id: &str,
        policy: Option<OptimizationPolicy>,
        locked: Option<bool>,
    ) {
        if let Some(mut table) = self.tables.get_mut(&kind) {
            if let Some(resource) = table.get_mut(id) {
                let meta = resource.meta_mut();
                meta.optimization_policy = policy;
                meta.locked = locked;
            }
        }
    }

    /// Number of successful update/delete calls
    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self, kind: ResourceKind, id: &str) -> Option<Resource> {
        self.tables.get(&kind).and_then(|t| t.get(id).cloned())
    }

    async fn before_mutation(&self, id: &str) -> Result<(), StoreError> {
        let delay = self.mutation_delay.read().ok().and_then(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = self.rejected.get(id) {
            return Err(StoreError::Rejected(reason.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceStore for MemoryResourceStore {
    async fn check_connection(&self) -> Result<(), StoreError> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(StoreError::NotConfigured(
                "in-memory store disconnected".to_string(),
            ));
        }
        Ok(())
    }

    async fn select(
        &self,
        kind: ResourceKind,
        filter: &ResourceFilter,
    ) -> Result<Selection, StoreError> {
        if self.unavailable.contains(&kind) {
            return Err(StoreError::TableUnavailable {
                table: kind.table_name().to_string(),
                reason: "relation does not exist".to_string(),
            });
        }
        let resources: Vec<Resource> = self
            .tables
            .get(&kind)
            .map(|table| {
                table
                    .values()
                    .filter(|r| filter.matches(r))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(resources.into())
    }

    async fn get(&self, kind: ResourceKind, id: &str) -> Result<Option<Resource>, StoreError> {
        Ok(self.snapshot(kind, id))
    }

    async fn update(
        &self,
        kind: ResourceKind,
        id: &str,
        fields: &FieldPatch,
    ) -> Result<Resource, StoreError> {
        self.before_mutation(id).await?;

        let mut table = self.tables.get_mut(&kind).ok_or_else(|| StoreError::NotFound {
            kind,
            id: id.to_string(),
        })?;
        let current = table.get(id).ok_or_else(|| StoreError::NotFound {
            kind,
            id: id.to_string(),
        })?;
        let updated = apply_patch(current, fields)?;
        table.insert(id.to_string(), updated.clone());
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(updated)
    }

    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<bool, StoreError> {
        self.before_mutation(id).await?;

        let removed = self
            .tables
            .get_mut(&kind)
            .map(|mut table| table.remove(id).is_some())
            .unwrap_or(false);
        if removed {
            self.mutations.fetch_add(1, Ordering::SeqCst);
        }
        Ok(removed)
    }
}

/// Settings store backed by a concurrent map
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: DashMap<String, SettingValue>,
    failing: AtomicBool,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every read fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get(&self, key: &str) -> Result<Option<SettingValue>, StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Io("settings backend unavailable".to_string()));
        }
        Ok(self.values.get(key).map(|v| v.clone()))
    }

    async fn upsert(&self, key: &str, value: Value) -> Result<SettingValue, StoreError> {
        let stored = SettingValue {
            value,
            updated_at: chrono::Utc::now(),
        };
        self.values.insert(key.to_string(), stored.clone());
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ElasticIp, ResourceMeta};
    use serde_json::json;

    fn eip(id: &str) -> Resource {
        Resource::ElasticIp(ElasticIp {
            meta: ResourceMeta::new(id, "spare", "dev"),
            public_ip: "198.51.100.7".to_string(),
            association_id: None,
        })
    }

    #[tokio::test]
    async fn test_select_and_delete() {
        let store = MemoryResourceStore::with_resources(vec![eip("eip-1"), eip("eip-2")]);
        let rows = store
            .select(ResourceKind::ElasticIp, &ResourceFilter::all())
            .await
            .unwrap()
            .resources;
        assert_eq!(rows.len(), 2);

        assert!(store.delete(ResourceKind::ElasticIp, "eip-1").await.unwrap());
        assert!(!store.delete(ResourceKind::ElasticIp, "eip-1").await.unwrap());
        assert_eq!(store.mutation_count(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_table() {
        let store = MemoryResourceStore::new();
        store.mark_unavailable(ResourceKind::S3Bucket);
        let err = store
            .select(ResourceKind::S3Bucket, &ResourceFilter::all())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TableUnavailable { .. }));

        // Missing tables with no marker are simply empty
        let rows = store
            .select(ResourceKind::LoadBalancer, &ResourceFilter::all())
            .await
            .unwrap();
        assert!(rows.resources.is_empty() && rows.rejected.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_mutation() {
        let store = MemoryResourceStore::with_resources(vec![eip("eip-1")]);
        store.reject_mutations_for("eip-1", "concurrent modification");
        let err = store.delete(ResourceKind::ElasticIp, "eip-1").await.unwrap_err();
        assert_eq!(err, StoreError::Rejected("concurrent modification".to_string()));
        assert_eq!(store.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_update_missing_row() {
        let store = MemoryResourceStore::new();
        let mut patch = FieldPatch::new();
        patch.insert("association_id".to_string(), json!("assoc-1"));
        let err = store
            .update(ResourceKind::ElasticIp, "eip-9", &patch)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_disconnected_store_fails_connection_check() {
        let store = MemoryResourceStore::new();
        assert!(store.check_connection().await.is_ok());
        store.disconnect();
        assert!(store.check_connection().await.unwrap_err().is_configuration());
    }
}
