//! File-backed store implementations
//!
//! A data directory holds one JSON array per resource table
//! (`ec2_instances.json`, `rds_instances.json`, ...) plus a settings
//! document. Writes replace the whole table through a temp file and rename,
//! serialized by a process-local lock.

use super::{
    apply_patch, FieldPatch, RejectedRow, ResourceFilter, ResourceStore, Selection, SettingValue,
    SettingsStore,
};
use crate::error::StoreError;
use crate::models::{Resource, ResourceKind};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

/// Resource store reading one JSON table per kind from a directory
#[derive(Debug)]
pub struct FileResourceStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileResourceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_path(&self, kind: ResourceKind) -> PathBuf {
        self.root.join(format!("{}.json", kind.table_name()))
    }

    async fn ensure_root(&self) -> Result<(), StoreError> {
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(StoreError::NotConfigured(format!(
                "{} is not a directory",
                self.root.display()
            ))),
            Err(_) => Err(StoreError::NotConfigured(format!(
                "data directory {} does not exist",
                self.root.display()
            ))),
        }
    }

    async fn read_table(&self, kind: ResourceKind) -> Result<Vec<TableRow>, StoreError> {
        self.ensure_root().await?;
        let table = kind.table_name();
        let path = self.table_path(kind);

        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::TableUnavailable {
                    table: table.to_string(),
                    reason: format!("{} not found", path.display()),
                });
            }
            Err(e) => {
                return Err(StoreError::TableUnavailable {
                    table: table.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let rows: Vec<Value> =
            serde_json::from_str(&raw).map_err(|e| StoreError::InvalidRow {
                table: table.to_string(),
                reason: e.to_string(),
            })?;

        Ok(rows.into_iter().map(|row| TableRow::parse(kind, row)).collect())
    }

    async fn write_table(&self, kind: ResourceKind, rows: &[TableRow]) -> Result<(), StoreError> {
        let values: Vec<Value> = rows.iter().map(TableRow::to_value).collect();
        let body = serde_json::to_vec_pretty(&values).map_err(|e| StoreError::Io(e.to_string()))?;
        write_atomically(&self.table_path(kind), &body).await?;
        debug!(table = kind.table_name(), rows = rows.len(), "Wrote resource table");
        Ok(())
    }
}

/// One entry of a table file as read from disk
///
/// Rows that fail to parse keep their raw JSON so rewriting the table after
/// an update or delete leaves them in place.
#[derive(Debug)]
enum TableRow {
    Valid(Resource),
    Rejected { raw: Value, row: RejectedRow },
}

impl TableRow {
    fn parse(kind: ResourceKind, raw: Value) -> Self {
        match Resource::from_row(kind, raw.clone()) {
            Ok(resource) => TableRow::Valid(resource),
            Err(e) => {
                let id = raw.get("id").and_then(Value::as_str).map(String::from);
                debug!(
                    table = kind.table_name(),
                    id = id.as_deref().unwrap_or("-"),
                    error = %e,
                    "Skipping invalid resource row"
                );
                TableRow::Rejected {
                    raw,
                    row: RejectedRow {
                        resource_type: kind,
                        id,
                        reason: e.to_string(),
                    },
                }
            }
        }
    }

    fn to_value(&self) -> Value {
        match self {
            TableRow::Valid(resource) => resource.to_row(),
            TableRow::Rejected { raw, .. } => raw.clone(),
        }
    }

    fn resource(&self) -> Option<&Resource> {
        match self {
            TableRow::Valid(resource) => Some(resource),
            TableRow::Rejected { .. } => None,
        }
    }

    fn has_id(&self, id: &str) -> bool {
        self.resource().is_some_and(|r| r.id() == id)
    }
}

#[async_trait]
impl ResourceStore for FileResourceStore {
    async fn check_connection(&self) -> Result<(), StoreError> {
        self.ensure_root().await
    }

    async fn select(
        &self,
        kind: ResourceKind,
        filter: &ResourceFilter,
    ) -> Result<Selection, StoreError> {
        let mut selection = Selection::default();
        for row in self.read_table(kind).await? {
            match row {
                TableRow::Valid(resource) if filter.matches(&resource) => {
                    selection.resources.push(resource);
                }
                TableRow::Valid(_) => {}
                TableRow::Rejected { row, .. } => selection.rejected.push(row),
            }
        }
        Ok(selection)
    }

    async fn get(&self, kind: ResourceKind, id: &str) -> Result<Option<Resource>, StoreError> {
        let rows = self.read_table(kind).await?;
        Ok(rows.into_iter().find_map(|row| match row {
            TableRow::Valid(resource) if resource.id() == id => Some(resource),
            _ => None,
        }))
    }

    async fn update(
        &self,
        kind: ResourceKind,
        id: &str,
        fields: &FieldPatch,
    ) -> Result<Resource, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut rows = self.read_table(kind).await?;
        let slot = rows
            .iter_mut()
            .find(|row| row.has_id(id))
            .ok_or_else(|| StoreError::NotFound {
                kind,
                id: id.to_string(),
            })?;
        let updated = match slot.resource() {
            Some(current) => apply_patch(current, fields)?,
            None => {
                return Err(StoreError::NotFound {
                    kind,
                    id: id.to_string(),
                })
            }
        };
        *slot = TableRow::Valid(updated.clone());
        self.write_table(kind, &rows).await?;
        Ok(updated)
    }

    async fn delete(&self, kind: ResourceKind, id: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut rows = self.read_table(kind).await?;
        let before = rows.len();
        rows.retain(|row| !row.has_id(id));
        if rows.len() == before {
            return Ok(false);
        }
        self.write_table(kind, &rows).await?;
        Ok(true)
    }
}

/// Settings persisted as a single JSON object keyed by setting name
#[derive(Debug)]
pub struct FileSettingsStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<BTreeMap<String, SettingValue>, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| StoreError::InvalidRow {
                table: "settings".to_string(),
                reason: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn get(&self, key: &str) -> Result<Option<SettingValue>, StoreError> {
        Ok(self.load().await?.remove(key))
    }

    async fn upsert(&self, key: &str, value: Value) -> Result<SettingValue, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut all = self.load().await?;
        let stored = SettingValue {
            value,
            updated_at: chrono::Utc::now(),
        };
        all.insert(key.to_string(), stored.clone());
        let body = serde_json::to_vec_pretty(&all).map_err(|e| StoreError::Io(e.to_string()))?;
        write_atomically(&self.path, &body).await?;
        Ok(stored)
    }
}

async fn write_atomically(path: &Path, body: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{read_mode, write_mode};
    use crate::models::ExecutionMode;
    use serde_json::json;
    use tempfile::TempDir;

    fn seed(dir: &Path, table: &str, rows: Value) {
        std::fs::write(dir.join(format!("{}.json", table)), rows.to_string()).unwrap();
    }

    #[tokio::test]
    async fn test_missing_directory_is_configuration_error() {
        let store = FileResourceStore::new("/nonexistent/drift-data");
        let err = store.check_connection().await.unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn test_missing_table_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let store = FileResourceStore::new(dir.path());
        store.check_connection().await.unwrap();
        let err = store
            .select(ResourceKind::S3Bucket, &ResourceFilter::all())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TableUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_update_and_delete_persist() {
        let dir = TempDir::new().unwrap();
        seed(
            dir.path(),
            "ebs_volumes",
            json!([
                {"id": "vol-1", "name": "a", "env": "dev", "state": "available",
                 "volume_type": "gp2", "size_gb": 100},
                {"id": "vol-2", "name": "b", "env": "dev", "state": "in_use",
                 "volume_type": "gp3", "size_gb": 20, "attached_to": "i-1"}
            ]),
        );
        let store = FileResourceStore::new(dir.path());

        let mut patch = FieldPatch::new();
        patch.insert("volume_type".to_string(), json!("gp3"));
        store
            .update(ResourceKind::EbsVolume, "vol-1", &patch)
            .await
            .unwrap();
        assert!(store.delete(ResourceKind::EbsVolume, "vol-2").await.unwrap());

        // Re-open to read what actually landed on disk
        let reopened = FileResourceStore::new(dir.path());
        let rows = reopened
            .select(ResourceKind::EbsVolume, &ResourceFilter::all())
            .await
            .unwrap()
            .resources;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].field("volume_type"), Some(json!("gp3")));
    }

    fn eip_row(id: &str) -> Value {
        json!({"id": id, "name": "spare", "env": "dev", "public_ip": "198.51.100.7"})
    }

    #[tokio::test]
    async fn test_malformed_row_is_rejected_not_fatal() {
        let dir = TempDir::new().unwrap();
        seed(
            dir.path(),
            "elastic_ips",
            json!([{"id": "eip-1", "name": "x", "env": "dev"}]),
        );
        let store = FileResourceStore::new(dir.path());
        let selection = store
            .select(ResourceKind::ElasticIp, &ResourceFilter::all())
            .await
            .unwrap();
        assert!(selection.resources.is_empty());
        assert_eq!(selection.rejected.len(), 1);
        assert_eq!(selection.rejected[0].id.as_deref(), Some("eip-1"));
        assert_eq!(selection.rejected[0].resource_type, ResourceKind::ElasticIp);
        assert!(selection.rejected[0].reason.contains("public_ip"));
    }

    #[tokio::test]
    async fn test_valid_rows_survive_a_bad_neighbour() {
        let dir = TempDir::new().unwrap();
        seed(
            dir.path(),
            "elastic_ips",
            json!([
                eip_row("eip-1"),
                {"id": "eip-bad", "name": "broken", "env": "dev"},
                eip_row("eip-2")
            ]),
        );
        let store = FileResourceStore::new(dir.path());
        let selection = store
            .select(ResourceKind::ElasticIp, &ResourceFilter::all())
            .await
            .unwrap();
        let ids: Vec<&str> = selection.resources.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["eip-1", "eip-2"]);
        assert_eq!(selection.rejected.len(), 1);
        assert!(store.get(ResourceKind::ElasticIp, "eip-bad").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rewrite_keeps_rejected_rows_on_disk() {
        let dir = TempDir::new().unwrap();
        seed(
            dir.path(),
            "elastic_ips",
            json!([
                eip_row("eip-1"),
                {"id": "eip-bad", "name": "broken", "env": "dev"},
                eip_row("eip-2")
            ]),
        );
        let store = FileResourceStore::new(dir.path());
        assert!(store.delete(ResourceKind::ElasticIp, "eip-2").await.unwrap());
        assert!(!store.delete(ResourceKind::ElasticIp, "eip-bad").await.unwrap());
        let err = store
            .update(ResourceKind::ElasticIp, "eip-bad", &FieldPatch::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));

        let raw = std::fs::read_to_string(dir.path().join("elastic_ips.json")).unwrap();
        let on_disk: Vec<Value> = serde_json::from_str(&raw).unwrap();
        assert_eq!(on_disk.len(), 2);
        assert_eq!(on_disk[1], json!({"id": "eip-bad", "name": "broken", "env": "dev"}));
    }

    #[tokio::test]
    async fn test_unparseable_table_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("elastic_ips.json"), "{not json").unwrap();
        let store = FileResourceStore::new(dir.path());
        let err = store
            .select(ResourceKind::ElasticIp, &ResourceFilter::all())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidRow { .. }));
    }

    #[tokio::test]
    async fn test_settings_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let settings = FileSettingsStore::new(dir.path().join("settings.json"));
        assert_eq!(read_mode(&settings).await.unwrap(), None);

        write_mode(&settings, ExecutionMode::Automated).await.unwrap();
        let reopened = FileSettingsStore::new(dir.path().join("settings.json"));
        assert_eq!(
            read_mode(&reopened).await.unwrap().map(|m| m.mode),
            Some(ExecutionMode::Automated)
        );
    }
}
