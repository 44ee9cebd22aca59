//! Remediation audit trail

use crate::error::StoreError;
use crate::executor::ExecutionTrigger;
use crate::models::ResourceKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// One remediation attempt, successful or not
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub at: DateTime<Utc>,
    pub resource_id: String,
    pub resource_type: ResourceKind,
    pub action: String,
    pub scenario_id: String,
    pub detection_id: String,
    pub trigger: ExecutionTrigger,
    /// Row as read right before acting; `None` if it could not be read
    pub before: Option<Value>,
    /// Row after a mutation; `None` for deletes and failures
    pub after: Option<Value>,
    pub success: bool,
    pub message: String,
    pub duration_ms: u64,
}

impl AuditEntry {
    /// Deterministic entry id from what was done and when
    pub fn entry_id(detection_id: &str, action: &str, at: DateTime<Utc>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(detection_id.as_bytes());
        hasher.update(b":");
        hasher.update(action.as_bytes());
        hasher.update(b":");
        hasher.update(at.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
        format!("aud-{}", &hex::encode(hasher.finalize())[..16])
    }
}

/// Append-only audit collaborator
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: &AuditEntry) -> Result<(), StoreError>;
}

/// Audit log kept in memory, for tests and inspection
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
    failing: AtomicBool,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().await.clone()
    }

    /// Make every append fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Io("audit sink unavailable".to_string()));
        }
        self.entries.lock().await.push(entry.clone());
        Ok(())
    }
}

/// Audit log appending one JSON document per line to a file
#[derive(Debug)]
pub struct JsonlAuditLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Read back every entry; an absent file is an empty log
    pub async fn read_all(&self) -> Result<Vec<AuditEntry>, StoreError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| StoreError::InvalidRow {
                    table: "audit_log".to_string(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}

#[async_trait]
impl AuditLog for JsonlAuditLog {
    async fn append(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(entry).map_err(|e| StoreError::Io(e.to_string()))?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(success: bool) -> AuditEntry {
        let at = Utc::now();
        AuditEntry {
            id: AuditEntry::entry_id("det-1", "stop", at),
            at,
            resource_id: "i-1".to_string(),
            resource_type: ResourceKind::Ec2Instance,
            action: "stop".to_string(),
            scenario_id: "idle_ec2".to_string(),
            detection_id: "det-1".to_string(),
            trigger: ExecutionTrigger::Auto,
            before: None,
            after: None,
            success,
            message: "ok".to_string(),
            duration_ms: 3,
        }
    }

    #[tokio::test]
    async fn test_jsonl_appends_in_order() {
        let dir = TempDir::new().unwrap();
        let log = JsonlAuditLog::new(dir.path().join("audit").join("audit.jsonl"));
        log.append(&entry(true)).await.unwrap();
        log.append(&entry(false)).await.unwrap();

        let entries = log.read_all().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].success);
        assert!(!entries[1].success);
    }

    #[tokio::test]
    async fn test_memory_log_failure_switch() {
        let log = MemoryAuditLog::new();
        log.append(&entry(true)).await.unwrap();
        log.set_failing(true);
        assert!(log.append(&entry(true)).await.is_err());
        assert_eq!(log.entries().await.len(), 1);
    }

    #[test]
    fn test_entry_ids_are_stable() {
        let at = Utc::now();
        assert_eq!(
            AuditEntry::entry_id("det-1", "stop", at),
            AuditEntry::entry_id("det-1", "stop", at)
        );
        assert_ne!(
            AuditEntry::entry_id("det-1", "stop", at),
            AuditEntry::entry_id("det-2", "stop", at)
        );
    }
}
