//! Persisted execution mode setting

use super::SettingsStore;
use crate::error::StoreError;
use crate::models::ExecutionMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Settings key holding `{"mode": "manual" | "automated"}`
pub const EXECUTION_MODE_KEY: &str = "execution_mode";

/// A stored setting with its last write time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingValue {
    pub value: Value,
    pub updated_at: DateTime<Utc>,
}

/// Execution mode as persisted in settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeSetting {
    pub mode: ExecutionMode,
    pub last_updated: DateTime<Utc>,
}

/// Read the persisted execution mode; `None` if never written or unreadable
pub async fn read_mode(settings: &dyn SettingsStore) -> Result<Option<ModeSetting>, StoreError> {
    let Some(stored) = settings.get(EXECUTION_MODE_KEY).await? else {
        return Ok(None);
    };
    let mode = stored
        .value
        .get("mode")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<ExecutionMode>().ok());
    Ok(mode.map(|mode| ModeSetting {
        mode,
        last_updated: stored.updated_at,
    }))
}

pub async fn write_mode(
    settings: &dyn SettingsStore,
    mode: ExecutionMode,
) -> Result<ModeSetting, StoreError> {
    let stored = settings
        .upsert(EXECUTION_MODE_KEY, json!({ "mode": mode.as_str() }))
        .await?;
    Ok(ModeSetting {
        mode,
        last_updated: stored.updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySettingsStore;

    #[tokio::test]
    async fn test_mode_roundtrip_through_settings() {
        let settings = MemorySettingsStore::new();
        assert_eq!(read_mode(&settings).await.unwrap(), None);

        write_mode(&settings, ExecutionMode::Automated).await.unwrap();
        let stored = read_mode(&settings).await.unwrap().unwrap();
        assert_eq!(stored.mode, ExecutionMode::Automated);

        write_mode(&settings, ExecutionMode::Manual).await.unwrap();
        let stored = read_mode(&settings).await.unwrap().unwrap();
        assert_eq!(stored.mode, ExecutionMode::Manual);
    }

    #[tokio::test]
    async fn test_garbage_mode_reads_as_unset() {
        let settings = MemorySettingsStore::new();
        settings
            .upsert(EXECUTION_MODE_KEY, json!({ "mode": "yolo" }))
            .await
            .unwrap();
        assert_eq!(read_mode(&settings).await.unwrap(), None);
    }
}
