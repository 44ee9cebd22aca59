//! Recommendation persistence

use super::{next_status, Recommendation, RecommendationStatus, ReviewAction};
use crate::catalog::RemediationAction;
use crate::error::{StoreError, TransitionError};
use crate::executor::ExecutionResult;
use crate::models::Detection;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sha2::{Digest, Sha256};

/// What an upsert did with a detection
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    /// A new pending recommendation was created
    Created(Recommendation),
    /// An open recommendation had its snapshot refreshed in place
    Refreshed(Recommendation),
    /// The pair was rejected before; nothing changed
    Suppressed(Recommendation),
}

impl UpsertOutcome {
    pub fn recommendation(&self) -> &Recommendation {
        match self {
            UpsertOutcome::Created(r) | UpsertOutcome::Refreshed(r) | UpsertOutcome::Suppressed(r) => r,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            UpsertOutcome::Created(_) => "created",
            UpsertOutcome::Refreshed(_) => "refreshed",
            UpsertOutcome::Suppressed(_) => "suppressed",
        }
    }
}

/// Storage for recommendations, keyed so that concurrent upserts for the
/// same `(resource_id, scenario_id)` never produce two open rows
#[async_trait]
pub trait RecommendationStore: Send + Sync {
    async fn upsert_detection(
        &self,
        detection: &Detection,
        action: &RemediationAction,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Recommendation>, StoreError>;

    /// All recommendations, optionally of one status, oldest first
    async fn list(
        &self,
        status: Option<RecommendationStatus>,
    ) -> Result<Vec<Recommendation>, StoreError>;

    async fn transition(
        &self,
        id: &str,
        action: &ReviewAction,
        now: DateTime<Utc>,
    ) -> Result<Recommendation, TransitionError>;

    /// Store an execution outcome; success moves the row to `executed`
    async fn record_execution(
        &self,
        id: &str,
        result: &ExecutionResult,
        now: DateTime<Utc>,
    ) -> Result<Recommendation, TransitionError>;

    /// The newest row for a pair, if it is still open
    async fn open_for_pair(
        &self,
        resource_id: &str,
        scenario_id: &str,
    ) -> Result<Option<Recommendation>, StoreError>;

    /// Close an open row whose waste an automatic run already removed
    async fn resolve(
        &self,
        id: &str,
        result: &ExecutionResult,
        now: DateTime<Utc>,
    ) -> Result<Recommendation, TransitionError>;
}

fn recommendation_id(resource_id: &str, scenario_id: &str, generation: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(resource_id.as_bytes());
    hasher.update(b":");
    hasher.update(scenario_id.as_bytes());
    hasher.update(b":");
    hasher.update(generation.to_le_bytes());
    format!("rec-{}", &hex::encode(hasher.finalize())[..16])
}

fn new_recommendation(
    detection: &Detection,
    action: &RemediationAction,
    generation: u32,
    now: DateTime<Utc>,
) -> Recommendation {
    Recommendation {
        id: recommendation_id(&detection.resource_id, &detection.scenario_id, generation),
        detection_id: detection.id.clone(),
        scenario_id: detection.scenario_id.clone(),
        resource_id: detection.resource_id.clone(),
        resource_type: detection.resource_type,
        action: action.clone(),
        status: RecommendationStatus::Pending,
        detection: detection.clone(),
        created_at: now,
        updated_at: now,
        last_detected_at: now,
        snoozed_until: None,
        scheduled_for: None,
        execution_result: None,
    }
}

/// In-memory recommendation store
///
/// `latest` maps each `(resource_id, scenario_id)` to its newest row and a
/// generation counter; holding its entry while touching `records` makes the
/// create-or-refresh decision atomic per pair.
#[derive(Debug, Default)]
pub struct MemoryRecommendationStore {
    records: DashMap<String, Recommendation>,
    latest: DashMap<(String, String), (String, u32)>,
}

impl MemoryRecommendationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecommendationStore for MemoryRecommendationStore {
    async fn upsert_detection(
        &self,
        detection: &Detection,
        action: &RemediationAction,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StoreError> {
        let key = (detection.resource_id.clone(), detection.scenario_id.clone());

        match self.latest.entry(key) {
            Entry::Vacant(slot) => {
                let created = new_recommendation(detection, action, 0, now);
                self.records.insert(created.id.clone(), created.clone());
                slot.insert((created.id.clone(), 0));
                Ok(UpsertOutcome::Created(created))
            }
            Entry::Occupied(mut slot) => {
                let (current_id, generation) = slot.get().clone();
                if let Some(mut existing) = self.records.get_mut(&current_id) {
                    if !existing.status.is_terminal() {
                        existing.detection = detection.clone();
                        existing.detection_id = detection.id.clone();
                        existing.action = action.clone();
                        existing.last_detected_at = now;
                        existing.updated_at = now;
                        return Ok(UpsertOutcome::Refreshed(existing.clone()));
                    }
                    if existing.status == RecommendationStatus::Rejected {
                        return Ok(UpsertOutcome::Suppressed(existing.clone()));
                    }
                }
                // Executed or expired: the waste came back, open a fresh row
                let next_generation = generation + 1;
                let created = new_recommendation(detection, action, next_generation, now);
                self.records.insert(created.id.clone(), created.clone());
                slot.insert((created.id.clone(), next_generation));
                Ok(UpsertOutcome::Created(created))
            }
        }
    }

    async fn get(&self, id: &str) -> Result<Option<Recommendation>, StoreError> {
        Ok(self.records.get(id).map(|r| r.clone()))
    }

    async fn list(
        &self,
        status: Option<RecommendationStatus>,
    ) -> Result<Vec<Recommendation>, StoreError> {
        let mut rows: Vec<Recommendation> = self
            .records
            .iter()
            .filter(|r| status.map(|s| r.status == s).unwrap_or(true))
            .map(|r| r.clone())
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn transition(
        &self,
        id: &str,
        action: &ReviewAction,
        now: DateTime<Utc>,
    ) -> Result<Recommendation, TransitionError> {
        let mut record = self
            .records
            .get_mut(id)
            .ok_or_else(|| TransitionError::NotFound(id.to_string()))?;

        let next = next_status(record.status, action)?;
        match action {
            ReviewAction::Snooze { until } => record.snoozed_until = Some(*until),
            ReviewAction::Schedule { at } => record.scheduled_for = Some(*at),
            ReviewAction::Wake => record.snoozed_until = None,
            _ => {}
        }
        record.status = next;
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn record_execution(
        &self,
        id: &str,
        result: &ExecutionResult,
        now: DateTime<Utc>,
    ) -> Result<Recommendation, TransitionError> {
        let mut record = self
            .records
            .get_mut(id)
            .ok_or_else(|| TransitionError::NotFound(id.to_string()))?;

        if result.success {
            record.status = next_status(record.status, &ReviewAction::MarkExecuted)?;
        }
        record.execution_result = Some(result.clone());
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn open_for_pair(
        &self,
        resource_id: &str,
        scenario_id: &str,
    ) -> Result<Option<Recommendation>, StoreError> {
        let key = (resource_id.to_string(), scenario_id.to_string());
        let Some(latest) = self.latest.get(&key) else {
            return Ok(None);
        };
        Ok(self
            .records
            .get(&latest.0)
            .filter(|r| !r.status.is_terminal())
            .map(|r| r.clone()))
    }

    async fn resolve(
        &self,
        id: &str,
        result: &ExecutionResult,
        now: DateTime<Utc>,
    ) -> Result<Recommendation, TransitionError> {
        let mut record = self
            .records
            .get_mut(id)
            .ok_or_else(|| TransitionError::NotFound(id.to_string()))?;

        record.status = next_status(record.status, &ReviewAction::Resolve)?;
        record.execution_result = Some(result.clone());
        record.snoozed_until = None;
        record.updated_at = now;
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::eip;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn detection(resource_id: &str, savings: f64) -> Detection {
        let resource = eip(resource_id, "dev", false);
        Detection {
            id: crate::detector::detection_id("unassociated_eip", resource_id),
            scenario_id: "unassociated_eip".to_string(),
            resource_id: resource_id.to_string(),
            resource_name: resource.name().to_string(),
            resource_type: resource.kind(),
            potential_savings: savings,
            current_cost: savings,
            details: BTreeMap::new(),
            observed_at: Utc::now(),
            policy: resource.policy_view(),
        }
    }

    #[tokio::test]
    async fn test_redetection_refreshes_in_place() {
        let store = MemoryRecommendationStore::new();
        let first = store
            .upsert_detection(&detection("eip-1", 3.0), &RemediationAction::Delete, Utc::now())
            .await
            .unwrap();
        let second = store
            .upsert_detection(&detection("eip-1", 4.0), &RemediationAction::Delete, Utc::now())
            .await
            .unwrap();

        assert_eq!(first.label(), "created");
        assert_eq!(second.label(), "refreshed");
        assert_eq!(first.recommendation().id, second.recommendation().id);
        assert_eq!(second.recommendation().detection.potential_savings, 4.0);
        assert_eq!(store.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_upserts_create_one_row() {
        let store = Arc::new(MemoryRecommendationStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .upsert_detection(
                        &detection("eip-1", 3.0),
                        &RemediationAction::Delete,
                        Utc::now(),
                    )
                    .await
                    .unwrap()
            }));
        }
        let mut created = 0;
        for handle in handles {
            if let UpsertOutcome::Created(_) = handle.await.unwrap() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(store.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_pair_is_suppressed() {
        let store = MemoryRecommendationStore::new();
        let now = Utc::now();
        let created = store
            .upsert_detection(&detection("eip-1", 3.0), &RemediationAction::Delete, now)
            .await
            .unwrap();
        let id = created.recommendation().id.clone();
        store.transition(&id, &ReviewAction::Reject, now).await.unwrap();

        let again = store
            .upsert_detection(&detection("eip-1", 3.0), &RemediationAction::Delete, now)
            .await
            .unwrap();
        assert_eq!(again.label(), "suppressed");
        assert_eq!(store.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_expired_pair_reopens_with_new_id() {
        let store = MemoryRecommendationStore::new();
        let now = Utc::now();
        let first = store
            .upsert_detection(&detection("eip-1", 3.0), &RemediationAction::Delete, now)
            .await
            .unwrap();
        let first_id = first.recommendation().id.clone();
        store.transition(&first_id, &ReviewAction::Expire, now).await.unwrap();

        let second = store
            .upsert_detection(&detection("eip-1", 3.0), &RemediationAction::Delete, now)
            .await
            .unwrap();
        assert_eq!(second.label(), "created");
        assert_ne!(second.recommendation().id, first_id);
        assert_eq!(
            store
                .list(Some(RecommendationStatus::Pending))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_resolve_closes_open_row_for_pair() {
        let store = MemoryRecommendationStore::new();
        let now = Utc::now();
        let created = store
            .upsert_detection(&detection("eip-1", 3.0), &RemediationAction::Delete, now)
            .await
            .unwrap();
        let id = created.recommendation().id.clone();
        store
            .transition(&id, &ReviewAction::Snooze { until: now }, now)
            .await
            .unwrap();

        let open = store
            .open_for_pair("eip-1", "unassociated_eip")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(open.id, id);
        assert!(store
            .open_for_pair("eip-2", "unassociated_eip")
            .await
            .unwrap()
            .is_none());

        let result = ExecutionResult {
            resource_id: "eip-1".to_string(),
            resource_type: crate::models::ResourceKind::ElasticIp,
            scenario_id: "unassociated_eip".to_string(),
            detection_id: open.detection_id.clone(),
            action: "delete".to_string(),
            success: true,
            outcome: crate::executor::ExecutionOutcome::Applied,
            message: "deleted".to_string(),
            duration_ms: 1,
            error_kind: None,
            executed_at: now,
        };
        let resolved = store.resolve(&id, &result, now).await.unwrap();
        assert_eq!(resolved.status, RecommendationStatus::Executed);
        assert_eq!(resolved.snoozed_until, None);
        assert!(store
            .open_for_pair("eip-1", "unassociated_eip")
            .await
            .unwrap()
            .is_none());
        assert!(store.resolve(&id, &result, now).await.is_err());
    }

    #[tokio::test]
    async fn test_transition_unknown_id() {
        let store = MemoryRecommendationStore::new();
        let err = store
            .transition("rec-missing", &ReviewAction::Approve, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err, TransitionError::NotFound("rec-missing".to_string()));
    }
}
