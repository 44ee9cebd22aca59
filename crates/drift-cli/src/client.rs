//! API client for the drift agent

use anyhow::{Context, Result};
use reqwest::{Client, Method, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;

/// Non-success answer from the agent
///
/// The agent wraps failures as `{success: false, error}`; the message is
/// lifted out of that envelope when present.
#[derive(Debug, Error)]
#[error("API error ({status}): {message}")]
pub struct ApiError {
    pub status: u16,
    pub message: String,
}

/// API client for the drift agent
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(Method::GET, path, None::<&()>).await
    }

    /// Make a POST request, with a JSON body when one is given
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<T> {
        self.send(Method::POST, path, body).await
    }

    /// Make a PUT request with JSON body
    pub async fn put<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        self.send(Method::PUT, path, Some(body)).await
    }

    async fn send<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.context("Failed to send request")?;
        let response = check_status(response).await?;

        response.json().await.context("Failed to parse response")
    }
}

async fn check_status(response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|e| e.error)
        .unwrap_or(body);
    Err(ApiError { status, message }.into())
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: String,
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickResponse {
    pub success: bool,
    pub auto_safe_count: usize,
    pub detections: Vec<Detection>,
    pub execution_results: Vec<ExecutionResult>,
    pub timing: PhaseTiming,
    pub report: TickReport,
}

/// The parts of the tick report the CLI renders; the rest stays in `--format json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickReport {
    pub tick_id: String,
    pub mode: String,
    pub mode_source: String,
    #[serde(default)]
    pub policy_blocked: Vec<Value>,
    #[serde(default)]
    pub ignored_count: usize,
    #[serde(default)]
    pub execution_skipped: Option<String>,
    pub recommendations: RecommendationSummary,
    pub summary: DetectionSummary,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionSummary {
    pub total_potential_savings: f64,
    #[serde(default)]
    pub resources_scanned: usize,
    #[serde(default)]
    pub category_failures: Vec<CategoryFailure>,
    #[serde(default)]
    pub insufficient_data: usize,
    #[serde(default)]
    pub invalid_rows: Vec<InvalidRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryFailure {
    pub resource_type: String,
    pub error: String,
}

/// A store row the agent skipped because it did not parse
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidRow {
    pub resource_type: String,
    #[serde(default)]
    pub id: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecommendationSummary {
    pub created: usize,
    pub refreshed: usize,
    pub suppressed: usize,
    pub failed: usize,
    #[serde(default)]
    pub resolved: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub detect_ms: u64,
    pub execute_ms: u64,
    pub recommend_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub id: String,
    pub scenario_id: String,
    pub resource_id: String,
    #[serde(default)]
    pub resource_name: String,
    pub resource_type: String,
    pub potential_savings: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub resource_id: String,
    pub resource_type: String,
    pub scenario_id: String,
    pub action: String,
    pub success: bool,
    pub outcome: String,
    pub message: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: String,
    pub scenario_id: String,
    pub resource_id: String,
    pub resource_type: String,
    pub action: RemediationAction,
    pub status: String,
    pub detection: Detection,
    pub created_at: String,
    pub last_detected_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snoozed_until: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_result: Option<ExecutionResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationAction {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl RemediationAction {
    /// `update_field volume_type=gp3` style rendering
    pub fn describe(&self) -> String {
        match (&self.field, &self.value) {
            (Some(field), Some(Value::String(value))) => {
                format!("{} {}={}", self.kind, field, value)
            }
            (Some(field), Some(value)) => format!("{} {}={}", self.kind, field, value),
            _ => self.kind.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub resource_type: String,
    pub description: String,
    pub action: RemediationAction,
    pub auto_safe: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeStatus {
    pub mode: String,
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeRequest {
    pub mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRequest {
    pub policy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyResponse {
    pub success: bool,
    pub resource: PolicyResource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyResource {
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub env: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimization_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentHealth {
    pub status: String,
    pub components: std::collections::BTreeMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub checked_at: String,
}
