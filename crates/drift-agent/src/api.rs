//! HTTP trigger surface, health checks and Prometheus metrics

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use drift_lib::{
    health::{ComponentStatus, HealthRegistry},
    orchestrator::{DriftTick, TickOptions},
    policy::update_resource_policy,
    store::{write_mode, ResourceStore, SettingsStore},
    ExecutionMode, OptimizationPolicy, PolicyError, RecommendationStatus, ResourceKind,
    StoreError, StructuredLogger, TickError, TransitionError,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub tick: DriftTick,
    pub store: Arc<dyn ResourceStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub logger: StructuredLogger,
}

/// Failures surfaced to API callers as `{success: false, error}`
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({ "success": false, "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

impl From<TickError> for ApiError {
    fn from(err: TickError) -> Self {
        match err {
            TickError::Configuration(msg) => ApiError::Unauthorized(msg),
            TickError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<TransitionError> for ApiError {
    fn from(err: TransitionError) -> Self {
        match &err {
            TransitionError::NotFound(_) => ApiError::NotFound(err.to_string()),
            TransitionError::Invalid { .. } => ApiError::Conflict(err.to_string()),
            TransitionError::InvalidArgument { .. } => ApiError::BadRequest(err.to_string()),
            TransitionError::Store(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            StoreError::NotConfigured(_) => ApiError::Unauthorized(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<PolicyError> for ApiError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::Rejected(msg) => ApiError::Validation(msg),
            PolicyError::Store(e) => e.into(),
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return ApiError::Internal(format!("failed to encode metrics: {}", e)).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct TickRequest {
    #[serde(default)]
    pub mode: Option<ExecutionMode>,
}

impl TickRequest {
    /// Parse a tick body whatever its content type
    ///
    /// An empty body means "no override". Anything else must be a valid
    /// request, so a mistyped `mode` never falls back to the stored mode.
    pub fn parse(body: &[u8]) -> Result<Self, ApiError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body)
            .map_err(|e| ApiError::BadRequest(format!("invalid tick request: {}", e)))
    }
}

/// Run one drift tick; the body and its `mode` are both optional
async fn run_tick(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let request = TickRequest::parse(&body)?;
    let report = state
        .tick
        .run(TickOptions {
            mode_override: request.mode,
        })
        .await
        .map_err(|e| {
            error!(error = %e, "Tick failed");
            ApiError::from(e)
        })?;

    Ok(Json(json!({
        "success": report.success,
        "detections": report.detections,
        "auto_safe_count": report.auto_safe_count,
        "execution_results": report.execution_results,
        "timing": report.timing,
        "report": report,
    })))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModeResponse {
    pub mode: ExecutionMode,
    pub last_updated: Option<DateTime<Utc>>,
}

async fn status(State(state): State<Arc<AppState>>) -> Json<ModeResponse> {
    let resolved = state.tick.resolve_mode(None).await;
    Json(ModeResponse {
        mode: resolved.mode,
        last_updated: resolved.last_updated,
    })
}

#[derive(Debug, Deserialize)]
pub struct ModeRequest {
    pub mode: ExecutionMode,
}

async fn set_mode(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ModeRequest>,
) -> ApiResult<Json<ModeResponse>> {
    let stored = write_mode(state.settings.as_ref(), request.mode).await?;
    state.logger.log_mode_changed(stored.mode.as_str());
    Ok(Json(ModeResponse {
        mode: stored.mode,
        last_updated: Some(stored.last_updated),
    }))
}

async fn list_scenarios(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let scenarios: Vec<_> = state.tick.catalog().iter().map(|s| s.info()).collect();
    Json(scenarios)
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

async fn list_recommendations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<impl IntoResponse> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<RecommendationStatus>)
        .transpose()
        .map_err(ApiError::BadRequest)?;
    let recommendations = state.tick.recommendations().list(status).await?;
    Ok(Json(recommendations))
}

/// Optional body for snooze and schedule
#[derive(Debug, Default, Deserialize)]
pub struct ReviewRequest {
    pub until: Option<DateTime<Utc>>,
    pub at: Option<DateTime<Utc>>,
}

async fn review_recommendation(
    State(state): State<Arc<AppState>>,
    Path((id, action)): Path<(String, String)>,
    body: Option<Json<ReviewRequest>>,
) -> ApiResult<impl IntoResponse> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let workflow = state.tick.recommendations();
    let now = Utc::now();

    let updated = match action.as_str() {
        "approve" => workflow.approve(&id).await?,
        "reject" => workflow.reject(&id).await?,
        "snooze" => {
            let until = request
                .until
                .ok_or_else(|| ApiError::BadRequest("snooze requires `until`".to_string()))?;
            workflow.snooze(&id, until, now).await?
        }
        "schedule" => {
            let at = request
                .at
                .ok_or_else(|| ApiError::BadRequest("schedule requires `at`".to_string()))?;
            workflow.schedule(&id, at, now).await?
        }
        "execute" => {
            workflow
                .execute_approved(&id, state.tick.executor())
                .await?
        }
        other => {
            return Err(ApiError::NotFound(format!(
                "unknown recommendation action: {}",
                other
            )))
        }
    };
    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
pub struct PolicyRequest {
    pub policy: OptimizationPolicy,
}

async fn update_policy(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(String, String)>,
    Json(request): Json<PolicyRequest>,
) -> ApiResult<impl IntoResponse> {
    let kind: ResourceKind = kind.parse().map_err(ApiError::BadRequest)?;
    let updated = update_resource_policy(state.store.as_ref(), kind, &id, request.policy).await?;
    Ok(Json(json!({
        "success": true,
        "resource": updated.policy_view(),
    })))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/tick", post(run_tick))
        .route("/api/v1/status", get(status))
        .route("/api/v1/settings/mode", put(set_mode))
        .route("/api/v1/scenarios", get(list_scenarios))
        .route("/api/v1/recommendations", get(list_recommendations))
        .route(
            "/api/v1/recommendations/:id/:action",
            post(review_recommendation),
        )
        .route("/api/v1/resources/:kind/:id/policy", put(update_policy))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
