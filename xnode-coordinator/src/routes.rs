//! HTTP routes

use crate::error::{ApiError, ApiResult};
use crate::nodes::NodeSummary;
use crate::state::AppState;
use crate::tasks::TaskRecord;
use crate::ws::ws_handler;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use xnode_core::{now_ms, FlowRunResult, JsonMap, DEFAULT_MAX_EXECUTION_TIME_MS};
use xnode_engine::{validate_flow_value, validate_value, RunOptions, ValidationReport};
use xnode_protocol::TaskSpec;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub nodes: usize,
    pub pending_tasks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinatorInfo {
    pub coordinator_id: String,
    /// Base64 ed25519 key workers put in their trust store.
    pub public_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunFlowRequest {
    pub flow: Value,
    #[serde(default)]
    pub inputs: JsonMap,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunFlowResponse {
    pub run_id: String,
    pub result: FlowRunResult,
}

// ============================================================================
// HANDLERS
// ============================================================================

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started.elapsed().as_secs(),
        nodes: state.scheduler.nodes().len(),
        pending_tasks: state.scheduler.pending().len(),
    })
}

async fn coordinator_info(State(state): State<AppState>) -> Json<CoordinatorInfo> {
    let signer = state.scheduler.signer();
    Json(CoordinatorInfo {
        coordinator_id: signer.coordinator_id().to_string(),
        public_key: signer.public_key_base64(),
    })
}

async fn submit_task(
    State(state): State<AppState>,
    Json(spec): Json<TaskSpec>,
) -> ApiResult<(StatusCode, Json<TaskRecord>)> {
    let report = validate_value(&spec.flow);
    if !report.valid {
        return Err(ApiError::validation_failed("Flow validation failed")
            .with_details(serde_json::json!({ "errors": report.errors })));
    }
    let record = state.scheduler.submit(spec);
    Ok((StatusCode::CREATED, Json(record)))
}

async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<TaskRecord>> {
    state
        .scheduler
        .task(&task_id)
        .map(Json)
        .ok_or_else(|| ApiError::task_not_found(&task_id))
}

async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<TaskRecord>> {
    Ok(Json(state.scheduler.cancel(&task_id)?))
}

async fn list_nodes(State(state): State<AppState>) -> Json<Vec<NodeSummary>> {
    Json(state.scheduler.nodes().summaries())
}

async fn validate_flow(Json(flow): Json<Value>) -> Json<ValidationReport> {
    Json(validate_value(&flow))
}

/// Execute a flow on the coordinator itself, bounded by the default task
/// deadline.
async fn run_flow(
    State(state): State<AppState>,
    Json(request): Json<RunFlowRequest>,
) -> ApiResult<Json<RunFlowResponse>> {
    let flow = validate_flow_value(&request.flow)?;
    let options =
        RunOptions::default().with_deadline(Duration::from_millis(DEFAULT_MAX_EXECUTION_TIME_MS));
    let result = state.executor.run(&flow, request.inputs, options).await?;
    Ok(Json(RunFlowResponse {
        run_id: format!("run_{}", now_ms()),
        result,
    }))
}

// ============================================================================
// ROUTER
// ============================================================================

/// Workers may connect at `/ws` or at the bare host URL.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/health", get(health))
        .route("/api/v1/coordinator", get(coordinator_info))
        .route("/api/v1/tasks", post(submit_task))
        .route("/api/v1/tasks/:id", get(get_task))
        .route("/api/v1/tasks/:id/cancel", post(cancel_task))
        .route("/api/v1/nodes", get(list_nodes))
        .route("/api/v1/flow/validate", post(validate_flow))
        .route("/api/v1/flow/run", post(run_flow))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
