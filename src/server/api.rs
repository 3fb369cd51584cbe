use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;

use super::SharedState;
use super::sse::events_handler;
use crate::errors::{ControllerError, GateError, ReplanError};
use crate::pipeline::NodeKey;
use crate::review::BundleKey;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateRunRequest {
    /// Seed material for the intake stage.
    #[serde(default)]
    pub intake: Option<serde_json::Value>,
}

#[derive(Deserialize)]
pub struct GateResponseRequest {
    pub gate_id: String,
    pub response: serde_json::Value,
}

#[derive(Deserialize)]
pub struct BenchmarkEditRequest {
    pub value: serde_json::Value,
    pub rebuild_from: NodeKey,
}

#[derive(Deserialize)]
pub struct BundleApproveRequest {
    pub bundle: BundleKey,
}

// ── Error handling ────────────────────────────────────────────────────

/// API error with a status the client can branch on. Gate conflicts and
/// expirations map to distinct HTTP statuses — a stale client must be able
/// to tell "resync" apart from "failed".
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Gone(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Gone(msg) => (StatusCode::GONE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        match &err {
            GateError::Conflict { .. } | GateError::AlreadyOpen { .. } => {
                ApiError::Conflict(err.to_string())
            }
            GateError::Expired { .. } => ApiError::Gone(err.to_string()),
            GateError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            GateError::Other(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<ControllerError> for ApiError {
    fn from(err: ControllerError) -> Self {
        match err {
            ControllerError::RunNotFound { .. } => ApiError::NotFound(err.to_string()),
            ControllerError::RunArchived { .. } => ApiError::Conflict(err.to_string()),
            ControllerError::RestartPending { .. } => ApiError::Conflict(err.to_string()),
            ControllerError::Gate(gate) => gate.into(),
            ControllerError::StageFailed { .. } => ApiError::Internal(err.to_string()),
            ControllerError::NoStageImpl { .. } => ApiError::Internal(err.to_string()),
            ControllerError::Other(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<ReplanError> for ApiError {
    fn from(err: ReplanError) -> Self {
        match err {
            ReplanError::ConfirmationPending { .. } => ApiError::Conflict(err.to_string()),
            ReplanError::NothingPending { .. } => ApiError::BadRequest(err.to_string()),
            ReplanError::RunNotFound { .. } => ApiError::NotFound(err.to_string()),
            ReplanError::Other(_) => ApiError::Internal(err.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/runs", get(list_runs).post(create_run))
        .route("/api/runs/{id}/start", post(start_run))
        .route("/api/runs/{id}/snapshot", get(get_snapshot))
        .route("/api/runs/{id}/events", get(events_handler))
        .route("/api/runs/{id}/gate", post(submit_gate_response))
        .route("/api/runs/{id}/bundles", get(get_bundles))
        .route("/api/runs/{id}/bundle-approve", post(approve_bundle))
        .route("/api/runs/{id}/force-advance", post(force_advance))
        .route("/api/runs/{id}/benchmark-edit", post(benchmark_edit))
        .route("/api/runs/{id}/restart", post(confirm_restart))
        .route("/api/runs/{id}/abort", post(abort_run))
        .route("/api/runs/{id}/archive", post(archive_run))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn create_run(
    State(state): State<SharedState>,
    Json(payload): Json<CreateRunRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let run = state.controller.create_run(payload.intake).await?;
    Ok((StatusCode::CREATED, Json(run)))
}

async fn list_runs(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let runs = state.controller.list_runs(false).await?;
    Ok(Json(runs))
}

async fn start_run(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.controller.start(&id).await?;
    Ok(Json(snapshot))
}

async fn get_snapshot(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.controller.snapshot(&id).await?;
    Ok(Json(snapshot))
}

async fn submit_gate_response(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(payload): Json<GateResponseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let gate = state
        .controller
        .resolve_gate(&id, &payload.gate_id, payload.response)
        .await?;
    Ok(Json(gate))
}

async fn get_bundles(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let bundles = state.controller.bundles(&id).await?;
    Ok(Json(bundles))
}

async fn approve_bundle(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(payload): Json<BundleApproveRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let resolved = state.controller.approve_bundle(&id, payload.bundle).await?;
    Ok(Json(serde_json::json!({"resolved_gates": resolved})))
}

async fn force_advance(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.controller.force_advance(&id).await?;
    Ok(Json(snapshot))
}

async fn benchmark_edit(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(payload): Json<BenchmarkEditRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .controller
        .replans()
        .request(&id, payload.rebuild_from, payload.value)
        .await?;
    // A non-destructive replan proceeds immediately.
    if !outcome.requires_restart {
        state.controller.drive(&id).await?;
    }
    Ok(Json(outcome))
}

async fn confirm_restart(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state.controller.replans().confirm_restart(&id).await?;
    state.controller.drive(&id).await?;
    Ok(Json(record))
}

async fn abort_run(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.controller.abort(&id).await?;
    Ok(Json(snapshot))
}

async fn archive_run(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.controller.archive(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
