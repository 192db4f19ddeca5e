use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;

use super::models::BuildRequest;
use super::pipeline::BuildOrchestrator;
use crate::errors::BuildError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub orchestrator: BuildOrchestrator,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct RetryRequest {
    #[serde(default)]
    pub modifications: Option<String>,
}

#[derive(Deserialize)]
pub struct ModifyRequest {
    pub description: String,
}

#[derive(Deserialize)]
pub struct RespondRequest {
    pub response: String,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<BuildError> for ApiError {
    fn from(err: BuildError) -> Self {
        match err {
            BuildError::Validation { .. } => ApiError::BadRequest(err.to_string()),
            BuildError::ProjectNotFound { .. } | BuildError::SessionNotFound { .. } => {
                ApiError::NotFound(err.to_string())
            }
            BuildError::InvalidState(_) => ApiError::Conflict(err.to_string()),
            BuildError::Io(ref e) if e.kind() == std::io::ErrorKind::NotFound => {
                ApiError::NotFound(err.to_string())
            }
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/builds", get(list_builds).post(create_build))
        .route("/api/builds/{id}", get(get_build))
        .route("/api/builds/{id}/cancel", post(cancel_build))
        .route("/api/builds/{id}/retry", post(retry_build))
        .route("/api/builds/{id}/modify", post(modify_build))
        .route("/api/builds/{id}/files", get(list_build_files))
        .route("/api/builds/{id}/files/{*path}", get(read_build_file))
        .route("/api/builds/{id}/session", get(get_build_session))
        .route("/api/sessions/{id}/respond", post(respond_to_session))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn create_build(
    State(state): State<SharedState>,
    Json(req): Json<BuildRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = state.orchestrator.start_build(req).await?;
    Ok((StatusCode::ACCEPTED, Json(serde_json::json!({"id": id}))))
}

async fn list_builds(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let projects = state.orchestrator.list_projects().await?;
    Ok(Json(projects))
}

async fn get_build(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let status = state.orchestrator.get_project_status(&id).await?;
    if status.project.is_none() {
        return Err(ApiError::NotFound(format!("Project {} not found", id)));
    }
    Ok(Json(status))
}

async fn cancel_build(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let cancelled = state.orchestrator.cancel_build(&id).await?;
    Ok(Json(serde_json::json!({"cancelled": cancelled})))
}

async fn retry_build(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<RetryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let new_id = state
        .orchestrator
        .retry_build(&id, req.modifications)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(serde_json::json!({"id": new_id}))))
}

async fn modify_build(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<ModifyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.description.trim().is_empty() {
        return Err(ApiError::BadRequest("description must not be empty".into()));
    }
    state
        .orchestrator
        .modify_existing_project(&id, &req.description)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

async fn list_build_files(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let workspace = workspace_for(&state, &id).await?;
    let workspaces = state.orchestrator.workspaces();
    let entries = workspaces.list_files(&workspace, 6)?;
    let total_bytes = workspaces.workspace_size(&workspace)?;
    Ok(Json(serde_json::json!({
        "entries": entries,
        "total_bytes": total_bytes,
    })))
}

async fn read_build_file(
    State(state): State<SharedState>,
    Path((id, path)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let workspace = workspace_for(&state, &id).await?;
    let file = state
        .orchestrator
        .workspaces()
        .read_file(&workspace, &path)?;
    Ok(Json(file))
}

async fn get_build_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.orchestrator.sessions().get_session_by_project(&id) {
        Some(session) => Ok(Json(session)),
        None => Err(ApiError::NotFound(format!(
            "No active session for project {}",
            id
        ))),
    }
}

/// Record the human answer, compose the continuation prompt, and resume
/// the parked pipeline through the modification path.
async fn respond_to_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(req): Json<RespondRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let sessions = state.orchestrator.sessions().clone();
    let session = sessions.add_user_response(&id, &req.response)?;
    let prompt = sessions.continuation_prompt(&id, &req.response)?;
    state
        .orchestrator
        .modify_existing_project(&session.project_id, &prompt)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(session)))
}

async fn workspace_for(state: &SharedState, id: &str) -> Result<PathBuf, ApiError> {
    let status = state.orchestrator.get_project_status(id).await?;
    let project = status
        .project
        .ok_or_else(|| ApiError::NotFound(format!("Project {} not found", id)))?;
    Ok(PathBuf::from(project.workspace_path))
}
