// ABOUTME: Backend handlers that forward a project's agent task operations to its TaskService
// ABOUTME: Only READY projects owned by the caller are reachable; others look like they do not exist

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    Json,
};
use refit_projects::Project;
use refit_relay::TaskService;
use refit_tasks::TaskKind;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::error::{ApiResult, AppError};
use crate::response::ok;
use crate::sse::relay_response;
use crate::state::BackendState;

async fn resolve(
    state: &BackendState,
    project_id: &str,
    user: &CurrentUser,
) -> ApiResult<(Project, Arc<dyn TaskService>)> {
    let project = state.orchestrator.agent_target(project_id, &user.id).await?;
    let service = state.agents.service_for(&project).await?;
    Ok((project, service))
}

#[derive(Debug, Default, Deserialize)]
pub struct RunBody {
    /// Defaults to the project's stored spec
    pub spec: Option<String>,
    pub thread_id: Option<String>,
}

/// Start an agent run; the first run's thread becomes the project's conversation
pub async fn run_agent(
    State(state): State<BackendState>,
    user: CurrentUser,
    Path(id): Path<String>,
    body: Option<Json<RunBody>>,
) -> ApiResult<impl IntoResponse> {
    let Json(body) = body.unwrap_or_default();
    let (project, service) = resolve(&state, &id, &user).await?;

    let spec = body
        .spec
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| project.spec.clone());
    if spec.trim().is_empty() {
        return Err(AppError::validation("spec is required"));
    }
    let thread_id = body.thread_id.or_else(|| project.thread_id.clone());

    let ack = service.submit(TaskKind::Run, spec, thread_id).await?;
    record_thread(&state, &project, &ack.thread_id).await;
    info!(project_id = %id, task_id = %ack.task_id, thread_id = %ack.thread_id, "Agent run submitted");
    Ok(ok(ack))
}

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub message: String,
    pub thread_id: Option<String>,
}

/// Ask about the project; without a thread id each chat starts its own conversation
pub async fn chat(
    State(state): State<BackendState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(body): Json<ChatBody>,
) -> ApiResult<impl IntoResponse> {
    let (project, service) = resolve(&state, &id, &user).await?;
    let thread_id = body
        .thread_id
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| chat_thread_id(&project.id));

    let ack = service
        .submit(TaskKind::Chat, body.message, Some(thread_id))
        .await?;
    info!(project_id = %id, task_id = %ack.task_id, thread_id = %ack.thread_id, "Chat submitted");
    Ok(ok(ack))
}

fn chat_thread_id(project_id: &str) -> String {
    format!("chat-{}-{}", project_id, Uuid::new_v4())
}

/// Bind the conversation to the project if it has none yet; failure only costs continuity
async fn record_thread(state: &BackendState, project: &Project, thread_id: &str) {
    if project.thread_id.is_some() {
        return;
    }
    if let Err(e) = state.orchestrator.bind_thread(&project.id, thread_id).await {
        warn!(project_id = %project.id, thread_id, error = %e, "Failed to record project thread");
    }
}

pub async fn list_tasks(
    State(state): State<BackendState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let (_, service) = resolve(&state, &id, &user).await?;
    Ok(ok(service.list().await?))
}

pub async fn get_task(
    State(state): State<BackendState>,
    user: CurrentUser,
    Path((id, task_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let (_, service) = resolve(&state, &id, &user).await?;
    Ok(ok(service.get(&task_id).await?))
}

/// Task events as SSE, relayed without re-encoding
pub async fn stream_task(
    State(state): State<BackendState>,
    user: CurrentUser,
    Path((id, task_id)): Path<(String, String)>,
) -> ApiResult<Response> {
    let (_, service) = resolve(&state, &id, &user).await?;
    let frames = service.stream(&task_id).await?;
    info!(project_id = %id, task_id = %task_id, "Relaying task stream");
    Ok(relay_response(frames))
}

pub async fn stop_task(
    State(state): State<BackendState>,
    user: CurrentUser,
    Path((id, task_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let (_, service) = resolve(&state, &id, &user).await?;
    Ok(ok(service.stop(&task_id).await?))
}

pub async fn resume_task(
    State(state): State<BackendState>,
    user: CurrentUser,
    Path((id, task_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let (_, service) = resolve(&state, &id, &user).await?;
    Ok(ok(service.resume(&task_id).await?))
}
