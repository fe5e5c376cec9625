// ABOUTME: Handlers for the agent server that runs inside each project sandbox
// ABOUTME: Bodies are the bare wire contract RemoteTaskService parses, not the backend envelope

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    Json,
};
use refit_relay::TaskService;
use refit_tasks::TaskKind;
use serde::Deserialize;
use std::sync::Arc;

use crate::error::ApiResult;
use crate::sse::relay_response;

pub type AgentState = Arc<dyn TaskService>;

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub spec: String,
    pub thread_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub thread_id: Option<String>,
}

pub async fn run(
    State(service): State<AgentState>,
    Json(request): Json<RunRequest>,
) -> ApiResult<impl IntoResponse> {
    let ack = service
        .submit(TaskKind::Run, request.spec, request.thread_id)
        .await?;
    Ok(Json(ack))
}

pub async fn chat(
    State(service): State<AgentState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<impl IntoResponse> {
    let ack = service
        .submit(TaskKind::Chat, request.message, request.thread_id)
        .await?;
    Ok(Json(ack))
}

pub async fn list_tasks(State(service): State<AgentState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(service.list().await?))
}

pub async fn get_task(
    State(service): State<AgentState>,
    Path(task_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(service.get(&task_id).await?))
}

pub async fn stream_task(
    State(service): State<AgentState>,
    Path(task_id): Path<String>,
) -> ApiResult<Response> {
    Ok(relay_response(service.stream(&task_id).await?))
}

pub async fn stop_task(
    State(service): State<AgentState>,
    Path(task_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(service.stop(&task_id).await?))
}

pub async fn resume_task(
    State(service): State<AgentState>,
    Path(task_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(service.resume(&task_id).await?))
}
