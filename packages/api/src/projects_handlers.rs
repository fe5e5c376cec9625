// ABOUTME: HTTP handlers for project lifecycle, sandbox exec, file browsing, and container logs
// ABOUTME: Every handler is owner-scoped through CurrentUser and delegates to ProjectOrchestrator

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use futures::StreamExt;
use refit_core::constants::WORKSPACE_ROOT;
use refit_projects::{CreateProjectRequest, ExecRequest, UpdateProjectRequest};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

use crate::auth::CurrentUser;
use crate::error::{ApiResult, AppError};
use crate::response::ok;
use crate::sse::{
    create_data_event, create_error_event, create_ping_event, create_sse_event,
    create_sse_response,
};
use crate::state::BackendState;

const LOG_PING_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_LOG_TAIL: usize = 100;

#[derive(Debug, Deserialize)]
pub struct ListProjectsQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    20
}

pub async fn list_projects(
    State(state): State<BackendState>,
    user: CurrentUser,
    Query(query): Query<ListProjectsQuery>,
) -> ApiResult<impl IntoResponse> {
    let projects = state
        .orchestrator
        .list(&user.id, query.skip, query.limit)
        .await?;
    Ok(ok(projects))
}

pub async fn create_project(
    State(state): State<BackendState>,
    user: CurrentUser,
    Json(request): Json<CreateProjectRequest>,
) -> ApiResult<impl IntoResponse> {
    let project = state.orchestrator.create(&user.id, request).await?;
    Ok((StatusCode::CREATED, ok(project)))
}

#[derive(Debug, Deserialize)]
pub struct GetProjectQuery {
    #[serde(default = "default_true")]
    pub include_status: bool,
}

fn default_true() -> bool {
    true
}

/// Project record, merged with the live container view unless `include_status=false`
pub async fn get_project(
    State(state): State<BackendState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Query(query): Query<GetProjectQuery>,
) -> ApiResult<impl IntoResponse> {
    if query.include_status {
        let project = state
            .orchestrator
            .get_with_observed_status(&id, &user.id)
            .await?;
        Ok(ok(serde_json::to_value(project).map_err(anyhow::Error::from)?))
    } else {
        let project = state.orchestrator.get(&id, &user.id).await?;
        Ok(ok(serde_json::to_value(project).map_err(anyhow::Error::from)?))
    }
}

pub async fn update_project(
    State(state): State<BackendState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(request): Json<UpdateProjectRequest>,
) -> ApiResult<impl IntoResponse> {
    let project = state.orchestrator.update(&id, &user.id, request).await?;
    Ok(ok(project))
}

pub async fn delete_project(
    State(state): State<BackendState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.orchestrator.delete(&id, &user.id).await?;
    Ok(ok(json!({ "id": id, "message": "Project deleted" })))
}

/// Create the sandbox and bring the project to READY; also used to re-provision
pub async fn provision_project(
    State(state): State<BackendState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    info!(project_id = %id, user_id = %user.id, "Provision requested");
    let project = state.orchestrator.provision(&id, &user.id).await?;
    Ok(ok(project))
}

pub async fn stop_project(
    State(state): State<BackendState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let project = state.orchestrator.stop(&id, &user.id).await?;
    Ok(ok(project))
}

#[derive(Debug, Deserialize)]
pub struct ExecBody {
    pub command: String,
    pub workdir: Option<String>,
    /// Seconds
    pub timeout: Option<u64>,
}

pub async fn exec_command(
    State(state): State<BackendState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(body): Json<ExecBody>,
) -> ApiResult<impl IntoResponse> {
    if body.timeout == Some(0) {
        return Err(AppError::validation("timeout must be at least one second"));
    }

    let output = state
        .orchestrator
        .exec(
            &id,
            &user.id,
            ExecRequest {
                command: body.command,
                workdir: body.workdir,
                timeout: body.timeout.map(Duration::from_secs),
            },
        )
        .await?;
    Ok(ok(output))
}

#[derive(Debug, Deserialize)]
pub struct FilesQuery {
    pub path: Option<String>,
}

pub async fn list_files(
    State(state): State<BackendState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Query(query): Query<FilesQuery>,
) -> ApiResult<impl IntoResponse> {
    let tree = state
        .orchestrator
        .list_files(&id, &user.id, query.path.as_deref())
        .await?;
    Ok(ok(json!({ "root": WORKSPACE_ROOT, "tree": tree })))
}

pub async fn read_file(
    State(state): State<BackendState>,
    user: CurrentUser,
    Path((id, path)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    let content = state.orchestrator.read_file(&id, &user.id, &path).await?;
    Ok(ok(content))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_true")]
    pub follow: bool,
    #[serde(default = "default_tail")]
    pub tail: usize,
}

fn default_tail() -> usize {
    DEFAULT_LOG_TAIL
}

enum LogTick {
    Line(Option<refit_sandbox::Result<String>>),
    Ping,
}

/// Container stdout/stderr as SSE; dropping the response kills the `logs` process
pub async fn stream_logs(
    State(state): State<BackendState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<impl IntoResponse> {
    let mut lines = state
        .orchestrator
        .stream_logs(&id, &user.id, query.follow, query.tail)
        .await?;
    info!(project_id = %id, follow = query.follow, tail = query.tail, "Streaming container logs");

    let events = async_stream::stream! {
        let mut number = 0usize;
        let mut ping = tokio::time::interval_at(
            tokio::time::Instant::now() + LOG_PING_INTERVAL,
            LOG_PING_INTERVAL,
        );

        loop {
            let tick = tokio::select! {
                next = lines.next() => LogTick::Line(next),
                _ = ping.tick() => LogTick::Ping,
            };

            match tick {
                LogTick::Line(Some(Ok(line))) => {
                    number += 1;
                    match create_data_event(&json!({ "line": line, "number": number })) {
                        Ok(event) => yield Ok(event),
                        Err(e) => warn!(project_id = %id, error = %e, "Dropped unencodable log line"),
                    }
                }
                LogTick::Line(Some(Err(e))) => {
                    warn!(project_id = %id, error = %e, "Container log stream failed");
                    yield Ok(create_error_event(&e.to_string()));
                    break;
                }
                LogTick::Line(None) => {
                    if let Ok(event) = create_sse_event("end", &json!({ "total_lines": number })) {
                        yield Ok(event);
                    }
                    break;
                }
                LogTick::Ping => yield Ok(create_ping_event()),
            }
        }
    };

    Ok(create_sse_response(events))
}
