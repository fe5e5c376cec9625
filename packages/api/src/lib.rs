// ABOUTME: HTTP API layer for Refit providing REST and SSE endpoints
// ABOUTME: Builds the backend router and the per-sandbox agent server router

use axum::{
    routing::{get, post},
    Router,
};

pub mod agent_handlers;
pub mod agent_proxy_handlers;
pub mod auth;
pub mod error;
pub mod health;
pub mod projects_handlers;
pub mod response;
pub mod sse;
pub mod state;

pub use agent_handlers::AgentState;
pub use auth::CurrentUser;
pub use error::{ApiResult, AppError};
pub use state::{
    AgentDirectory, BackendState, InProcessAgents, RunnerFactory, SandboxAgentServers,
};

/// Creates the projects API router (nested under /projects)
pub fn create_projects_router() -> Router<BackendState> {
    Router::new()
        .route(
            "/",
            get(projects_handlers::list_projects).post(projects_handlers::create_project),
        )
        .route(
            "/{id}",
            get(projects_handlers::get_project)
                .put(projects_handlers::update_project)
                .delete(projects_handlers::delete_project),
        )
        .route("/{id}/provision", post(projects_handlers::provision_project))
        .route("/{id}/stop", post(projects_handlers::stop_project))
        .route("/{id}/exec", post(projects_handlers::exec_command))
        .route("/{id}/files", get(projects_handlers::list_files))
        .route("/{id}/files/{*path}", get(projects_handlers::read_file))
        .route("/{id}/logs/stream", get(projects_handlers::stream_logs))
        // Agent task endpoints, forwarded to the project's task service
        .route("/{id}/run", post(agent_proxy_handlers::run_agent))
        .route("/{id}/chat", post(agent_proxy_handlers::chat))
        .route("/{id}/tasks", get(agent_proxy_handlers::list_tasks))
        .route("/{id}/tasks/{task_id}", get(agent_proxy_handlers::get_task))
        .route(
            "/{id}/tasks/{task_id}/stream",
            get(agent_proxy_handlers::stream_task),
        )
        .route(
            "/{id}/tasks/{task_id}/stop",
            post(agent_proxy_handlers::stop_task),
        )
        .route(
            "/{id}/tasks/{task_id}/resume",
            post(agent_proxy_handlers::resume_task),
        )
}

/// Full backend service
pub fn create_backend_router(state: BackendState) -> Router {
    Router::new()
        .route("/health", get(health::backend_health))
        .nest("/projects", create_projects_router())
        .with_state(state)
}

/// Agent server exposing one task registry over HTTP
pub fn create_agent_router(service: AgentState) -> Router {
    Router::new()
        .route("/health", get(health::agent_health))
        .route("/run", post(agent_handlers::run))
        .route("/chat", post(agent_handlers::chat))
        .route("/tasks", get(agent_handlers::list_tasks))
        .route("/tasks/{task_id}", get(agent_handlers::get_task))
        .route("/tasks/{task_id}/stream", get(agent_handlers::stream_task))
        .route("/tasks/{task_id}/stop", post(agent_handlers::stop_task))
        .route("/tasks/{task_id}/resume", post(agent_handlers::resume_task))
        .with_state(service)
}
