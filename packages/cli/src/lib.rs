// ABOUTME: Server bootstrap for the backend service and the in-sandbox agent server
// ABOUTME: Builds state from Config, installs tracing, and serves the axum routers

use axum::http::{HeaderValue, Method};
use axum::Router;
use refit_api::{
    create_agent_router, create_backend_router, AgentDirectory, BackendState, InProcessAgents,
    SandboxAgentServers,
};
use refit_core::{AgentMode, Config};
use refit_projects::{connect_pool, Project, ProjectOrchestrator, ProjectStorage};
use refit_relay::LocalTaskService;
use refit_sandbox::DockerCli;
use refit_tasks::{AgentRunner, CommandAgentRunner, TaskRegistry};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub mod error;

pub use error::{CliError, Result};

/// Install the global subscriber; `RUST_LOG` wins over the configured level
pub fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .compact()
        .init();
}

pub fn cors_layer(origin: &str) -> Result<CorsLayer> {
    let origin = origin
        .parse::<HeaderValue>()
        .map_err(|_| CliError::InvalidCorsOrigin(origin.to_string()))?;

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any))
}

fn agent_directory(config: &Config) -> Result<Arc<dyn AgentDirectory>> {
    Ok(match config.agent_mode {
        AgentMode::Local => {
            let base = CommandAgentRunner::new(&config.agent_command)
                .with_env(config.sandbox_env.clone());
            let volume_prefix = config.sandbox.volume_prefix.clone();
            Arc::new(InProcessAgents::new(move |project: &Project| {
                let container_id = project.container_id.as_deref().unwrap_or_default();
                let runner =
                    base.for_sandbox(&project.id, container_id, volume_prefix.join(&project.id));
                Arc::new(runner) as Arc<dyn AgentRunner>
            }))
        }
        AgentMode::Remote => Arc::new(SandboxAgentServers::new(config.agent_port)?),
    })
}

/// Backend service: project lifecycle plus the agent task relay
pub async fn run_backend(config: Config) -> Result<()> {
    let pool = connect_pool(&config.database_url).await?;
    let storage = Arc::new(ProjectStorage::new(pool));
    storage.migrate().await?;

    let runtime = Arc::new(DockerCli::new(config.sandbox.clone()));
    let orchestrator = Arc::new(
        ProjectOrchestrator::new(storage, runtime).with_sandbox_env(config.sandbox_env.clone()),
    );
    let agents = agent_directory(&config)?;

    let app = create_backend_router(BackendState::new(orchestrator, agents))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.cors_origin)?);

    info!(agent_mode = ?config.agent_mode, database = %config.database_url, "Starting backend service");
    serve(&config.host, config.api_port, app).await
}

/// Agent server run inside a project's sandbox
pub async fn run_agent_server(config: Config) -> Result<()> {
    let runner = CommandAgentRunner::new(&config.agent_command);
    let service = Arc::new(LocalTaskService::new(TaskRegistry::new(Arc::new(runner))));

    let app = create_agent_router(service).layer(TraceLayer::new_for_http());

    info!(agent_command = %config.agent_command, "Starting agent server");
    serve(&config.host, config.agent_port, app).await
}

async fn serve(host: &str, port: u16, app: Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    info!(addr = %listener.local_addr()?, "Listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; run until the process is killed
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned()).unwrap()
    }

    #[test]
    fn test_cors_layer_rejects_bad_origin() {
        assert!(cors_layer("http://localhost:5173").is_ok());
        assert!(matches!(
            cors_layer("http://bad\norigin"),
            Err(CliError::InvalidCorsOrigin(_))
        ));
    }

    #[test]
    fn test_agent_directory_for_each_mode() {
        assert!(agent_directory(&config(&[("REFIT_AGENT_MODE", "local")])).is_ok());
        assert!(agent_directory(&config(&[("REFIT_AGENT_MODE", "remote")])).is_ok());
    }

    #[tokio::test]
    async fn test_serve_reports_bind_failure() {
        let taken = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let result = serve("127.0.0.1", port, Router::new()).await;
        assert!(matches!(result, Err(CliError::Io(_))));
    }
}
