// ABOUTME: Shared state for the backend router
// ABOUTME: Resolves which TaskService serves a given project's agent tasks

use async_trait::async_trait;
use refit_projects::{Project, ProjectOrchestrator};
use refit_relay::{remote, LocalTaskService, RemoteTaskService, ServiceError, TaskService};
use refit_tasks::{AgentRunner, TaskRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Picks the task service for a READY project
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn service_for(&self, project: &Project) -> Result<Arc<dyn TaskService>, ServiceError>;
}

/// Each project's agent server runs inside its sandbox and is reached over the sandbox network
pub struct SandboxAgentServers {
    client: reqwest::Client,
    port: u16,
}

impl SandboxAgentServers {
    pub fn new(port: u16) -> Result<Self, ServiceError> {
        Ok(Self {
            client: remote::build_client()?,
            port,
        })
    }
}

#[async_trait]
impl AgentDirectory for SandboxAgentServers {
    async fn service_for(&self, project: &Project) -> Result<Arc<dyn TaskService>, ServiceError> {
        Ok(Arc::new(RemoteTaskService::with_client(
            self.client.clone(),
            remote::project_base_url(&project.id, self.port),
        )))
    }
}

/// Builds the agent runner for one READY project's sandbox
pub type RunnerFactory = dyn Fn(&Project) -> Arc<dyn AgentRunner> + Send + Sync;

/// Tasks run inside this process; every project gets its own registry
///
/// A registry is tied to the container it was built for and is replaced when the
/// project is reprovisioned into a new one.
pub struct InProcessAgents {
    runners: Box<RunnerFactory>,
    services: Mutex<HashMap<String, (Option<String>, Arc<dyn TaskService>)>>,
}

impl InProcessAgents {
    pub fn new<F>(runners: F) -> Self
    where
        F: Fn(&Project) -> Arc<dyn AgentRunner> + Send + Sync + 'static,
    {
        Self {
            runners: Box::new(runners),
            services: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl AgentDirectory for InProcessAgents {
    async fn service_for(&self, project: &Project) -> Result<Arc<dyn TaskService>, ServiceError> {
        let mut services = self.services.lock().await;
        if let Some((container_id, service)) = services.get(&project.id) {
            if *container_id == project.container_id {
                return Ok(Arc::clone(service));
            }
        }

        info!(
            project_id = %project.id,
            container_id = ?project.container_id,
            "Creating in-process task registry"
        );
        let runner = (self.runners)(project);
        let service: Arc<dyn TaskService> = Arc::new(LocalTaskService::new(TaskRegistry::new(runner)));
        services.insert(
            project.id.clone(),
            (project.container_id.clone(), Arc::clone(&service)),
        );
        Ok(service)
    }
}

#[derive(Clone)]
pub struct BackendState {
    pub orchestrator: Arc<ProjectOrchestrator>,
    pub agents: Arc<dyn AgentDirectory>,
}

impl BackendState {
    pub fn new(orchestrator: Arc<ProjectOrchestrator>, agents: Arc<dyn AgentDirectory>) -> Self {
        Self {
            orchestrator,
            agents,
        }
    }
}
