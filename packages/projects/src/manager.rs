// ABOUTME: Project orchestrator driving the sandbox lifecycle state machine
// ABOUTME: Serializes transitions per project and keeps persisted state consistent with the runtime

use crate::storage::sqlite::LifecycleState;
use crate::storage::{ProjectStorage, StorageError};
use crate::types::{
    CreateProjectRequest, DockerStatus, Project, ProjectList, ProjectStatus, ProjectType,
    ProjectWithStatus, UpdateProjectRequest,
};
use chrono::Utc;
use refit_core::constants::{REPO_DIR, WORKSPACE_ROOT};
use refit_core::generate_project_id;
use refit_sandbox::sanitize::{sanitize_branch, sanitize_path, sanitize_repo_url};
use refit_sandbox::{
    CreateRequest, ExecOutput, FileContent, FileNode, LogLines, RuntimeError, SandboxRuntime,
    SanitizeError, DEFAULT_EXCLUDE_PATTERNS,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};

const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Directory holding the agent's own code; never exposed through file browsing
const AGENT_DIR: &str = "agent";

const MAX_LIST_LIMIT: i64 = 100;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Runtime(#[from] RuntimeError),

    #[error("Project not found: {0}")]
    NotFound(String),

    #[error("Not allowed to access project {0}")]
    PermissionDenied(String),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Project {0} has not been provisioned")]
    NotProvisioned(String),

    #[error("Access to the agent directory is not allowed")]
    AgentDirectoryDenied,

    #[error("Validation failed: {0}")]
    Validation(String),
}

impl From<SanitizeError> for OrchestratorError {
    fn from(err: SanitizeError) -> Self {
        OrchestratorError::Validation(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Debug, Clone, Default)]
pub struct ExecRequest {
    pub command: String,
    pub workdir: Option<String>,
    pub timeout: Option<Duration>,
}

pub struct ProjectOrchestrator {
    storage: Arc<ProjectStorage>,
    runtime: Arc<dyn SandboxRuntime>,
    /// Injected into every sandbox at creation and never updated afterwards
    sandbox_env: HashMap<String, String>,
    transitions: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ProjectOrchestrator {
    pub fn new(storage: Arc<ProjectStorage>, runtime: Arc<dyn SandboxRuntime>) -> Self {
        Self {
            storage,
            runtime,
            sandbox_env: HashMap::new(),
            transitions: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_sandbox_env(mut self, env: HashMap<String, String>) -> Self {
        self.sandbox_env = env;
        self
    }

    pub fn storage(&self) -> &Arc<ProjectStorage> {
        &self.storage
    }

    /// Hold the per-project transition guard for the duration of a lifecycle change
    async fn lock_transitions(&self, project_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.transitions.lock().await;
            locks
                .entry(project_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    async fn forget_transitions(&self, project_id: &str) {
        self.transitions.lock().await.remove(project_id);
    }

    pub async fn create(&self, owner_id: &str, request: CreateProjectRequest) -> Result<Project> {
        let (repo_url, branch) = match request.project_type {
            ProjectType::Refactor => {
                let repo_url = request
                    .repo_url
                    .as_deref()
                    .filter(|url| !url.trim().is_empty())
                    .ok_or_else(|| {
                        OrchestratorError::Validation(
                            "repo_url is required for REFACTOR projects".to_string(),
                        )
                    })?;
                let repo_url = sanitize_repo_url(repo_url)?;
                let branch = sanitize_branch(request.branch.as_deref().unwrap_or(""))?;
                (Some(repo_url), Some(branch))
            }
            ProjectType::Sandbox => (None, None),
        };

        let title = request
            .title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| default_title(request.project_type, repo_url.as_deref()));

        let now = Utc::now();
        let project = Project {
            id: generate_project_id(),
            project_type: request.project_type,
            title,
            description: request.description,
            repo_url,
            branch,
            spec: request.spec,
            status: ProjectStatus::Created,
            container_id: None,
            owner_id: owner_id.to_string(),
            thread_id: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };

        self.storage.insert(&project).await?;
        info!(project_id = %project.id, owner_id, project_type = project.project_type.as_str(), "Created project");
        Ok(project)
    }

    /// Load a project the caller owns
    pub async fn get(&self, project_id: &str, owner_id: &str) -> Result<Project> {
        let project = self
            .storage
            .get(project_id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(project_id.to_string()))?;

        if project.owner_id != owner_id {
            return Err(OrchestratorError::PermissionDenied(project_id.to_string()));
        }
        Ok(project)
    }

    /// Merge the persisted record with a live inspect of its container
    ///
    /// A container missing from the runtime is reported as data; the stored status is
    /// left alone.
    pub async fn get_with_observed_status(
        &self,
        project_id: &str,
        owner_id: &str,
    ) -> Result<ProjectWithStatus> {
        let project = self.get(project_id, owner_id).await?;

        let docker_status = match &project.container_id {
            None => None,
            Some(container_id) => match self.runtime.inspect(container_id).await? {
                Some(observed) => Some(DockerStatus::from(observed)),
                None => {
                    warn!(
                        project_id,
                        container_id = %container_id,
                        status = %project.status,
                        "Stored container missing from runtime"
                    );
                    Some(DockerStatus::not_found(container_id))
                }
            },
        };

        Ok(ProjectWithStatus {
            project,
            docker_status,
        })
    }

    pub async fn list(&self, owner_id: &str, skip: i64, limit: i64) -> Result<ProjectList> {
        let skip = skip.max(0);
        let limit = limit.clamp(1, MAX_LIST_LIMIT);
        let total = self.storage.count_by_owner(owner_id).await?;
        let projects = self.storage.list_by_owner(owner_id, skip, limit).await?;
        Ok(ProjectList { total, projects })
    }

    pub async fn update(
        &self,
        project_id: &str,
        owner_id: &str,
        mut update: UpdateProjectRequest,
    ) -> Result<Project> {
        let _guard = self.lock_transitions(project_id).await;
        let project = self.get(project_id, owner_id).await?;

        if update.touches_source() {
            if project.status != ProjectStatus::Created {
                return Err(OrchestratorError::InvalidStateTransition(format!(
                    "repo_url and branch are immutable once the project leaves CREATED (status {})",
                    project.status
                )));
            }
            if project.project_type == ProjectType::Sandbox {
                return Err(OrchestratorError::Validation(
                    "SANDBOX projects have no repository".to_string(),
                ));
            }
            if let Some(url) = &update.repo_url {
                update.repo_url = Some(sanitize_repo_url(url)?);
            }
            if let Some(branch) = &update.branch {
                update.branch = Some(sanitize_branch(branch)?);
            }
        }

        if let Some(title) = &update.title {
            if title.trim().is_empty() {
                return Err(OrchestratorError::Validation("title must not be empty".to_string()));
            }
        }

        if update.is_empty() {
            return Ok(project);
        }

        let updated = self.storage.update_details(project_id, &update).await?;
        info!(project_id, "Updated project");
        Ok(updated)
    }

    /// Create, start, and populate the project's sandbox
    ///
    /// Ends READY with a container or FAILED with `last_error`; a container created by
    /// a failed attempt is removed before the failure is recorded.
    pub async fn provision(&self, project_id: &str, owner_id: &str) -> Result<Project> {
        let _guard = self.lock_transitions(project_id).await;
        let project = self.get(project_id, owner_id).await?;

        if !project.status.can_provision() {
            return Err(OrchestratorError::InvalidStateTransition(format!(
                "cannot provision from {} (expected CREATED, STOPPED or FAILED)",
                project.status
            )));
        }

        if let Some(stale) = &project.container_id {
            if let Err(e) = self.runtime.remove(stale, true).await {
                warn!(project_id, container_id = %stale, error = %e, "Failed to remove stale container before re-provisioning");
            }
        }

        self.storage
            .set_lifecycle(
                project_id,
                &LifecycleState {
                    status: ProjectStatus::Provisioning,
                    container_id: None,
                    last_error: None,
                },
            )
            .await?;
        info!(project_id, "Provisioning project sandbox");

        let mut created: Option<String> = None;
        match self.provision_sandbox(&project, &mut created).await {
            Ok(ready) => Ok(ready),
            Err(e) => {
                error!(project_id, error = %e, "Provisioning failed");
                if let Some(container_id) = &created {
                    if let Err(cleanup) = self.runtime.remove(container_id, true).await {
                        error!(project_id, container_id = %container_id, error = %cleanup, "Failed to clean up container after provisioning failure");
                    }
                }
                self.storage
                    .set_lifecycle(
                        project_id,
                        &LifecycleState {
                            status: ProjectStatus::Failed,
                            container_id: None,
                            last_error: Some(e.to_string()),
                        },
                    )
                    .await?;
                Err(e)
            }
        }
    }

    /// Everything after PROVISIONING is recorded; any error here leaves `created` for cleanup
    async fn provision_sandbox(
        &self,
        project: &Project,
        created: &mut Option<String>,
    ) -> Result<Project> {
        let container_id = self.build_sandbox(project, created).await?;
        let ready = self
            .storage
            .set_lifecycle(
                &project.id,
                &LifecycleState {
                    status: ProjectStatus::Ready,
                    container_id: Some(container_id.clone()),
                    last_error: None,
                },
            )
            .await?;
        info!(project_id = %project.id, container_id = %container_id, "Project sandbox ready");
        Ok(ready)
    }

    async fn build_sandbox(&self, project: &Project, created: &mut Option<String>) -> Result<String> {
        let container_id = self
            .runtime
            .create(&CreateRequest {
                project_id: project.id.clone(),
                image: None,
                env: self.sandbox_env.clone(),
            })
            .await?;
        *created = Some(container_id.clone());

        self.runtime.start(&container_id, true).await?;

        match project.project_type {
            ProjectType::Refactor => {
                let (repo_url, branch) = match (&project.repo_url, &project.branch) {
                    (Some(url), Some(branch)) => (url, branch),
                    _ => {
                        return Err(OrchestratorError::Validation(
                            "REFACTOR project is missing repo_url or branch".to_string(),
                        ))
                    }
                };
                self.runtime
                    .clone_repository(&container_id, repo_url, branch, REPO_DIR, None)
                    .await?;
            }
            ProjectType::Sandbox => {
                self.runtime
                    .seed_memory_scaffold(&project.id, &project.spec)
                    .await?;
            }
        }

        Ok(container_id)
    }

    /// Stop the sandbox; a runtime failure is recorded as FAILED and returned
    pub async fn stop(&self, project_id: &str, owner_id: &str) -> Result<Project> {
        let _guard = self.lock_transitions(project_id).await;
        let project = self.get(project_id, owner_id).await?;

        let container_id = project
            .container_id
            .clone()
            .ok_or_else(|| OrchestratorError::NotProvisioned(project_id.to_string()))?;

        match self.runtime.stop(&container_id, STOP_TIMEOUT).await {
            Ok(()) => {
                let stopped = self
                    .storage
                    .set_lifecycle(
                        project_id,
                        &LifecycleState {
                            status: ProjectStatus::Stopped,
                            container_id: Some(container_id),
                            last_error: None,
                        },
                    )
                    .await?;
                info!(project_id, "Project stopped");
                Ok(stopped)
            }
            Err(e) => {
                error!(project_id, error = %e, "Failed to stop project sandbox");
                self.storage
                    .set_lifecycle(
                        project_id,
                        &LifecycleState {
                            status: ProjectStatus::Failed,
                            container_id: Some(container_id),
                            last_error: Some(e.to_string()),
                        },
                    )
                    .await?;
                Err(e.into())
            }
        }
    }

    /// Remove the sandbox best-effort, then the record
    pub async fn delete(&self, project_id: &str, owner_id: &str) -> Result<()> {
        {
            let _guard = self.lock_transitions(project_id).await;
            let project = self.get(project_id, owner_id).await?;

            if let Some(container_id) = &project.container_id {
                match self.runtime.remove(container_id, true).await {
                    Ok(()) => info!(project_id, container_id = %container_id, "Removed project container"),
                    Err(e) => warn!(project_id, container_id = %container_id, error = %e, "Failed to remove container, deleting record anyway"),
                }
            }

            self.storage.delete(project_id).await?;
        }
        self.forget_transitions(project_id).await;
        info!(project_id, "Deleted project");
        Ok(())
    }

    async fn require_container(&self, project_id: &str, owner_id: &str) -> Result<String> {
        self.get(project_id, owner_id)
            .await?
            .container_id
            .ok_or_else(|| OrchestratorError::NotProvisioned(project_id.to_string()))
    }

    pub async fn exec(
        &self,
        project_id: &str,
        owner_id: &str,
        request: ExecRequest,
    ) -> Result<ExecOutput> {
        if request.command.trim().is_empty() {
            return Err(OrchestratorError::Validation("command must not be empty".to_string()));
        }
        let container_id = self.require_container(project_id, owner_id).await?;

        info!(project_id, command = %request.command, "Executing command in sandbox");
        let output = self
            .runtime
            .exec(
                &container_id,
                &request.command,
                request.workdir.as_deref(),
                request.timeout,
            )
            .await?;
        Ok(output)
    }

    pub async fn list_files(
        &self,
        project_id: &str,
        owner_id: &str,
        path: Option<&str>,
    ) -> Result<FileNode> {
        let container_id = self.require_container(project_id, owner_id).await?;
        let path = resolve_workspace_path(path.unwrap_or(WORKSPACE_ROOT))?;

        let excludes: Vec<String> = DEFAULT_EXCLUDE_PATTERNS
            .iter()
            .map(|p| p.to_string())
            .collect();
        Ok(self
            .runtime
            .list_files(&container_id, &path, &excludes)
            .await?)
    }

    pub async fn read_file(&self, project_id: &str, owner_id: &str, path: &str) -> Result<FileContent> {
        let container_id = self.require_container(project_id, owner_id).await?;
        let path = resolve_workspace_path(path)?;
        Ok(self.runtime.read_file(&container_id, &path, None).await?)
    }

    pub async fn stream_logs(
        &self,
        project_id: &str,
        owner_id: &str,
        follow: bool,
        tail: usize,
    ) -> Result<LogLines> {
        let container_id = self.require_container(project_id, owner_id).await?;
        Ok(self.runtime.stream_logs(&container_id, follow, tail).await?)
    }

    /// Project the agent server may be reached for: owned and READY, otherwise not found
    pub async fn agent_target(&self, project_id: &str, owner_id: &str) -> Result<Project> {
        match self.get(project_id, owner_id).await {
            Ok(project) if project.status == ProjectStatus::Ready => Ok(project),
            Ok(_) | Err(OrchestratorError::PermissionDenied(_)) => {
                Err(OrchestratorError::NotFound(project_id.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn bind_thread(&self, project_id: &str, thread_id: &str) -> Result<String> {
        Ok(self.storage.bind_thread(project_id, thread_id).await?)
    }
}

fn default_title(project_type: ProjectType, repo_url: Option<&str>) -> String {
    repo_url
        .and_then(|url| url.trim_end_matches('/').rsplit(['/', ':']).next())
        .map(|name| name.trim_end_matches(".git").to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| match project_type {
            ProjectType::Refactor => "Refactor project".to_string(),
            ProjectType::Sandbox => "Sandbox".to_string(),
        })
}

/// Resolve a client path against the workspace root, refusing the agent directory
pub fn resolve_workspace_path(path: &str) -> Result<String> {
    let trimmed = path.trim();
    let candidate = if trimmed.is_empty() {
        WORKSPACE_ROOT.to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/{}", WORKSPACE_ROOT, trimmed)
    };

    let resolved = sanitize_path(&candidate, WORKSPACE_ROOT)?;
    let agent_root = format!("{}/{}", WORKSPACE_ROOT, AGENT_DIR);
    if resolved == agent_root || resolved.starts_with(&format!("{}/", agent_root)) {
        warn!(path = %resolved, "Rejected access to agent directory");
        return Err(OrchestratorError::AgentDirectoryDenied);
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_resolve_workspace_path() {
        assert_eq!(resolve_workspace_path("").unwrap(), "/workspace");
        assert_eq!(resolve_workspace_path("repo/src").unwrap(), "/workspace/repo/src");
        assert_eq!(
            resolve_workspace_path("/workspace/repo/README.md").unwrap(),
            "/workspace/repo/README.md"
        );
        assert!(matches!(
            resolve_workspace_path("agent/secret.py"),
            Err(OrchestratorError::AgentDirectoryDenied)
        ));
        assert!(matches!(
            resolve_workspace_path("/workspace/agent"),
            Err(OrchestratorError::AgentDirectoryDenied)
        ));
        assert!(resolve_workspace_path("repo/agent/notes.md").is_ok());
        assert!(matches!(
            resolve_workspace_path("repo/%2e%2e/%2e%2e/etc/passwd"),
            Err(OrchestratorError::Validation(_))
        ));
    }

    #[test]
    fn test_default_title() {
        assert_eq!(
            default_title(ProjectType::Refactor, Some("https://github.com/acme/widgets.git")),
            "widgets"
        );
        assert_eq!(
            default_title(ProjectType::Refactor, Some("git@github.com:acme/tools.git")),
            "tools"
        );
        assert_eq!(default_title(ProjectType::Sandbox, None), "Sandbox");
    }
}
