// ABOUTME: Project record, lifecycle status, and request/response shapes
// ABOUTME: Status values serialize UPPERCASE to match the persisted column

use chrono::{DateTime, Utc};
use refit_sandbox::ObservedContainer;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of workspace a project provisions
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProjectType {
    /// Clones `repo_url`@`branch` into the sandbox
    #[default]
    Refactor,
    /// Empty workspace seeded with a memory scaffold
    Sandbox,
}

impl ProjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::Refactor => "REFACTOR",
            ProjectType::Sandbox => "SANDBOX",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "REFACTOR" => Some(ProjectType::Refactor),
            "SANDBOX" => Some(ProjectType::Sandbox),
            _ => None,
        }
    }
}

/// Persisted lifecycle state; authoritative over whatever the runtime reports
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProjectStatus {
    Created,
    Provisioning,
    Ready,
    Running,
    Stopped,
    Failed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Created => "CREATED",
            ProjectStatus::Provisioning => "PROVISIONING",
            ProjectStatus::Ready => "READY",
            ProjectStatus::Running => "RUNNING",
            ProjectStatus::Stopped => "STOPPED",
            ProjectStatus::Failed => "FAILED",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "CREATED" => Some(ProjectStatus::Created),
            "PROVISIONING" => Some(ProjectStatus::Provisioning),
            "READY" => Some(ProjectStatus::Ready),
            "RUNNING" => Some(ProjectStatus::Running),
            "STOPPED" => Some(ProjectStatus::Stopped),
            "FAILED" => Some(ProjectStatus::Failed),
            _ => None,
        }
    }

    /// States a container reference may be held in
    pub fn allows_container(&self) -> bool {
        matches!(
            self,
            ProjectStatus::Ready
                | ProjectStatus::Running
                | ProjectStatus::Stopped
                | ProjectStatus::Failed
        )
    }

    pub fn can_provision(&self) -> bool {
        matches!(
            self,
            ProjectStatus::Created | ProjectStatus::Stopped | ProjectStatus::Failed
        )
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: String,
    #[serde(rename = "type")]
    pub project_type: ProjectType,
    pub title: String,
    pub description: Option<String>,
    pub repo_url: Option<String>,
    pub branch: Option<String>,
    pub spec: String,
    pub status: ProjectStatus,
    pub container_id: Option<String>,
    pub owner_id: String,
    pub thread_id: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateProjectRequest {
    #[serde(rename = "type", default)]
    pub project_type: ProjectType,
    pub title: Option<String>,
    pub description: Option<String>,
    pub repo_url: Option<String>,
    pub branch: Option<String>,
    #[serde(default)]
    pub spec: String,
}

/// Partial update; `None` leaves a field untouched
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProjectRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub spec: Option<String>,
    pub repo_url: Option<String>,
    pub branch: Option<String>,
}

impl UpdateProjectRequest {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.spec.is_none()
            && self.repo_url.is_none()
            && self.branch.is_none()
    }

    pub fn touches_source(&self) -> bool {
        self.repo_url.is_some() || self.branch.is_some()
    }
}

/// Live container view attached to a project read
///
/// When the stored container is gone from the runtime the observation is
/// `status: "not_found"` with `inconsistent: true`; nothing is repaired.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DockerStatus {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub inconsistent: bool,
}

impl DockerStatus {
    pub fn not_found(container_id: &str) -> Self {
        Self {
            id: container_id.chars().take(12).collect(),
            name: None,
            status: "not_found".to_string(),
            image: None,
            inconsistent: true,
        }
    }
}

impl From<ObservedContainer> for DockerStatus {
    fn from(observed: ObservedContainer) -> Self {
        Self {
            id: observed.id,
            name: Some(observed.name),
            status: observed.status,
            image: Some(observed.image),
            inconsistent: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProjectWithStatus {
    #[serde(flatten)]
    pub project: Project,
    pub docker_status: Option<DockerStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectList {
    pub total: i64,
    pub projects: Vec<Project>,
}
