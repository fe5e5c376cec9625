//! # Refit Projects
//!
//! Project records, their SQLite store, and the orchestrator that drives each
//! project's sandbox through its lifecycle.

pub mod manager;
pub mod storage;
pub mod types;

pub use manager::{ExecRequest, OrchestratorError, ProjectOrchestrator, Result};
pub use storage::{connect_pool, ProjectStorage, StorageError, StorageResult};
pub use types::{
    CreateProjectRequest, DockerStatus, Project, ProjectList, ProjectStatus, ProjectType,
    ProjectWithStatus, UpdateProjectRequest,
};
