// ABOUTME: Core configuration, environment names, and shared helpers for Refit
// ABOUTME: Foundational package used by the sandbox, project, task, and API packages

pub mod config;
pub mod constants;
pub mod utils;

pub use config::{AgentMode, Config, ConfigError, SandboxDefaults};
pub use utils::{container_name_for, generate_project_id, now_rfc3339};
