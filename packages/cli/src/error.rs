// ABOUTME: Startup errors for the refit binary
// ABOUTME: Wraps configuration, storage, and bind failures so main can report them uniformly

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] refit_core::ConfigError),

    #[error("Invalid CORS origin: {0}")]
    InvalidCorsOrigin(String),

    #[error("Database error: {0}")]
    Storage(#[from] refit_projects::StorageError),

    #[error("Agent client error: {0}")]
    AgentClient(#[from] refit_relay::ServiceError),

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;
