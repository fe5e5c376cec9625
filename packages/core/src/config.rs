// ABOUTME: Environment-driven configuration for the backend service and the agent server
// ABOUTME: Parses ports, sandbox defaults, agent mode, and the env forwarded into sandboxes

use crate::constants::*;
use std::collections::HashMap;
use std::env;
use std::num::{ParseFloatError, ParseIntError};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {source}")]
    InvalidInteger {
        name: &'static str,
        #[source]
        source: ParseIntError,
    },
    #[error("Invalid value for {name}: {source}")]
    InvalidFloat {
        name: &'static str,
        #[source]
        source: ParseFloatError,
    },
    #[error("Port {0} is out of valid range (1-65535)")]
    PortOutOfRange(u16),
    #[error("Invalid agent mode: {0} (expected 'local' or 'remote')")]
    InvalidAgentMode(String),
    #[error("{name} must be greater than zero")]
    NotPositive { name: &'static str },
}

/// Where agent tasks execute relative to the backend service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentMode {
    /// Tasks run in-process in the backend
    Local,
    /// Tasks run in the agent server inside each project's sandbox
    Remote,
}

impl FromStr for AgentMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(AgentMode::Local),
            "remote" => Ok(AgentMode::Remote),
            _ => Err(ConfigError::InvalidAgentMode(s.to_string())),
        }
    }
}

/// Settings handed to the sandbox runtime client
#[derive(Debug, Clone)]
pub struct SandboxDefaults {
    pub image: String,
    pub network: String,
    pub volume_prefix: PathBuf,
    pub cpu_limit: f64,
    pub memory_limit: String,
    pub git_depth: u32,
    pub clone_timeout: Duration,
    pub exec_timeout: Duration,
    pub ready_timeout: Duration,
    pub max_file_size: u64,
    pub credentials_file: Option<PathBuf>,
}

impl Default for SandboxDefaults {
    fn default() -> Self {
        Self {
            image: "refactor-base:latest".to_string(),
            network: "refactor-network".to_string(),
            volume_prefix: PathBuf::from("/tmp/refactor-workspaces"),
            cpu_limit: 2.0,
            memory_limit: "2g".to_string(),
            git_depth: 1,
            clone_timeout: Duration::from_secs(300),
            exec_timeout: Duration::from_secs(120),
            ready_timeout: Duration::from_secs(30),
            max_file_size: 1024 * 1024,
            credentials_file: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub api_port: u16,
    pub agent_port: u16,
    pub cors_origin: String,
    pub log_level: String,
    pub database_url: String,
    pub agent_mode: AgentMode,
    pub agent_command: String,
    pub sandbox: SandboxDefaults,
    /// Host values forwarded into sandboxes at creation time
    pub sandbox_env: HashMap<String, String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let api_port = parse_port(REFIT_API_PORT, &get(REFIT_API_PORT, "8000"))?;
        let agent_port = parse_port(REFIT_AGENT_PORT, &get(REFIT_AGENT_PORT, "8000"))?;

        let defaults = SandboxDefaults::default();

        let cpu_limit = get(REFIT_CONTAINER_CPUS, "2.0")
            .parse::<f64>()
            .map_err(|source| ConfigError::InvalidFloat {
                name: REFIT_CONTAINER_CPUS,
                source,
            })?;
        if !cpu_limit.is_finite() || cpu_limit <= 0.0 {
            return Err(ConfigError::NotPositive {
                name: REFIT_CONTAINER_CPUS,
            });
        }

        let sandbox = SandboxDefaults {
            image: get(REFIT_DOCKER_IMAGE, &defaults.image),
            network: get(REFIT_DOCKER_NETWORK, &defaults.network),
            volume_prefix: PathBuf::from(get(
                REFIT_VOLUME_PREFIX,
                &defaults.volume_prefix.to_string_lossy(),
            )),
            cpu_limit,
            memory_limit: get(REFIT_CONTAINER_MEMORY, &defaults.memory_limit),
            git_depth: parse_positive(REFIT_GIT_DEPTH, &get(REFIT_GIT_DEPTH, "1"))? as u32,
            clone_timeout: Duration::from_secs(parse_positive(
                REFIT_GIT_CLONE_TIMEOUT,
                &get(REFIT_GIT_CLONE_TIMEOUT, "300"),
            )?),
            exec_timeout: Duration::from_secs(parse_positive(
                REFIT_EXEC_TIMEOUT,
                &get(REFIT_EXEC_TIMEOUT, "120"),
            )?),
            ready_timeout: Duration::from_secs(parse_positive(
                REFIT_READY_TIMEOUT,
                &get(REFIT_READY_TIMEOUT, "30"),
            )?),
            max_file_size: parse_positive(REFIT_MAX_FILE_SIZE, &get(REFIT_MAX_FILE_SIZE, "1048576"))?,
            credentials_file: lookup(REFIT_CREDENTIALS_FILE)
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        };

        let sandbox_env = SANDBOX_PASSTHROUGH_ENV
            .iter()
            .filter_map(|name| {
                lookup(name)
                    .filter(|v| !v.is_empty())
                    .map(|v| (name.to_string(), v))
            })
            .collect();

        Ok(Config {
            host: get(REFIT_HOST, "127.0.0.1"),
            api_port,
            agent_port,
            cors_origin: get(REFIT_CORS_ORIGIN, "http://localhost:5173"),
            log_level: get(REFIT_LOG_LEVEL, "info"),
            database_url: get(REFIT_DATABASE_URL, "sqlite:refit.db"),
            agent_mode: get(REFIT_AGENT_MODE, "remote").parse()?,
            agent_command: get(REFIT_AGENT_COMMAND, "refit-agent"),
            sandbox,
            sandbox_env,
        })
    }
}

fn parse_port(name: &'static str, value: &str) -> Result<u16, ConfigError> {
    let port = value
        .parse::<u16>()
        .map_err(|source| ConfigError::InvalidInteger { name, source })?;

    if port == 0 {
        return Err(ConfigError::PortOutOfRange(port));
    }

    Ok(port)
}

fn parse_positive(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    let parsed = value
        .parse::<u64>()
        .map_err(|source| ConfigError::InvalidInteger { name, source })?;

    if parsed == 0 {
        return Err(ConfigError::NotPositive { name });
    }

    Ok(parsed)
}
