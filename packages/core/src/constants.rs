// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names read by Refit

// Server
pub const REFIT_API_PORT: &str = "REFIT_API_PORT";
pub const REFIT_AGENT_PORT: &str = "REFIT_AGENT_PORT";
pub const REFIT_HOST: &str = "REFIT_HOST";
pub const REFIT_CORS_ORIGIN: &str = "REFIT_CORS_ORIGIN";
pub const REFIT_LOG_LEVEL: &str = "REFIT_LOG_LEVEL";

// Persistence
pub const REFIT_DATABASE_URL: &str = "REFIT_DATABASE_URL";

// Sandbox runtime
pub const REFIT_DOCKER_IMAGE: &str = "REFIT_DOCKER_IMAGE";
pub const REFIT_DOCKER_NETWORK: &str = "REFIT_DOCKER_NETWORK";
pub const REFIT_VOLUME_PREFIX: &str = "REFIT_VOLUME_PREFIX";
pub const REFIT_CONTAINER_CPUS: &str = "REFIT_CONTAINER_CPUS";
pub const REFIT_CONTAINER_MEMORY: &str = "REFIT_CONTAINER_MEMORY";
pub const REFIT_GIT_CLONE_TIMEOUT: &str = "REFIT_GIT_CLONE_TIMEOUT";
pub const REFIT_GIT_DEPTH: &str = "REFIT_GIT_DEPTH";
pub const REFIT_EXEC_TIMEOUT: &str = "REFIT_EXEC_TIMEOUT";
pub const REFIT_READY_TIMEOUT: &str = "REFIT_READY_TIMEOUT";
pub const REFIT_MAX_FILE_SIZE: &str = "REFIT_MAX_FILE_SIZE";
pub const REFIT_CREDENTIALS_FILE: &str = "REFIT_CREDENTIALS_FILE";

// Agent execution
pub const REFIT_AGENT_MODE: &str = "REFIT_AGENT_MODE";
pub const REFIT_AGENT_COMMAND: &str = "REFIT_AGENT_COMMAND";

// Handed to in-process agents so they act on their project's sandbox
pub const REFIT_PROJECT_ID: &str = "REFIT_PROJECT_ID";
pub const REFIT_CONTAINER_ID: &str = "REFIT_CONTAINER_ID";
pub const REFIT_WORKSPACE: &str = "REFIT_WORKSPACE";

/// Variables forwarded into every sandbox at creation time when set on the host
pub const SANDBOX_PASSTHROUGH_ENV: &[&str] = &[
    "ANTHROPIC_API_KEY",
    "OPENAI_API_KEY",
    "GOOGLE_API_KEY",
    "POSTGRES_URL",
];

/// Path the credentials file is mounted at inside the sandbox
pub const SANDBOX_CREDENTIALS_PATH: &str = "/credentials/gcp.json";

/// Container name prefix; the project id is appended
pub const CONTAINER_NAME_PREFIX: &str = "refactor-project-";

/// Workspace root inside every sandbox
pub const WORKSPACE_ROOT: &str = "/workspace";

/// Default clone target and exec working directory
pub const REPO_DIR: &str = "/workspace/repo";
