// ABOUTME: Application error type shared by every HTTP handler
// ABOUTME: Maps domain errors to status codes, machine-readable codes, and a uniform JSON body

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use refit_projects::{OrchestratorError, StorageError};
use refit_relay::ServiceError;
use refit_sandbox::RuntimeError;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

/// Main application error type that all handlers return
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),

    #[error(transparent)]
    Project(#[from] OrchestratorError),

    #[error(transparent)]
    Task(#[from] ServiceError),
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: ErrorDetail,
    request_id: String,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    fn to_status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            AppError::Project(err) => match err {
                OrchestratorError::Storage(StorageError::NotFound) => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND")
                }
                OrchestratorError::Storage(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR")
                }
                OrchestratorError::Runtime(runtime) => match runtime {
                    RuntimeError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                    RuntimeError::ContainerNotFound(_) => {
                        (StatusCode::NOT_FOUND, "CONTAINER_NOT_FOUND")
                    }
                    RuntimeError::PathNotFound(_) => (StatusCode::NOT_FOUND, "PATH_NOT_FOUND"),
                    RuntimeError::NotAFile(_) => (StatusCode::BAD_REQUEST, "NOT_A_FILE"),
                    RuntimeError::FileTooLarge { .. } => {
                        (StatusCode::BAD_REQUEST, "FILE_TOO_LARGE")
                    }
                    RuntimeError::Timeout { .. } => {
                        (StatusCode::GATEWAY_TIMEOUT, "RUNTIME_TIMEOUT")
                    }
                    RuntimeError::CommandFailed { .. }
                    | RuntimeError::Io(_)
                    | RuntimeError::Parse(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "RUNTIME_FAILURE")
                    }
                },
                OrchestratorError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                OrchestratorError::PermissionDenied(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
                OrchestratorError::InvalidStateTransition(_) => {
                    (StatusCode::BAD_REQUEST, "INVALID_STATE")
                }
                OrchestratorError::NotProvisioned(_) => {
                    (StatusCode::BAD_REQUEST, "NOT_PROVISIONED")
                }
                OrchestratorError::AgentDirectoryDenied => {
                    (StatusCode::FORBIDDEN, "AGENT_DIRECTORY_DENIED")
                }
                OrchestratorError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            },
            AppError::Task(err) => match err {
                ServiceError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                ServiceError::InvalidState(_) => (StatusCode::BAD_REQUEST, "INVALID_STATE"),
                ServiceError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                ServiceError::Unavailable(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "AGENT_UNAVAILABLE")
                }
                ServiceError::Upstream { .. } => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            },
        }
    }

    /// Message safe to show to clients; storage and internal details stay in the log
    fn to_user_message(&self) -> String {
        match self {
            AppError::Validation(msg) => format!("Validation failed: {}", msg),
            AppError::Internal(_) => "An internal server error occurred".to_string(),
            AppError::Project(OrchestratorError::Storage(StorageError::NotFound)) => {
                "Project not found".to_string()
            }
            AppError::Project(OrchestratorError::Storage(_)) => "Data storage error".to_string(),
            AppError::Project(err) => err.to_string(),
            AppError::Task(err) => err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();
        let (status_code, error_code) = self.to_status_and_code();
        let user_message = self.to_user_message();

        if status_code.is_server_error() {
            error!(
                request_id = %request_id,
                error_code = %error_code,
                error = ?self,
                "Request failed"
            );
        } else {
            info!(
                request_id = %request_id,
                error_code = %error_code,
                error = %self,
                "API error response"
            );
        }

        let body = ErrorResponse {
            success: false,
            error: ErrorDetail {
                code: error_code.to_string(),
                message: user_message,
            },
            request_id,
        };

        (status_code, Json(body)).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status(err: AppError) -> (StatusCode, &'static str) {
        err.to_status_and_code()
    }

    #[test]
    fn test_project_error_mapping() {
        assert_eq!(
            status(OrchestratorError::NotProvisioned("p1".into()).into()),
            (StatusCode::BAD_REQUEST, "NOT_PROVISIONED")
        );
        assert_eq!(
            status(OrchestratorError::AgentDirectoryDenied.into()),
            (StatusCode::FORBIDDEN, "AGENT_DIRECTORY_DENIED")
        );
        assert_eq!(
            status(OrchestratorError::PermissionDenied("p1".into()).into()),
            (StatusCode::FORBIDDEN, "FORBIDDEN")
        );
        assert_eq!(
            status(
                OrchestratorError::Runtime(RuntimeError::Timeout {
                    operation: "git clone".into(),
                    timeout_secs: 300,
                })
                .into()
            ),
            (StatusCode::GATEWAY_TIMEOUT, "RUNTIME_TIMEOUT")
        );
        assert_eq!(
            status(
                OrchestratorError::Runtime(RuntimeError::CommandFailed {
                    operation: "docker create".into(),
                    code: Some(125),
                    message: "no such image".into(),
                })
                .into()
            ),
            (StatusCode::INTERNAL_SERVER_ERROR, "RUNTIME_FAILURE")
        );
    }

    #[test]
    fn test_task_error_mapping() {
        assert_eq!(
            status(ServiceError::InvalidState("Cannot stop".into()).into()),
            (StatusCode::BAD_REQUEST, "INVALID_STATE")
        );
        assert_eq!(
            status(ServiceError::Unavailable("connection refused".into()).into()),
            (StatusCode::SERVICE_UNAVAILABLE, "AGENT_UNAVAILABLE")
        );
    }

    #[test]
    fn test_storage_details_are_hidden() {
        let err = AppError::Project(OrchestratorError::Storage(StorageError::InvalidStatus(
            "row 7 status=BOGUS".into(),
        )));
        assert_eq!(err.to_user_message(), "Data storage error");
    }
}
