//! Custom error types and handling
//!
//! This module defines the engine's error taxonomy and implements
//! conversion to HTTP responses for the Axum gateway.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

/// Engine-wide error type
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    // Request errors
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unknown runtime: {0}")]
    UnknownRuntime(String),

    // Lifecycle errors
    #[error("Engine stopped")]
    EngineStopped,

    #[error("Pool exhausted")]
    PoolExhausted,

    // Execution errors
    #[error("Package install failed with exit code {exit_code}: {stderr}")]
    PackageInstallFailed { exit_code: i32, stderr: String },

    #[error("Cleanup failed: {0}")]
    CleanupFailed(String),

    // External service errors
    #[error("Container runtime unavailable: {0}")]
    ContainerRuntimeUnavailable(String),

    #[error("Docker error: {0}")]
    Docker(String),

    // Gateway errors
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Not found")]
    NotFound,

    // Internal errors
    #[error("Internal error")]
    Internal(#[from] anyhow::Error),
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

/// Error details in response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

impl SandboxError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::UnknownRuntime(_) => "UNKNOWN_RUNTIME",
            Self::EngineStopped => "ENGINE_STOPPED",
            Self::PoolExhausted => "POOL_EXHAUSTED",
            Self::PackageInstallFailed { .. } => "PACKAGE_INSTALL_FAILED",
            Self::CleanupFailed(_) => "CLEANUP_FAILED",
            Self::ContainerRuntimeUnavailable(_) => "CONTAINER_RUNTIME_UNAVAILABLE",
            Self::Docker(_) => "DOCKER_ERROR",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::UnknownRuntime(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::PackageInstallFailed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::EngineStopped | Self::PoolExhausted => StatusCode::SERVICE_UNAVAILABLE,
            Self::CleanupFailed(_)
            | Self::ContainerRuntimeUnavailable(_)
            | Self::Docker(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SandboxError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Log internal errors but don't expose details to clients
        let message = match &self {
            SandboxError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                "An internal error occurred".to_string()
            }
            SandboxError::ContainerRuntimeUnavailable(e) => {
                tracing::error!("Container runtime unavailable: {}", e);
                "Container runtime unavailable".to_string()
            }
            SandboxError::Docker(e) => {
                tracing::error!("Docker error: {}", e);
                "A container runtime error occurred".to_string()
            }
            _ => self.to_string(),
        };

        let body = ErrorResponse {
            error: ErrorDetails {
                code: self.error_code().to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<bollard::errors::Error> for SandboxError {
    fn from(err: bollard::errors::Error) -> Self {
        SandboxError::Docker(err.to_string())
    }
}

/// Result type alias using SandboxError
pub type SandboxResult<T> = Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            SandboxError::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            SandboxError::UnknownRuntime("perl".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            SandboxError::Unauthorized.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(SandboxError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            SandboxError::Docker("exec failed".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            SandboxError::ContainerRuntimeUnavailable("no socket".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(SandboxError::EngineStopped.error_code(), "ENGINE_STOPPED");
        assert_eq!(
            SandboxError::ContainerRuntimeUnavailable("no socket".into()).error_code(),
            "CONTAINER_RUNTIME_UNAVAILABLE"
        );
        assert_eq!(
            SandboxError::PackageInstallFailed {
                exit_code: 1,
                stderr: String::new()
            }
            .error_code(),
            "PACKAGE_INSTALL_FAILED"
        );
    }
}
