use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::paths::PathError;
use crate::runner::RunnerError;
use crate::watcher::WatchError;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    AccessDenied(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Too many requests, retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    #[error("{message}")]
    Process { code: &'static str, message: String },

    #[error("{0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::NotADirectory(_) => StatusCode::BAD_REQUEST,
            Self::AccessDenied(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Process { .. } | Self::Config(_) | Self::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::AccessDenied(_) => "ACCESS_DENIED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::NotADirectory(_) => "NOT_A_DIRECTORY",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Process { code, .. } => code,
            Self::Config(_) => "CONFIG_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }
}

impl From<PathError> for BridgeError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::Invalid(_) => Self::Validation(err.to_string()),
            PathError::AccessDenied(_) => Self::AccessDenied(err.to_string()),
            PathError::NotFound(_) => Self::NotFound(err.to_string()),
            PathError::NotADirectory(path) => Self::NotADirectory(path),
        }
    }
}

impl From<WatchError> for BridgeError {
    fn from(err: WatchError) -> Self {
        match err {
            WatchError::Path(err) => err.into(),
            WatchError::InvalidRequest(msg) => Self::Validation(msg),
            WatchError::NotFound(_) => Self::NotFound(err.to_string()),
            WatchError::Notify(_) => Self::Io(std::io::Error::other(err.to_string())),
            WatchError::Io(err) => Self::Io(err),
        }
    }
}

impl From<RunnerError> for BridgeError {
    fn from(err: RunnerError) -> Self {
        match err {
            RunnerError::InvalidInput(msg) => Self::Validation(msg),
            RunnerError::Scope(err) => err.into(),
            RunnerError::MissingCredential(_) => Self::Config(err.to_string()),
            RunnerError::Spawn(_) => Self::Process {
                code: "SPAWN_FAILED",
                message: err.to_string(),
            },
            RunnerError::Timeout(_) => Self::Process {
                code: "PROCESS_TIMEOUT",
                message: err.to_string(),
            },
            RunnerError::Failed { .. } => Self::Process {
                code: "PROCESS_ERROR",
                message: err.to_string(),
            },
        }
    }
}

impl From<JsonRejection> for BridgeError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("Invalid JSON: {err}"))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    code: &'static str,
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        let retry_after = match &self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };

        let body = ErrorResponse {
            success: false,
            error: self.to_string(),
            code: self.error_code(),
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
