use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Failure of a single capability handler invocation.
///
/// Handlers only return these; the dispatcher decides whether a failure is
/// logged, degraded to a fallback reply, or reported as an `error` event.
#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Path escapes the workspace root: {0}")]
    PathEscape(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Command not allowed: {0}")]
    Disallowed(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Delimiters not found in document")]
    ExtractionMiss,

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Language model runtime unavailable: {0}")]
    Upstream(String),

    #[error("Operation timed out after {0}s")]
    Timeout(u64),
}

impl CapabilityError {
    /// Stable identifier sent to clients in `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            CapabilityError::NotFound(_) => "NOT_FOUND",
            CapabilityError::PathEscape(_) => "PATH_ESCAPE",
            CapabilityError::InvalidPath(_) => "INVALID_PATH",
            CapabilityError::Io(_) => "IO_ERROR",
            CapabilityError::Disallowed(_) => "DISALLOWED",
            CapabilityError::InvalidArgument(_) => "INVALID_ARGUMENT",
            CapabilityError::ExtractionMiss => "EXTRACTION_MISS",
            CapabilityError::Fetch(_) => "FETCH_FAILED",
            CapabilityError::Upstream(_) => "UPSTREAM_UNAVAILABLE",
            CapabilityError::Timeout(_) => "TIMEOUT",
        }
    }
}

impl From<reqwest::Error> for CapabilityError {
    fn from(err: reqwest::Error) -> Self {
        CapabilityError::Fetch(err.to_string())
    }
}

/// Errors surfaced by the HTTP gateway routes.
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Path is outside root directory")]
    PathTraversal,

    #[error("File too large: {size} bytes exceeds limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CapabilityError> for HttpError {
    fn from(err: CapabilityError) -> Self {
        match err {
            CapabilityError::NotFound(path) => HttpError::NotFound(path),
            CapabilityError::PathEscape(_) => HttpError::PathTraversal,
            CapabilityError::Io(e) => HttpError::Io(e),
            other => HttpError::BadRequest(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            HttpError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            HttpError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            HttpError::PathTraversal => (StatusCode::FORBIDDEN, "PATH_TRAVERSAL"),
            HttpError::FileTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "FILE_TOO_LARGE"),
            HttpError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code,
        };

        (status, Json(body)).into_response()
    }
}
