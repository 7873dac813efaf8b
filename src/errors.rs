use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use crate::services::error::VfsError;
use serde_json::json;
use std::fmt;
use tracing::error;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<VfsError> for AppError {
    fn from(err: VfsError) -> Self {
        let status = match &err {
            VfsError::InvalidPath(_) => StatusCode::BAD_REQUEST,
            e if e.is_not_found() => StatusCode::NOT_FOUND,
            VfsError::InvalidOperation(_) => StatusCode::CONFLICT,
            VfsError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            VfsError::Closed | VfsError::SessionAborted => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %err, "filesystem operation failed");
        }
        AppError::new(status, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::path_validator::PathError;

    #[test]
    fn maps_filesystem_errors_to_statuses() {
        let cases = [
            (VfsError::InvalidPath(PathError::Traversal("/a/..".into())), StatusCode::BAD_REQUEST),
            (VfsError::NotFound("/x".into()), StatusCode::NOT_FOUND),
            (VfsError::InvalidOperation("nope"), StatusCode::CONFLICT),
            (VfsError::FileTooLarge { size: 2, limit: 1 }, StatusCode::PAYLOAD_TOO_LARGE),
            (VfsError::SessionAborted, StatusCode::CONFLICT),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status, status);
        }
    }
}
