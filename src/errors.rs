use crate::services::drive_service::DriveError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

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

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 401 Unauthorized
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }

    /// Shortcut for 403 Forbidden
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, msg)
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

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<DriveError> for AppError {
    fn from(err: DriveError) -> Self {
        let status = match &err {
            DriveError::FolderNotFound | DriveError::FileNotFound | DriveError::UserNotFound => {
                StatusCode::NOT_FOUND
            }
            DriveError::FolderNameTaken | DriveError::FileNameTaken => StatusCode::CONFLICT,
            DriveError::HomeFolderProtected => StatusCode::FORBIDDEN,
            DriveError::InvalidName | DriveError::InvalidSize => StatusCode::BAD_REQUEST,
            DriveError::StorageLimitExceeded => StatusCode::PRECONDITION_FAILED,
            DriveError::UnsupportedFileType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            DriveError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            DriveError::BlobStore(_) | DriveError::Sqlx(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // internal failures keep their details in the log, not the response
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("request failed: {err}");
            return AppError::internal("internal error");
        }
        AppError::new(status, err.to_string())
    }
}
