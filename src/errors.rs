use crate::services::{share_service::ShareError, transfer_service::TransferError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
///
/// `detail` carries optional structured context (e.g. the missing-chunk list
/// of a failed merge) that clients need to act on the error.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub detail: Option<serde_json::Value>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            detail: None,
        }
    }

    /// Attach structured detail to the error body.
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
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
        let mut body = json!({
            "error": self.message,
            "status": self.status.as_u16()
        });
        if let (Some(obj), Some(detail)) = (body.as_object_mut(), self.detail) {
            if let Some(extra) = detail.as_object() {
                for (k, v) in extra {
                    obj.insert(k.clone(), v.clone());
                }
            }
        }

        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<TransferError> for AppError {
    fn from(err: TransferError) -> Self {
        let message = err.to_string();
        match err {
            TransferError::InvalidArgument(_)
            | TransferError::ChunkOutOfRange { .. }
            | TransferError::NotCompleted => AppError::bad_request(message),
            TransferError::IncompleteUpload(missing) => AppError::bad_request(message)
                .with_detail(json!({ "missing_chunks": missing })),
            TransferError::FileNotFound(_) | TransferError::ArtifactMissing => {
                AppError::not_found(message)
            }
            TransferError::Sqlx(_) | TransferError::Io(_) => AppError::internal(message),
        }
    }
}

impl From<ShareError> for AppError {
    fn from(err: ShareError) -> Self {
        let message = err.to_string();
        match err {
            ShareError::LinkNotFound | ShareError::FileNotFound(_) => AppError::not_found(message),
            ShareError::NotReady => AppError::bad_request(message),
            ShareError::Expired | ShareError::QuotaExceeded => {
                AppError::new(StatusCode::FORBIDDEN, message)
            }
            ShareError::WrongPassword => AppError::new(StatusCode::UNAUTHORIZED, message),
            ShareError::ArtifactMissing => AppError::not_found(message),
            ShareError::Sqlx(_) | ShareError::Io(_) => AppError::internal(message),
        }
    }
}
