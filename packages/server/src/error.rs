use std::fmt;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::storage::StorageError;
use sea_orm::DbErr;
use serde::Serialize;

/// Structured error response body.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

/// Application-level error type.
#[derive(Debug)]
pub enum AppError {
    /// Malformed input: unparseable ticket, empty type_key, bad filename.
    Validation(String),
    /// The gateway-supplied permission set does not cover this operation.
    PermissionDenied,
    /// Entity or object missing.
    NotFound(String),
    /// Precondition failed, e.g. overwriting an ACTIVE version.
    Conflict(String),
    /// No blob store configured; upload and bundle APIs fail fast.
    StorageUnavailable,
    /// Retriable backend failure (blob store or broker).
    Transient(String),
    Internal(String),
}

impl AppError {
    fn status_and_body(self) -> (StatusCode, ErrorBody) {
        match self {
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "VALIDATION_ERROR",
                    message: msg,
                },
            ),
            AppError::PermissionDenied => (
                StatusCode::FORBIDDEN,
                ErrorBody {
                    code: "PERMISSION_DENIED",
                    message: "Insufficient permissions".into(),
                },
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    code: "NOT_FOUND",
                    message: msg,
                },
            ),
            AppError::Conflict(msg) => (
                StatusCode::CONFLICT,
                ErrorBody {
                    code: "CONFLICT",
                    message: msg,
                },
            ),
            AppError::StorageUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorBody {
                    code: "STORAGE_UNAVAILABLE",
                    message: "Blob storage is not configured or unreachable".into(),
                },
            ),
            AppError::Transient(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorBody {
                    code: "TRANSIENT",
                    message: msg,
                },
            ),
            AppError::Internal(detail) => {
                tracing::error!("Internal error: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        code: "INTERNAL_ERROR",
                        message: "An unexpected error occurred".into(),
                    },
                )
            }
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(msg) => write!(f, "validation error: {msg}"),
            AppError::PermissionDenied => write!(f, "permission denied"),
            AppError::NotFound(msg) => write!(f, "not found: {msg}"),
            AppError::Conflict(msg) => write!(f, "conflict: {msg}"),
            AppError::StorageUnavailable => write!(f, "storage unavailable"),
            AppError::Transient(msg) => write!(f, "transient error: {msg}"),
            AppError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();
        (status, Json(body)).into_response()
    }
}

impl From<DbErr> for AppError {
    fn from(err: DbErr) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => AppError::NotFound(format!("object not found: {key}")),
            StorageError::InvalidKey(_)
            | StorageError::SizeMismatch { .. }
            | StorageError::Unsupported(_) => AppError::Validation(err.to_string()),
            StorageError::UploadNotFound(_) => AppError::NotFound(err.to_string()),
            StorageError::Io(_) => AppError::Transient(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}
