use crate::services::{document_service::DocumentError, object_store::StoreError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// HTTP-facing error: a status, a machine-readable code and a safe message.
///
/// Internal details never reach the response body; they are logged when the
/// error is built from a service error.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status, code and message.
    pub fn new(status: StatusCode, code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: msg.into(),
        }
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(code: &'static str, msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, msg)
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "internal server error",
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "code": self.code,
                "message": self.message,
            },
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<DocumentError> for AppError {
    fn from(err: DocumentError) -> Self {
        match err {
            DocumentError::IdRequired => Self::bad_request("ID_REQUIRED", "id is required"),
            DocumentError::ReaderRequired => Self::bad_request("FILE_REQUIRED", "file is required"),
            DocumentError::NotFound => {
                Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", "document not found")
            }
            DocumentError::UploadFailed(ref source) => {
                tracing::error!(error = %source, "upload to object store failed");
                Self::new(StatusCode::BAD_GATEWAY, "UPLOAD_FAILED", "could not store file")
            }
            DocumentError::MetadataPersistFailed(ref source) => {
                tracing::error!(error = %source, "metadata save failed; blob rolled back");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "METADATA_PERSIST_FAILED",
                    "could not save document metadata",
                )
            }
            DocumentError::RollbackFailed {
                ref key,
                ref persist,
                ref rollback,
            } => {
                tracing::error!(
                    key = %key,
                    persist_error = %persist,
                    rollback_error = %rollback,
                    "metadata save failed and rollback delete failed; orphaned blob needs manual cleanup"
                );
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "ROLLBACK_FAILED",
                    "could not save document metadata",
                )
            }
            DocumentError::StorageDeleteFailed(ref source) => {
                tracing::error!(error = %source, "object store delete failed; metadata kept");
                Self::new(
                    StatusCode::BAD_GATEWAY,
                    "STORAGE_DELETE_FAILED",
                    "could not delete file, retry later",
                )
            }
            other => {
                tracing::error!(error = %other, "document operation failed");
                Self::internal()
            }
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidSignature => {
                Self::new(StatusCode::FORBIDDEN, "INVALID_SIGNATURE", "invalid signature")
            }
            StoreError::Expired => Self::new(StatusCode::FORBIDDEN, "LINK_EXPIRED", "link expired"),
            StoreError::NotFound(_) | StoreError::InvalidKey(_) => {
                Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", "resource not found")
            }
            other => {
                tracing::error!(error = %other, "object store failure");
                Self::internal()
            }
        }
    }
}
