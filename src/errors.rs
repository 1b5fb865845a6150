use crate::{
    handlers::tus_headers::{TUS_RESUMABLE, TUS_RESUMABLE_VALUE},
    services::{storage_service::StorageError, upload_service::UploadError},
};
use axum::{
    Json,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Non-standard status used by the tus checksum extension.
pub const CHECKSUM_MISMATCH: u16 = 460;

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

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
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

        let mut response = (self.status, body).into_response();
        response.headers_mut().insert(
            TUS_RESUMABLE,
            HeaderValue::from_static(TUS_RESUMABLE_VALUE),
        );
        response
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => AppError::not_found(err.to_string()),
            other => {
                tracing::error!("storage failure: {}", other);
                AppError::internal(other.to_string())
            }
        }
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        let status = match err {
            UploadError::StorageFailure(storage) => return storage.into(),
            UploadError::Database(ref db) => {
                tracing::error!("metadata store failure: {}", db);
                StatusCode::INTERNAL_SERVER_ERROR
            }
            UploadError::InvalidRequest(_)
            | UploadError::MetadataDecode(_)
            | UploadError::UnsupportedChecksumAlgorithm(_) => StatusCode::BAD_REQUEST,
            UploadError::NotFound(_) => StatusCode::NOT_FOUND,
            UploadError::SizeExceeded { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            UploadError::OffsetMismatch { .. } => StatusCode::CONFLICT,
            UploadError::Expired { .. } => StatusCode::GONE,
            UploadError::ChecksumMismatch => {
                StatusCode::from_u16(CHECKSUM_MISMATCH).unwrap_or(StatusCode::BAD_REQUEST)
            }
        };
        AppError::new(status, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn upload_errors_map_to_protocol_statuses() {
        let cases = [
            (UploadError::InvalidRequest("x".into()), 400),
            (UploadError::NotFound(1), 404),
            (UploadError::SizeExceeded { size: 2, limit: 1 }, 413),
            (UploadError::OffsetMismatch { expected: 0, claimed: 5 }, 409),
            (UploadError::ChecksumMismatch, 460),
            (UploadError::UnsupportedChecksumAlgorithm("crc".into()), 400),
            (
                UploadError::StorageFailure(StorageError::Io(io::Error::other("disk"))),
                500,
            ),
            (UploadError::StorageFailure(StorageError::NotFound(3)), 404),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status.as_u16(), status);
        }
    }

    #[test]
    fn error_responses_carry_tus_resumable() {
        let response = AppError::bad_request("nope").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[TUS_RESUMABLE], TUS_RESUMABLE_VALUE);
    }
}
