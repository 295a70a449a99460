use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// The upload stream could not be read to completion. No digest exists for it.
    #[error("Hash computation failed: {0}")]
    HashComputationFailed(String),

    /// Another writer registered an original for this hash first.
    #[error("Lost race to register original for hash {0}")]
    DuplicateRaceLost(String),

    #[error("Blob write failed: {0}")]
    BlobWriteFailed(String),

    #[error("Blob delete failed: {0}")]
    BlobDeleteFailed(String),

    #[error("Reference count underflow on {0}")]
    ReferenceUnderflow(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            message: "success".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, message: &str) -> ApiResponse<()> {
        ApiResponse {
            code,
            message: message.to_string(),
            data: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, 500, "Database error".to_string())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, 404, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, 400, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, 409, msg.clone()),
            AppError::HashComputationFailed(msg) => {
                tracing::warn!("Hash computation failed: {}", msg);
                (StatusCode::UNPROCESSABLE_ENTITY, 422, format!("Unable to process file: {}", msg))
            }
            AppError::BlobWriteFailed(msg) => {
                tracing::error!("Blob write failed: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, 500, "File upload failed".to_string())
            }
            AppError::Internal(_)
            | AppError::Storage(_)
            | AppError::DuplicateRaceLost(_)
            | AppError::BlobDeleteFailed(_)
            | AppError::ReferenceUnderflow(_) => {
                tracing::error!("{}", self);
                (StatusCode::INTERNAL_SERVER_ERROR, 500, "Internal error".to_string())
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, 500, "IO error".to_string())
            }
        };

        let body = Json(ApiResponse::<()>::error(code, &message));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
