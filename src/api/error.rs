use crate::services::error::UploadError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("Bad Request: {0}")]
    BadRequest(String),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Upload(e) => match e {
                UploadError::DuplicateName(_) | UploadError::SessionClosed(_) => {
                    StatusCode::CONFLICT
                }
                UploadError::NotFound(_) => StatusCode::NOT_FOUND,
                UploadError::InvalidFilename(_) => StatusCode::BAD_REQUEST,
                UploadError::ChunkTooLarge { .. } | UploadError::FileTooLarge { .. } => {
                    StatusCode::PAYLOAD_TOO_LARGE
                }
                UploadError::Storage { .. } | UploadError::Finalize { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AppError::Upload(e) => e.code(),
            AppError::BadRequest(_) => "BAD_REQUEST",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let message = match &self {
            AppError::Upload(e @ (UploadError::Storage { .. } | UploadError::Finalize { .. })) => {
                tracing::error!("Upload failed: {}", e);
                match e {
                    UploadError::Finalize { .. } => "Upload could not be committed".to_string(),
                    _ => "Upload could not be stored".to_string(),
                }
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": message,
            "code": code,
        }));

        (status, body).into_response()
    }
}
