use crate::error::UploadError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Upload failed: {0}")]
    Upload(#[from] UploadError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Upload(UploadError::PartSource(msg)) => (StatusCode::BAD_REQUEST, msg),
            AppError::Upload(UploadError::StreamFailure(e)) => {
                tracing::warn!("Upload stream failed: {}", e);
                (
                    StatusCode::BAD_REQUEST,
                    "Upload stream was interrupted".to_string(),
                )
            }
            AppError::Upload(e) => {
                tracing::error!("Upload error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let bad = AppError::Upload(UploadError::PartSource("boundary".into())).into_response();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

        let exhausted =
            AppError::Upload(UploadError::AllocationExhausted { attempts: 3 }).into_response();
        assert_eq!(exhausted.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let empty = AppError::BadRequest("No file provided".into()).into_response();
        assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
    }
}
