use crate::AppState;
use crate::api::error::AppError;
use crate::api::multipart::MultipartParts;
use crate::services::batch::UploadBatch;
use axum::{
    Json,
    extract::{Multipart, State},
};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct UploadResponse {
    /// One `{digest}/{name}` reference per file, in upload order.
    pub urls: Vec<String>,
}

#[utoipa::path(
    post,
    path = "/upload",
    request_body(content = Multipart, description = "One or more files"),
    responses(
        (status = 200, description = "All files stored", body = UploadResponse),
        (status = 400, description = "Malformed body or no file provided"),
        (status = 500, description = "A file could not be stored")
    ),
    tag = "files"
)]
pub async fn upload_files(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut batch = UploadBatch::new(state.uploads.clone());
    let urls = batch.run(MultipartParts::new(multipart)).await?;

    if urls.is_empty() {
        return Err(AppError::BadRequest("No file provided".to_string()));
    }

    Ok(Json(UploadResponse { urls }))
}
