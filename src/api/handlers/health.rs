use crate::AppState;
use axum::{Json, extract::State, response::IntoResponse};
use serde::Serialize;
use std::path::Path;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub tmp_dir: String,
    pub upload_dir: String,
    pub version: String,
}

async fn dir_status(path: &Path) -> &'static str {
    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_dir() => "available",
        _ => "unavailable",
    }
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "System health status", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let config = &state.uploads.config;
    let tmp_dir = dir_status(&config.tmp_dir).await;
    let upload_dir = dir_status(&config.upload_dir).await;

    let status = if tmp_dir == "available" && upload_dir == "available" {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        tmp_dir: tmp_dir.to_string(),
        upload_dir: upload_dir.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
