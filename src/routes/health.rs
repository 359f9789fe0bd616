use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::json;

use crate::{config::StorageBackend, state::AppState};

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let storage = match state.config.storage_backend {
        StorageBackend::S3 => "s3",
        StorageBackend::Filesystem => "filesystem",
    };
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "storage": storage })),
    )
}
