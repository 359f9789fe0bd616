use axum::http::{header, HeaderValue};
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    middleware,
    response::Response,
    routing::{get, patch, post, put},
    Router,
};
use serde_json::Value;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::warn;

use crate::{config::StorageBackend, error::ErrorDetail, state::AppState};

pub mod documents;
pub mod facets;
pub mod health;
pub mod stats;

/// Room for the multipart envelope and text fields around the file.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = match state.config.cors_allowed_origin.as_ref() {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(_) => {
                        warn!(origin = value, "ignoring invalid CORS allowed origin");
                        None
                    }
                })
                .collect();
            CorsLayer::new().allow_origin(AllowOrigin::list(headers))
        }
        None => CorsLayer::new().allow_origin(AllowOrigin::mirror_request()),
    }
    .allow_methods(AllowMethods::mirror_request())
    .allow_headers(AllowHeaders::mirror_request())
    .allow_credentials(true);

    let body_limit = usize::try_from(state.config.max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    let documents_routes = Router::new()
        .route(
            "/",
            get(documents::list_documents).post(documents::upload_document),
        )
        .route(
            "/:id",
            get(documents::get_document)
                .patch(documents::update_document)
                .delete(documents::delete_document),
        )
        .route("/:id/file", put(documents::replace_document_file))
        .route("/:id/pin", patch(documents::toggle_pinned))
        .route("/:id/views", post(documents::record_view))
        .route("/:id/download", post(documents::record_download));

    let mut router = Router::new()
        .nest("/api/documents", documents_routes)
        .route("/api/stats", get(stats::get_stats))
        .route("/api/classes", get(facets::list_class_levels))
        .route("/api/subjects", get(facets::list_subjects))
        .route("/api/health", get(health::health_check))
        .layer(middleware::map_response_with_state(
            state.clone(),
            render_error_detail,
        ))
        .with_state(state.clone());

    if state.config.storage_backend == StorageBackend::Filesystem {
        router = router.nest_service("/files", ServeDir::new(&state.config.storage_root));
    }

    router
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
}

/// In development mode, folds the internal detail of a failed request into
/// its JSON body.
async fn render_error_detail(State(state): State<AppState>, response: Response) -> Response {
    if !state.config.expose_error_details {
        return response;
    }
    let Some(ErrorDetail(detail)) = response.extensions().get::<ErrorDetail>().cloned() else {
        return response;
    };

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return Response::from_parts(parts, Body::empty()),
    };

    let mut value: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(_) => return Response::from_parts(parts, Body::from(bytes)),
    };
    if let Value::Object(map) = &mut value {
        map.insert("detail".to_string(), Value::String(detail));
    }

    match serde_json::to_vec(&value) {
        Ok(body) => {
            parts.headers.remove(header::CONTENT_LENGTH);
            Response::from_parts(parts, Body::from(body))
        }
        Err(_) => Response::from_parts(parts, Body::from(bytes)),
    }
}
