//! Route configuration and setup

use crate::api_doc::ApiDoc;
use crate::constants::{API_PREFIX, LOCAL_STORAGE_ROUTE};
use crate::handlers;
use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, HeaderValue, Method},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use mediaflow_core::Config;
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

/// Server-level cap on concurrently handled requests
const HTTP_CONCURRENCY_LIMIT: usize = 10_000;

pub fn setup_routes(state: Arc<AppState>) -> Router<()> {
    let cors = setup_cors(&state.config);
    let api_routes = Router::new()
        .route("/media/uploads", post(handlers::uploads::init_upload))
        .route(
            "/media/uploads/multipart",
            post(handlers::uploads::init_multipart_upload),
        )
        .route("/media/{id}", get(handlers::media::get_media))
        .route(
            "/media/{id}/complete",
            post(handlers::complete::complete_upload),
        )
        .route("/media/{id}/stream", get(handlers::media::stream_media))
        .route(
            &format!("{}/{{bucket}}/{{*key}}", LOCAL_STORAGE_ROUTE),
            put(handlers::local_storage::put_object),
        )
        .route("/openapi.json", get(openapi_spec));

    Router::new()
        .route("/health", get(health_check))
        .nest(API_PREFIX, api_routes)
        .layer(ConcurrencyLimitLayer::new(HTTP_CONCURRENCY_LIMIT))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Browsers PUT straight to presigned URLs, so PUT and the ETag header are exposed.
fn setup_cors(config: &Config) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([header::ETAG, header::RETRY_AFTER]);

    if config.cors_origins.iter().any(|origin| origin == "*") {
        if config.is_production() {
            tracing::warn!("CORS configured to allow all origins - not recommended for production");
        }
        cors.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        cors.allow_origin(origins)
    }
}

async fn openapi_spec() -> impl IntoResponse {
    Json(ApiDoc::openapi())
}

/// Liveness plus a view of the transcode backlog.
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "storage": state.storage.backend_type().to_string(),
        "record_store": state.config.record_store.to_string(),
        "transcodes_in_flight": state.dispatcher.in_flight_count(),
        "transcodes_running": state.transcode_slots.in_use(),
        "transcode_capacity": state.transcode_slots.capacity(),
    }))
}
