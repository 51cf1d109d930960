use crate::error::{ErrorResponse, HttpAppError};
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use mediaflow_core::models::MediaResponse;
use std::sync::Arc;
use uuid::Uuid;

/// Get a media item and its current status
#[utoipa::path(
    get,
    path = "/api/v0/media/{id}",
    tag = "media",
    params(("id" = Uuid, Path, description = "Media ID")),
    responses(
        (status = 200, description = "Media found", body = MediaResponse),
        (status = 404, description = "Media not found", body = ErrorResponse)
    )
)]
pub async fn get_media(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpAppError> {
    let media = state.records.find_by_id(id).await?;
    Ok(Json(MediaResponse::from(media)))
}

/// Stream the raw uploaded object
#[utoipa::path(
    get,
    path = "/api/v0/media/{id}/stream",
    tag = "media",
    params(("id" = Uuid, Path, description = "Media ID")),
    responses(
        (status = 200, description = "Raw object bytes"),
        (status = 404, description = "Media or object not found", body = ErrorResponse),
        (status = 502, description = "Object store unavailable", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state), fields(media_id = %id))]
pub async fn stream_media(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Response, HttpAppError> {
    let media = state.records.find_by_id(id).await?;
    let object = state
        .storage
        .get_object(&media.raw.bucket, &media.raw.object)
        .await?;

    let content_type = object
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
        .unwrap_or(HeaderValue::from_static("application/octet-stream"));

    let mut response = Body::from_stream(object.body).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    if let Some(size) = object.size {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    }
    Ok(response)
}
