use crate::error::{ErrorResponse, HttpAppError, ValidatedJson};
use crate::services::MultipartCompletion;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use mediaflow_core::models::{CompleteUploadRequest, CompleteUploadResponse};
use std::sync::Arc;
use uuid::Uuid;

/// Mark an upload as finished and queue its transcode
///
/// Safe to retry: a media item that already left `Draft` is returned as is.
#[utoipa::path(
    post,
    path = "/api/v0/media/{id}/complete",
    tag = "uploads",
    params(("id" = Uuid, Path, description = "Media ID")),
    request_body = CompleteUploadRequest,
    responses(
        (status = 202, description = "Transcode queued or already handled", body = CompleteUploadResponse),
        (status = 400, description = "Invalid multipart metadata", body = ErrorResponse),
        (status = 404, description = "Media not found", body = ErrorResponse),
        (status = 409, description = "Multipart merge rejected", body = ErrorResponse),
        (status = 503, description = "Transcode queue full, retry later", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, request), fields(media_id = %id, operation = "complete_upload"))]
pub async fn complete_upload(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    ValidatedJson(request): ValidatedJson<CompleteUploadRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    let multipart = MultipartCompletion::from_request(request)?;
    let response = state.completion.complete_upload(id, multipart).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}
