use crate::error::{ErrorResponse, HttpAppError, ValidatedJson};
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use mediaflow_core::models::{
    InitLargeUploadRequest, InitUploadRequest, MultipartUploadPlan, UploadPlan,
};
use std::sync::Arc;
use validator::Validate;

/// Create a Draft media item and a presigned URL for a single PUT
#[utoipa::path(
    post,
    path = "/api/v0/media/uploads",
    tag = "uploads",
    request_body = InitUploadRequest,
    responses(
        (status = 201, description = "Upload planned", body = UploadPlan),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 502, description = "Object store unavailable", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, request), fields(operation = "init_upload"))]
pub async fn init_upload(
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<InitUploadRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    request.validate().map_err(mediaflow_core::AppError::from)?;

    let plan = state
        .uploads
        .init_upload(request.extension.as_deref())
        .await?;

    Ok((StatusCode::CREATED, Json(plan)))
}

/// Create a Draft media item and a multipart upload plan
#[utoipa::path(
    post,
    path = "/api/v0/media/uploads/multipart",
    tag = "uploads",
    request_body = InitLargeUploadRequest,
    responses(
        (status = 201, description = "Multipart upload planned", body = MultipartUploadPlan),
        (status = 400, description = "Invalid size or extension", body = ErrorResponse),
        (status = 502, description = "Object store unavailable", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, request), fields(size = request.size, operation = "init_multipart_upload"))]
pub async fn init_multipart_upload(
    State(state): State<Arc<AppState>>,
    ValidatedJson(request): ValidatedJson<InitLargeUploadRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    request.validate().map_err(mediaflow_core::AppError::from)?;

    let plan = state
        .uploads
        .init_large_upload(request.size, request.extension.as_deref())
        .await?;

    Ok((StatusCode::CREATED, Json(plan)))
}
