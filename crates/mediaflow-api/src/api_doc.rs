//! OpenAPI documentation.

use utoipa::OpenApi;

use crate::error::ErrorResponse;
use crate::handlers;
use mediaflow_core::models;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Mediaflow API",
        version = "0.1.0",
        description = "Direct-to-storage media uploads with background HLS transcoding. All endpoints are versioned under /api/v0/."
    ),
    paths(
        handlers::uploads::init_upload,
        handlers::uploads::init_multipart_upload,
        handlers::complete::complete_upload,
        handlers::media::get_media,
        handlers::media::stream_media,
    ),
    components(schemas(
        models::InitUploadRequest,
        models::UploadPlan,
        models::InitLargeUploadRequest,
        models::MultipartUploadPlan,
        models::UploadedPart,
        models::CompleteUploadRequest,
        models::CompleteUploadResponse,
        models::MediaResponse,
        models::MediaStatus,
        models::RawLocation,
        ErrorResponse,
    )),
    tags(
        (name = "uploads", description = "Upload planning and completion"),
        (name = "media", description = "Media status and raw object access"),
    )
)]
pub struct ApiDoc;
