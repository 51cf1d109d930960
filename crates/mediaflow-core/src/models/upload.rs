use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use super::media::{MediaResponse, MediaStatus};

/// Request for a single-PUT upload plan
#[derive(Debug, Default, Deserialize, ToSchema, Validate)]
pub struct InitUploadRequest {
    /// Optional file extension hint (e.g. "mp4"), appended to the raw object key
    #[serde(default)]
    #[validate(length(max = 16, message = "Extension is too long"))]
    pub extension: Option<String>,
}

/// Single-PUT upload plan: the Draft record and where to PUT the bytes
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadPlan {
    pub media: MediaResponse,
    /// Presigned PUT URL for the raw object
    pub upload_url: String,
}

/// Request for a multipart upload plan
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct InitLargeUploadRequest {
    /// Total file size in bytes
    #[validate(range(min = 1, message = "File size must be at least 1 byte"))]
    pub size: i64,
    #[serde(default)]
    #[validate(length(max = 16, message = "Extension is too long"))]
    pub extension: Option<String>,
}

/// Multipart upload plan. `part_urls[i]` uploads part number `i + 1`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MultipartUploadPlan {
    pub media_id: Uuid,
    pub upload_id: String,
    /// Size of every part except possibly the last, in bytes
    pub part_size: u64,
    pub part_urls: Vec<String>,
}

/// A part the client uploaded, with the integrity tag the object store returned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct UploadedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Body of a completion call. Multipart uploads send both fields, single-PUT uploads neither.
#[derive(Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct CompleteUploadRequest {
    #[serde(default)]
    pub upload_id: Option<String>,
    #[serde(default)]
    pub parts: Option<Vec<UploadedPart>>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CompleteUploadResponse {
    pub id: Uuid,
    pub status: MediaStatus,
}
