//! Upload planning: allocate a media id, create its `Draft` record and hand
//! back presigned URLs. No media bytes pass through here.

use mediaflow_core::config::{UploadConfig, MAX_MULTIPART_PARTS};
use mediaflow_core::models::{MultipartUploadPlan, UploadPlan};
use mediaflow_core::{AppError, Media, RawLocation};
use mediaflow_db::MediaRecordStore;
use mediaflow_storage::keys::raw_object_key;
use mediaflow_storage::Storage;
use std::sync::Arc;
use uuid::Uuid;

const MAX_EXTENSION_LEN: usize = 8;

/// Normalize a client extension hint to `.ext`.
///
/// Accepts `mp4`, `.MP4` and the like. Empty hints mean no extension.
pub fn normalize_extension(hint: Option<&str>) -> Result<Option<String>, AppError> {
    let Some(raw) = hint else {
        return Ok(None);
    };
    let ext = raw.trim().trim_start_matches('.');
    if ext.is_empty() {
        return Ok(None);
    }
    if ext.len() > MAX_EXTENSION_LEN || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(AppError::InvalidArgument(format!(
            "Invalid extension '{}': expected up to {} letters or digits",
            raw, MAX_EXTENSION_LEN
        )));
    }
    Ok(Some(format!(".{}", ext.to_ascii_lowercase())))
}

/// Number of parts needed to upload `size` bytes in `part_size` chunks.
pub fn part_count(size: u64, part_size: u64) -> u64 {
    size.div_ceil(part_size)
}

#[derive(Clone)]
pub struct UploadCoordinator {
    storage: Arc<dyn Storage>,
    records: Arc<dyn MediaRecordStore>,
    config: UploadConfig,
}

impl UploadCoordinator {
    pub fn new(
        storage: Arc<dyn Storage>,
        records: Arc<dyn MediaRecordStore>,
        config: UploadConfig,
    ) -> Self {
        Self {
            storage,
            records,
            config,
        }
    }

    fn raw_location(&self, id: Uuid, extension: Option<&str>) -> RawLocation {
        RawLocation {
            bucket: self.config.raw_bucket.clone(),
            object: raw_object_key(&self.config.media_folder, id, extension),
        }
    }

    /// Plan a single-PUT upload.
    ///
    /// The record is written before the URL is issued. A failed insert burns
    /// the id; it is never retried under the same id.
    #[tracing::instrument(skip(self))]
    pub async fn init_upload(&self, extension: Option<&str>) -> Result<UploadPlan, AppError> {
        let extension = normalize_extension(extension)?;
        let id = Uuid::new_v4();
        let media = Media::draft(id, self.raw_location(id, extension.as_deref()));

        self.records.insert(&media).await.map_err(|e| {
            tracing::error!(media_id = %id, error = %e, "Failed to insert draft media");
            AppError::PersistenceError(e.to_string())
        })?;

        let upload_url = self
            .storage
            .presign_put(
                &media.raw.bucket,
                &media.raw.object,
                self.config.single_put_url_expiry,
            )
            .await
            .map_err(|e| {
                tracing::error!(media_id = %id, error = %e, "Failed to presign upload URL");
                AppError::StorageUnavailable(e.to_string())
            })?;

        tracing::info!(
            media_id = %id,
            bucket = %media.raw.bucket,
            key = %media.raw.object,
            "Upload planned"
        );

        Ok(UploadPlan {
            media: media.into(),
            upload_url,
        })
    }

    /// Plan a multipart upload of `size` bytes.
    ///
    /// The multipart session is opened and every part URL issued before the
    /// record is written. If a part URL cannot be issued the session is left
    /// behind and nothing is returned.
    #[tracing::instrument(skip(self))]
    pub async fn init_large_upload(
        &self,
        size: i64,
        extension: Option<&str>,
    ) -> Result<MultipartUploadPlan, AppError> {
        if size <= 0 {
            return Err(AppError::InvalidArgument(format!(
                "File size must be positive, got {}",
                size
            )));
        }

        let part_size = self.config.part_size;
        let parts = part_count(size as u64, part_size);
        if parts > MAX_MULTIPART_PARTS {
            return Err(AppError::InvalidArgument(format!(
                "File of {} bytes needs {} parts, more than the {} allowed",
                size, parts, MAX_MULTIPART_PARTS
            )));
        }

        let extension = normalize_extension(extension)?;
        let id = Uuid::new_v4();
        let media = Media::draft(id, self.raw_location(id, extension.as_deref()));
        let (bucket, key) = (&media.raw.bucket, &media.raw.object);

        let upload_id = self
            .storage
            .create_multipart_upload(bucket, key)
            .await
            .map_err(|e| {
                tracing::error!(media_id = %id, error = %e, "Failed to start multipart upload");
                AppError::StorageUnavailable(e.to_string())
            })?;

        let mut part_urls = Vec::with_capacity(parts as usize);
        for part_number in 1..=parts as u32 {
            let url = self
                .storage
                .presign_upload_part(bucket, key, &upload_id, part_number, self.config.part_url_expiry)
                .await
                .map_err(|e| {
                    tracing::error!(
                        media_id = %id,
                        upload_id = %upload_id,
                        part_number = part_number,
                        error = %e,
                        "Failed to presign part URL, abandoning multipart session"
                    );
                    AppError::StorageUnavailable(e.to_string())
                })?;
            part_urls.push(url);
        }

        self.records.insert(&media).await.map_err(|e| {
            tracing::error!(media_id = %id, error = %e, "Failed to insert draft media");
            AppError::PersistenceError(e.to_string())
        })?;

        tracing::info!(
            media_id = %id,
            upload_id = %upload_id,
            size_bytes = size,
            parts = parts,
            "Multipart upload planned"
        );

        Ok(MultipartUploadPlan {
            media_id: id,
            upload_id,
            part_size,
            part_urls,
        })
    }
}
