use crate::keys::{artifact_key, collect_artifacts};
use crate::traits::{ObjectStream, Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::retry::{RetryConfig, RetryMode};
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::get_object::GetObjectOutput;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use futures::StreamExt;
use mediaflow_core::models::UploadedPart;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

const DEFAULT_REGION: &str = "us-east-1";

/// S3 storage implementation (AWS or any S3-compatible provider such as MinIO)
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
}

impl S3Storage {
    /// Create a new S3Storage instance
    ///
    /// # Arguments
    /// * `region` - AWS region (or region identifier for S3-compatible providers)
    /// * `endpoint_url` - Optional custom endpoint URL for S3-compatible providers
    ///   (e.g., "http://localhost:9000" for MinIO)
    /// * `force_path_style` - Address buckets as `{endpoint}/{bucket}` instead of subdomains
    pub async fn new(
        region: Option<String>,
        endpoint_url: Option<String>,
        force_path_style: bool,
    ) -> StorageResult<Self> {
        let region = region.unwrap_or_else(|| DEFAULT_REGION.to_string());
        let region_provider = RegionProviderChain::first_try(aws_config::Region::new(region));

        let retry_config = RetryConfig::standard()
            .with_max_attempts(5)
            .with_retry_mode(RetryMode::Adaptive);

        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .retry_config(retry_config.clone())
            .load()
            .await;

        let client = if let Some(ref endpoint) = endpoint_url {
            let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&config)
                .endpoint_url(endpoint)
                .retry_config(retry_config);
            if force_path_style {
                s3_config_builder = s3_config_builder.force_path_style(true);
            }
            Client::from_conf(s3_config_builder.build())
        } else {
            Client::new(&config)
        };

        Ok(S3Storage { client })
    }

    fn presigning_config(expires_in: Duration) -> StorageResult<PresigningConfig> {
        PresigningConfig::builder()
            .expires_in(expires_in)
            .build()
            .map_err(|e| StorageError::PresignFailed(e.to_string()))
    }

    async fn fetch(&self, bucket: &str, key: &str) -> StorageResult<GetObjectOutput> {
        let start = std::time::Instant::now();

        self.client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match &e {
                SdkError::ServiceError(service_err)
                    if matches!(service_err.err(), GetObjectError::NoSuchKey(_)) =>
                {
                    StorageError::NotFound(format!("{}/{}", bucket, key))
                }
                _ => {
                    tracing::error!(
                        error = %e,
                        bucket = %bucket,
                        key = %key,
                        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                        "S3 get_object failed"
                    );
                    StorageError::DownloadFailed(e.to_string())
                }
            })
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        let presigned_request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .presigned(Self::presigning_config(expires_in)?)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, bucket = %bucket, key = %key, "S3 presign put failed");
                StorageError::PresignFailed(e.to_string())
            })?;

        Ok(presigned_request.uri().to_string())
    }

    async fn presign_upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        expires_in: Duration,
    ) -> StorageResult<String> {
        let part_number = i32::try_from(part_number)
            .map_err(|_| StorageError::PresignFailed(format!("part number {} out of range", part_number)))?;

        let presigned_request = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .presigned(Self::presigning_config(expires_in)?)
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %bucket,
                    key = %key,
                    part_number = part_number,
                    "S3 presign upload part failed"
                );
                StorageError::PresignFailed(e.to_string())
            })?;

        Ok(presigned_request.uri().to_string())
    }

    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> StorageResult<String> {
        let create_result = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %bucket,
                    key = %key,
                    "Failed to create multipart upload"
                );
                StorageError::BackendError(e.to_string())
            })?;

        let upload_id = create_result.upload_id().ok_or_else(|| {
            StorageError::BackendError("No upload ID returned from S3".to_string())
        })?;

        tracing::info!(bucket = %bucket, key = %key, upload_id = %upload_id, "S3 multipart upload created");

        Ok(upload_id.to_string())
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> StorageResult<()> {
        let start = std::time::Instant::now();

        let completed_parts = parts
            .iter()
            .map(|part| {
                CompletedPart::builder()
                    .part_number(part.part_number as i32)
                    .e_tag(part.etag.clone())
                    .build()
            })
            .collect::<Vec<_>>();

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %bucket,
                    key = %key,
                    upload_id = %upload_id,
                    "Failed to complete multipart upload"
                );
                match e {
                    SdkError::ServiceError(_) => StorageError::MultipartRejected(e.to_string()),
                    _ => StorageError::BackendError(e.to_string()),
                }
            })?;

        tracing::info!(
            bucket = %bucket,
            key = %key,
            parts = parts.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 multipart upload completed"
        );

        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectStream> {
        let response = self.fetch(bucket, key).await?;

        let size = response.content_length().and_then(|len| u64::try_from(len).ok());
        let content_type = response.content_type().map(String::from);

        let bucket = bucket.to_string();
        let key = key.to_string();
        let body = ReaderStream::new(response.body.into_async_read()).map(move |item| {
            item.map_err(|e| {
                tracing::error!(bucket = %bucket, key = %key, error = %e, "S3 stream read error");
                StorageError::DownloadFailed(e.to_string())
            })
        });

        Ok(ObjectStream {
            body: Box::pin(body),
            size,
            content_type,
        })
    }

    async fn download_to_file(&self, bucket: &str, key: &str, dest: &Path) -> StorageResult<u64> {
        let start = std::time::Instant::now();
        let response = self.fetch(bucket, key).await?;

        let mut reader = response.body.into_async_read();
        let mut file = tokio::fs::File::create(dest).await.map_err(|e| {
            StorageError::DownloadFailed(format!("Failed to create file {}: {}", dest.display(), e))
        })?;

        let bytes = tokio::io::copy(&mut reader, &mut file).await.map_err(|e| {
            StorageError::DownloadFailed(format!("Failed to write file {}: {}", dest.display(), e))
        })?;
        file.flush().await?;

        tracing::info!(
            bucket = %bucket,
            key = %key,
            size_bytes = bytes,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 download successful"
        );

        Ok(bytes)
    }

    async fn upload_files_from_folder(
        &self,
        bucket: &str,
        prefix: &str,
        folder: &Path,
        exclude: &[String],
    ) -> StorageResult<Vec<String>> {
        let start = std::time::Instant::now();
        let artifacts = collect_artifacts(folder, exclude).await?;
        let mut uploaded = Vec::with_capacity(artifacts.len());

        for artifact in artifacts {
            let key = artifact_key(prefix, &artifact.file_name);
            let body = ByteStream::from_path(&artifact.path)
                .await
                .map_err(|e| StorageError::UploadFailed(e.to_string()))?;

            self.client
                .put_object()
                .bucket(bucket)
                .key(&key)
                .content_type(artifact.content_type)
                .body(body)
                .send()
                .await
                .map_err(|e| {
                    tracing::error!(
                        error = %e,
                        bucket = %bucket,
                        key = %key,
                        "S3 upload failed"
                    );
                    StorageError::UploadFailed(e.to_string())
                })?;

            uploaded.push(key);
        }

        tracing::info!(
            bucket = %bucket,
            prefix = %prefix,
            files = uploaded.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 folder upload successful"
        );

        Ok(uploaded)
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::S3
    }
}
