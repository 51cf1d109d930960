//! Storage abstraction trait
//!
//! This module defines the Storage trait that all object store backends must implement.

use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use mediaflow_core::models::UploadedPart;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Presign failed: {0}")]
    PresignFailed(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    /// The store refused to merge the parts (missing part, bad tag, unknown session)
    #[error("Multipart upload rejected: {0}")]
    MultipartRejected(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Invalid or expired signature: {0}")]
    InvalidSignature(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Chunked object body
pub type ObjectBody = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// A streamed object read together with its metadata
pub struct ObjectStream {
    pub body: ObjectBody,
    pub size: Option<u64>,
    pub content_type: Option<String>,
}

impl std::fmt::Debug for ObjectStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStream")
            .field("size", &self.size)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Object store abstraction
///
/// Clients upload bytes straight to the store through presigned URLs; the
/// server side only coordinates sessions, reads raw objects back and
/// publishes processed artifacts.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Presigned URL for a single-object PUT.
    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<String>;

    /// Presigned URL for uploading one part of a multipart session.
    async fn presign_upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        expires_in: Duration,
    ) -> StorageResult<String>;

    /// Start a multipart session and return its upload id.
    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> StorageResult<String>;

    /// Merge the uploaded parts into the final object.
    ///
    /// Returns `MultipartRejected` when the store refuses the merge.
    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> StorageResult<()>;

    /// Open a streamed read of an object.
    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectStream>;

    /// Download an object to a local file and return the number of bytes written.
    async fn download_to_file(&self, bucket: &str, key: &str, dest: &Path) -> StorageResult<u64>;

    /// Upload every HLS artifact (`.m3u8`, `.ts`) directly inside `folder` to
    /// `<bucket>/<prefix>/<file name>`, skipping `exclude` names. Returns the
    /// uploaded keys.
    async fn upload_files_from_folder(
        &self,
        bucket: &str,
        prefix: &str,
        folder: &Path,
        exclude: &[String],
    ) -> StorageResult<Vec<String>>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}
