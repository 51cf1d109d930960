use crate::keys::{artifact_key, collect_artifacts, guess_content_type, validate_key};
use crate::traits::{ObjectStream, Storage, StorageError, StorageResult};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use hmac::{Hmac, Mac};
use mediaflow_core::models::UploadedPart;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const MULTIPART_DIR: &str = ".multipart";
const TARGET_FILE: &str = "target";

/// What a presigned local URL authorizes: a PUT of one object or of one part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedTarget {
    pub bucket: String,
    pub key: String,
    pub upload_id: Option<String>,
    pub part_number: Option<u32>,
}

impl PresignedTarget {
    fn canonical(&self, expires: i64) -> String {
        format!(
            "PUT\n{}\n{}\n{}\n{}\n{}",
            self.bucket,
            self.key,
            expires,
            self.upload_id.as_deref().unwrap_or_default(),
            self.part_number.map(|n| n.to_string()).unwrap_or_default()
        )
    }
}

/// Local filesystem storage implementation
///
/// Buckets are directories under `base_path`. Presigned URLs point at the
/// API's local upload route and carry an HMAC signature so the route can
/// accept the PUT without any other credentials.
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
    base_url: String,
    signing_key: Vec<u8>,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// # Arguments
    /// * `base_path` - Root directory; each bucket is a subdirectory
    /// * `base_url` - URL of the signed upload route (e.g., "http://localhost:3000/api/v0/local-storage")
    /// * `signing_key` - HMAC key for presigned URLs
    pub async fn new(
        base_path: impl Into<PathBuf>,
        base_url: String,
        signing_key: Vec<u8>,
    ) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(base_path.join(MULTIPART_DIR))
            .await
            .map_err(|e| {
                StorageError::ConfigError(format!(
                    "Failed to create storage directory {}: {}",
                    base_path.display(),
                    e
                ))
            })?;

        if signing_key.is_empty() {
            return Err(StorageError::ConfigError(
                "Local storage signing key must not be empty".to_string(),
            ));
        }

        Ok(LocalStorage {
            base_path,
            base_url,
            signing_key,
        })
    }

    /// Random signing key for a process that does not configure one.
    pub fn random_signing_key() -> Vec<u8> {
        use rand::Rng;
        let mut key = vec![0u8; 32];
        rand::rng().fill(&mut key[..]);
        key
    }

    fn object_path(&self, bucket: &str, key: &str) -> StorageResult<PathBuf> {
        validate_key(bucket)?;
        if bucket.contains('/') {
            return Err(StorageError::InvalidKey(format!("Invalid bucket name: {}", bucket)));
        }
        validate_key(key)?;
        Ok(self.base_path.join(bucket).join(key))
    }

    fn session_dir(&self, upload_id: &str) -> StorageResult<PathBuf> {
        let id = Uuid::parse_str(upload_id)
            .map_err(|_| StorageError::MultipartRejected(format!("Unknown upload id: {}", upload_id)))?;
        Ok(self.base_path.join(MULTIPART_DIR).join(id.to_string()))
    }

    fn part_path(session: &Path, part_number: u32) -> PathBuf {
        session.join(format!("part-{:05}", part_number))
    }

    fn sign(&self, target: &PresignedTarget, expires: i64) -> StorageResult<String> {
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;
        mac.update(target.canonical(expires).as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn presigned_url(&self, target: &PresignedTarget, expires_in: Duration) -> StorageResult<String> {
        let expires = chrono::Utc::now().timestamp() + expires_in.as_secs() as i64;
        let signature = self.sign(target, expires)?;
        let encoded_key = target
            .key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");

        let mut url = format!(
            "{}/{}/{}?expires={}&signature={}",
            self.base_url.trim_end_matches('/'),
            target.bucket,
            encoded_key,
            expires,
            signature
        );
        if let (Some(upload_id), Some(part_number)) = (&target.upload_id, target.part_number) {
            url.push_str(&format!("&upload_id={}&part_number={}", upload_id, part_number));
        }
        Ok(url)
    }

    /// Check a presigned URL's signature and expiry.
    pub fn verify_presigned(
        &self,
        target: &PresignedTarget,
        expires: i64,
        signature: &str,
    ) -> StorageResult<()> {
        if chrono::Utc::now().timestamp() > expires {
            return Err(StorageError::InvalidSignature("URL has expired".to_string()));
        }
        let provided = hex::decode(signature)
            .map_err(|_| StorageError::InvalidSignature("Malformed signature".to_string()))?;
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;
        mac.update(target.canonical(expires).as_bytes());
        mac.verify_slice(&provided)
            .map_err(|_| StorageError::InvalidSignature("Signature mismatch".to_string()))
    }

    /// Store the body of a presigned PUT and return its quoted ETag.
    ///
    /// Writes a single object, or one staged part when the target names a
    /// multipart session.
    pub async fn put_presigned<S>(&self, target: &PresignedTarget, body: S) -> StorageResult<String>
    where
        S: Stream<Item = Result<Bytes, std::io::Error>> + Send + Unpin,
    {
        let dest = match (&target.upload_id, target.part_number) {
            (Some(upload_id), Some(part_number)) => {
                let session = self.session_dir(upload_id)?;
                let (bucket, key) = self.read_session_target(&session).await?;
                if bucket != target.bucket || key != target.key {
                    return Err(StorageError::InvalidSignature(
                        "Upload id does not belong to this object".to_string(),
                    ));
                }
                Self::part_path(&session, part_number)
            }
            _ => self.object_path(&target.bucket, &target.key)?,
        };
        self.write_stream(&dest, body).await
    }

    async fn write_stream<S>(&self, dest: &Path, mut body: S) -> StorageResult<String>
    where
        S: Stream<Item = Result<Bytes, std::io::Error>> + Send + Unpin,
    {
        let start = std::time::Instant::now();
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(dest).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to create file {}: {}", dest.display(), e))
        })?;
        let mut hasher = Sha256::new();
        let mut size = 0u64;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| StorageError::UploadFailed(e.to_string()))?;
            hasher.update(&chunk);
            size += chunk.len() as u64;
            file.write_all(&chunk).await.map_err(|e| {
                StorageError::UploadFailed(format!("Failed to write file {}: {}", dest.display(), e))
            })?;
        }
        file.sync_all().await?;

        tracing::info!(
            path = %dest.display(),
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage upload successful"
        );

        Ok(format!("\"{}\"", hex::encode(hasher.finalize())))
    }

    async fn read_session_target(&self, session: &Path) -> StorageResult<(String, String)> {
        let target = fs::read_to_string(session.join(TARGET_FILE))
            .await
            .map_err(|_| StorageError::MultipartRejected("Unknown upload id".to_string()))?;
        let (bucket, key) = target
            .split_once('\n')
            .ok_or_else(|| StorageError::BackendError("Corrupt multipart session".to_string()))?;
        Ok((bucket.to_string(), key.to_string()))
    }

    async fn file_digest(path: &Path) -> StorageResult<String> {
        let mut file = fs::File::open(path).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hex::encode(hasher.finalize()))
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        self.object_path(bucket, key)?;
        self.presigned_url(
            &PresignedTarget {
                bucket: bucket.to_string(),
                key: key.to_string(),
                upload_id: None,
                part_number: None,
            },
            expires_in,
        )
    }

    async fn presign_upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        expires_in: Duration,
    ) -> StorageResult<String> {
        self.object_path(bucket, key)?;
        if part_number == 0 {
            return Err(StorageError::PresignFailed("Part numbers start at 1".to_string()));
        }
        self.presigned_url(
            &PresignedTarget {
                bucket: bucket.to_string(),
                key: key.to_string(),
                upload_id: Some(upload_id.to_string()),
                part_number: Some(part_number),
            },
            expires_in,
        )
    }

    async fn create_multipart_upload(&self, bucket: &str, key: &str) -> StorageResult<String> {
        self.object_path(bucket, key)?;
        let upload_id = Uuid::new_v4().to_string();
        let session = self.session_dir(&upload_id)?;

        fs::create_dir_all(&session).await?;
        fs::write(session.join(TARGET_FILE), format!("{}\n{}", bucket, key)).await?;

        tracing::info!(bucket = %bucket, key = %key, upload_id = %upload_id, "Local multipart upload created");

        Ok(upload_id)
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[UploadedPart],
    ) -> StorageResult<()> {
        let start = std::time::Instant::now();
        let dest = self.object_path(bucket, key)?;
        let session = self.session_dir(upload_id)?;

        let (session_bucket, session_key) = self.read_session_target(&session).await?;
        if session_bucket != bucket || session_key != key {
            return Err(StorageError::MultipartRejected(
                "Upload id does not belong to this object".to_string(),
            ));
        }
        if parts.is_empty() {
            return Err(StorageError::MultipartRejected(
                "At least one part is required".to_string(),
            ));
        }

        let mut previous = 0u32;
        for part in parts {
            if part.part_number <= previous {
                return Err(StorageError::MultipartRejected(
                    "Parts must be in ascending order".to_string(),
                ));
            }
            previous = part.part_number;

            let path = Self::part_path(&session, part.part_number);
            if !fs::try_exists(&path).await.unwrap_or(false) {
                return Err(StorageError::MultipartRejected(format!(
                    "Part {} was not uploaded",
                    part.part_number
                )));
            }
            let digest = Self::file_digest(&path).await?;
            if digest != part.etag.trim_matches('"') {
                return Err(StorageError::MultipartRejected(format!(
                    "Checksum mismatch for part {}",
                    part.part_number
                )));
            }
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        let staging = session.join("assembled");
        let mut out = fs::File::create(&staging).await?;
        let mut size = 0u64;
        for part in parts {
            let mut part_file = fs::File::open(Self::part_path(&session, part.part_number)).await?;
            size += tokio::io::copy(&mut part_file, &mut out).await?;
        }
        out.sync_all().await?;
        drop(out);

        fs::rename(&staging, &dest).await?;
        fs::remove_dir_all(&session).await?;

        tracing::info!(
            bucket = %bucket,
            key = %key,
            parts = parts.len(),
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local multipart upload completed"
        );

        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<ObjectStream> {
        let path = self.object_path(bucket, key)?;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(format!("{}/{}", bucket, key)));
        }

        let file = fs::File::open(&path).await.map_err(|e| {
            StorageError::DownloadFailed(format!("Failed to open file {}: {}", path.display(), e))
        })?;
        let size = file.metadata().await?.len();

        let path_display = path.display().to_string();
        let body = tokio_util::io::ReaderStream::new(file).map(move |item| {
            item.map_err(|e| {
                tracing::error!(path = %path_display, error = %e, "Local storage stream read error");
                StorageError::DownloadFailed(format!("Failed to read chunk: {}", e))
            })
        });

        Ok(ObjectStream {
            body: Box::pin(body),
            size: Some(size),
            content_type: Some(guess_content_type(key).to_string()),
        })
    }

    async fn download_to_file(&self, bucket: &str, key: &str, dest: &Path) -> StorageResult<u64> {
        let path = self.object_path(bucket, key)?;
        let start = std::time::Instant::now();

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(format!("{}/{}", bucket, key)));
        }

        let bytes = fs::copy(&path, dest).await.map_err(|e| {
            StorageError::DownloadFailed(format!(
                "Failed to copy {} to {}: {}",
                path.display(),
                dest.display(),
                e
            ))
        })?;

        tracing::info!(
            path = %path.display(),
            key = %key,
            size_bytes = bytes,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage download successful"
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
        let artifacts = collect_artifacts(folder, exclude).await?;
        let mut uploaded = Vec::with_capacity(artifacts.len());

        for artifact in artifacts {
            let key = artifact_key(prefix, &artifact.file_name);
            let dest = self.object_path(bucket, &key)?;
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::copy(&artifact.path, &dest).await.map_err(|e| {
                StorageError::UploadFailed(format!(
                    "Failed to copy {} to {}: {}",
                    artifact.path.display(),
                    dest.display(),
                    e
                ))
            })?;
            uploaded.push(key);
        }

        tracing::info!(
            bucket = %bucket,
            prefix = %prefix,
            files = uploaded.len(),
            "Local storage folder upload successful"
        );

        Ok(uploaded)
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}
