#[cfg(feature = "storage-local")]
use crate::LocalStorage;
#[cfg(feature = "storage-s3")]
use crate::S3Storage;
use crate::{Storage, StorageBackend, StorageError, StorageResult};
use mediaflow_core::config::StorageConfig;
use std::sync::Arc;

/// Storage handles built from configuration.
///
/// `local` is set when the local backend is active so the API can mount the
/// signed upload route for it.
pub struct StorageHandles {
    pub storage: Arc<dyn Storage>,
    #[cfg(feature = "storage-local")]
    pub local: Option<Arc<LocalStorage>>,
}

/// Create a storage backend based on configuration
///
/// `default_base_url` is used for local presigned URLs when
/// `LOCAL_STORAGE_BASE_URL` is not set.
pub async fn create_storage(
    config: &StorageConfig,
    default_base_url: &str,
) -> StorageResult<StorageHandles> {
    match config.backend {
        #[cfg(feature = "storage-s3")]
        StorageBackend::S3 => {
            let storage = S3Storage::new(
                config.s3_region.clone(),
                config.s3_endpoint.clone(),
                config.s3_force_path_style,
            )
            .await?;
            Ok(StorageHandles {
                storage: Arc::new(storage),
                #[cfg(feature = "storage-local")]
                local: None,
            })
        }

        #[cfg(not(feature = "storage-s3"))]
        StorageBackend::S3 => Err(StorageError::ConfigError(
            "S3 storage backend not available (storage-s3 feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-local")]
        StorageBackend::Local => {
            let base_path = config.local_storage_path.clone().ok_or_else(|| {
                StorageError::ConfigError("LOCAL_STORAGE_PATH not configured".to_string())
            })?;
            let base_url = config
                .local_storage_base_url
                .clone()
                .unwrap_or_else(|| default_base_url.to_string());
            let signing_key = match &config.local_storage_signing_key {
                Some(key) => key.as_bytes().to_vec(),
                None => {
                    tracing::warn!(
                        "LOCAL_STORAGE_SIGNING_KEY not set, presigned URLs will not survive a restart"
                    );
                    LocalStorage::random_signing_key()
                }
            };

            let local = Arc::new(LocalStorage::new(base_path, base_url, signing_key).await?);
            Ok(StorageHandles {
                storage: local.clone(),
                local: Some(local),
            })
        }

        #[cfg(not(feature = "storage-local"))]
        StorageBackend::Local => Err(StorageError::ConfigError(
            "Local storage backend not available (storage-local feature not enabled)".to_string(),
        )),
    }
}
