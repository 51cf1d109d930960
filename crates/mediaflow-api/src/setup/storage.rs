//! Storage setup and initialization

use crate::constants::{API_PREFIX, LOCAL_STORAGE_ROUTE};
use anyhow::{Context, Result};
use mediaflow_core::Config;
use mediaflow_storage::{create_storage, StorageHandles};

/// Where local presigned URLs point when `LOCAL_STORAGE_BASE_URL` is unset.
pub fn default_local_base_url(config: &Config) -> String {
    format!(
        "http://localhost:{}{}{}",
        config.server_port, API_PREFIX, LOCAL_STORAGE_ROUTE
    )
}

pub async fn setup_storage(config: &Config) -> Result<StorageHandles> {
    tracing::info!("Initializing storage abstraction...");
    let handles = create_storage(&config.storage, &default_local_base_url(config))
        .await
        .context("Failed to initialize storage")?;

    tracing::info!(
        backend = %handles.storage.backend_type(),
        raw_bucket = %config.upload.raw_bucket,
        processed_bucket = %config.transcode.processed_bucket,
        media_folder = %config.upload.media_folder,
        "Storage abstraction initialized successfully"
    );

    Ok(handles)
}
