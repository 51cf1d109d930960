//! Record store setup

use anyhow::Result;
use mediaflow_core::{Config, RecordStoreBackend};
use mediaflow_db::{setup_database, InMemoryMediaRepository, MediaRecordStore, MediaRepository};
use std::sync::Arc;

pub async fn setup_record_store(config: &Config) -> Result<Arc<dyn MediaRecordStore>> {
    match config.record_store {
        RecordStoreBackend::Postgres => {
            let pool = setup_database(config).await?;
            Ok(Arc::new(MediaRepository::new(pool)))
        }
        RecordStoreBackend::Memory => {
            tracing::warn!("Using in-memory record store, media records are lost on restart");
            Ok(Arc::new(InMemoryMediaRepository::new()))
        }
    }
}
