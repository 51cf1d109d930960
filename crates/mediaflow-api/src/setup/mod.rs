//! Application setup and initialization

pub mod database;
pub mod routes;
pub mod server;
pub mod services;
pub mod storage;

use crate::state::AppState;
use anyhow::{Context, Result};
use mediaflow_core::Config;
use std::sync::Arc;

/// Build record store, object store, transcode dispatcher and router.
///
/// Must run inside a Tokio runtime: the dispatcher spawns its workers here.
pub async fn initialize_app(config: Config) -> Result<(Arc<AppState>, axum::Router)> {
    config.validate().context("Configuration validation failed")?;

    let records = database::setup_record_store(&config).await?;
    let storage = storage::setup_storage(&config).await?;
    let state = services::initialize_services(config, storage, records);
    let router = routes::setup_routes(state.clone());

    Ok((state, router))
}
