//! Service wiring: transcoding pipeline, dispatcher, upload services.

use crate::services::{CompletionHandler, UploadCoordinator};
use crate::state::AppState;
use mediaflow_core::Config;
use mediaflow_db::MediaRecordStore;
use mediaflow_processing::TranscodingPipeline;
use mediaflow_storage::StorageHandles;
use mediaflow_worker::{DispatcherConfig, TranscodeDispatcher};
use std::sync::Arc;
use std::time::Duration;

/// How long shutdown waits for running transcodes to wind down after cancellation
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

pub fn initialize_services(
    config: Config,
    storage: StorageHandles,
    records: Arc<dyn MediaRecordStore>,
) -> Arc<AppState> {
    let pipeline = Arc::new(TranscodingPipeline::new(
        storage.storage.clone(),
        records.clone(),
        &config.transcode,
    ));

    let transcode_slots = pipeline.limiter().clone();
    let dispatcher = Arc::new(TranscodeDispatcher::new(
        pipeline,
        DispatcherConfig {
            queue_size: config.transcode.queue_size,
            workers: config.transcode.max_concurrent_transcodes,
            shutdown_grace: SHUTDOWN_GRACE,
        },
    ));

    tracing::info!(
        ffmpeg_path = %config.transcode.ffmpeg_path,
        max_concurrent_transcodes = config.transcode.max_concurrent_transcodes,
        queue_size = config.transcode.queue_size,
        timeout_secs = ?config.transcode.timeout.map(|t| t.as_secs()),
        encoder_cache = config.transcode.encoder_cache,
        "Transcoding pipeline initialized"
    );

    let uploads = UploadCoordinator::new(
        storage.storage.clone(),
        records.clone(),
        config.upload.clone(),
    );
    let completion =
        CompletionHandler::new(storage.storage.clone(), records.clone(), dispatcher.clone());

    Arc::new(AppState {
        config,
        storage: storage.storage,
        local_storage: storage.local,
        records,
        dispatcher,
        transcode_slots,
        uploads,
        completion,
    })
}
