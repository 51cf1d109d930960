//! Transcoding pipeline: `Pending -> Processing -> Ready | Failed`.

use crate::encoder::EncoderSelector;
use crate::ffmpeg::{hls_args, FfmpegRunner, HlsOutput, TranscodeError};
use crate::workspace::Workspace;
use async_trait::async_trait;
use mediaflow_core::config::TranscodeConfig;
use mediaflow_core::{AppError, ErrorMetadata, Media, MediaStatus};
use mediaflow_db::MediaRecordStore;
use mediaflow_storage::Storage;
use mediaflow_worker::{ConcurrencyLimiter, JobHandler};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Used for the temp input name when the raw key has no extension.
pub const DEFAULT_RAW_EXTENSION: &str = ".mp4";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub processed_bucket: String,
    pub work_dir: PathBuf,
    pub hls_segment_duration: u64,
}

impl From<&TranscodeConfig> for PipelineConfig {
    fn from(config: &TranscodeConfig) -> Self {
        Self {
            processed_bucket: config.processed_bucket.clone(),
            work_dir: config.work_dir.clone(),
            hls_segment_duration: config.hls_segment_duration,
        }
    }
}

pub struct TranscodingPipeline {
    storage: Arc<dyn Storage>,
    records: Arc<dyn MediaRecordStore>,
    limiter: ConcurrencyLimiter,
    encoders: EncoderSelector,
    runner: FfmpegRunner,
    config: PipelineConfig,
}

impl TranscodingPipeline {
    pub fn new(
        storage: Arc<dyn Storage>,
        records: Arc<dyn MediaRecordStore>,
        transcode: &TranscodeConfig,
    ) -> Self {
        Self {
            storage,
            records,
            limiter: ConcurrencyLimiter::new(transcode.max_concurrent_transcodes),
            encoders: EncoderSelector::new(&transcode.ffmpeg_path, transcode.encoder_cache),
            runner: FfmpegRunner::new(&transcode.ffmpeg_path, transcode.nice_level, transcode.timeout),
            config: PipelineConfig::from(transcode),
        }
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Run one media item to a terminal status.
    ///
    /// Never returns an error: every failure ends as a `Failed` record and a
    /// log line. Returns the status that was written.
    #[tracing::instrument(skip(self, media, cancel), fields(media_id = %media.id))]
    pub async fn process(&self, media: &Media, cancel: &CancellationToken) -> MediaStatus {
        let start = Instant::now();

        let status = match self.run(media, cancel).await {
            Ok(uploaded) => {
                tracing::info!(
                    media_id = %media.id,
                    artifacts = uploaded.len(),
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Transcode completed"
                );
                MediaStatus::Ready
            }
            Err(e) => {
                let err = AppError::from(e);
                tracing::error!(
                    media_id = %media.id,
                    error = %err,
                    error_code = err.error_code(),
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Transcode failed"
                );
                MediaStatus::Failed
            }
        };

        if let Err(e) = self.records.update_status(media.id, status).await {
            tracing::error!(media_id = %media.id, status = %status, error = %e, "Failed to record final status");
        }
        status
    }

    async fn run(&self, media: &Media, cancel: &CancellationToken) -> Result<Vec<String>, TranscodeError> {
        let _slot = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TranscodeError::Cancelled),
            slot = self.limiter.acquire() => slot?,
        };

        if let Err(e) = self.records.update_status(media.id, MediaStatus::Processing).await {
            tracing::warn!(media_id = %media.id, error = %e, "Failed to mark media as processing, continuing");
        }

        let workspace = Workspace::create(&self.config.work_dir, media.id)
            .await
            .map_err(TranscodeError::Workspace)?;

        let result = self.transcode_in(&workspace, media, cancel).await;

        if let Err(e) = workspace.close() {
            tracing::warn!(media_id = %media.id, error = %e, "Failed to remove workspace");
        }
        result
    }

    async fn transcode_in(
        &self,
        workspace: &Workspace,
        media: &Media,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, TranscodeError> {
        let extension = media.raw.extension().unwrap_or(DEFAULT_RAW_EXTENSION);
        let input_name = format!("{}_raw{}", media.id, extension);
        let input_path = workspace.join(&input_name);

        let size = self
            .storage
            .download_to_file(&media.raw.bucket, &media.raw.object, &input_path)
            .await
            .map_err(TranscodeError::Download)?;
        tracing::info!(media_id = %media.id, size_bytes = size, "Raw object downloaded");

        let encoder = self.encoders.select().await;
        let output = HlsOutput::new(workspace.path(), media.id);
        let args = hls_args(&input_path, &output, encoder, self.config.hls_segment_duration);

        tracing::info!(media_id = %media.id, encoder = %encoder, "Starting ffmpeg");
        match self.runner.run(&args, cancel).await {
            Ok(log) => tracing::debug!(media_id = %media.id, output = %log, "ffmpeg output"),
            Err(e) => {
                if encoder.is_hardware() && matches!(e, TranscodeError::Encode { .. }) {
                    self.encoders.invalidate().await;
                }
                return Err(e);
            }
        }

        if !tokio::fs::try_exists(&output.playlist).await.unwrap_or(false) {
            return Err(TranscodeError::MissingPlaylist(output.playlist));
        }

        self.storage
            .upload_files_from_folder(
                &self.config.processed_bucket,
                &media.processed_prefix(),
                workspace.path(),
                &[input_name],
            )
            .await
            .map_err(TranscodeError::Upload)
    }
}

#[async_trait]
impl JobHandler for TranscodingPipeline {
    async fn handle(&self, media: Media, cancel: CancellationToken) {
        self.process(&media, &cancel).await;
    }
}
