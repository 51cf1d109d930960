//! ffmpeg invocation for single-rendition HLS output.

use crate::encoder::VideoEncoder;
use mediaflow_core::AppError;
use mediaflow_storage::StorageError;
use mediaflow_worker::LimiterClosed;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const PLAYLIST_NAME: &str = "index.m3u8";

/// Longest tail of ffmpeg output kept in an error.
const MAX_OUTPUT_TAIL: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("transcode slot unavailable: {0}")]
    Slot(#[from] LimiterClosed),

    #[error("failed to create workspace: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("failed to download raw object: {0}")]
    Download(#[source] StorageError),

    #[error("failed to start ffmpeg: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("ffmpeg exited with {status}: {output}")]
    Encode { status: String, output: String },

    #[error("ffmpeg did not finish within {0:?}")]
    TimedOut(Duration),

    #[error("transcode cancelled")]
    Cancelled,

    #[error("ffmpeg produced no playlist at {0}")]
    MissingPlaylist(PathBuf),

    #[error("failed to upload artifacts: {0}")]
    Upload(#[source] StorageError),
}

impl From<TranscodeError> for AppError {
    fn from(err: TranscodeError) -> Self {
        AppError::TranscodeFailure(err.to_string())
    }
}

/// Output locations of one HLS encode inside a workspace.
#[derive(Debug, Clone)]
pub struct HlsOutput {
    pub playlist: PathBuf,
    pub segment_pattern: PathBuf,
}

impl HlsOutput {
    /// Segments are prefixed with the media id so they never collide with
    /// another job's output.
    pub fn new(dir: &Path, media_id: Uuid) -> Self {
        Self {
            playlist: dir.join(PLAYLIST_NAME),
            segment_pattern: dir.join(format!("{}_%03d.ts", media_id)),
        }
    }
}

/// Arguments for encoding `input` into a VOD playlist plus segments.
pub fn hls_args(
    input: &Path,
    output: &HlsOutput,
    encoder: VideoEncoder,
    segment_duration: u64,
) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_string(),
        "-y".to_string(),
        "-err_detect".to_string(),
        "ignore_err".to_string(),
        "-i".to_string(),
        input.to_string_lossy().to_string(),
        "-fflags".to_string(),
        "+genpts+discardcorrupt".to_string(),
        "-c:v".to_string(),
        encoder.codec_name().to_string(),
    ];

    args.extend(encoder.tuning_args().iter().map(|a| a.to_string()));

    args.extend_from_slice(&[
        "-c:a".to_string(),
        "aac".to_string(),
        "-ac".to_string(),
        "2".to_string(),
        "-b:a".to_string(),
        "128k".to_string(),
        "-ar".to_string(),
        "44100".to_string(),
        "-af".to_string(),
        "aresample=async=1".to_string(),
        "-hls_time".to_string(),
        segment_duration.to_string(),
        "-hls_playlist_type".to_string(),
        "vod".to_string(),
        "-hls_segment_filename".to_string(),
        output.segment_pattern.to_string_lossy().to_string(),
        output.playlist.to_string_lossy().to_string(),
    ]);

    args
}

fn output_tail(stdout: &[u8], stderr: &[u8]) -> String {
    let mut combined = String::from_utf8_lossy(stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(stderr));
    let trimmed = combined.trim();
    let mut start = trimmed.len().saturating_sub(MAX_OUTPUT_TAIL);
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}

/// Runs ffmpeg under an optional `nice` level with a deadline and a
/// cancellation token. The child is killed when either fires.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    ffmpeg_path: String,
    nice_level: Option<i32>,
    timeout: Option<Duration>,
}

impl FfmpegRunner {
    pub fn new(ffmpeg_path: impl Into<String>, nice_level: Option<i32>, timeout: Option<Duration>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            nice_level,
            timeout,
        }
    }

    fn command(&self, args: &[String]) -> Command {
        let mut command = match self.nice_level {
            Some(level) => {
                let mut nice = Command::new("nice");
                nice.arg("-n").arg(level.to_string()).arg(&self.ffmpeg_path);
                nice
            }
            None => Command::new(&self.ffmpeg_path),
        };
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    /// Run to completion and return the combined output on success.
    #[tracing::instrument(skip(self, args, cancel))]
    pub async fn run(
        &self,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<String, TranscodeError> {
        let start = Instant::now();
        let child = self.command(args).spawn().map_err(TranscodeError::Spawn)?;

        let deadline = async {
            match self.timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        // dropping the pending wait drops the child, which kills it
        let output = tokio::select! {
            output = child.wait_with_output() => output.map_err(TranscodeError::Spawn)?,
            _ = cancel.cancelled() => {
                tracing::warn!("Cancelling ffmpeg");
                return Err(TranscodeError::Cancelled);
            }
            _ = deadline => {
                let limit = self.timeout.unwrap_or_default();
                tracing::warn!(timeout_secs = limit.as_secs(), "ffmpeg exceeded its deadline, killing it");
                return Err(TranscodeError::TimedOut(limit));
            }
        };

        let combined = output_tail(&output.stdout, &output.stderr);
        if !output.status.success() {
            return Err(TranscodeError::Encode {
                status: output.status.to_string(),
                output: combined,
            });
        }

        tracing::debug!(
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "ffmpeg finished"
        );
        Ok(combined)
    }
}
