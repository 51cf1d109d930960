//! H.264 encoder selection.
//!
//! Hardware encoders are tried in a fixed priority order. A candidate wins when
//! ffmpeg lists it and a one-frame synthetic encode with it succeeds; otherwise
//! the software encoder is used.

use anyhow::{anyhow, Context, Result};
use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;

const SMOKE_TEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoEncoder {
    Nvenc,
    Qsv,
    Amf,
    Software,
}

impl VideoEncoder {
    /// Hardware candidates, most preferred first.
    pub const HARDWARE_PRIORITY: [VideoEncoder; 3] =
        [VideoEncoder::Nvenc, VideoEncoder::Qsv, VideoEncoder::Amf];

    pub fn codec_name(&self) -> &'static str {
        match self {
            VideoEncoder::Nvenc => "h264_nvenc",
            VideoEncoder::Qsv => "h264_qsv",
            VideoEncoder::Amf => "h264_amf",
            VideoEncoder::Software => "libx264",
        }
    }

    /// Encoder-specific flags placed right after `-c:v <codec>`.
    pub fn tuning_args(&self) -> &'static [&'static str] {
        match self {
            VideoEncoder::Nvenc => &["-preset", "p4", "-tune", "hq"],
            VideoEncoder::Qsv => &["-preset", "fast"],
            VideoEncoder::Amf => &["-quality", "speed"],
            VideoEncoder::Software => &["-preset", "ultrafast", "-threads", "2"],
        }
    }

    pub fn is_hardware(&self) -> bool {
        !matches!(self, VideoEncoder::Software)
    }
}

impl fmt::Display for VideoEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.codec_name())
    }
}

/// Whether an `ffmpeg -encoders` listing contains `codec`.
///
/// Listing rows look like ` V....D h264_nvenc   NVIDIA NVENC H.264 encoder`.
fn encoder_listed(listing: &str, codec: &str) -> bool {
    listing
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|name| name == codec)
}

/// Picks the encoder for each transcode.
///
/// With caching enabled the first detected encoder is reused until
/// [`invalidate`](Self::invalidate) is called.
pub struct EncoderSelector {
    ffmpeg_path: String,
    cache: Option<Mutex<Option<VideoEncoder>>>,
}

impl EncoderSelector {
    pub fn new(ffmpeg_path: impl Into<String>, cache_enabled: bool) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            cache: cache_enabled.then(|| Mutex::new(None)),
        }
    }

    pub async fn select(&self) -> VideoEncoder {
        let Some(cache) = &self.cache else {
            return self.detect().await;
        };

        let mut cached = cache.lock().await;
        if let Some(encoder) = *cached {
            return encoder;
        }
        let encoder = self.detect().await;
        *cached = Some(encoder);
        encoder
    }

    /// Forget a cached result so the next job detects again.
    pub async fn invalidate(&self) {
        if let Some(cache) = &self.cache {
            if let Some(previous) = cache.lock().await.take() {
                tracing::info!(encoder = %previous, "Encoder cache invalidated");
            }
        }
    }

    async fn detect(&self) -> VideoEncoder {
        let listing = match self.list_encoders().await {
            Ok(listing) => listing,
            Err(e) => {
                tracing::warn!(error = %e, "Could not list ffmpeg encoders, using software encoder");
                return VideoEncoder::Software;
            }
        };

        for candidate in VideoEncoder::HARDWARE_PRIORITY {
            if !encoder_listed(&listing, candidate.codec_name()) {
                continue;
            }
            match self.smoke_test(candidate).await {
                Ok(()) => {
                    tracing::info!(encoder = %candidate, "Using hardware encoder");
                    return candidate;
                }
                Err(e) => {
                    tracing::warn!(encoder = %candidate, error = %e, "Hardware encoder smoke test failed");
                }
            }
        }

        tracing::debug!("No usable hardware encoder, using libx264");
        VideoEncoder::Software
    }

    async fn list_encoders(&self) -> Result<String> {
        let output = Command::new(&self.ffmpeg_path)
            .args(["-hide_banner", "-encoders"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .context("Failed to execute ffmpeg")?;

        if !output.status.success() {
            return Err(anyhow!("ffmpeg -encoders exited with {}", output.status));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn smoke_test(&self, encoder: VideoEncoder) -> Result<()> {
        let run = Command::new(&self.ffmpeg_path)
            .args([
                "-hide_banner",
                "-loglevel",
                "error",
                "-f",
                "lavfi",
                "-i",
                "color=c=black:s=64x64",
                "-frames:v",
                "1",
                "-c:v",
                encoder.codec_name(),
                "-f",
                "null",
                "-",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(SMOKE_TEST_TIMEOUT, run)
            .await
            .map_err(|_| anyhow!("smoke test timed out"))?
            .context("Failed to execute ffmpeg")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("FFmpeg failed: {}", stderr.trim()));
        }
        Ok(())
    }
}
