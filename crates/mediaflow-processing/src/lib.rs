//! Video transcoding for uploaded media.
//!
//! A [`TranscodingPipeline`] run takes one `Pending` media item, downloads its
//! raw object into a private [`Workspace`], encodes it to an HLS playlist plus
//! segments with ffmpeg, publishes the artifacts to the processed bucket and
//! leaves the record `Ready` or `Failed`.

pub mod encoder;
pub mod ffmpeg;
pub mod pipeline;
pub mod workspace;

#[cfg(all(test, unix))]
pub(crate) mod test_support;

pub use encoder::{EncoderSelector, VideoEncoder};
pub use ffmpeg::{hls_args, FfmpegRunner, HlsOutput, TranscodeError};
pub use pipeline::{PipelineConfig, TranscodingPipeline, DEFAULT_RAW_EXTENSION};
pub use workspace::Workspace;
