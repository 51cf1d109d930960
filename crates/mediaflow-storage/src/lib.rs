//! Mediaflow Storage Library
//!
//! Object store abstraction used by the upload coordinator and the transcoding
//! pipeline, with an S3 implementation and a local filesystem implementation.
//!
//! # Key layout
//!
//! - Raw uploads: `<raw-bucket>/<media-folder><media-id>[.<ext>]`
//! - Processed HLS bundle: `<processed-bucket>/<media-id>/index.m3u8` and
//!   `<processed-bucket>/<media-id>/<media-id>_NNN.ts`
//!
//! Keys must not contain `..` or a leading `/`. Key helpers live in the `keys`
//! module so both backends agree.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

pub use factory::{create_storage, StorageHandles};
#[cfg(feature = "storage-local")]
pub use local::{LocalStorage, PresignedTarget};
pub use mediaflow_core::StorageBackend;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use traits::{ObjectBody, ObjectStream, Storage, StorageError, StorageResult};
