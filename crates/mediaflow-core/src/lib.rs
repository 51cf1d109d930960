//! Mediaflow Core Library
//!
//! Domain models, the error taxonomy and configuration shared by every
//! Mediaflow component.

pub mod config;
pub mod error;
pub mod models;
pub mod storage_types;

pub use config::Config;
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use models::{Media, MediaStatus, RawLocation};
pub use storage_types::{RecordStoreBackend, StorageBackend};
