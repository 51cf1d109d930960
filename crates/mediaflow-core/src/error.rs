//! Error types module
//!
//! Every failure the upload and completion paths surface to a caller is an
//! `AppError`. Background transcoding absorbs its own failures and only records
//! them as a `Failed` status, so `TranscodeFailure` mostly shows up in logs.

use std::io;

/// Level an error is logged at by the HTTP layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Expected client mistakes: bad input, unknown ids
    Debug,
    /// Transient conditions the client can retry
    Warn,
    /// Failures an operator should look at
    Error,
}

/// How an error renders over HTTP and in the logs.
pub trait ErrorMetadata {
    fn http_status_code(&self) -> u16;

    /// Machine-readable error code (e.g., "STORAGE_UNAVAILABLE")
    fn error_code(&self) -> &'static str;

    /// True when retrying the same request may succeed
    fn is_recoverable(&self) -> bool;

    fn suggested_action(&self) -> Option<&'static str>;

    /// Message safe to show a client
    fn client_message(&self) -> String;

    /// Whether details should be hidden from clients
    fn is_sensitive(&self) -> bool;

    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Upload merge rejected: {0}")]
    UploadMergeError(String),

    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("Transcode failure: {0}")]
    TranscodeFailure(String),

    #[error("Busy: {0}")]
    Busy(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidArgument(format!("JSON parsing error: {}", err))
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::InvalidArgument(format!("UUID parsing error: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::InvalidArgument(format!("Validation error: {}", err))
    }
}

/// `(status, code, recoverable, suggested_action, sensitive, log_level)` per variant.
fn app_error_static_metadata(
    err: &AppError,
) -> (
    u16,
    &'static str,
    bool,
    Option<&'static str>,
    bool,
    LogLevel,
) {
    match err {
        AppError::InvalidArgument(_) => (
            400,
            "INVALID_ARGUMENT",
            false,
            Some("Check request parameters and try again"),
            false,
            LogLevel::Debug,
        ),
        AppError::NotFound(_) => (
            404,
            "NOT_FOUND",
            false,
            Some("Verify the media ID exists"),
            false,
            LogLevel::Debug,
        ),
        AppError::StorageUnavailable(_) => (
            502,
            "STORAGE_UNAVAILABLE",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::UploadMergeError(_) => (
            409,
            "UPLOAD_MERGE_FAILED",
            true,
            Some("Re-upload the missing or corrupted parts and complete again"),
            false,
            LogLevel::Warn,
        ),
        AppError::PersistenceError(_) => (
            500,
            "PERSISTENCE_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
        AppError::TranscodeFailure(_) => (
            500,
            "TRANSCODE_FAILURE",
            false,
            Some("Upload the file again or try a different format"),
            true,
            LogLevel::Error,
        ),
        AppError::Busy(_) => (
            503,
            "BUSY",
            true,
            Some("Wait a few seconds and retry"),
            false,
            LogLevel::Warn,
        ),
        AppError::Internal(_) | AppError::InternalWithSource { .. } => (
            500,
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            true,
            LogLevel::Error,
        ),
    }
}

impl AppError {
    /// Variant name, shown as `error_type` outside production
    pub fn error_type(&self) -> &str {
        match self {
            AppError::InvalidArgument(_) => "InvalidArgument",
            AppError::NotFound(_) => "NotFound",
            AppError::StorageUnavailable(_) => "StorageUnavailable",
            AppError::UploadMergeError(_) => "UploadMergeError",
            AppError::PersistenceError(_) => "PersistenceError",
            AppError::TranscodeFailure(_) => "TranscodeFailure",
            AppError::Busy(_) => "Busy",
            AppError::Internal(_) | AppError::InternalWithSource { .. } => "Internal",
        }
    }

    /// Message plus its `source()` chain, one cause per line
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        app_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).2
    }

    fn suggested_action(&self) -> Option<&'static str> {
        app_error_static_metadata(self).3
    }

    fn is_sensitive(&self) -> bool {
        app_error_static_metadata(self).4
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).5
    }

    fn client_message(&self) -> String {
        match self {
            AppError::InvalidArgument(ref msg) => msg.clone(),
            AppError::NotFound(ref msg) => msg.clone(),
            AppError::StorageUnavailable(_) => "Object storage is unavailable".to_string(),
            AppError::UploadMergeError(ref msg) => msg.clone(),
            AppError::PersistenceError(_) => "Failed to persist media record".to_string(),
            AppError::TranscodeFailure(_) => "Failed to transcode media".to_string(),
            AppError::Busy(ref msg) => msg.clone(),
            AppError::Internal(_) | AppError::InternalWithSource { .. } => {
                "Internal server error".to_string()
            }
        }
    }
}
