//! Configuration module
//!
//! Everything is read from the environment (optionally seeded from a `.env`
//! file) once at startup and then passed explicitly to the components that
//! need it.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::storage_types::{RecordStoreBackend, StorageBackend};

const SERVER_PORT: u16 = 3000;
const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const MEDIA_FOLDER: &str = "media/";
const RAW_BUCKET: &str = "raw";
const PROCESSED_BUCKET: &str = "processed";
const MAX_CONCURRENT_TRANSCODES: usize = 2;
const TRANSCODE_QUEUE_SIZE: usize = 100;
const TRANSCODE_TIMEOUT_SECS: u64 = 3600;
const HLS_SEGMENT_DURATION: u64 = 6;
const NICE_LEVEL: i32 = 19;

/// Multipart chunk size. 50 MiB keeps a 500 GiB upload under the 10 000 part limit.
pub const MULTIPART_PART_SIZE: u64 = 50 * 1024 * 1024;
/// Smallest part size S3-compatible stores accept for non-final parts.
pub const MIN_MULTIPART_PART_SIZE: u64 = 5 * 1024 * 1024;
/// Largest part size S3-compatible stores accept.
pub const MAX_MULTIPART_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;
/// Maximum number of parts in a multipart upload.
pub const MAX_MULTIPART_PARTS: u64 = 10_000;
/// Expiry of the single-object presigned PUT URL.
pub const SINGLE_PUT_URL_EXPIRY: Duration = Duration::from_secs(15 * 60);
/// Expiry of each presigned part URL.
pub const PART_URL_EXPIRY: Duration = Duration::from_secs(60 * 60);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

/// Where raw uploads go and how upload plans are shaped
#[derive(Clone, Debug)]
pub struct UploadConfig {
    pub raw_bucket: String,
    /// Prefix prepended to every raw object key, e.g. `media/`
    pub media_folder: String,
    pub part_size: u64,
    pub single_put_url_expiry: Duration,
    pub part_url_expiry: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            raw_bucket: RAW_BUCKET.to_string(),
            media_folder: MEDIA_FOLDER.to_string(),
            part_size: MULTIPART_PART_SIZE,
            single_put_url_expiry: SINGLE_PUT_URL_EXPIRY,
            part_url_expiry: PART_URL_EXPIRY,
        }
    }
}

/// Object store connection settings
#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub s3_endpoint: Option<String>,
    pub s3_region: Option<String>,
    pub s3_force_path_style: bool,
    pub local_storage_path: Option<String>,
    pub local_storage_base_url: Option<String>,
    pub local_storage_signing_key: Option<String>,
}

/// Transcoding pipeline and dispatcher settings
#[derive(Clone, Debug)]
pub struct TranscodeConfig {
    pub processed_bucket: String,
    pub ffmpeg_path: String,
    /// `nice` level for the encoder process; `None` runs ffmpeg directly
    pub nice_level: Option<i32>,
    pub work_dir: PathBuf,
    pub max_concurrent_transcodes: usize,
    pub queue_size: usize,
    /// `None` disables the deadline
    pub timeout: Option<Duration>,
    pub hls_segment_duration: u64,
    pub encoder_cache: bool,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            processed_bucket: PROCESSED_BUCKET.to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
            nice_level: Some(NICE_LEVEL),
            work_dir: env::temp_dir(),
            max_concurrent_transcodes: MAX_CONCURRENT_TRANSCODES,
            queue_size: TRANSCODE_QUEUE_SIZE,
            timeout: Some(Duration::from_secs(TRANSCODE_TIMEOUT_SECS)),
            hls_segment_duration: HLS_SEGMENT_DURATION,
            encoder_cache: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub server_port: u16,
    pub environment: String,
    pub log_format: LogFormat,
    /// Allowed CORS origins; `*` allows any
    pub cors_origins: Vec<String>,
    pub record_store: RecordStoreBackend,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub storage: StorageConfig,
    pub upload: UploadConfig,
    pub transcode: TranscodeConfig,
}

/// Parse an env var, falling back to `default` when unset. A set but
/// malformed value is an error rather than a silent default.
fn env_parse_or<T: FromStr>(key: &str, default: T) -> Result<T, anyhow::Error> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: {}", key, raw)),
        _ => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> Result<bool, anyhow::Error> {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            "" => Ok(default),
            _ => Err(anyhow::anyhow!("{} must be a boolean, got {}", key, raw)),
        },
        Err(_) => Ok(default),
    }
}

fn mib_to_bytes(key: &str, mib: u64) -> Result<u64, anyhow::Error> {
    mib.checked_mul(1024 * 1024)
        .ok_or_else(|| anyhow::anyhow!("{} is too large: {}", key, mib))
}

/// Ensure a non-empty folder prefix ends with exactly one `/`.
pub fn normalize_folder(folder: &str) -> String {
    let trimmed = folder.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let log_format = match env::var("LOG_FORMAT").map(|s| s.to_lowercase()) {
            Ok(ref s) if s == "json" => LogFormat::Json,
            _ => LogFormat::Compact,
        };

        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        let record_store = env::var("RECORD_STORE")
            .unwrap_or_else(|_| "postgres".to_string())
            .parse::<RecordStoreBackend>()?;

        let storage = StorageConfig {
            backend: env::var("STORAGE_BACKEND")
                .unwrap_or_else(|_| "s3".to_string())
                .parse::<StorageBackend>()?,
            s3_endpoint: env::var("S3_ENDPOINT").ok(),
            s3_region: env::var("S3_REGION")
                .or_else(|_| env::var("AWS_REGION"))
                .ok(),
            s3_force_path_style: env_bool("S3_FORCE_PATH_STYLE", true)?,
            local_storage_path: env::var("LOCAL_STORAGE_PATH").ok(),
            local_storage_base_url: env::var("LOCAL_STORAGE_BASE_URL").ok(),
            local_storage_signing_key: env::var("LOCAL_STORAGE_SIGNING_KEY").ok(),
        };

        let upload = UploadConfig {
            raw_bucket: env::var("RAW_BUCKET").unwrap_or_else(|_| RAW_BUCKET.to_string()),
            media_folder: normalize_folder(
                &env::var("MEDIA_FOLDER").unwrap_or_else(|_| MEDIA_FOLDER.to_string()),
            ),
            part_size: mib_to_bytes(
                "MULTIPART_PART_SIZE_MB",
                env_parse_or("MULTIPART_PART_SIZE_MB", MULTIPART_PART_SIZE / 1024 / 1024)?,
            )?,
            single_put_url_expiry: SINGLE_PUT_URL_EXPIRY,
            part_url_expiry: PART_URL_EXPIRY,
        };

        let nice_level = match env::var("NICE_LEVEL") {
            Ok(raw) if raw.trim().eq_ignore_ascii_case("off") => None,
            _ => Some(env_parse_or("NICE_LEVEL", NICE_LEVEL)?),
        };
        let timeout_secs = env_parse_or("TRANSCODE_TIMEOUT_SECS", TRANSCODE_TIMEOUT_SECS)?;

        let transcode = TranscodeConfig {
            processed_bucket: env::var("PROCESSED_BUCKET")
                .unwrap_or_else(|_| PROCESSED_BUCKET.to_string()),
            ffmpeg_path: env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),
            nice_level,
            work_dir: env::var("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir()),
            max_concurrent_transcodes: env_parse_or(
                "MAX_CONCURRENT_TRANSCODES",
                MAX_CONCURRENT_TRANSCODES,
            )?,
            queue_size: env_parse_or("TRANSCODE_QUEUE_SIZE", TRANSCODE_QUEUE_SIZE)?,
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            hls_segment_duration: env_parse_or("HLS_SEGMENT_DURATION", HLS_SEGMENT_DURATION)?,
            encoder_cache: env_bool("ENCODER_CACHE", false)?,
        };

        let config = Config {
            server_port: env_parse_or("SERVER_PORT", SERVER_PORT)
                .map_err(|_| anyhow::anyhow!("SERVER_PORT must be a valid number"))?,
            environment,
            log_format,
            cors_origins,
            record_store,
            database_url: env::var("DATABASE_URL").ok(),
            db_max_connections: env_parse_or("DB_MAX_CONNECTIONS", MAX_CONNECTIONS)?,
            db_timeout_seconds: env_parse_or("DB_TIMEOUT_SECONDS", CONNECTION_TIMEOUT_SECS)?,
            storage,
            upload,
            transcode,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.record_store == RecordStoreBackend::Postgres && self.database_url.is_none() {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be set when RECORD_STORE=postgres"
            ));
        }
        if self.storage.backend == StorageBackend::Local
            && self.storage.local_storage_path.is_none()
        {
            return Err(anyhow::anyhow!(
                "LOCAL_STORAGE_PATH must be set when STORAGE_BACKEND=local"
            ));
        }
        if self.upload.raw_bucket.is_empty() || self.transcode.processed_bucket.is_empty() {
            return Err(anyhow::anyhow!(
                "RAW_BUCKET and PROCESSED_BUCKET must not be empty"
            ));
        }
        if self.upload.part_size < MIN_MULTIPART_PART_SIZE {
            return Err(anyhow::anyhow!(
                "MULTIPART_PART_SIZE_MB must be at least 5 MiB"
            ));
        }
        if self.upload.part_size > MAX_MULTIPART_PART_SIZE {
            return Err(anyhow::anyhow!(
                "MULTIPART_PART_SIZE_MB must be at most 5 GiB"
            ));
        }
        if self.transcode.max_concurrent_transcodes == 0 {
            return Err(anyhow::anyhow!(
                "MAX_CONCURRENT_TRANSCODES must be greater than zero"
            ));
        }
        if self.transcode.queue_size == 0 {
            return Err(anyhow::anyhow!(
                "TRANSCODE_QUEUE_SIZE must be greater than zero"
            ));
        }
        if self.transcode.hls_segment_duration == 0 {
            return Err(anyhow::anyhow!(
                "HLS_SEGMENT_DURATION must be greater than zero"
            ));
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_local_config() -> Config {
        Config {
            server_port: SERVER_PORT,
            environment: "test".to_string(),
            log_format: LogFormat::Compact,
            cors_origins: vec!["*".to_string()],
            record_store: RecordStoreBackend::Memory,
            database_url: None,
            db_max_connections: MAX_CONNECTIONS,
            db_timeout_seconds: CONNECTION_TIMEOUT_SECS,
            storage: StorageConfig {
                backend: StorageBackend::Local,
                s3_endpoint: None,
                s3_region: None,
                s3_force_path_style: true,
                local_storage_path: Some("/tmp/mediaflow".to_string()),
                local_storage_base_url: None,
                local_storage_signing_key: None,
            },
            upload: UploadConfig::default(),
            transcode: TranscodeConfig::default(),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = memory_local_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.transcode.max_concurrent_transcodes, 2);
        assert_eq!(config.transcode.hls_segment_duration, 6);
        assert_eq!(config.upload.part_size, 50 * 1024 * 1024);
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let mut config = memory_local_config();
        config.transcode.max_concurrent_transcodes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_database_url_for_postgres() {
        let mut config = memory_local_config();
        config.record_store = RecordStoreBackend::Postgres;
        assert!(config.validate().is_err());
        config.database_url = Some("postgres://localhost/mediaflow".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_tiny_parts() {
        let mut config = memory_local_config();
        config.upload.part_size = 1024;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_parts() {
        let mut config = memory_local_config();
        config.upload.part_size = MAX_MULTIPART_PART_SIZE;
        assert!(config.validate().is_ok());
        config.upload.part_size = MAX_MULTIPART_PART_SIZE + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_part_size_conversion_does_not_overflow() {
        assert_eq!(mib_to_bytes("MULTIPART_PART_SIZE_MB", 50).unwrap(), 50 * 1024 * 1024);
        assert!(mib_to_bytes("MULTIPART_PART_SIZE_MB", u64::MAX).is_err());
    }

    #[test]
    fn test_normalize_folder() {
        assert_eq!(normalize_folder("media"), "media/");
        assert_eq!(normalize_folder("/media/"), "media/");
        assert_eq!(normalize_folder("uploads/raw//"), "uploads/raw/");
        assert_eq!(normalize_folder(""), "");
        assert_eq!(normalize_folder("/"), "");
    }
}
