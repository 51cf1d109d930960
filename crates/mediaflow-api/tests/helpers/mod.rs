//! Test helpers: build the full router over in-memory records, local storage
//! and a fake ffmpeg.
//!
//! Run with: `cargo test -p mediaflow-api --test uploads_test`

pub mod ffmpeg;

use axum_test::{TestResponse, TestServer};
use mediaflow_api::constants::API_PREFIX;
use mediaflow_api::setup::initialize_app;
use mediaflow_api::AppState;
use mediaflow_core::config::{
    LogFormat, StorageConfig, TranscodeConfig, UploadConfig, MIN_MULTIPART_PART_SIZE,
};
use mediaflow_core::models::MediaResponse;
use mediaflow_core::{Config, MediaStatus, RecordStoreBackend, StorageBackend};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

pub use ffmpeg::FakeFfmpeg;

/// API path prefix for tests (e.g. `/api/v0`).
pub fn api_path(path: &str) -> String {
    format!("{}{}", API_PREFIX, path)
}

pub struct TestOptions {
    pub queue_size: usize,
    pub max_concurrent_transcodes: usize,
    pub encode_delay_secs: f64,
    pub fail_encode: bool,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            queue_size: 16,
            max_concurrent_transcodes: 2,
            encode_delay_secs: 0.0,
            fail_encode: false,
        }
    }
}

pub struct TestApp {
    pub server: TestServer,
    pub state: Arc<AppState>,
    pub ffmpeg: FakeFfmpeg,
    pub temp_dir: TempDir,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }

    /// Path of a stored object under the local backend root.
    pub fn stored_path(&self, bucket: &str, key: &str) -> std::path::PathBuf {
        self.temp_dir.path().join("store").join(bucket).join(key)
    }
}

pub async fn setup_test_app() -> TestApp {
    setup_test_app_with(TestOptions::default()).await
}

pub async fn setup_test_app_with(options: TestOptions) -> TestApp {
    let temp_dir = tempfile::tempdir().unwrap();
    let ffmpeg = FakeFfmpeg::write(
        temp_dir.path(),
        options.encode_delay_secs,
        options.fail_encode,
    );

    let config = Config {
        server_port: 3000,
        environment: "test".to_string(),
        log_format: LogFormat::Compact,
        cors_origins: vec!["*".to_string()],
        record_store: RecordStoreBackend::Memory,
        database_url: None,
        db_max_connections: 1,
        db_timeout_seconds: 5,
        storage: StorageConfig {
            backend: StorageBackend::Local,
            s3_endpoint: None,
            s3_region: None,
            s3_force_path_style: true,
            local_storage_path: Some(temp_dir.path().join("store").display().to_string()),
            local_storage_base_url: None,
            local_storage_signing_key: Some("integration-test-key".to_string()),
        },
        upload: UploadConfig {
            part_size: MIN_MULTIPART_PART_SIZE,
            ..UploadConfig::default()
        },
        transcode: TranscodeConfig {
            ffmpeg_path: ffmpeg.path.display().to_string(),
            nice_level: None,
            work_dir: temp_dir.path().join("work"),
            max_concurrent_transcodes: options.max_concurrent_transcodes,
            queue_size: options.queue_size,
            timeout: Some(Duration::from_secs(30)),
            ..TranscodeConfig::default()
        },
    };

    let (state, router) = initialize_app(config).await.unwrap();
    let server = TestServer::new(router).unwrap();

    TestApp {
        server,
        state,
        ffmpeg,
        temp_dir,
    }
}

/// Split a presigned URL into the in-app path and its query string.
pub fn split_presigned_url(url: &str) -> (String, String) {
    let start = url.find(API_PREFIX).expect("presigned URL points at the API");
    let path_and_query = &url[start..];
    match path_and_query.split_once('?') {
        Some((path, query)) => (path.to_string(), query.to_string()),
        None => (path_and_query.to_string(), String::new()),
    }
}

/// PUT bytes to a presigned URL issued by the local backend.
pub async fn put_presigned(client: &TestServer, url: &str, data: Vec<u8>) -> TestResponse {
    let (path, query) = split_presigned_url(url);
    client
        .put(&path)
        .add_raw_query_param(&query)
        .bytes(data.into())
        .await
}

pub async fn get_media(client: &TestServer, id: Uuid) -> MediaResponse {
    let response = client.get(&api_path(&format!("/media/{}", id))).await;
    assert_eq!(response.status_code(), 200);
    response.json::<MediaResponse>()
}

/// Poll until the record reaches a terminal status.
pub async fn wait_for_terminal(client: &TestServer, id: Uuid) -> MediaStatus {
    for _ in 0..200 {
        let media = get_media(client, id).await;
        if media.status.is_terminal() {
            return media.status;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("media {} never reached a terminal status", id);
}
