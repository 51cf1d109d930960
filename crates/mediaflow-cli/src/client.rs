//! HTTP client for the Mediaflow API.

use anyhow::{Context, Result};
use mediaflow_core::models::{
    CompleteUploadRequest, CompleteUploadResponse, MediaResponse, MultipartUploadPlan,
    UploadPlan, UploadedPart,
};
use reqwest::{header, Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use uuid::Uuid;

/// API version prefix (e.g. "/api/v0"). Set MEDIAFLOW_API_VERSION to match the server.
pub fn api_prefix() -> String {
    let version = std::env::var("MEDIAFLOW_API_VERSION").unwrap_or_else(|_| "v0".to_string());
    format!("/api/{}", version)
}

#[derive(Clone, Debug)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: String) -> Result<Self> {
        // No overall timeout: part uploads can be large.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create client from environment: MEDIAFLOW_API_URL (or API_URL).
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("MEDIAFLOW_API_URL")
            .or_else(|_| std::env::var("API_URL"))
            .unwrap_or_else(|_| "http://localhost:3000".to_string());
        Self::new(base_url)
    }

    pub fn build_url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, api_prefix(), path)
    }

    pub async fn init_upload(&self, extension: Option<&str>) -> Result<UploadPlan> {
        let response = self
            .client
            .post(self.build_url("/media/uploads"))
            .json(&serde_json::json!({ "extension": extension }))
            .send()
            .await
            .context("Failed to send upload init request")?;
        parse_json(response).await
    }

    pub async fn init_multipart_upload(
        &self,
        size: u64,
        extension: Option<&str>,
    ) -> Result<MultipartUploadPlan> {
        let response = self
            .client
            .post(self.build_url("/media/uploads/multipart"))
            .json(&serde_json::json!({ "size": size, "extension": extension }))
            .send()
            .await
            .context("Failed to send multipart init request")?;
        parse_json(response).await
    }

    pub async fn complete_upload(
        &self,
        id: Uuid,
        multipart: Option<(String, Vec<UploadedPart>)>,
    ) -> Result<CompleteUploadResponse> {
        let body = match multipart {
            Some((upload_id, parts)) => CompleteUploadRequest {
                upload_id: Some(upload_id),
                parts: Some(parts),
            },
            None => CompleteUploadRequest::default(),
        };
        let response = self
            .client
            .post(self.build_url(&format!("/media/{}/complete", id)))
            .json(&body)
            .send()
            .await
            .context("Failed to send completion request")?;
        parse_json(response).await
    }

    pub async fn get_media(&self, id: Uuid) -> Result<MediaResponse> {
        let response = self
            .client
            .get(self.build_url(&format!("/media/{}", id)))
            .send()
            .await
            .context("Failed to fetch media")?;
        parse_json(response).await
    }

    /// PUT bytes to a presigned URL and return the ETag the store answered with.
    pub async fn put_presigned(&self, url: &str, data: Vec<u8>) -> Result<String> {
        let response = self
            .client
            .put(url)
            .body(data)
            .send()
            .await
            .context("Failed to upload to presigned URL")?;
        let response = check_status(response).await?;

        let etag = response
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .unwrap_or_default();
        Ok(etag)
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    let message = serde_json::from_str::<serde_json::Value>(&error_text)
        .ok()
        .and_then(|v| v["error"].as_str().map(String::from))
        .unwrap_or(error_text);

    match retry_after {
        Some(secs) => Err(anyhow::anyhow!(
            "API request failed with status {}: {} (retry after {}s)",
            status,
            message,
            secs
        )),
        None => Err(anyhow::anyhow!(
            "API request failed with status {}: {}",
            status,
            message
        )),
    }
}

async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    check_status(response)
        .await?
        .json()
        .await
        .context("Failed to parse response as JSON")
}
