//! Rendering of `AppError` as JSON error responses.
//!
//! Handlers return `Result<impl IntoResponse, HttpAppError>`. Anything that
//! converts into `AppError` converts into `HttpAppError` and renders as the
//! JSON `ErrorResponse` below.

use crate::constants::BUSY_RETRY_AFTER_SECS;
use axum::{
    extract::rejection::JsonRejection,
    extract::{FromRequest, Request},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use mediaflow_core::{AppError, ErrorMetadata, LogLevel};
use mediaflow_db::RecordStoreError;
use mediaflow_storage::StorageError;
use mediaflow_worker::DispatchError;
use serde::{de::DeserializeOwned, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Stable code such as `BUSY` or `UPLOAD_MERGE_FAILED`
    pub code: String,
    /// True when the same request may succeed later
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

/// Wrapper so `AppError` (from mediaflow-core) can implement `IntoResponse`
#[derive(Debug)]
pub struct HttpAppError(pub AppError);

impl From<AppError> for HttpAppError {
    fn from(err: AppError) -> Self {
        HttpAppError(err)
    }
}

impl From<anyhow::Error> for HttpAppError {
    fn from(err: anyhow::Error) -> Self {
        HttpAppError(AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        })
    }
}

impl From<RecordStoreError> for HttpAppError {
    fn from(err: RecordStoreError) -> Self {
        HttpAppError(err.into())
    }
}

impl From<DispatchError> for HttpAppError {
    fn from(err: DispatchError) -> Self {
        HttpAppError(err.into())
    }
}

impl From<StorageError> for HttpAppError {
    fn from(err: StorageError) -> Self {
        let app = match err {
            StorageError::NotFound(msg) => AppError::NotFound(msg),
            StorageError::InvalidKey(msg) | StorageError::InvalidSignature(msg) => {
                AppError::InvalidArgument(msg)
            }
            StorageError::MultipartRejected(msg) => AppError::UploadMergeError(msg),
            StorageError::IoError(err) => AppError::Internal(format!("IO error: {}", err)),
            StorageError::ConfigError(msg) => AppError::Internal(msg),
            other => AppError::StorageUnavailable(other.to_string()),
        };
        HttpAppError(app)
    }
}

/// Malformed JSON bodies are a 400 like any other bad input.
impl From<JsonRejection> for HttpAppError {
    fn from(rejection: JsonRejection) -> Self {
        HttpAppError(AppError::InvalidArgument(format!(
            "Invalid request body: {}",
            rejection.body_text()
        )))
    }
}

/// JSON body extractor that answers with `ErrorResponse` instead of axum's
/// plain-text rejection.
#[derive(Debug, Clone, Copy)]
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = HttpAppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(inner) = Json::<T>::from_request(req, state)
            .await
            .map_err(HttpAppError::from)?;
        Ok(ValidatedJson(inner))
    }
}

fn log_error(error: &AppError) {
    let error_type = error.error_type();
    match error.log_level() {
        LogLevel::Debug => {
            tracing::debug!(error = %error, error_type = error_type, "Error occurred");
        }
        LogLevel::Warn => {
            tracing::warn!(error = %error, error_type = error_type, "Error occurred");
        }
        LogLevel::Error => {
            tracing::error!(error = %error, error_type = error_type, "Error occurred");
        }
    }
}

fn is_production_env() -> bool {
    std::env::var("ENVIRONMENT")
        .or_else(|_| std::env::var("APP_ENV"))
        .map(|env| env.to_lowercase() == "production" || env.to_lowercase() == "prod")
        .unwrap_or(false)
}

impl IntoResponse for HttpAppError {
    fn into_response(self) -> Response {
        let app_error = &self.0;

        let status = StatusCode::from_u16(app_error.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        log_error(app_error);

        let show_details = !is_production_env() && !app_error.is_sensitive();
        let body = Json(ErrorResponse {
            error: app_error.client_message(),
            details: show_details.then(|| app_error.detailed_message()),
            error_type: show_details.then(|| app_error.error_type().to_string()),
            code: app_error.error_code().to_string(),
            recoverable: app_error.is_recoverable(),
            suggested_action: app_error.suggested_action().map(String::from),
        });

        let mut response = (status, body).into_response();
        if matches!(app_error, AppError::Busy(_)) {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(BUSY_RETRY_AFTER_SECS),
            );
        }
        response
    }
}
