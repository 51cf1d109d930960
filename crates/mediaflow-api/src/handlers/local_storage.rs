//! Signed direct-upload target for the local storage backend.
//!
//! Plays the part of the object store's PUT endpoint: the presigned URLs the
//! local backend issues point here.

use crate::error::HttpAppError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use mediaflow_core::AppError;
use mediaflow_storage::PresignedTarget;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct SignedUploadQuery {
    pub expires: i64,
    pub signature: String,
    pub upload_id: Option<String>,
    pub part_number: Option<u32>,
}

#[tracing::instrument(skip(state, query, body), fields(bucket = %bucket, key = %key, part_number = ?query.part_number))]
pub async fn put_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    Query(query): Query<SignedUploadQuery>,
    body: Body,
) -> Result<Response, HttpAppError> {
    let local = state.local_storage.as_ref().ok_or_else(|| {
        AppError::NotFound("Local storage uploads are not enabled".to_string())
    })?;

    let target = PresignedTarget {
        bucket,
        key,
        upload_id: query.upload_id,
        part_number: query.part_number,
    };
    local.verify_presigned(&target, query.expires, &query.signature)?;

    let stream = Box::pin(body.into_data_stream().map_err(std::io::Error::other));
    let etag = local.put_presigned(&target, stream).await?;

    let mut response = StatusCode::OK.into_response();
    if let Ok(value) = HeaderValue::from_str(&etag) {
        response.headers_mut().insert(header::ETAG, value);
    }
    Ok(response)
}
