//! HTTP handlers for object uploads and downloads.
//! Streams object bodies to avoid buffering in memory and delegates storage
//! concerns to `StorageService`.

use crate::{
    errors::AppError,
    models::{
        event::{OBJECT_CREATED_QUEUE, ObjectCreatedEvent},
        metadata::PUBLISHER_ID_KEY,
        object::StoredObject,
    },
    services::presign::{CredentialError, SignedParams},
    state::AppState,
};
use axum::{
    body::Body,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures::StreamExt;
use std::io;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

/// `PUT /objects/{bucket}/{*key}` with a presigned query string.
///
/// Each credential is good for one successful upload. The stored archive
/// carries the signed publisher id as object metadata and an object-created
/// event is queued for extraction. If either step fails the credential stays
/// usable.
pub async fn upload_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    params: Result<Query<SignedParams>, QueryRejection>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let Query(params) = params.map_err(|_| AppError::from(CredentialError::BadSignature))?;
    state.uploads.verify(&bucket, &key, &params, Utc::now())?;

    if !state.storage.record_upload_receipt(&bucket, &key).await? {
        return Err(AppError::conflict("upload credential already used"));
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let mut metadata = Vec::new();
    if !params.publisher.is_empty() {
        metadata.push((PUBLISHER_ID_KEY.to_string(), params.publisher.clone()));
    }

    let stored = store_and_notify(&state, &bucket, &key, content_type, &metadata, body).await;
    let object = match stored {
        Ok(object) => object,
        Err(err) => {
            // Without the queued event nothing would process the archive.
            if let Err(release_err) = state.storage.release_upload_receipt(&bucket, &key).await {
                warn!(
                    bucket = %bucket,
                    key = %key,
                    error = %release_err,
                    "failed to release upload receipt"
                );
            }
            return Err(err);
        }
    };
    info!(bucket = %bucket, key = %key, size_bytes = object.size_bytes, "archive uploaded");

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    if let Some(etag) = object.etag.as_ref() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
            response.headers_mut().insert(header::ETAG, value);
        }
    }
    Ok(response)
}

async fn store_and_notify(
    state: &AppState,
    bucket: &str,
    key: &str,
    content_type: Option<String>,
    metadata: &[(String, String)],
    body: Body,
) -> Result<StoredObject, AppError> {
    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));
    let object = state
        .storage
        .upload_object_stream(bucket, key, content_type, metadata, stream)
        .await?;

    state
        .queue
        .send_json(
            OBJECT_CREATED_QUEUE,
            &ObjectCreatedEvent {
                bucket: bucket.to_string(),
                key: key.to_string(),
            },
        )
        .await?;
    Ok(object)
}

/// `GET /objects/{bucket}/{*key}` as a streaming response. Only the apps
/// bucket is readable.
pub async fn get_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    if bucket != state.apps_bucket {
        return Err(AppError::not_found("object not found"));
    }
    let (meta, file) = state.storage.get_object_reader(&bucket, &key).await?;
    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &meta);

    Ok(response)
}

fn set_object_headers(headers: &mut HeaderMap, meta: &StoredObject) {
    let content_type = meta
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size_bytes.max(0)));

    if let Some(etag) = meta.etag.as_ref() {
        let quoted = format!("\"{}\"", etag);
        if let Ok(value) = HeaderValue::from_str(&quoted) {
            headers.insert(header::ETAG, value);
        }
    }

    if let Ok(value) = HeaderValue::from_str(&meta.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}
