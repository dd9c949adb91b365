//! `POST /publish/{app_slug}/version/{version_id}`: validate a package
//! descriptor and hand out a presigned upload URL for the archive.

use crate::{
    errors::AppError,
    handlers::auth::request_claims,
    models::{claims::Role, descriptor::PackageDescriptor},
    services::{claims::authorize, validator::validate},
    state::AppState,
};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub message: &'static str,
    pub presigned_url: String,
    pub upload_key: String,
    pub expires_at: DateTime<Utc>,
}

pub async fn publish_app(
    State(state): State<AppState>,
    Path((app_slug, version_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PublishResponse>, AppError> {
    let claims = request_claims(&headers)?;
    authorize(&claims, Role::Publisher)?;

    let descriptor: PackageDescriptor = serde_json::from_slice(&body)
        .map_err(|_| AppError::bad_request("Invalid request body"))?;
    if app_slug.is_empty() || version_id.is_empty() {
        return Err(AppError::bad_request(
            "app-slug and version-id are required in the URL path",
        ));
    }
    validate(&descriptor)?;

    let credential =
        state
            .uploads
            .issue_upload_credential(&app_slug, &version_id, &descriptor.publisher_id)?;
    info!(
        app_slug = %app_slug,
        version_id = %version_id,
        publisher_id = %descriptor.publisher_id,
        key = %credential.key,
        "issued upload URL"
    );

    Ok(Json(PublishResponse {
        message: "Presigned URL generated successfully",
        presigned_url: credential.url,
        upload_key: credential.key,
        expires_at: credential.expires_at,
    }))
}
