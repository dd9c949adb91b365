use crate::services::{
    catalog::CatalogError,
    claims::AuthError,
    presign::{CredentialError, PresignError},
    queue::QueueError,
    roles::RoleError,
    storage_service::StorageError,
    subscriptions::SubscriptionError,
    validator::ValidationError,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

const INTERNAL_MESSAGE: &str = "internal error";

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Log `err` and answer with an opaque 500.
    pub fn internal(err: impl fmt::Display) -> Self {
        tracing::error!(error = %err, "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_MESSAGE)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingUserId => AppError::bad_request(err.to_string()),
            other => AppError::forbidden(other.to_string()),
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::bad_request(err.to_string())
    }
}

impl From<PresignError> for AppError {
    fn from(err: PresignError) -> Self {
        match err {
            PresignError::InvalidPathSegment(_) => AppError::bad_request(err.to_string()),
            other => {
                tracing::error!(error = %other, "failed to sign upload URL");
                AppError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to generate presigned URL",
                )
            }
        }
    }
}

impl From<CredentialError> for AppError {
    fn from(err: CredentialError) -> Self {
        AppError::forbidden(err.to_string())
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ObjectNotFound { .. } => AppError::not_found("object not found"),
            StorageError::InvalidObjectKey | StorageError::InvalidBucketName { .. } => {
                AppError::bad_request(err.to_string())
            }
            other => AppError::internal(other),
        }
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        AppError::internal(err)
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::InvalidArgument(reason) => AppError::bad_request(reason),
            other => AppError::internal(other),
        }
    }
}

impl From<SubscriptionError> for AppError {
    fn from(err: SubscriptionError) -> Self {
        match err {
            SubscriptionError::AlreadySubscribed => AppError::conflict(err.to_string()),
            other => AppError::internal(other),
        }
    }
}

impl From<RoleError> for AppError {
    fn from(err: RoleError) -> Self {
        AppError::internal(err)
    }
}
