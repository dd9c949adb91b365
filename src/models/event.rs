//! Messages carried by the durable queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Queue receiving new-object notifications for the uploads bucket.
pub const OBJECT_CREATED_QUEUE: &str = "object-created";
/// Queue receiving extracted package metadata.
pub const APP_METADATA_QUEUE: &str = "app-metadata";

/// Notification that an object landed in a bucket.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ObjectCreatedEvent {
    pub bucket: String,
    pub key: String,
}

/// Result of extracting one uploaded archive.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PackageMetadataEvent {
    pub app_slug: String,
    pub version_id: String,
    /// Key prefix under which the extracted files were written.
    pub s3_file_path: String,
    pub upload_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub processed_files: Vec<String>,
    #[serde(default)]
    pub manifest_found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_content: Option<String>,
    /// Publisher the upload credential was issued to, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher_id: Option<String>,
}
