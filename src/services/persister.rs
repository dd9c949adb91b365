//! Turns package metadata events into catalog entries.

use crate::{
    models::{catalog::CatalogEntry, event::PackageMetadataEvent},
    services::catalog::{CatalogError, CatalogStore},
};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Version number given to every new catalog entry.
const INITIAL_VERSION_NUMBER: i64 = 1;

#[derive(Debug, Error)]
pub enum PersistError {
    /// The message can never be processed; it should be dropped.
    #[error("malformed metadata event: {0}")]
    Malformed(String),
    #[error("failed to write catalog entry: {0}")]
    Store(#[from] CatalogError),
}

/// The manifest fields that override catalog display data.
#[derive(Deserialize)]
struct ManifestDisplay {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Clone)]
pub struct MetadataPersister {
    store: Arc<dyn CatalogStore>,
}

impl MetadataPersister {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self {
        Self { store }
    }

    /// Decode one raw `app-metadata` message and write its catalog entry.
    ///
    /// Every call writes a new entry with a fresh app id, so redelivered
    /// events produce duplicate rows.
    pub async fn consume(&self, raw_body: &str) -> Result<CatalogEntry, PersistError> {
        let event: PackageMetadataEvent = serde_json::from_str(raw_body)
            .map_err(|err| PersistError::Malformed(err.to_string()))?;
        if event.app_slug.is_empty() {
            return Err(PersistError::Malformed("app_slug is empty".into()));
        }

        let entry = build_entry(event);
        self.store.insert(&entry).await?;
        info!(
            app_id = %entry.app_id,
            app_slug = %entry.app_slug,
            version_id = %entry.version_id,
            "catalog entry written"
        );
        Ok(entry)
    }
}

fn build_entry(event: PackageMetadataEvent) -> CatalogEntry {
    let mut app_name = event.app_slug.clone();
    let mut app_description = String::new();

    if let Some(content) = event.manifest_content.as_deref().filter(|_| event.manifest_found) {
        match serde_json::from_str::<ManifestDisplay>(content) {
            Ok(manifest) => {
                if let Some(name) = manifest.name.filter(|name| !name.is_empty()) {
                    app_name = name;
                }
                if let Some(description) = manifest.description.filter(|d| !d.is_empty()) {
                    app_description = description;
                }
            }
            Err(err) => {
                debug!(app_slug = %event.app_slug, error = %err, "manifest is not valid JSON")
            }
        }
    }

    CatalogEntry {
        app_id: Uuid::new_v4().to_string(),
        app_slug: event.app_slug,
        version_id: event.version_id,
        publisher_id: event.publisher_id.unwrap_or_default(),
        upload_timestamp: event.upload_timestamp,
        version_number: INITIAL_VERSION_NUMBER,
        storage_path: event.s3_file_path,
        app_name,
        app_description,
        manifest_content: event.manifest_content,
        processed_files: event.processed_files,
    }
}
