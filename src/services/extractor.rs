//! Package extraction: turns an uploaded archive into stored app files and a
//! metadata event.
//!
//! Destination keys depend only on the layout, the app slug, the version and
//! the entry path, so reprocessing an archive overwrites the same objects.

use crate::{
    models::{
        event::{APP_METADATA_QUEUE, PackageMetadataEvent},
        metadata::PUBLISHER_ID_KEY,
    },
    services::{
        presign::UPLOADS_PREFIX,
        queue::{EventQueue, QueueError},
        storage_service::{BlobStore, StorageError},
        validator::MAX_TOTAL_BYTES,
    },
};
use bytes::Bytes;
use chrono::Utc;
use std::{
    fmt,
    io::{self, Cursor, Read},
    path::{Component, Path},
    str::FromStr,
    sync::Arc,
};
use thiserror::Error;
use tracing::{debug, info, warn};
use zip::ZipArchive;

const MANIFEST_FILENAME: &str = "manifest.json";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Where extracted files are written in the apps bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageLayout {
    /// `app/{slug}/{path}`; each upload replaces the live files.
    #[default]
    Flat,
    /// `apps/{slug}/{version}/{path}`; versions are kept side by side.
    Versioned,
}

impl StorageLayout {
    /// Key prefix (with trailing `/`) for one app version.
    pub fn prefix(&self, app_slug: &str, version_id: &str) -> String {
        match self {
            StorageLayout::Flat => format!("app/{}/", app_slug),
            StorageLayout::Versioned => format!("apps/{}/{}/", app_slug, version_id),
        }
    }

    pub fn destination_key(&self, app_slug: &str, version_id: &str, entry_path: &str) -> String {
        format!("{}{}", self.prefix(app_slug, version_id), entry_path)
    }
}

impl FromStr for StorageLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flat" => Ok(StorageLayout::Flat),
            "versioned" => Ok(StorageLayout::Versioned),
            other => Err(format!(
                "unknown storage layout `{}` (expected flat or versioned)",
                other
            )),
        }
    }
}

impl fmt::Display for StorageLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageLayout::Flat => f.write_str("flat"),
            StorageLayout::Versioned => f.write_str("versioned"),
        }
    }
}

/// MIME type for a file name, by extension.
pub fn content_type_for(name: &str) -> &'static str {
    let base = name.rsplit('/').next().unwrap_or(name);
    let ext = match base.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => return DEFAULT_CONTENT_TYPE,
    };
    match ext.as_str() {
        "html" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "svg" => "image/svg+xml",
        "onnx" => "application/octet-stream",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

/// Components of `uploads/{app_slug}/{version_id}/{file}`.
#[derive(Debug, PartialEq, Eq)]
pub struct UploadKey<'a> {
    pub app_slug: &'a str,
    pub version_id: &'a str,
    pub file_name: &'a str,
}

/// Split a raw archive key. `None` unless it has exactly four non-empty
/// segments and starts with `uploads`.
pub fn parse_upload_key(key: &str) -> Option<UploadKey<'_>> {
    let parts: Vec<&str> = key.split('/').collect();
    match parts.as_slice() {
        [prefix, app_slug, version_id, file_name]
            if *prefix == UPLOADS_PREFIX
                && !app_slug.is_empty()
                && !version_id.is_empty()
                && !file_name.is_empty() =>
        {
            Some(UploadKey {
                app_slug,
                version_id,
                file_name,
            })
        }
        _ => None,
    }
}

/// Relative `/`-joined path for an entry whose name the archive reader
/// resolved inside the package root. `.` components are dropped; `None` for
/// `..` components, non UTF-8 names and empty paths.
fn relative_entry_path(enclosed: &Path) -> Option<String> {
    let mut components = Vec::new();
    for component in enclosed.components() {
        match component {
            Component::Normal(part) => components.push(part.to_str()?),
            Component::CurDir => continue,
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if components.is_empty() {
        None
    } else {
        Some(components.join("/"))
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to fetch archive {bucket}/{key}: {source}")]
    Fetch {
        bucket: String,
        key: String,
        #[source]
        source: StorageError,
    },
    #[error("failed to open archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("archive entry `{0}` escapes the package root")]
    UnsafeEntry(String),
    #[error("package contents exceed {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("failed to read archive entry `{name}`: {source}")]
    ReadEntry {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to store extracted file {key}: {source}")]
    Store {
        key: String,
        #[source]
        source: StorageError,
    },
    #[error("failed to encode metadata event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to send metadata event: {0}")]
    Emit(#[from] QueueError),
}

#[derive(Debug, PartialEq)]
pub enum ExtractOutcome {
    /// The key did not look like an uploaded archive.
    Skipped,
    Processed(PackageMetadataEvent),
}

/// Unzips uploaded archives into the apps bucket.
#[derive(Clone)]
pub struct PackageExtractor {
    store: Arc<dyn BlobStore>,
    queue: Arc<dyn EventQueue>,
    apps_bucket: String,
    layout: StorageLayout,
    max_package_bytes: u64,
}

impl PackageExtractor {
    pub fn new(
        store: Arc<dyn BlobStore>,
        queue: Arc<dyn EventQueue>,
        apps_bucket: impl Into<String>,
        layout: StorageLayout,
    ) -> Self {
        Self {
            store,
            queue,
            apps_bucket: apps_bucket.into(),
            layout,
            max_package_bytes: MAX_TOTAL_BYTES,
        }
    }

    /// Cap on the total uncompressed size of one package.
    pub fn with_size_limit(mut self, max_package_bytes: u64) -> Self {
        self.max_package_bytes = max_package_bytes;
        self
    }

    /// Process one new-object notification.
    ///
    /// Errors before the metadata event is sent are returned so the
    /// notification is redelivered. Failing to delete the source archive
    /// afterwards is only logged.
    pub async fn process(&self, bucket: &str, key: &str) -> Result<ExtractOutcome, ExtractError> {
        info!(bucket, key, "processing uploaded archive");

        let Some(upload) = parse_upload_key(key) else {
            info!(key, "invalid upload key format, skipping");
            return Ok(ExtractOutcome::Skipped);
        };
        if !upload.file_name.to_ascii_lowercase().ends_with(".zip") {
            info!(key, "upload is not a zip archive, skipping");
            return Ok(ExtractOutcome::Skipped);
        }

        let fetch_err = |source| ExtractError::Fetch {
            bucket: bucket.to_string(),
            key: key.to_string(),
            source,
        };
        let body = self.store.get(bucket, key).await.map_err(fetch_err)?;
        let publisher_id = self
            .store
            .metadata(bucket, key)
            .await
            .map_err(fetch_err)?
            .remove(PUBLISHER_ID_KEY);

        let mut archive = ZipArchive::new(Cursor::new(body))?;
        let mut processed_files = Vec::with_capacity(archive.len());
        // (depth, content); the shallowest manifest wins.
        let mut manifest: Option<(usize, String)> = None;
        let mut remaining = self.max_package_bytes;
        let too_large = || ExtractError::TooLarge {
            limit: self.max_package_bytes,
        };

        for index in 0..archive.len() {
            let (entry_path, contents) = {
                let mut entry = archive.by_index(index)?;
                if entry.is_dir() {
                    continue;
                }
                let name = entry.name().to_string();
                let entry_path = entry
                    .enclosed_name()
                    .as_deref()
                    .and_then(relative_entry_path)
                    .ok_or_else(|| ExtractError::UnsafeEntry(name.clone()))?;
                // The declared size is untrusted; it only allows an early exit.
                if entry.size() > remaining {
                    return Err(too_large());
                }
                let mut contents = Vec::new();
                entry
                    .by_ref()
                    .take(remaining.saturating_add(1))
                    .read_to_end(&mut contents)
                    .map_err(|source| ExtractError::ReadEntry { name, source })?;
                let read = contents.len() as u64;
                if read > remaining {
                    return Err(too_large());
                }
                remaining -= read;
                (entry_path, contents)
            };

            let base_name = entry_path.rsplit('/').next().unwrap_or(&entry_path);
            if base_name.to_ascii_lowercase() == MANIFEST_FILENAME {
                let depth = entry_path.matches('/').count();
                if manifest.as_ref().is_none_or(|(found, _)| depth < *found) {
                    manifest = Some((depth, String::from_utf8_lossy(&contents).into_owned()));
                }
            }

            let dest_key = self
                .layout
                .destination_key(upload.app_slug, upload.version_id, &entry_path);
            let content_type = content_type_for(&entry_path);
            self.store
                .put(&self.apps_bucket, &dest_key, content_type, Bytes::from(contents))
                .await
                .map_err(|source| ExtractError::Store {
                    key: dest_key.clone(),
                    source,
                })?;
            debug!(key = %dest_key, content_type, "stored extracted file");
            processed_files.push(dest_key);
        }

        let event = PackageMetadataEvent {
            app_slug: upload.app_slug.to_string(),
            version_id: upload.version_id.to_string(),
            s3_file_path: self.layout.prefix(upload.app_slug, upload.version_id),
            upload_timestamp: Utc::now(),
            processed_files,
            manifest_found: manifest.is_some(),
            manifest_content: manifest.map(|(_, content)| content),
            publisher_id,
        };
        let body = serde_json::to_string(&event)?;
        self.queue.send(APP_METADATA_QUEUE, body).await?;
        info!(
            app_slug = %event.app_slug,
            version_id = %event.version_id,
            files = event.processed_files.len(),
            manifest_found = event.manifest_found,
            "extracted package"
        );

        match self.store.delete(bucket, key).await {
            Ok(()) => info!(key, "deleted source archive"),
            Err(err) => warn!(key, error = %err, "failed to delete source archive"),
        }

        Ok(ExtractOutcome::Processed(event))
    }
}
