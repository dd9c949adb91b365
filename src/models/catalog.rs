//! Published app versions and the listing cursor.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One catalog row per processed package version.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub app_id: String,
    pub app_slug: String,
    pub version_id: String,
    pub publisher_id: String,
    pub upload_timestamp: DateTime<Utc>,
    pub version_number: i64,
    pub storage_path: String,
    pub app_name: String,
    pub app_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_content: Option<String>,
    #[serde(default)]
    pub processed_files: Vec<String>,
}

/// Storage shape of [`CatalogEntry`]; the file list is kept as JSON text.
#[derive(FromRow, Debug)]
pub struct CatalogRow {
    pub app_id: String,
    pub app_slug: String,
    pub version_id: String,
    pub publisher_id: String,
    pub upload_timestamp: DateTime<Utc>,
    pub version_number: i64,
    pub storage_path: String,
    pub app_name: String,
    pub app_description: String,
    pub manifest_content: Option<String>,
    pub processed_files: String,
}

impl TryFrom<CatalogRow> for CatalogEntry {
    type Error = serde_json::Error;

    fn try_from(row: CatalogRow) -> Result<Self, Self::Error> {
        Ok(Self {
            processed_files: serde_json::from_str(&row.processed_files)?,
            app_id: row.app_id,
            app_slug: row.app_slug,
            version_id: row.version_id,
            publisher_id: row.publisher_id,
            upload_timestamp: row.upload_timestamp,
            version_number: row.version_number,
            storage_path: row.storage_path,
            app_name: row.app_name,
            app_description: row.app_description,
            manifest_content: row.manifest_content,
        })
    }
}

/// Resume token for catalog listings: the last returned entry's id.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Cursor {
    #[serde(rename = "appId")]
    pub app_id: String,
}

/// One page of catalog results.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogPage {
    pub apps: Vec<CatalogEntry>,
    pub count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

impl CatalogPage {
    pub fn empty() -> Self {
        Self {
            apps: Vec::new(),
            count: 0,
            next_cursor: None,
        }
    }
}
