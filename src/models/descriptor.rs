//! Publish request body describing a package before it is uploaded.

use serde::{Deserialize, Serialize};

/// Web app manifest fields declared alongside a publish request.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Manifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub short_name: String,
    #[serde(default)]
    pub start_url: String,
    #[serde(default)]
    pub display: String,
    #[serde(default)]
    pub description: String,
    /// `None` when the client sent `null` or omitted the field.
    #[serde(default)]
    pub icons: Option<Vec<Icon>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Icon {
    #[serde(default)]
    pub src: String,
    #[serde(default)]
    pub sizes: String,
    #[serde(default, rename = "type")]
    pub mime_type: String,
}

/// One file the client intends to ship in the archive.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct FileEntry {
    pub filename: String,
    /// Declared size in bytes.
    #[serde(default)]
    pub size: u64,
    #[serde(default, rename = "type")]
    pub mime_type: String,
}

/// Full publish request: manifest, file list and release details.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct PackageDescriptor {
    #[serde(default)]
    pub manifest: Manifest,
    #[serde(default)]
    pub files: Option<Vec<FileEntry>>,
    #[serde(default)]
    pub entrypoint: String,
    #[serde(default)]
    pub version_notes: String,
    #[serde(default)]
    pub publisher_id: String,
}
