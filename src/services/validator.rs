//! Pre-upload checks on a publish request. Pure; no I/O.

use crate::models::descriptor::{FileEntry, PackageDescriptor};
use thiserror::Error;

/// Name the model file must have inside the package.
pub const MODEL_FILENAME: &str = "model.onnx";
pub const MAX_MODEL_BYTES: u64 = 25 * 1024 * 1024;
pub const MAX_TOTAL_BYTES: u64 = 100 * 1024 * 1024;

const SCRIPT_TYPES: [&str; 2] = ["application/javascript", "application/wasm"];
const HTML_TYPE: &str = "text/html";

/// Reasons a descriptor is rejected. The display strings are returned to the
/// caller verbatim.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Manifest name is required")]
    MissingName,
    #[error("Manifest short name is required")]
    MissingShortName,
    #[error("Manifest start url is required")]
    MissingStartUrl,
    #[error("Manifest display is required")]
    MissingDisplay,
    #[error("Manifest icons are required")]
    MissingIcons,
    #[error("Files are required")]
    MissingFiles,
    #[error("Entrypoint is required")]
    MissingEntrypoint,
    #[error("Version notes are required")]
    MissingVersionNotes,
    #[error("Publisher id is required")]
    MissingPublisherId,
    #[error("The model.onnx file is required")]
    MissingModel,
    #[error("The model.onnx file size exceeds 25MB")]
    ModelTooLarge,
    #[error("Total file size exceeds reasonable limit")]
    PackageTooLarge,
    #[error("There must be at least one .js file or .wasm file")]
    MissingScript,
    #[error("There must be at least one html file")]
    MissingHtml,
    #[error("The entrypoint is not a valid file")]
    InvalidEntrypoint,
}

/// Run every check in order; the first failure wins.
pub fn validate(descriptor: &PackageDescriptor) -> Result<(), ValidationError> {
    validate_required_fields(descriptor)?;
    // Presence was checked above.
    let files = descriptor.files.as_deref().unwrap_or_default();
    validate_model(files)?;
    validate_total_size(files)?;
    validate_app_files(files)?;
    validate_entrypoint(&descriptor.entrypoint, files)
}

fn validate_required_fields(descriptor: &PackageDescriptor) -> Result<(), ValidationError> {
    let manifest = &descriptor.manifest;
    if manifest.name.is_empty() {
        return Err(ValidationError::MissingName);
    }
    if manifest.short_name.is_empty() {
        return Err(ValidationError::MissingShortName);
    }
    if manifest.start_url.is_empty() {
        return Err(ValidationError::MissingStartUrl);
    }
    if manifest.display.is_empty() {
        return Err(ValidationError::MissingDisplay);
    }
    if manifest.icons.is_none() {
        return Err(ValidationError::MissingIcons);
    }
    if descriptor.files.is_none() {
        return Err(ValidationError::MissingFiles);
    }
    if descriptor.entrypoint.is_empty() {
        return Err(ValidationError::MissingEntrypoint);
    }
    if descriptor.version_notes.is_empty() {
        return Err(ValidationError::MissingVersionNotes);
    }
    if descriptor.publisher_id.is_empty() {
        return Err(ValidationError::MissingPublisherId);
    }
    Ok(())
}

fn validate_model(files: &[FileEntry]) -> Result<(), ValidationError> {
    let model = files
        .iter()
        .rev()
        .find(|file| file.filename == MODEL_FILENAME)
        .ok_or(ValidationError::MissingModel)?;
    if model.size > MAX_MODEL_BYTES {
        return Err(ValidationError::ModelTooLarge);
    }
    Ok(())
}

fn validate_total_size(files: &[FileEntry]) -> Result<(), ValidationError> {
    let total = files
        .iter()
        .fold(0u64, |acc, file| acc.saturating_add(file.size));
    if total > MAX_TOTAL_BYTES {
        return Err(ValidationError::PackageTooLarge);
    }
    Ok(())
}

fn validate_app_files(files: &[FileEntry]) -> Result<(), ValidationError> {
    if !files
        .iter()
        .any(|file| SCRIPT_TYPES.contains(&file.mime_type.as_str()))
    {
        return Err(ValidationError::MissingScript);
    }
    if !files.iter().any(|file| file.mime_type == HTML_TYPE) {
        return Err(ValidationError::MissingHtml);
    }
    Ok(())
}

fn validate_entrypoint(entrypoint: &str, files: &[FileEntry]) -> Result<(), ValidationError> {
    if files.iter().any(|file| file.filename == entrypoint) {
        Ok(())
    } else {
        Err(ValidationError::InvalidEntrypoint)
    }
}
