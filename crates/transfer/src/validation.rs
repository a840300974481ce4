use std::path::{Component, Path};

use crate::TransferError;

/// Validates a repository-relative resource path.
///
/// The path is joined onto the repository URL, so it must not be able to
/// climb out of it. Rejects:
/// - Empty paths
/// - Absolute paths (leading `/` or a Windows prefix)
/// - Parent directory traversal (`..`)
/// - Backslash separators and control characters
pub fn validate_resource_path(resource: &str) -> Result<(), TransferError> {
    if resource.trim().is_empty() {
        return Err(TransferError::InvalidPath("empty path".into()));
    }

    if resource.contains('\\') {
        return Err(TransferError::InvalidPath(format!(
            "backslash not allowed: {resource}"
        )));
    }

    if resource.chars().any(char::is_control) {
        return Err(TransferError::InvalidPath(format!(
            "control character not allowed: {resource:?}"
        )));
    }

    let path = Path::new(resource);

    if path.is_absolute() || resource.starts_with('/') {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {resource}"
        )));
    }

    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(TransferError::InvalidPath(format!(
                    "parent directory traversal not allowed: {resource}"
                )));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(TransferError::InvalidPath(format!(
                    "absolute path not allowed: {resource}"
                )));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(())
}
