use std::path::{Component, Path};

use crate::TransferError;

/// Checks an incoming chunk's `relative_path` before anything is written.
///
/// The path must be non-empty and built only from plain names (`.` is
/// tolerated). A `..` anywhere, a leading root or a drive/UNC prefix would
/// let the chunk land outside its destination root, so those fail with
/// [`TransferError::InvalidPath`].
pub fn validate_relative_path(relative: &str) -> Result<(), TransferError> {
    if relative.is_empty() {
        return Err(TransferError::InvalidPath("empty relative path".into()));
    }

    let path = Path::new(relative);
    if path.is_absolute() {
        return Err(TransferError::InvalidPath(format!(
            "absolute path not allowed: {relative}"
        )));
    }

    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(TransferError::InvalidPath(format!(
                    "parent traversal not allowed: {relative}"
                )));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(TransferError::InvalidPath(format!(
                    "rooted path not allowed: {relative}"
                )));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    Ok(())
}

/// Returns `path` relative to `root` with `/` separators.
///
/// An empty string means `path` is `root` itself.
pub fn relative_to(path: &Path, root: &Path) -> Result<String, TransferError> {
    let rel = path.strip_prefix(root).map_err(|_| {
        TransferError::InvalidPath(format!(
            "{} is outside {}",
            path.display(),
            root.display()
        ))
    })?;

    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}
