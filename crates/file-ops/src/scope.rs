use std::path::{Path, PathBuf};

use crate::FileOpsError;

/// Canonicalizes `candidate` and checks that it lies inside `root`.
///
/// Both paths must exist. Symlinks are resolved before the check, so a link
/// pointing out of the root is rejected.
pub fn ensure_within(root: &Path, candidate: &Path) -> Result<PathBuf, FileOpsError> {
    let root = std::fs::canonicalize(root)?;
    let resolved = std::fs::canonicalize(candidate).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => FileOpsError::NotFound(candidate.to_path_buf()),
        _ => FileOpsError::Io(e),
    })?;

    if !resolved.starts_with(&root) {
        return Err(FileOpsError::OutsideRoot(candidate.to_path_buf()));
    }
    Ok(resolved)
}

/// Resolves a client-supplied path string against `root`.
///
/// An empty string names the root itself; relative strings are joined to it.
pub fn resolve_in_root(root: &Path, requested: &str) -> Result<PathBuf, FileOpsError> {
    if requested.is_empty() {
        return ensure_within(root, root);
    }
    ensure_within(root, &root.join(requested))
}

/// Resolves an entry that will itself be modified (renamed or removed).
///
/// Only the parent is canonicalized, so a symlink entry names the link and
/// not its target. The storage root itself is never a valid entry.
pub fn resolve_entry(root: &Path, candidate: &Path) -> Result<PathBuf, FileOpsError> {
    let name = candidate
        .file_name()
        .ok_or_else(|| FileOpsError::InvalidName(candidate.display().to_string()))?;
    let parent = candidate
        .parent()
        .ok_or_else(|| FileOpsError::OutsideRoot(candidate.to_path_buf()))?;

    let parent = ensure_within(root, parent).map_err(|e| match e {
        FileOpsError::NotFound(_) => FileOpsError::NotFound(candidate.to_path_buf()),
        other => other,
    })?;
    Ok(parent.join(name))
}
