//! Best-effort removal of files and directory trees.

use std::path::{Path, PathBuf};

use crate::FileOpsError;

/// Result of removing one entry of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveReport {
    pub path: PathBuf,
    /// `None` on success.
    pub error: Option<String>,
}

impl RemoveReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Removes a file, or a directory with everything under it.
///
/// Symlinks are removed themselves, never followed.
pub fn remove_entry(path: &Path) -> Result<(), FileOpsError> {
    let metadata = std::fs::symlink_metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => FileOpsError::NotFound(path.to_path_buf()),
        _ => FileOpsError::Io(e),
    })?;

    if metadata.is_dir() {
        std::fs::remove_dir_all(path)?;
    } else {
        std::fs::remove_file(path)?;
    }

    tracing::info!(path = %path.display(), dir = metadata.is_dir(), "removed entry");
    Ok(())
}

/// Removes every path independently; one failure never stops the batch.
pub fn remove_entries<P: AsRef<Path>>(paths: &[P]) -> Vec<RemoveReport> {
    paths
        .iter()
        .map(|p| {
            let path = p.as_ref();
            let error = remove_entry(path).err().map(|e| {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove entry");
                e.to_string()
            });
            RemoveReport {
                path: path.to_path_buf(),
                error,
            }
        })
        .collect()
}
