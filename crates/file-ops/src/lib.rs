//! Filesystem operations behind the storage session.
//!
//! Listing, renaming and deleting entries, plus the containment check
//! that keeps client-supplied paths inside a storage root.

mod browse;
mod delete;
mod rename;
mod scope;

use std::path::PathBuf;

pub use browse::list_directory;
pub use delete::{RemoveReport, remove_entries, remove_entry};
pub use rename::{rename_entry, validate_entry_name};
pub use scope::{ensure_within, resolve_entry, resolve_in_root};

/// Errors produced by filesystem operations.
#[derive(Debug, thiserror::Error)]
pub enum FileOpsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("invalid entry name: {0:?}")]
    InvalidName(String),

    #[error("path escapes storage root: {}", .0.display())]
    OutsideRoot(PathBuf),
}
