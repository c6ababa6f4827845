use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::PARENT_MARKER_NAME;

/// One real filesystem object as seen by either peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    /// Absolute path on the peer that produced the listing.
    pub path: String,
    /// Size in bytes; always 0 for directories.
    #[serde(default)]
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    pub is_dir: bool,
}

impl FileEntry {
    /// Builds an entry from filesystem metadata.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let modified_at = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let is_dir = metadata.is_dir();

        Ok(Self {
            name,
            path: path.to_string_lossy().into_owned(),
            size: if is_dir { 0 } else { metadata.len() },
            modified_at,
            is_dir,
        })
    }

    /// Parent directory of this entry, if it has one.
    pub fn parent(&self) -> Option<&Path> {
        Path::new(&self.path).parent()
    }
}

/// A row in a directory listing.
///
/// The synthetic parent marker is its own variant so it can never be
/// mistaken for (or sent back as) a real file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ListingEntry {
    /// "Navigate to the containing directory".
    Parent { path: String },
    /// A real child of the listed directory.
    Entry(FileEntry),
}

impl ListingEntry {
    /// Name shown to the user.
    pub fn display_name(&self) -> &str {
        match self {
            ListingEntry::Parent { .. } => PARENT_MARKER_NAME,
            ListingEntry::Entry(entry) => &entry.name,
        }
    }

    /// Path this row points at.
    pub fn path(&self) -> &str {
        match self {
            ListingEntry::Parent { path } => path,
            ListingEntry::Entry(entry) => &entry.path,
        }
    }

    pub fn is_parent_marker(&self) -> bool {
        matches!(self, ListingEntry::Parent { .. })
    }

    /// Returns the real entry, or `None` for a marker.
    pub fn as_file(&self) -> Option<&FileEntry> {
        match self {
            ListingEntry::Entry(entry) => Some(entry),
            ListingEntry::Parent { .. } => None,
        }
    }
}
