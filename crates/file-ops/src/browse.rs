//! Directory listings sent to clients.

use std::path::Path;

use nimbus_protocol::{FileEntry, ListingEntry};

use crate::FileOpsError;

/// Lists the immediate children of `path`.
///
/// Directories come first, then files, each group sorted by
/// case-insensitive name. A non-root listing starts with a
/// [`ListingEntry::Parent`] marker; the storage root has none. Entries that
/// vanish between enumeration and the metadata read are skipped.
pub fn list_directory(path: &Path, is_root: bool) -> Result<Vec<ListingEntry>, FileOpsError> {
    let metadata = std::fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => FileOpsError::NotFound(path.to_path_buf()),
        _ => FileOpsError::Io(e),
    })?;
    if !metadata.is_dir() {
        return Err(FileOpsError::NotADirectory(path.to_path_buf()));
    }

    let mut children: Vec<FileEntry> = std::fs::read_dir(path)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| FileEntry::from_path(&entry.path()).ok())
        .collect();

    children.sort_by(|a, b| {
        b.is_dir
            .cmp(&a.is_dir)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });

    let mut listing = Vec::with_capacity(children.len() + 1);
    if !is_root {
        let parent = path.parent().unwrap_or(path);
        listing.push(ListingEntry::Parent {
            path: parent.to_string_lossy().into_owned(),
        });
    }
    listing.extend(children.into_iter().map(ListingEntry::Entry));

    tracing::debug!(path = %path.display(), entries = listing.len(), "listed directory");
    Ok(listing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_root_listing_has_marker_then_dirs_then_files() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("alice").join("photos");
        std::fs::create_dir_all(dir.join("trips")).unwrap();
        std::fs::write(dir.join("cover.jpg"), "jpg").unwrap();

        let listing = list_directory(&dir, false).unwrap();

        assert_eq!(listing.len(), 3);
        assert_eq!(
            listing[0],
            ListingEntry::Parent {
                path: tmp.path().join("alice").to_string_lossy().into_owned()
            }
        );
        assert_eq!(listing[1].display_name(), "trips");
        assert!(listing[1].as_file().unwrap().is_dir);
        assert_eq!(listing[2].display_name(), "cover.jpg");
        assert_eq!(listing[2].as_file().unwrap().size, 3);
    }

    #[test]
    fn root_listing_has_no_marker() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("docs")).unwrap();
        std::fs::write(tmp.path().join("a.txt"), "a").unwrap();

        let listing = list_directory(tmp.path(), true).unwrap();
        assert_eq!(listing.len(), 2);
        assert!(listing.iter().all(|e| !e.is_parent_marker()));
    }

    #[test]
    fn groups_sorted_case_insensitive() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path();
        std::fs::create_dir(base.join("Zeta")).unwrap();
        std::fs::create_dir(base.join("alpha")).unwrap();
        std::fs::write(base.join("b.txt"), "").unwrap();
        std::fs::write(base.join("A.txt"), "").unwrap();

        let names: Vec<String> = list_directory(base, true)
            .unwrap()
            .iter()
            .map(|e| e.display_name().to_string())
            .collect();
        assert_eq!(names, vec!["alpha", "Zeta", "A.txt", "b.txt"]);
    }

    #[test]
    fn empty_non_root_is_marker_only() {
        let tmp = tempfile::tempdir().unwrap();
        let empty = tmp.path().join("empty");
        std::fs::create_dir(&empty).unwrap();

        let listing = list_directory(&empty, false).unwrap();
        assert_eq!(listing.len(), 1);
        assert!(listing[0].is_parent_marker());
    }

    #[test]
    fn missing_directory() {
        let result = list_directory(Path::new("/definitely/not/real"), false);
        assert!(matches!(result, Err(FileOpsError::NotFound(_))));
    }

    #[test]
    fn file_is_not_a_directory() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let result = list_directory(tmp.path(), false);
        assert!(matches!(result, Err(FileOpsError::NotADirectory(_))));
    }
}
