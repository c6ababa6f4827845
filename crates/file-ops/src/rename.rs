use std::path::{Component, Path, PathBuf};

use crate::FileOpsError;

/// Checks that `name` is one plain path component.
pub fn validate_entry_name(name: &str) -> Result<(), FileOpsError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(c)), None) if c == name => Ok(()),
        _ => Err(FileOpsError::InvalidName(name.to_string())),
    }
}

/// Renames `path` within its parent directory and returns the new path.
///
/// An existing file at the target is replaced.
pub fn rename_entry(path: &Path, new_name: &str) -> Result<PathBuf, FileOpsError> {
    validate_entry_name(new_name)?;
    if std::fs::symlink_metadata(path).is_err() {
        return Err(FileOpsError::NotFound(path.to_path_buf()));
    }

    let parent = path
        .parent()
        .ok_or_else(|| FileOpsError::InvalidName(path.display().to_string()))?;
    let target = parent.join(new_name);
    std::fs::rename(path, &target)?;

    tracing::info!(from = %path.display(), to = %target.display(), "renamed entry");
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renames_in_place() {
        let tmp = tempfile::tempdir().unwrap();
        let old = tmp.path().join("draft.txt");
        std::fs::write(&old, "v1").unwrap();

        let new = rename_entry(&old, "final.txt").unwrap();
        assert_eq!(new, tmp.path().join("final.txt"));
        assert!(!old.exists());
        assert_eq!(std::fs::read_to_string(new).unwrap(), "v1");
    }

    #[test]
    fn existing_target_is_replaced() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("a.txt");
        let dst = tmp.path().join("b.txt");
        std::fs::write(&src, "new").unwrap();
        std::fs::write(&dst, "old").unwrap();

        rename_entry(&src, "b.txt").unwrap();
        assert_eq!(std::fs::read_to_string(&dst).unwrap(), "new");
    }

    #[test]
    fn renames_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("old");
        std::fs::create_dir_all(dir.join("inner")).unwrap();

        let new = rename_entry(&dir, "new").unwrap();
        assert!(new.join("inner").is_dir());
    }

    #[test]
    fn rejects_names_with_structure() {
        for bad in ["", ".", "..", "a/b", "/abs", "../up"] {
            assert!(
                matches!(validate_entry_name(bad), Err(FileOpsError::InvalidName(_))),
                "{bad:?} accepted"
            );
        }
        assert!(validate_entry_name("report v2.pdf").is_ok());
        assert!(validate_entry_name(".env").is_ok());
    }

    #[test]
    fn missing_source() {
        let tmp = tempfile::tempdir().unwrap();
        let result = rename_entry(&tmp.path().join("ghost"), "x");
        assert!(matches!(result, Err(FileOpsError::NotFound(_))));
    }
}
