//! Credential record storage.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::hash::KdfParams;

/// One account as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    pub username: String,
    /// Hex-encoded scrypt output.
    pub password_hash: String,
    /// Hex-encoded salt.
    pub salt: String,
    #[serde(default)]
    pub kdf: KdfParams,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt credential file: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("username already registered: {0}")]
    Duplicate(String),

    #[error("credential store lock poisoned")]
    Poisoned,
}

/// Persistence seam behind the credential gate.
///
/// `insert` must refuse a username that already has a record, atomically
/// with respect to concurrent inserts.
pub trait CredentialStore: Send + Sync {
    /// Returns every record stored under `username`.
    fn find_by_username(&self, username: &str) -> Result<Vec<CredentialRecord>, StoreError>;

    fn insert(&self, record: CredentialRecord) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Volatile store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<CredentialRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the store without duplicate checks.
    pub fn with_records(records: Vec<CredentialRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }
}

impl CredentialStore for MemoryStore {
    fn find_by_username(&self, username: &str) -> Result<Vec<CredentialRecord>, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(matching(&records, username))
    }

    fn insert(&self, record: CredentialRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        if records.iter().any(|r| r.username == record.username) {
            return Err(StoreError::Duplicate(record.username));
        }
        records.push(record);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JsonFileStore
// ---------------------------------------------------------------------------

/// Store backed by a JSON array on disk.
///
/// The file is rewritten in full on every insert through a temporary file
/// and a rename, and is readable only by its owner on Unix.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    records: Mutex<Vec<CredentialRecord>>,
}

impl JsonFileStore {
    /// Opens `path`, starting empty if the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            Vec::new()
        };

        tracing::debug!(path = %path.display(), records = records.len(), "credential store opened");
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, records: &[CredentialRecord]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(records)?;
        std::fs::write(&tmp, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }

        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl CredentialStore for JsonFileStore {
    fn find_by_username(&self, username: &str) -> Result<Vec<CredentialRecord>, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(matching(&records, username))
    }

    fn insert(&self, record: CredentialRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        if records.iter().any(|r| r.username == record.username) {
            return Err(StoreError::Duplicate(record.username));
        }

        records.push(record);
        if let Err(e) = self.persist(&records) {
            records.pop();
            return Err(e);
        }
        tracing::info!(path = %self.path.display(), records = records.len(), "credential store saved");
        Ok(())
    }
}

fn matching(records: &[CredentialRecord], username: &str) -> Vec<CredentialRecord> {
    records
        .iter()
        .filter(|r| r.username == username)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(username: &str, hash: &str) -> CredentialRecord {
        CredentialRecord {
            username: username.into(),
            password_hash: hash.into(),
            salt: "00".repeat(16),
            kdf: KdfParams::default(),
        }
    }

    #[test]
    fn memory_store_rejects_duplicates() {
        let store = MemoryStore::new();
        store.insert(record("alice", "aa")).unwrap();
        let err = store.insert(record("alice", "bb")).unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(ref u) if u == "alice"));

        let found = store.find_by_username("alice").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].password_hash, "aa");
        assert!(store.find_by_username("bob").unwrap().is_empty());
    }

    #[test]
    fn json_store_persists_across_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("users.json");

        let store = JsonFileStore::open(&path).unwrap();
        store.insert(record("alice", "aa")).unwrap();
        store.insert(record("bob", "bb")).unwrap();
        drop(store);

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.find_by_username("bob").unwrap()[0].password_hash, "bb");
        assert!(matches!(
            reopened.insert(record("alice", "cc")),
            Err(StoreError::Duplicate(_))
        ));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn json_store_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("users.json");
        let store = JsonFileStore::open(&path).unwrap();
        store.insert(record("alice", "aa")).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn json_store_keeps_hand_edited_duplicates() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("users.json");
        let both = vec![record("carol", "aa"), record("carol", "bb")];
        std::fs::write(&path, serde_json::to_string(&both).unwrap()).unwrap();

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.find_by_username("carol").unwrap().len(), 2);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("users.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            JsonFileStore::open(&path),
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn missing_kdf_field_defaults() {
        let json = r#"{"username":"old","passwordHash":"aa","salt":"bb"}"#;
        let parsed: CredentialRecord = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.kdf, KdfParams::default());
    }
}
