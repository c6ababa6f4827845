use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::{FileEntry, ListingEntry};

/// Every value that may cross the wire.
///
/// The set is closed: a frame whose `type` is not listed here fails to
/// decode, which the transport treats as fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Message {
    AuthRequest(AuthRequest),
    AuthResponse(AuthResponse),
    DirectoryListRequest(DirectoryListRequest),
    DirectoryListResponse(DirectoryListResponse),
    FileFetchRequest(FileFetchRequest),
    TransferChunk(TransferChunk),
    DeleteRequest(DeleteRequest),
    RenameRequest(RenameRequest),
    /// Sent by the client to announce logout, echoed by the server to confirm.
    LogoutRequest,
}

impl Message {
    /// Short name used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::AuthRequest(_) => "auth_request",
            Message::AuthResponse(_) => "auth_response",
            Message::DirectoryListRequest(_) => "directory_list_request",
            Message::DirectoryListResponse(_) => "directory_list_response",
            Message::FileFetchRequest(_) => "file_fetch_request",
            Message::TransferChunk(_) => "transfer_chunk",
            Message::DeleteRequest(_) => "delete_request",
            Message::RenameRequest(_) => "rename_request",
            Message::LogoutRequest => "logout_request",
        }
    }
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

/// Login or registration attempt.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    pub login: String,
    pub password: String,
    #[serde(default)]
    pub is_registration: bool,
}

// Keeps the password out of logs.
impl std::fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRequest")
            .field("login", &self.login)
            .field("is_registration", &self.is_registration)
            .finish_non_exhaustive()
    }
}

/// Server verdict on an [`AuthRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub success: bool,
    /// Only present on a successful login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_root: Option<String>,
}

impl AuthResponse {
    pub fn rejected() -> Self {
        Self {
            success: false,
            storage_root: None,
        }
    }

    pub fn registered(success: bool) -> Self {
        Self {
            success,
            storage_root: None,
        }
    }

    pub fn logged_in(storage_root: impl Into<String>) -> Self {
        Self {
            success: true,
            storage_root: Some(storage_root.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// Asks for the listing of `path`; empty means the storage root.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DirectoryListRequest {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DirectoryListResponse {
    pub entries: Vec<ListingEntry>,
}

// ---------------------------------------------------------------------------
// Transfers
// ---------------------------------------------------------------------------

/// Requests that remote files or trees be streamed down to `destination_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFetchRequest {
    pub paths: BTreeSet<String>,
    pub destination_path: String,
}

/// One slice of a file (or an empty-directory placeholder) in flight.
///
/// The same shape carries uploads and downloads.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferChunk {
    /// Destination-relative path, `/`-separated.
    pub relative_path: String,
    pub destination_root: String,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    /// 1-based position of this chunk.
    pub part_index: u32,
    pub total_parts: u32,
    /// Marks a zero-byte regular file, which would otherwise look like an
    /// empty-directory placeholder.
    #[serde(default, skip_serializing_if = "is_false")]
    pub empty_file: bool,
}

impl TransferChunk {
    /// Placeholder that tells the receiver to create an empty directory.
    pub fn directory(relative_path: impl Into<String>, destination_root: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            destination_root: destination_root.into(),
            payload: Vec::new(),
            part_index: 1,
            total_parts: 1,
            empty_file: false,
        }
    }

    /// Single chunk describing a zero-byte file.
    pub fn empty_file(relative_path: impl Into<String>, destination_root: impl Into<String>) -> Self {
        Self {
            empty_file: true,
            ..Self::directory(relative_path, destination_root)
        }
    }

    pub fn is_directory_marker(&self) -> bool {
        self.total_parts == 1 && self.payload.is_empty() && !self.empty_file
    }

    pub fn is_single_part(&self) -> bool {
        self.total_parts == 1
    }
}

// Payloads are large; log their length only.
impl std::fmt::Debug for TransferChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferChunk")
            .field("relative_path", &self.relative_path)
            .field("destination_root", &self.destination_root)
            .field("payload_len", &self.payload.len())
            .field("part_index", &self.part_index)
            .field("total_parts", &self.total_parts)
            .field("empty_file", &self.empty_file)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

/// Deletes entries that all live in the same directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub entries: Vec<FileEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameRequest {
    pub entry: FileEntry,
    pub new_name: String,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn is_false(v: &bool) -> bool {
    !v
}

/// Byte payloads travel as base64 strings inside the JSON body.
mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
