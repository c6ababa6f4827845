use std::path::PathBuf;

use nimbus_protocol::{AuthResponse, ListingEntry};

/// Something the server pushed that no pending call was waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A remote directory listing, requested or pushed after a change.
    Listing(Vec<ListingEntry>),
    /// A downloaded file is complete on disk.
    FileReceived(PathBuf),
    /// A downloaded empty directory was created.
    DirectoryReceived(PathBuf),
    /// A downloaded chunk could not be applied.
    ReceiveFailed { relative_path: String, reason: String },
    /// An auth reply arrived with no login or registration waiting.
    UnexpectedAuth(AuthResponse),
    /// The server confirmed logout.
    LoggedOut,
    /// The connection ended without a logout.
    Disconnected,
}
