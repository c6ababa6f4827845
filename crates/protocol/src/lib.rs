pub mod constants;
pub mod framing;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use framing::{decode_body, encode_frame, read_frame, write_frame};
pub use messages::{
    AuthRequest, AuthResponse, DeleteRequest, DirectoryListRequest, DirectoryListResponse,
    FileFetchRequest, Message, RenameRequest, TransferChunk,
};
pub use types::{FileEntry, ListingEntry};

/// Errors produced while moving messages over a stream.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("connection closed by peer")]
    ConnectionClosed,
}
