//! TCP storage server.
//!
//! Accepts any number of client connections. Each connection runs a write
//! pump and a read loop that feeds a session state machine; once
//! authenticated the session hands file requests to a handler scoped to the
//! account's storage root.

mod connection;
mod files;
mod server;
mod session;

pub use connection::{SendError, Sender};
pub use server::{ProvisionPolicy, ServerConfig, StorageServer};

/// Outbound frames buffered per connection.
///
/// Chunk frames can be several MiB each, so the buffer stays small and
/// bulk senders wait on it instead of piling frames up in memory.
pub const SEND_BUFFER_SIZE: usize = 16;

/// Errors produced by the storage server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] nimbus_protocol::ProtocolError),

    #[error("transfer error: {0}")]
    Transfer(#[from] nimbus_transfer::TransferError),

    #[error("file operation failed: {0}")]
    FileOps(#[from] nimbus_file_ops::FileOpsError),

    #[error("server already running")]
    AlreadyRunning,
}
