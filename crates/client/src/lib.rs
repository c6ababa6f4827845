//! Client side of the Nimbus storage protocol.
//!
//! A [`Client`] owns one TCP connection. Requests are queued to a write
//! pump; a read pump routes auth and logout replies back to the waiting
//! call, assembles downloaded chunks under the client's local root, and
//! surfaces everything else as [`ClientEvent`]s.
//!
//! The event queue is unbounded: the read pump never waits on the
//! consumer, so auth replies and downloads keep flowing while pushed
//! listings pile up unread.

mod client;
mod events;
mod pumps;

use std::time::Duration;

pub use client::Client;
pub use events::ClientEvent;

/// How long `login`, `register` and `logout` wait for the server's reply.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound frames buffered before senders wait.
pub const SEND_BUFFER_SIZE: usize = 16;

/// Errors produced by the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] nimbus_protocol::ProtocolError),

    #[error("transfer error: {0}")]
    Transfer(#[from] nimbus_transfer::TransferError),

    #[error("local file operation failed: {0}")]
    FileOps(#[from] nimbus_file_ops::FileOpsError),

    #[error("connection closed")]
    Closed,

    #[error("no reply from server")]
    Timeout,

    #[error("request rejected by server")]
    Rejected,
}
