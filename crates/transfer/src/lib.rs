//! Chunked file transfer.
//!
//! The send side expands requested paths into a [`TransferPlan`] and streams
//! bounded [`TransferChunk`](nimbus_protocol::TransferChunk)s to a sink. The
//! receive side feeds chunks into an [`Assembler`], which writes each file
//! in part order no matter the arrival order.

mod assembly;
mod chunked;
mod progress;
mod validation;

pub use assembly::{Assembler, PendingAssembly, Received};
pub use chunked::{ChunkReader, PlanItem, TransferPlan, parts_for_size};
pub use progress::TransferProgress;
pub use validation::{relative_to, validate_relative_path};

/// Default chunk size: the protocol maximum (5 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = nimbus_protocol::constants::MAX_CHUNK_SIZE;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid chunk for {path}: {reason}")]
    InvalidChunk { path: String, reason: String },

    #[error("source changed during transfer: {0}")]
    SourceChanged(String),

    #[error("chunk sink closed")]
    SinkClosed,
}
