/// Largest payload a single transfer chunk may carry (5 MiB).
pub const MAX_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Largest encoded frame accepted on the wire.
///
/// Twice the chunk size, so one full chunk (base64-encoded inside the JSON
/// body, plus its metadata) always fits in a single frame.
pub const MAX_FRAME_SIZE: usize = 2 * MAX_CHUNK_SIZE;

/// Length prefix size in bytes (big-endian `u32`).
pub const FRAME_HEADER_LEN: usize = 4;

/// Default server TCP port.
pub const DEFAULT_PORT: u16 = 8189;

/// Display name for the synthetic "go up" listing row.
pub const PARENT_MARKER_NAME: &str = "...";
