//! Length-prefixed JSON framing.
//!
//! # Wire format
//!
//! ```text
//! [4 bytes BE: body_len]
//! [body_len bytes: UTF-8 JSON of one Message]
//! ```
//!
//! A body longer than [`MAX_FRAME_SIZE`] is rejected on both sides.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::ProtocolError;
use crate::constants::{FRAME_HEADER_LEN, MAX_FRAME_SIZE};
use crate::messages::Message;

/// Serializes a message into a complete frame (header + body).
pub fn encode_frame(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: body.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Parses a frame body (without the length header).
pub fn decode_body(body: &[u8]) -> Result<Message, ProtocolError> {
    Ok(serde_json::from_slice(body)?)
}

/// Writes one message as a frame and flushes.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Message,
) -> Result<(), ProtocolError> {
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame and decodes it.
///
/// Returns [`ProtocolError::ConnectionClosed`] when the peer closes the
/// stream, including mid-frame.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message, ProtocolError> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    read_exact_or_closed(reader, &mut header).await?;

    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut body = vec![0u8; len];
    read_exact_or_closed(reader, &mut body).await?;
    decode_body(&body)
}

async fn read_exact_or_closed<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> Result<(), ProtocolError> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(ProtocolError::ConnectionClosed)
        }
        Err(e) => Err(ProtocolError::Io(e)),
    }
}
