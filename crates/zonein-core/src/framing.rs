//! Length-prefixed JSON framing used by native messaging.
//!
//! Each message is a 4-byte little-endian `u32` length followed by that many
//! bytes of UTF-8 JSON. The same framing is used in both directions.

use serde::{de::DeserializeOwned, Serialize};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame a native host may send to the browser side.
pub const MAX_HOST_MESSAGE_LEN: usize = 1024 * 1024;

/// Largest frame the browser side may send to a native host.
pub const MAX_EXTENSION_MESSAGE_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    TooLarge { len: usize, max: usize },
    /// The frame was read completely but its body is not the expected JSON.
    /// The stream is still aligned on the next frame.
    #[error("frame body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialize a message into a complete frame
///
/// # Errors
///
/// Returns an error if serialization fails or the body does not fit a `u32` length
pub fn encode_frame<T: Serialize + ?Sized>(message: &T) -> Result<Vec<u8>, FrameError> {
    let body = serde_json::to_vec(message)?;
    let len = u32::try_from(body.len()).map_err(|_| FrameError::TooLarge {
        len: body.len(),
        max: u32::MAX as usize,
    })?;

    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Write one frame and flush
///
/// # Errors
///
/// Returns an error if encoding or the write fails
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame
///
/// Returns `Ok(None)` when the stream ends cleanly before a length header.
///
/// # Errors
///
/// Returns an error on I/O failure, truncated frames, frames over `max_len`,
/// or bodies that do not decode as `T`
pub async fn read_frame<R, T>(reader: &mut R, max_len: usize) -> Result<Option<T>, FrameError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        match reader.read(&mut header[filled..]).await? {
            0 if filled == 0 => return Ok(None),
            0 => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("stream ended after {filled} of 4 length bytes"),
                )
                .into());
            }
            n => filled += n,
        }
    }

    let len = u32::from_le_bytes(header) as usize;
    if len > max_len {
        return Err(FrameError::TooLarge { len, max: max_len });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(serde_json::from_slice(&body)?))
}
