//! Native messaging host loop.
//!
//! Reads length-prefixed JSON events from the caller, stores them, and
//! acknowledges each one. Stdout carries the protocol, so nothing else may be
//! written to the writer.

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use zonein_core::framing::{read_frame, write_frame, FrameError, MAX_EXTENSION_MESSAGE_LEN};

use crate::{store::EventStore, Reply};

/// Serve one caller until it closes the stream
///
/// Returns the number of events acknowledged. Messages that are not valid
/// JSON are logged and skipped.
///
/// # Errors
///
/// Returns an error on I/O failure, a truncated frame or an oversized frame
pub async fn run_host<R, W>(
    reader: &mut R,
    writer: &mut W,
    store: &mut EventStore,
) -> Result<usize, FrameError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut handled = 0;
    loop {
        let message = match read_frame::<_, Value>(reader, MAX_EXTENSION_MESSAGE_LEN).await {
            Ok(Some(message)) => message,
            Ok(None) => break,
            Err(FrameError::Json(e)) => {
                log::error!("Failed to parse message: {e}");
                continue;
            }
            Err(e) => return Err(e),
        };

        log::info!("Received event: {message}");
        let reply = match store.record(message) {
            Ok(()) => Reply::received(),
            Err(e) => {
                log::warn!("Rejected message: {e}");
                Reply::rejected(e.to_string())
            }
        };
        write_frame(writer, &reply).await?;
        handled += 1;
    }

    log::info!("Input closed after {handled} messages");
    Ok(handled)
}
