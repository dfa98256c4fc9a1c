//! Loopback HTTP receiver for ZoneIn events.

use anyhow::{Context, Result};
use zonein_receiver::{
    events_file_path, init_logging, store::HTTP_EVENTS_FILE, EventStore, HttpReceiver,
    DEFAULT_HOST, DEFAULT_PORT,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let path = events_file_path(HTTP_EVENTS_FILE)?;
    let store = EventStore::load(&path);
    let receiver = HttpReceiver::bind((DEFAULT_HOST, DEFAULT_PORT), store)
        .await
        .with_context(|| format!("failed to bind {DEFAULT_HOST}:{DEFAULT_PORT}"))?;

    log::info!(
        "ZoneIn HTTP server listening on http://{}/events",
        receiver.local_addr()?
    );
    log::info!("Events will be saved to: {}", path.display());
    log::info!("Press Ctrl+C to stop");

    receiver.run().await?;
    Ok(())
}
