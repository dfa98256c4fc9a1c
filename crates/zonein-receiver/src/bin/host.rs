//! Native messaging host: stores events sent over stdin and acknowledges them on stdout.

use anyhow::Result;
use zonein_receiver::{
    events_file_path, init_logging, run_host, store::NATIVE_EVENTS_FILE, EventStore,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_logging();

    let path = events_file_path(NATIVE_EVENTS_FILE)?;
    log::info!("Events will be saved to: {}", path.display());
    let mut store = EventStore::load(path);

    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    run_host(&mut stdin, &mut stdout, &mut store).await?;
    Ok(())
}
