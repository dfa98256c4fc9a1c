/// Transport configuration command handlers
use anyhow::Result;
use clap::Subcommand;
use std::sync::Arc;
use zonein_core::{AppContext, Transport, TransportOptions, TransportState};
use zonein_storage::{Database, Event, TransportMode, NO_TAB_ID};

const TEST_URL: &str = "https://example.com/zonein-transport-test";

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum TransportAction {
    /// Show or change the delivery mode (native or http)
    Mode { mode: Option<TransportMode> },
    /// Send a test event with the configured mode
    Test,
}

pub async fn handle_transport_command(
    db: Arc<Database>,
    options: TransportOptions,
    action: TransportAction,
) -> Result<()> {
    match action {
        TransportAction::Mode { mode: None } => match db.get_transport_mode()? {
            Some(mode) => println!("Transport mode: {mode}"),
            None => println!("Transport mode: {} (default)", options.default_mode),
        },
        TransportAction::Mode { mode: Some(mode) } => {
            let mut transport = Transport::new(db, options)?;
            transport.set_mode(mode)?;
            println!("Transport mode set to {mode}");
            if transport.state() == (TransportState::Native { connected: false }) {
                println!("Native messaging host not reachable; sends will retry the connection");
            }
            transport.shutdown();
        }
        TransportAction::Test => {
            let ctx = AppContext::open(db, options)?;
            println!("Transport: {}", describe(ctx.transport_state().await));

            let tab = ctx.classify_tab(TEST_URL);
            let event = Event {
                timestamp: chrono::Utc::now().timestamp_millis(),
                url: tab.url,
                host: tab.host,
                path: tab.path,
                classification: tab.classification,
                rule_id: tab.rule_id,
                tab_id: NO_TAB_ID,
                title: Some("ZoneIn transport test".to_string()),
            };

            let outcome = ctx.submit(event).await?;
            match outcome.error {
                None => println!("Test event delivered"),
                Some(error) => println!("Test event failed: {error}"),
            }
            ctx.shutdown().await;
        }
    }
    Ok(())
}

fn describe(state: TransportState) -> &'static str {
    match state {
        TransportState::Uninitialized => "not initialized",
        TransportState::Native { connected: true } => "native (connected)",
        TransportState::Native { connected: false } => "native (disconnected)",
        TransportState::Http => "http",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use zonein_core::transport::NativeHostConfig;

    fn offline_options() -> TransportOptions {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        TransportOptions {
            http_endpoint: format!("http://127.0.0.1:{port}/events"),
            native_host: NativeHostConfig {
                program: PathBuf::from("/nonexistent/zonein-host-for-tests"),
                ..NativeHostConfig::default()
            },
            ..TransportOptions::default()
        }
    }

    #[tokio::test]
    async fn test_mode_switch_persists_without_host() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        handle_transport_command(
            Arc::clone(&db),
            offline_options(),
            TransportAction::Mode {
                mode: Some(TransportMode::Native),
            },
        )
        .await
        .unwrap();
        assert_eq!(db.get_transport_mode().unwrap(), Some(TransportMode::Native));
    }

    #[tokio::test]
    async fn test_send_test_event_does_not_touch_history() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        handle_transport_command(Arc::clone(&db), offline_options(), TransportAction::Test)
            .await
            .unwrap();
        assert!(db.recent_history(10).unwrap().is_empty());
    }

    #[test]
    fn test_describe_states() {
        assert_eq!(describe(TransportState::Http), "http");
        assert_eq!(
            describe(TransportState::Native { connected: false }),
            "native (disconnected)"
        );
    }
}
