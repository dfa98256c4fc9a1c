use super::*;
use httpmock::prelude::*;
use std::path::PathBuf;
use zonein_storage::{Classification, NO_TAB_ID};

fn sample_event() -> Event {
    Event {
        timestamp: 1_700_000_000_000,
        url: "https://twitter.com/home".to_string(),
        host: Some("twitter.com".to_string()),
        path: Some("/home".to_string()),
        classification: Classification::Distracting,
        rule_id: Some("twitter".to_string()),
        tab_id: NO_TAB_ID,
        title: Some("Home / X".to_string()),
    }
}

/// Endpoint on a port that nothing listens on
fn unreachable_endpoint() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}/events")
}

fn missing_host() -> NativeHostConfig {
    NativeHostConfig {
        program: PathBuf::from("/nonexistent/zonein-host-for-tests"),
        ..NativeHostConfig::default()
    }
}

fn transport_with(options: TransportOptions) -> (Arc<Database>, Transport) {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let transport = Transport::new(Arc::clone(&db), options).unwrap();
    (db, transport)
}

// ============================================================================
// HTTP mode
// ============================================================================

#[tokio::test]
async fn test_http_send_unreachable_reports_failure() {
    let (_db, mut transport) = transport_with(TransportOptions {
        http_endpoint: unreachable_endpoint(),
        ..TransportOptions::default()
    });
    transport.init().unwrap();

    let outcome = transport.send_event(&sample_event()).await;
    assert!(!outcome.success);
    assert!(outcome.error.is_some());
}

#[tokio::test]
async fn test_http_send_reachable_reports_success() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/events")
                .json_body_partial(r#"{"classification": "distracting", "ruleId": "twitter"}"#);
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(serde_json::json!({"success": true, "received": true}));
        })
        .await;

    let (_db, mut transport) = transport_with(TransportOptions {
        http_endpoint: server.url("/events"),
        ..TransportOptions::default()
    });
    transport.init().unwrap();

    let outcome = transport.send_event(&sample_event()).await;
    mock.assert_async().await;
    assert_eq!(outcome, SendOutcome::delivered());
}

#[tokio::test]
async fn test_http_non_success_status_is_failure() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/events");
            then.status(500);
        })
        .await;

    let (_db, mut transport) = transport_with(TransportOptions {
        http_endpoint: server.url("/events"),
        ..TransportOptions::default()
    });
    transport.init().unwrap();

    let outcome = transport.send_event(&sample_event()).await;
    assert!(!outcome.success);
    assert_eq!(outcome.error.as_deref(), Some("HTTP 500"));
}

// ============================================================================
// Initialization and mode selection
// ============================================================================

#[tokio::test]
async fn test_uninitialized_until_init() {
    let (db, mut transport) = transport_with(TransportOptions::default());
    assert_eq!(transport.state(), TransportState::Uninitialized);

    transport.init().unwrap();
    assert_eq!(transport.state(), TransportState::Http);
    // The default is not written back
    assert_eq!(db.get_transport_mode().unwrap(), None);
}

#[tokio::test]
async fn test_default_native_heals_to_http() {
    let (db, mut transport) = transport_with(TransportOptions {
        default_mode: TransportMode::Native,
        native_host: missing_host(),
        ..TransportOptions::default()
    });
    transport.init().unwrap();

    assert_eq!(transport.mode(), TransportMode::Http);
    assert_eq!(db.get_transport_mode().unwrap(), Some(TransportMode::Http));
}

#[tokio::test]
async fn test_explicit_native_is_kept_without_host() {
    let (db, mut transport) = transport_with(TransportOptions {
        native_host: missing_host(),
        ..TransportOptions::default()
    });
    db.set_transport_mode(TransportMode::Native).unwrap();
    transport.init().unwrap();

    assert_eq!(
        transport.state(),
        TransportState::Native { connected: false }
    );

    let outcome = transport.send_event(&sample_event()).await;
    assert!(!outcome.success);
    assert_eq!(transport.mode(), TransportMode::Native);
    assert_eq!(db.get_transport_mode().unwrap(), Some(TransportMode::Native));
}

#[tokio::test]
async fn test_set_mode_persists() {
    let (db, mut transport) = transport_with(TransportOptions {
        native_host: missing_host(),
        ..TransportOptions::default()
    });
    transport.init().unwrap();

    transport.set_mode(TransportMode::Native).unwrap();
    assert_eq!(db.get_transport_mode().unwrap(), Some(TransportMode::Native));
    assert_eq!(
        transport.state(),
        TransportState::Native { connected: false }
    );

    transport.set_mode(TransportMode::Http).unwrap();
    assert_eq!(db.get_transport_mode().unwrap(), Some(TransportMode::Http));
    assert_eq!(transport.state(), TransportState::Http);
}

// ============================================================================
// Native mode against real processes
// ============================================================================

#[cfg(unix)]
#[tokio::test]
async fn test_native_send_to_live_host() {
    // `cat` keeps the pipe open and echoes each frame back as an acknowledgement
    let (_db, mut transport) = transport_with(TransportOptions {
        native_host: NativeHostConfig {
            program: PathBuf::from("cat"),
            ..NativeHostConfig::default()
        },
        ..TransportOptions::default()
    });
    transport.set_mode(TransportMode::Native).unwrap();
    assert_eq!(transport.state(), TransportState::Native { connected: true });

    let first = transport.send_event(&sample_event()).await;
    let second = transport.send_event(&sample_event()).await;
    assert_eq!(first, SendOutcome::delivered());
    assert_eq!(second, SendOutcome::delivered());

    transport.set_mode(TransportMode::Http).unwrap();
    assert_eq!(transport.state(), TransportState::Http);
}

#[cfg(unix)]
#[tokio::test]
async fn test_native_disconnect_is_detected() {
    // `true` exits immediately, closing the channel from the remote end
    let (_db, mut transport) = transport_with(TransportOptions {
        native_host: NativeHostConfig {
            program: PathBuf::from("true"),
            ..NativeHostConfig::default()
        },
        ..TransportOptions::default()
    });
    transport.set_mode(TransportMode::Native).unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while transport.state() != (TransportState::Native { connected: false }) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "disconnect was never observed"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[cfg(unix)]
#[tokio::test]
async fn test_native_send_reconnects_after_host_exit() {
    // Each launch appends a line to `launches`; the first host exits, later ones stay up
    let dir = tempfile::tempdir().unwrap();
    let launches = dir.path().join("launches");
    let (_db, mut transport) = transport_with(TransportOptions {
        native_host: NativeHostConfig {
            program: PathBuf::from("sh"),
            args: vec![
                "-c".to_string(),
                r#"echo run >> "$0"; if [ "$(wc -l < "$0")" -gt 1 ]; then exec cat; fi"#
                    .to_string(),
                launches.display().to_string(),
            ],
            ..NativeHostConfig::default()
        },
        ..TransportOptions::default()
    });
    let launch_count = || {
        std::fs::read_to_string(&launches)
            .map(|text| text.lines().count())
            .unwrap_or(0)
    };

    transport.set_mode(TransportMode::Native).unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while transport.state() != (TransportState::Native { connected: false }) {
        assert!(
            tokio::time::Instant::now() < deadline,
            "disconnect was never observed"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(launch_count(), 1);

    let outcome = transport.send_event(&sample_event()).await;
    assert_eq!(outcome, SendOutcome::delivered());
    assert_eq!(transport.state(), TransportState::Native { connected: true });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while launch_count() < 2 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "replacement host never started"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // The replacement stays connected and is reused
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        transport.send_event(&sample_event()).await,
        SendOutcome::delivered()
    );
    assert_eq!(transport.state(), TransportState::Native { connected: true });
    assert_eq!(launch_count(), 2);

    transport.shutdown();
}

#[tokio::test]
async fn test_native_port_connect_missing_program() {
    let result = NativePort::connect(&missing_host());
    assert!(matches!(result, Err(TransportError::Unavailable(_))));
}
