//! Reference receivers for ZoneIn events: a native messaging host and a
//! loopback HTTP server. Both keep the most recent events in a JSON file.

pub mod http;
pub mod native;
pub mod store;

use serde::Serialize;

pub use http::{HttpReceiver, DEFAULT_HOST, DEFAULT_PORT};
pub use native::run_host;
pub use store::{events_file_path, EventStore, StoreError};

/// Acknowledgement sent back for every message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    #[must_use]
    pub fn received() -> Self {
        Self {
            success: true,
            received: Some(true),
            error: None,
        }
    }

    #[must_use]
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            received: None,
            error: Some(error.into()),
        }
    }
}

/// Log to stderr; stdout may carry protocol frames
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .format_timestamp_secs()
        .init();
}
