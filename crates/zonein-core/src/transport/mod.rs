//! Best-effort delivery of classification events to a local receiver.
//!
//! Two modes are supported: a persistent native messaging channel and a
//! loopback HTTP POST. `send_event` never fails; problems are logged and
//! reported in the returned `SendOutcome`.

pub mod http;
pub mod native;

#[cfg(test)]
mod tests;

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use zonein_storage::{Database, Event, TransportMode};

use crate::framing::FrameError;
pub use http::{HttpSender, DEFAULT_HTTP_ENDPOINT, DEFAULT_HTTP_TIMEOUT};
pub use native::{NativeHostConfig, NativePort, NATIVE_HOST_NAME};

#[derive(Debug, Error)]
pub enum TransportError {
    /// No receiver reachable
    #[error("{0}")]
    Unavailable(String),
    #[error("native messaging channel is closed")]
    Closed,
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {0}")]
    Status(u16),
}

/// Result of one delivery attempt, used for logging and user feedback
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendOutcome {
    #[must_use]
    pub fn delivered() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(error: &TransportError) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

/// Transport knobs; the defaults match the shipped receivers
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Mode used when the user never configured one
    pub default_mode: TransportMode,
    pub native_host: NativeHostConfig,
    pub http_endpoint: String,
    pub http_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            default_mode: TransportMode::Http,
            native_host: NativeHostConfig::default(),
            http_endpoint: DEFAULT_HTTP_ENDPOINT.to_string(),
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

/// Observable transport state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Uninitialized,
    Native { connected: bool },
    Http,
}

pub struct Transport {
    database: Arc<Database>,
    options: TransportOptions,
    mode: TransportMode,
    initialized: bool,
    port: Option<NativePort>,
    http: HttpSender,
}

impl Transport {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built
    pub fn new(database: Arc<Database>, options: TransportOptions) -> Result<Self> {
        let http = HttpSender::new(options.http_endpoint.clone(), options.http_timeout)?;
        Ok(Self {
            database,
            mode: options.default_mode,
            options,
            initialized: false,
            port: None,
            http,
        })
    }

    /// Read the configured mode and connect if it is native
    ///
    /// When native was only the default (never configured) and the host cannot
    /// be reached, the transport heals itself to HTTP and persists that choice.
    /// An explicitly configured native mode is kept even without a host.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or persisting the mode fails
    pub fn init(&mut self) -> Result<()> {
        let configured = self.database.get_transport_mode()?;
        self.mode = configured.unwrap_or(self.options.default_mode);
        self.initialized = true;

        match self.mode {
            TransportMode::Native => {
                self.connect_native();
                if self.port.is_none() && configured.is_none() {
                    log::info!("Native messaging unavailable, defaulting to HTTP mode");
                    self.mode = TransportMode::Http;
                    self.database.set_transport_mode(TransportMode::Http)?;
                }
            }
            TransportMode::Http => {
                log::info!("Using HTTP transport mode ({})", self.http.endpoint());
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    #[must_use]
    pub fn state(&self) -> TransportState {
        if !self.initialized {
            return TransportState::Uninitialized;
        }
        match self.mode {
            TransportMode::Native => TransportState::Native {
                connected: self.port.as_ref().is_some_and(NativePort::is_connected),
            },
            TransportMode::Http => TransportState::Http,
        }
    }

    /// Deliver one event with the current mode; never fails
    pub async fn send_event(&mut self, event: &Event) -> SendOutcome {
        match self.mode {
            TransportMode::Native => match self.send_native(event).await {
                Ok(()) => SendOutcome::delivered(),
                Err(e) => SendOutcome::failed(&e),
            },
            TransportMode::Http => send_http(&self.http, event).await,
        }
    }

    /// Sender for the current mode when it is HTTP
    ///
    /// HTTP deliveries share no state with the transport, so callers can post
    /// through the returned sender with [`send_http`] after releasing any lock.
    #[must_use]
    pub fn http_sender(&self) -> Option<HttpSender> {
        match self.mode {
            TransportMode::Http => Some(self.http.clone()),
            TransportMode::Native => None,
        }
    }

    /// Persist a new mode, connecting or tearing down the native channel
    ///
    /// # Errors
    ///
    /// Returns an error if persisting the mode fails
    pub fn set_mode(&mut self, mode: TransportMode) -> Result<()> {
        self.database.set_transport_mode(mode)?;
        self.mode = mode;
        self.initialized = true;

        match mode {
            TransportMode::Native => {
                self.drop_dead_port();
                if self.port.is_none() && !self.connect_native() {
                    log::info!("Native messaging not available, will retry on next send");
                }
            }
            TransportMode::Http => {
                if let Some(port) = self.port.take() {
                    port.disconnect();
                }
            }
        }
        log::info!("Transport mode set to {mode}");
        Ok(())
    }

    /// Close any live native channel
    pub fn shutdown(&mut self) {
        if let Some(port) = self.port.take() {
            port.disconnect();
        }
    }

    async fn send_native(&mut self, event: &Event) -> Result<(), TransportError> {
        self.drop_dead_port();
        if self.port.is_none() {
            self.connect_native();
        }

        let Some(port) = self.port.as_mut() else {
            return Err(TransportError::Unavailable(
                "Native messaging not available".to_string(),
            ));
        };

        if let Err(e) = port.post_message(event).await {
            log::info!("Native messaging error: {e}");
            self.port = None;
            return Err(e);
        }
        Ok(())
    }

    fn connect_native(&mut self) -> bool {
        match NativePort::connect(&self.options.native_host) {
            Ok(port) => {
                self.port = Some(port);
                true
            }
            Err(e) => {
                log::info!("Native messaging host not found (this is OK if not installed): {e}");
                self.port = None;
                false
            }
        }
    }

    /// Forget a port whose host has disconnected so the next send starts fresh
    fn drop_dead_port(&mut self) {
        if self.port.as_ref().is_some_and(|port| !port.is_connected()) {
            log::debug!("Discarding disconnected native messaging port");
            self.port = None;
        }
    }
}

/// POST one event through `http`; never fails
pub async fn send_http(http: &HttpSender, event: &Event) -> SendOutcome {
    match http.post(event).await {
        Ok(()) => SendOutcome::delivered(),
        Err(e) => {
            log::info!("HTTP transport failed (expected if no receiver is running): {e}");
            SendOutcome::failed(&e)
        }
    }
}
