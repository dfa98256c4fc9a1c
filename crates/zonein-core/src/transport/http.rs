//! Loopback HTTP delivery.

use std::time::Duration;
use zonein_storage::Event;

use super::TransportError;

/// Fixed endpoint of the local HTTP receiver
pub const DEFAULT_HTTP_ENDPOINT: &str = "http://127.0.0.1:17321/events";

/// Default request timeout for HTTP delivery
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Posts events as JSON to a single endpoint
#[derive(Debug, Clone)]
pub struct HttpSender {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSender {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// POST one event; any 2xx counts as delivered
    ///
    /// # Errors
    ///
    /// Returns an error on network failure (including connection refused) or a non-2xx status
    pub async fn post(&self, event: &Event) -> Result<(), TransportError> {
        let response = self.client.post(&self.endpoint).json(event).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        Ok(())
    }
}
