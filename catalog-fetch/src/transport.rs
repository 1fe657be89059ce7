//! HTTP transport backed by reqwest.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde_json::Value;
use tracing::{instrument, trace};

use catalog_core::constants::{DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_USER_AGENT};
use catalog_core::error::{FetchError, Result};
use catalog_core::traits::{Transport, TransportError};

/// GET-only JSON transport.
///
/// One attempt per call; retries belong to the caller.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    http_client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport with the default timeout and user agent.
    pub fn new() -> Result<Self> {
        Self::with_options(Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS), DEFAULT_USER_AGENT)
    }

    /// Creates a transport with a per-request timeout and user agent.
    pub fn with_options(timeout: Duration, user_agent: &str) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent.to_string())
            .build()
            .map_err(|e| FetchError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { http_client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self))]
    async fn get_json(&self, url: &str) -> std::result::Result<Value, TransportError> {
        let response = self
            .http_client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let status = response.status();
        trace!(status = status.as_u16(), "Response received");
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        response.json::<Value>().await.map_err(|e| {
            if e.is_decode() {
                TransportError::Decode(e.to_string())
            } else {
                TransportError::Network(e.to_string())
            }
        })
    }
}
