//! HTTP fetcher backed by `reqwest`.

use std::time::Duration;

use futures_util::{StreamExt, TryStreamExt};
use tracing::debug;

use crate::domain::errors::{CacheError, CacheResult};
use crate::domain::ports::{ByteStream, ImageFetcher};

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Streams image bodies over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Creates a fetcher whose requests time out after `timeout_secs`.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created.
    pub fn new(timeout_secs: u64) -> CacheResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| CacheError::NetworkError(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, uri: &str) -> CacheResult<ByteStream> {
        debug!(uri = %uri, "Fetching image from network");

        let response = self
            .client
            .get(uri)
            .send()
            .await
            .map_err(|e| CacheError::NetworkError(format!("Request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CacheError::NetworkError(format!(
                "HTTP {}: {}",
                response.status(),
                response.status().canonical_reason().unwrap_or("Unknown")
            )));
        }

        Ok(response
            .bytes_stream()
            .map_err(|e| CacheError::NetworkError(format!("Failed to read body: {e}")))
            .boxed())
    }
}
