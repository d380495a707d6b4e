//! HTTP transport for image retrieval.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::domain::ports::{CacheError, CacheResult, FetchedPayload, RemoteFetchPort};

/// Redirect limit per retrieval.
const MAX_REDIRECTS: usize = 10;

/// `reqwest`-backed transport with fixed timeouts and redirect following.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Creates a transport applying `timeout` to both connect and read.
    ///
    /// # Errors
    /// Returns [`CacheError::Network`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> CacheResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| CacheError::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RemoteFetchPort for HttpFetcher {
    async fn fetch(&self, url: &str) -> CacheResult<FetchedPayload> {
        debug!(url = %url, "Downloading image");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CacheError::Network(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(CacheError::Network(format!(
                "HTTP {}: {}",
                response.status(),
                response.status().canonical_reason().unwrap_or("Unknown")
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CacheError::Network(format!("failed to read body: {e}")))?;

        Ok(FetchedPayload {
            bytes,
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetcher_creation() {
        assert!(HttpFetcher::new(Duration::from_secs(30)).is_ok());
    }
}
