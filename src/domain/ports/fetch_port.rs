//! Port for the network transport.

use bytes::Bytes;

use crate::domain::ports::CacheResult;

/// Body and declared content type of one completed retrieval.
#[derive(Debug, Clone)]
pub struct FetchedPayload {
    /// The response body.
    pub bytes: Bytes,
    /// The `Content-Type` the server declared, if any.
    pub content_type: Option<String>,
}

/// Port for performing one GET-style retrieval.
///
/// Implementations follow redirects and apply a fixed connect/read timeout.
/// Deduplication of concurrent retrievals for the same URL is the
/// coordinator's job, not the transport's.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait RemoteFetchPort: Send + Sync {
    /// Retrieves one URL, resolving to the body bytes and declared content
    /// type, or a [`CacheError::Network`](super::CacheError::Network)
    /// failure.
    async fn fetch(&self, url: &str) -> CacheResult<FetchedPayload>;
}
