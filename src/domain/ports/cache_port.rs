//! Cache contract and error taxonomy.

use std::sync::Arc;

use crate::domain::entities::{CacheKey, CachedImage};

/// Result type for pipeline operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors that can occur in the pipeline.
///
/// A cache miss is not an error; lookups report misses as `None` and the
/// pipeline falls through to the next tier.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// The disk store failed to open or commit and is out of service.
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    /// Timeout, connection error, or non-success response.
    #[error("network error: {0}")]
    Network(String),
    /// Corrupt payload or decode-time resource exhaustion.
    #[error("decode error: {0}")]
    Decode(String),
    /// I/O error during a cache operation.
    #[error("io error: {0}")]
    Io(String),
}

/// Port for the in-memory cache tier.
///
/// Implementations must be thread-safe and serialize mutation internally;
/// all operations are synchronous so a hit never costs an async hop.
pub trait ImageCachePort: Send + Sync {
    /// Looks up an image, promoting it to most-recently-used.
    fn get(&self, key: &CacheKey) -> Option<Arc<CachedImage>>;

    /// Inserts an image, evicting least-recently-used entries as needed.
    fn put(&self, key: CacheKey, image: Arc<CachedImage>);

    /// Removes an image.
    fn evict(&self, key: &CacheKey);

    /// Current number of cached entries.
    fn len(&self) -> usize;

    /// Returns true if the cache is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes all entries.
    fn clear(&self);
}
