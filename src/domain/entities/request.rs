//! Resources and the requests made against them.

use crate::domain::entities::CacheKey;
use crate::domain::ports::FetchListener;

/// A fetchable resource: a URL plus an optional custom cache-key prefix.
///
/// When a prefix is set it replaces the URL in key derivation, so a logical
/// resource keeps a stable cache entry even when its URL carries volatile
/// parts (signed query parameters, CDN hosts).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    url: String,
    key_prefix: Option<String>,
}

impl Resource {
    /// A resource keyed by its URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key_prefix: None,
        }
    }

    /// A resource keyed by a custom prefix instead of its URL.
    #[must_use]
    pub fn with_key_prefix(url: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key_prefix: Some(prefix.into()),
        }
    }

    /// The URL to fetch.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The prefix hashed into the cache key: the custom prefix when set,
    /// the URL otherwise.
    #[must_use]
    pub fn key_prefix(&self) -> &str {
        self.key_prefix.as_deref().unwrap_or(&self.url)
    }
}

/// One accepted download request.
///
/// Immutable once created; `max_width == max_height == 0` means "no resize
/// constraint".
#[derive(Debug, Clone)]
pub struct Request {
    resource: Resource,
    max_width: u32,
    max_height: u32,
    listener: FetchListener,
}

impl Request {
    /// Pairs a resource and size constraints with the listener to notify.
    #[must_use]
    pub fn new(resource: Resource, max_width: u32, max_height: u32, listener: FetchListener) -> Self {
        Self {
            resource,
            max_width,
            max_height,
            listener,
        }
    }

    /// The URL to fetch.
    #[must_use]
    pub fn url(&self) -> &str {
        self.resource.url()
    }

    /// Maximum decoded width, 0 for unconstrained.
    #[must_use]
    pub const fn max_width(&self) -> u32 {
        self.max_width
    }

    /// Maximum decoded height, 0 for unconstrained.
    #[must_use]
    pub const fn max_height(&self) -> u32 {
        self.max_height
    }

    /// The listener awaiting this request.
    #[must_use]
    pub const fn listener(&self) -> &FetchListener {
        &self.listener
    }

    /// The cache key this request reads and writes.
    #[must_use]
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::derive(self.resource.key_prefix(), self.max_width, self.max_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_prefix_defaults_to_url() {
        let plain = Resource::new("https://example.com/a.png");
        assert_eq!(plain.key_prefix(), "https://example.com/a.png");
    }

    #[test]
    fn test_custom_prefix_overrides_url_in_key() {
        let custom = Resource::with_key_prefix("https://cdn-7.example.com/a.png?sig=abc", "a.png");
        assert_eq!(custom.key_prefix(), "a.png");

        let (listener, _rx) = FetchListener::channel();
        let a = Request::new(custom, 100, 100, listener.clone());
        let b = Request::new(
            Resource::with_key_prefix("https://cdn-9.example.com/a.png?sig=xyz", "a.png"),
            100,
            100,
            listener,
        );
        assert_eq!(a.cache_key(), b.cache_key());
    }
}
