//! picfetch - An asynchronous image fetch-and-cache pipeline.
//!
//! Given a URL and optional size constraints, the pipeline returns a
//! decoded image through a two-tier cache (in-memory LRU, persistent
//! versioned disk store), deduplicating concurrent fetches for the same
//! URL and tracking failed URLs so they are not retried.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Domain layer containing entities and port definitions.
pub mod domain;
/// Infrastructure layer containing cache, transport, and pipeline adapters.
pub mod infrastructure;

pub use domain::{
    CacheError, CacheKey, CacheResult, CachedImage, FetchEvent, FetchListener, FetchedPayload,
    ImageCachePort, ListenerId, RemoteFetchPort, Request, Resource,
};
pub use infrastructure::{CacheStats, ImageLoader, LoaderConfig};

/// Current version of the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = "picfetch";
