//! Domain layer with core entities and port definitions.

/// Entity definitions.
pub mod entities;
/// Port definitions.
pub mod ports;

pub use entities::{CacheKey, CachedImage, Request, Resource};
pub use ports::{
    CacheError, CacheResult, FetchEvent, FetchListener, FetchedPayload, ImageCachePort,
    ListenerId, RemoteFetchPort,
};
