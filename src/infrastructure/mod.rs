//! Infrastructure layer with cache, transport, and pipeline adapters.

/// Cache tiers (memory LRU, persistent disk store).
pub mod cache;
/// Loader configuration.
pub mod config;
/// Decode and resize stage.
pub mod decode;
/// Network transport.
pub mod fetch;
/// Request coordination.
pub mod loader;

pub use cache::{
    CacheStats, DEFAULT_DISK_BUDGET, DEFAULT_MEMORY_BUDGET, DiskStore, Editor, EntryKind,
    MemoryImageCache, Snapshot,
};
pub use config::LoaderConfig;
pub use fetch::HttpFetcher;
pub use loader::ImageLoader;
