//! Cache tiers: in-memory LRU and the persistent disk store.

pub mod disk;
pub mod memory;

pub use disk::{DEFAULT_DISK_BUDGET, DiskStore, Editor, EntryKind, Snapshot};
pub use memory::{CacheStats, DEFAULT_MEMORY_BUDGET, MemoryImageCache};
