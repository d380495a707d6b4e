//! Domain entity definitions.

mod cache_key;
mod cached_image;
mod request;

pub use cache_key::CacheKey;
pub use cached_image::{CONTENT_TYPE_GIF, CONTENT_TYPE_PNG, CachedImage};
pub use request::{Request, Resource};
