//! Network transport adapters.

pub mod http;

pub use http::HttpFetcher;
