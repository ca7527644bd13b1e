//! # duofetch
//!
//! A dual-protocol HTTP client library for Rust.
//!
//! `duofetch` negotiates HTTP/1.1 or HTTP/2 per origin, pools protocol
//! sessions, caches responses per RFC 7234 under a byte budget, and
//! surfaces HTTP/2 server-pushed resources so that subsequent requests
//! for them are served from cache.
//!
//! ## Features
//!
//! - **Per-origin protocol negotiation**: ALPN with configurable
//!   preference, cached HTTP/1.1 downgrade
//! - **Response cache**: strict-LRU with a byte budget, freshness and
//!   revalidation per RFC 7234, `Vary`-aware keys
//! - **Server push**: pushed streams land in the cache and notify
//!   registered observers
//! - **Streaming bodies**: identical response model for live and cached
//!   bodies
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use duofetch::{fetch, FetchOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), duofetch::FetchError> {
//!     let mut response = fetch("https://example.com/data", FetchOptions::new()).await?;
//!     println!("status: {} (HTTP/{})", response.status(), response.http_version());
//!     println!("body: {}", response.text().await?);
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error definitions
//! - [`cache`] - Cache keys, freshness rules, and the bounded store
//! - [`http`] - Request options, headers, bodies, and responses
//! - [`session`] - The transport seam, the built-in connector, and the
//!   per-origin pool
//! - [`push`] - Push observers and push-to-cache ingestion
//!
//! The free functions below delegate to a lazily-created process-default
//! [`Context`]; create your own with [`context`] for isolated pools and
//! caches.

pub mod base;
pub mod cache;
pub mod context;
pub mod engine;
pub mod http;
pub mod push;
pub mod session;
pub mod urlutil;

pub use crate::base::error::FetchError;
pub use crate::cache::CacheStats;
pub use crate::context::{Config, Context};
pub use crate::http::{Body, BodyBuffer, CacheMode, FetchOptions, Headers, RedirectMode, Response};
pub use crate::push::PushHandle;
pub use crate::session::transport::Protocol;
pub use crate::urlutil::create_url;

use std::sync::OnceLock;

static DEFAULT_CONTEXT: OnceLock<Context> = OnceLock::new();

fn default_context() -> &'static Context {
    DEFAULT_CONTEXT.get_or_init(Context::new)
}

/// Create an independent [`Context`] with its own pool, cache, and push
/// registry.
pub fn context(config: Config) -> Context {
    Context::with_config(config)
}

/// Fetch a URL through the process-default context.
pub async fn fetch(url: &str, options: FetchOptions) -> Result<Response, FetchError> {
    default_context().fetch(url, options).await
}

/// Register a push observer on the process-default context.
pub fn on_push(observer: impl Fn(&str) + Send + Sync + 'static) -> PushHandle {
    default_context().on_push(observer)
}

/// Remove a push observer from the process-default context.
pub fn off_push(handle: PushHandle) {
    default_context().off_push(handle)
}

/// Close every session of the process-default context.
pub fn disconnect_all() {
    default_context().disconnect_all()
}

/// Empty the process-default context's cache.
pub fn clear_cache() {
    default_context().clear_cache()
}

/// Occupancy of the process-default context's cache.
pub fn cache_stats() -> CacheStats {
    default_context().cache_stats()
}
