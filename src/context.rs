//! Context - a configuration bound to one session pool, one cache, and
//! one push registry.

use crate::base::error::FetchError;
use crate::cache::{CacheStats, CacheStore};
use crate::http::{FetchOptions, Response};
use crate::push::{PushHandle, PushRegistry};
use crate::session::connector::NetConnector;
use crate::session::pool::SessionPool;
use crate::session::transport::{Connect, Protocol};
use crate::engine::RequestEngine;
use std::sync::Arc;
use std::time::Duration;

/// Default `User-Agent` value.
pub const DEFAULT_USER_AGENT: &str = concat!("duofetch/", env!("CARGO_PKG_VERSION"));

/// Configuration options for a [`Context`].
#[derive(Clone)]
pub struct Config {
    /// Byte budget for the response cache.
    pub max_cache_size: usize,

    /// Ordered ALPN preference for `https` origins.
    pub https_protocols: Vec<Protocol>,

    /// `User-Agent` header value applied when the caller supplies none.
    pub user_agent: String,

    /// Always set `User-Agent` to [`Config::user_agent`], even when the
    /// caller supplied one.
    pub overwrite_user_agent: bool,

    /// Max time to wait for a pushed stream's headers before discarding
    /// the push.
    pub push_promise_timeout: Duration,

    /// Redirect chain limit for `redirect = follow`.
    pub redirect_limit: usize,

    /// Custom transport opener (None = the built-in TCP/TLS connector).
    pub connector: Option<Arc<dyn Connect>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_cache_size: 10 * 1024 * 1024,
            https_protocols: vec![Protocol::Http2, Protocol::Http1],
            user_agent: DEFAULT_USER_AGENT.to_string(),
            overwrite_user_agent: false,
            push_promise_timeout: Duration::from_secs(5),
            redirect_limit: 20,
            connector: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("max_cache_size", &self.max_cache_size)
            .field("https_protocols", &self.https_protocols)
            .field("user_agent", &self.user_agent)
            .field("overwrite_user_agent", &self.overwrite_user_agent)
            .field("push_promise_timeout", &self.push_promise_timeout)
            .field("redirect_limit", &self.redirect_limit)
            .field("custom_connector", &self.connector.is_some())
            .finish()
    }
}

/// A self-contained client instance: one configuration bound to one
/// session pool, one cache, and one push registry. Contexts are fully
/// independent of each other.
pub struct Context {
    engine: RequestEngine,
    registry: Arc<PushRegistry>,
}

impl Context {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let connector: Arc<dyn Connect> = match &config.connector {
            Some(custom) => Arc::clone(custom),
            None => Arc::new(NetConnector::new(config.push_promise_timeout)),
        };
        let pool = Arc::new(SessionPool::new(connector, config.https_protocols.clone()));
        let cache = Arc::new(CacheStore::new(config.max_cache_size));
        let registry = Arc::new(PushRegistry::new());
        let engine = RequestEngine::new(config, pool, cache, Arc::clone(&registry));
        Self { engine, registry }
    }

    /// Fetch a URL. See the crate docs for the caching and redirect
    /// semantics.
    pub async fn fetch(&self, url: &str, options: FetchOptions) -> Result<Response, FetchError> {
        self.engine.fetch(url, options).await
    }

    /// Register a push observer; it is invoked with each pushed URL after
    /// the pushed resource is committed to this context's cache.
    pub fn on_push(&self, observer: impl Fn(&str) + Send + Sync + 'static) -> PushHandle {
        self.registry.on_push(observer)
    }

    /// Remove a push observer. Unknown handles are a no-op.
    pub fn off_push(&self, handle: PushHandle) {
        self.registry.off_push(handle)
    }

    /// Close every session; further use re-opens lazily.
    pub fn disconnect_all(&self) {
        self.engine.pool().disconnect_all();
    }

    pub fn clear_cache(&self) {
        self.engine.cache().clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.engine.cache().stats()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.max_cache_size, 10 * 1024 * 1024);
        assert_eq!(config.https_protocols, vec![Protocol::Http2, Protocol::Http1]);
        assert_eq!(config.redirect_limit, 20);
        assert!(config.user_agent.starts_with("duofetch/"));
    }

    #[tokio::test]
    async fn test_contexts_are_independent() {
        let a = Context::new();
        let b = Context::new();
        let handle = a.on_push(|_| {});
        // b's registry knows nothing of a's observer.
        b.off_push(handle);
        assert_eq!(a.cache_stats().count, 0);
        assert_eq!(b.cache_stats().count, 0);
        a.clear_cache();
        a.disconnect_all();
    }
}
