//! RFC 7234 freshness and storability decisions.
//!
//! Stateless functions over (request, cached entry, now). The cache is
//! process-local, so shared-cache-only restrictions do not apply:
//! `private` responses are storable, only `no-store` and `Vary: *` veto
//! storage.

use crate::cache::cachecontrol::CacheControl;
use crate::cache::store::CacheEntry;
use crate::http::{CacheMode, Headers};
use std::time::{Duration, SystemTime};

/// Heuristic freshness cap when only `Last-Modified` is available.
const HEURISTIC_CAP: Duration = Duration::from_secs(24 * 3600);

/// Statuses storable without explicit freshness information.
const CACHEABLE_STATUSES: &[u16] =
    &[200, 203, 204, 206, 300, 301, 404, 405, 410, 414, 501];

/// How a request interacts with the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Don't consult the cache and don't store (non-cacheable method).
    Bypass,
    /// Serve the cached entry as-is.
    HitFresh,
    /// Serve the cached entry only if revalidation succeeds; otherwise
    /// serve the fresh network response.
    HitStaleRevalidate,
    /// Go to the network, then store if the response permits.
    MissStore,
    /// Go to the network and do not store.
    MissNoStore,
}

impl Decision {
    /// Whether the cache should be consulted at all for this decision.
    pub fn consults_cache(self) -> bool {
        !matches!(self, Decision::Bypass | Decision::MissNoStore)
    }
}

/// Decide the cache interaction before dispatch. `entry` carries the
/// cached entry and its current age in seconds, when one exists.
pub fn decide(
    method: &str,
    mode: CacheMode,
    request_headers: &Headers,
    entry: Option<(&CacheEntry, u64)>,
    now: SystemTime,
) -> Decision {
    if method != "GET" && method != "HEAD" {
        return Decision::Bypass;
    }

    let request_cc =
        CacheControl::parse(&request_headers.get("cache-control").unwrap_or_default());
    if mode == CacheMode::NoStore || request_cc.no_store {
        return Decision::MissNoStore;
    }

    let Some((entry, age)) = entry else {
        return Decision::MissStore;
    };

    let lifetime = freshness_lifetime(entry, now);
    if age < lifetime && !request_cc.no_cache && !entry.cache_control.no_cache {
        Decision::HitFresh
    } else {
        Decision::HitStaleRevalidate
    }
}

/// Freshness lifetime in seconds: `s-maxage` over `max-age` over the
/// `Last-Modified` heuristic (10% of the resource age, capped at 24h).
pub fn freshness_lifetime(entry: &CacheEntry, now: SystemTime) -> u64 {
    if let Some(s) = entry.cache_control.s_maxage {
        return s;
    }
    if let Some(m) = entry.cache_control.max_age {
        return m;
    }
    heuristic_lifetime(entry, now)
}

fn heuristic_lifetime(entry: &CacheEntry, now: SystemTime) -> u64 {
    let Some(last_modified) = entry
        .last_modified()
        .and_then(|v| httpdate::parse_http_date(v).ok())
    else {
        return 0;
    };
    match now.duration_since(last_modified) {
        Ok(elapsed) => (elapsed / 10).min(HEURISTIC_CAP).as_secs(),
        Err(_) => 0,
    }
}

/// Whether a received response may be written to the cache.
pub fn response_storable(status: u16, headers: &Headers) -> bool {
    let cc = CacheControl::parse(&headers.get("cache-control").unwrap_or_default());
    if cc.no_store {
        return false;
    }
    if headers
        .get("vary")
        .is_some_and(|v| v.split(',').any(|n| n.trim() == "*"))
    {
        return false;
    }
    CACHEABLE_STATUSES.contains(&status)
        || cc.max_age.is_some()
        || cc.s_maxage.is_some()
        || headers.contains("expires")
}

/// Conditional request headers derived from a stale entry's validators.
pub fn conditional_headers(entry: &CacheEntry) -> Vec<(String, String)> {
    let mut conditionals = Vec::new();
    if let Some(etag) = entry.etag() {
        conditionals.push(("if-none-match".to_string(), etag.to_string()));
    }
    if let Some(last_modified) = entry.last_modified() {
        conditionals.push(("if-modified-since".to_string(), last_modified.to_string()));
    }
    conditionals
}
