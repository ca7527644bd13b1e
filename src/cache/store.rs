//! Bounded in-memory response cache with strict LRU eviction.

use crate::cache::cachecontrol::CacheControl;
use crate::http::Headers;
use crate::session::transport::Protocol;
use bytes::Bytes;
use http::StatusCode;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

/// Fixed per-entry bookkeeping estimate added on top of body and header
/// text when accounting retained bytes.
const ENTRY_OVERHEAD: usize = 200;

/// Approximate bytes an entry keeps alive while cached.
pub fn estimate_retained_bytes(headers: &Headers, body: &Bytes) -> usize {
    let header_bytes: usize = headers.iter().map(|(n, v)| n.len() + v.len() + 2).sum();
    body.len() + header_bytes + ENTRY_OVERHEAD
}

/// A cached response. Immutable once stored; refreshes replace the entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub status: StatusCode,
    pub version: Protocol,
    pub headers: Headers,
    pub body: Bytes,
    /// Monotonic store time; the resident component of age.
    pub stored_at: Instant,
    /// `max(0, received_at - Date)` fixed at store time.
    pub apparent_age: Duration,
    pub cache_control: CacheControl,
    /// Case-folded `Vary` header names; `["*"]` marks an unstorable vary.
    pub vary: Vec<String>,
    pub retained_bytes: usize,
}

impl CacheEntry {
    /// Build an entry from a received response head and fully drained body.
    pub fn new(status: StatusCode, version: Protocol, headers: Headers, body: Bytes) -> Self {
        let cache_control =
            CacheControl::parse(&headers.get("cache-control").unwrap_or_default());
        let vary = parse_vary(&headers);
        let apparent_age = headers
            .first("date")
            .and_then(|d| httpdate::parse_http_date(d).ok())
            .and_then(|date| SystemTime::now().duration_since(date).ok())
            .unwrap_or(Duration::ZERO);
        let retained_bytes = estimate_retained_bytes(&headers, &body);
        Self {
            status,
            version,
            headers,
            body,
            stored_at: Instant::now(),
            apparent_age,
            cache_control,
            vary,
            retained_bytes,
        }
    }

    /// Current age in seconds: resident time plus the apparent age the
    /// response already had when it was received.
    pub fn age_seconds(&self) -> u64 {
        self.stored_at.elapsed().as_secs() + self.apparent_age.as_secs()
    }

    pub fn etag(&self) -> Option<&str> {
        self.headers.first("etag")
    }

    pub fn last_modified(&self) -> Option<&str> {
        self.headers.first("last-modified")
    }
}

fn parse_vary(headers: &Headers) -> Vec<String> {
    match headers.get("vary") {
        Some(value) => value
            .split(',')
            .map(|n| n.trim().to_ascii_lowercase())
            .filter(|n| !n.is_empty())
            .collect(),
        None => Vec::new(),
    }
}

/// Snapshot of cache occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub count: usize,
    pub bytes: usize,
}

struct StoreInner {
    entries: HashMap<Vec<u8>, Arc<CacheEntry>>,
    /// LRU order, least recently used at the front. Untouched entries keep
    /// insertion order, which is the eviction tie-break.
    recency: VecDeque<Vec<u8>>,
    /// Learned `Vary` lists: fingerprint-without-vary -> header names the
    /// origin declared for that resource.
    vary_index: HashMap<Vec<u8>, Vec<String>>,
    total_bytes: usize,
}

impl StoreInner {
    fn touch(&mut self, key: &[u8]) {
        if let Some(pos) = self.recency.iter().position(|k| k == key) {
            let k = self.recency.remove(pos).unwrap_or_default();
            self.recency.push_back(k);
        }
    }

    fn remove(&mut self, key: &[u8]) -> Option<Arc<CacheEntry>> {
        let entry = self.entries.remove(key)?;
        self.total_bytes -= entry.retained_bytes;
        if let Some(pos) = self.recency.iter().position(|k| k == key) {
            self.recency.remove(pos);
        }
        Some(entry)
    }
}

/// Fingerprint -> [`CacheEntry`] mapping with a byte budget.
///
/// Reads and writes share one short critical section, which also makes
/// writes totally ordered: a completed `store` is visible to every later
/// `lookup`.
pub struct CacheStore {
    inner: Mutex<StoreInner>,
    max_bytes: usize,
}

impl CacheStore {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                entries: HashMap::new(),
                recency: VecDeque::new(),
                vary_index: HashMap::new(),
                total_bytes: 0,
            }),
            max_bytes,
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Look up an entry, touching its recency. Returns the entry and its
    /// current age in seconds.
    pub fn lookup(&self, key: &[u8]) -> Option<(Arc<CacheEntry>, u64)> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let entry = inner.entries.get(key)?.clone();
        inner.touch(key);
        let age = entry.age_seconds();
        Some((entry, age))
    }

    /// The `Vary` header names learned from a previously stored response
    /// for this method+URL, if any.
    pub fn known_vary(&self, plain_key: &[u8]) -> Option<Vec<String>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.vary_index.get(plain_key).cloned()
    }

    /// Insert or replace an entry, then evict least-recently-used entries
    /// until the byte budget holds. An entry larger than the whole budget
    /// is not inserted; the caller still owns a servable response.
    ///
    /// `plain_key` is the fingerprint without vary; `key` is the final
    /// (possibly vary-aware) fingerprint the entry lives under.
    pub fn store(&self, plain_key: &[u8], key: Vec<u8>, entry: CacheEntry) {
        if entry.retained_bytes > self.max_bytes {
            tracing::debug!(
                bytes = entry.retained_bytes,
                budget = self.max_bytes,
                "entry exceeds cache budget, not stored"
            );
            return;
        }

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if entry.vary.is_empty() {
            inner.vary_index.remove(plain_key);
        } else {
            inner.vary_index.insert(plain_key.to_vec(), entry.vary.clone());
        }

        if inner.entries.contains_key(&key) {
            inner.remove(&key);
        }
        inner.total_bytes += entry.retained_bytes;
        inner.entries.insert(key.clone(), Arc::new(entry));
        inner.recency.push_back(key);

        while inner.total_bytes > self.max_bytes {
            let Some(oldest) = inner.recency.front().cloned() else {
                break;
            };
            inner.remove(&oldest);
            tracing::debug!(total = inner.total_bytes, "evicted least-recently-used entry");
        }
    }

    pub fn invalidate(&self, key: &[u8]) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.remove(key);
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entries.clear();
        inner.recency.clear();
        inner.vary_index.clear();
        inner.total_bytes = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        CacheStats { count: inner.entries.len(), bytes: inner.total_bytes }
    }
}
