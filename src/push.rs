//! Server-push observers and push-to-cache ingestion.

use crate::base::error::FetchError;
use crate::cache::{fingerprint, freshness, CacheEntry, CacheStore};
use crate::http::{ByteStream, Headers};
use crate::session::transport::ResponseHead;
use bytes::BytesMut;
use futures::StreamExt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

/// Opaque registration handle returned by `on_push`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushHandle(u64);

type Observer = Arc<dyn Fn(&str) + Send + Sync>;

/// Ordered set of push observers.
///
/// Observers fire in registration order, each only after the pushed
/// resource's cache entry is committed. A panicking observer is logged
/// and does not stop later observers.
#[derive(Default)]
pub struct PushRegistry {
    observers: Mutex<Vec<(u64, Observer)>>,
    next_id: AtomicU64,
}

impl PushRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_push(&self, observer: impl Fn(&str) + Send + Sync + 'static) -> PushHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
        observers.push((id, Arc::new(observer)));
        PushHandle(id)
    }

    /// Remove a registration; unknown handles are a no-op.
    pub fn off_push(&self, handle: PushHandle) {
        let mut observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
        observers.retain(|(id, _)| *id != handle.0);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Notify every observer of a pushed URL, in registration order.
    pub fn notify(&self, url: &str) {
        let observers: Vec<Observer> = {
            let guard = self.observers.lock().unwrap_or_else(|e| e.into_inner());
            guard.iter().map(|(_, o)| Arc::clone(o)).collect()
        };
        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(url))).is_err() {
                tracing::warn!(url, "push observer panicked");
            }
        }
    }
}

/// Ingest one pushed response: drain the body, store it under the pushed
/// URL's fingerprint if a synthetic GET for it is storable, then notify
/// observers. Failures are logged and never surface to any caller.
pub async fn ingest(
    cache: &CacheStore,
    registry: &PushRegistry,
    url: Url,
    head: ResponseHead,
    mut body: ByteStream,
) {
    let mut data = BytesMut::new();
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(chunk) => data.extend_from_slice(&chunk),
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "pushed body failed, discarding");
                return;
            }
        }
    }

    if let Err(e) = store_pushed(cache, &url, head, data) {
        tracing::warn!(url = %url, error = %e, "pushed response not cached");
        return;
    }

    // Entry is committed; a fetch issued after an observer fires is
    // guaranteed to hit.
    registry.notify(url.as_str());
}

fn store_pushed(
    cache: &CacheStore,
    url: &Url,
    head: ResponseHead,
    data: BytesMut,
) -> Result<(), FetchError> {
    if !freshness::response_storable(head.status.as_u16(), &head.headers) {
        return Err(FetchError::invalid("pushed response is not storable"));
    }

    let entry = CacheEntry::new(head.status, head.version, head.headers, data.freeze());
    let synthetic = Headers::new();
    let plain_key = fingerprint::compute("GET", url, &synthetic, None);
    let key = if entry.vary.is_empty() {
        plain_key.clone()
    } else {
        fingerprint::compute("GET", url, &synthetic, Some(&entry.vary))
    };
    tracing::debug!(url = %url, bytes = entry.body.len(), "caching pushed response");
    cache.store(&plain_key, key, entry);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::transport::Protocol;
    use bytes::Bytes;
    use futures::stream;
    use http::StatusCode;

    fn head(pairs: &[(&str, &str)]) -> ResponseHead {
        let mut headers = Headers::new();
        for (n, v) in pairs {
            headers.insert(*n, *v);
        }
        ResponseHead { status: StatusCode::OK, version: Protocol::Http2, headers }
    }

    fn body(data: &'static [u8]) -> ByteStream {
        Box::pin(stream::once(async move { Ok(Bytes::from_static(data)) }))
    }

    #[test]
    fn test_observers_fire_in_registration_order() {
        let registry = PushRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            registry.on_push(move |_| seen.lock().unwrap().push(tag));
        }
        registry.notify("https://example.com/style.css");
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_off_push_removes_only_its_registration() {
        let registry = PushRegistry::new();
        let count = Arc::new(AtomicU64::new(0));

        let keep = Arc::clone(&count);
        registry.on_push(move |_| {
            keep.fetch_add(1, Ordering::Relaxed);
        });
        let removed = registry.on_push(|_| panic!("deregistered observer must not fire"));
        registry.off_push(removed);
        // Unknown handle is a no-op.
        registry.off_push(PushHandle(9999));

        registry.notify("https://example.com/");
        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert_eq!(registry.observer_count(), 1);
    }

    #[test]
    fn test_panicking_observer_does_not_stop_later_ones() {
        let registry = PushRegistry::new();
        let fired = Arc::new(AtomicU64::new(0));

        registry.on_push(|_| panic!("boom"));
        let fired_clone = Arc::clone(&fired);
        registry.on_push(move |_| {
            fired_clone.fetch_add(1, Ordering::Relaxed);
        });

        registry.notify("https://example.com/");
        assert_eq!(fired.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_ingest_stores_then_notifies() {
        let cache = CacheStore::new(1 << 20);
        let registry = PushRegistry::new();
        let url = Url::parse("https://example.com/pushed.js").unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        registry.on_push(move |u| seen_clone.lock().unwrap().push(u.to_string()));

        ingest(
            &cache,
            &registry,
            url.clone(),
            head(&[("cache-control", "max-age=60")]),
            body(b"console.log(1)"),
        )
        .await;

        assert_eq!(*seen.lock().unwrap(), vec![url.to_string()]);
        let key = fingerprint::compute("GET", &url, &Headers::new(), None);
        let (entry, _) = cache.lookup(&key).expect("pushed entry must be committed");
        assert_eq!(entry.body.as_ref(), b"console.log(1)");
    }

    #[tokio::test]
    async fn test_unstorable_push_is_discarded_silently() {
        let cache = CacheStore::new(1 << 20);
        let registry = PushRegistry::new();
        let notified = Arc::new(AtomicU64::new(0));
        let notified_clone = Arc::clone(&notified);
        registry.on_push(move |_| {
            notified_clone.fetch_add(1, Ordering::Relaxed);
        });

        let url = Url::parse("https://example.com/private").unwrap();
        ingest(
            &cache,
            &registry,
            url,
            head(&[("cache-control", "no-store")]),
            body(b"secret"),
        )
        .await;

        assert_eq!(cache.stats().count, 0);
        assert_eq!(notified.load(Ordering::Relaxed), 0);
    }
}
