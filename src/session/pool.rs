//! Per-origin session cache with protocol selection.

use crate::base::error::FetchError;
use crate::session::transport::{Connect, Origin, Protocol, PushSink, Transport};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Instant;

/// A pooled protocol session to one origin.
pub struct Session {
    pub protocol: Protocol,
    pub transport: Arc<dyn Transport>,
    last_activity: Mutex<Instant>,
}

impl Session {
    fn new(transport: Arc<dyn Transport>) -> Self {
        Self { protocol: transport.protocol(), transport, last_activity: Mutex::new(Instant::now()) }
    }

    fn touch(&self) {
        if let Ok(mut at) = self.last_activity.lock() {
            *at = Instant::now();
        }
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_activity
            .lock()
            .map(|at| at.elapsed())
            .unwrap_or_default()
    }
}

/// Origin -> [`Session`] map. Sessions are shared by every request to
/// their origin; dead ones are replaced lazily on the next acquire.
pub struct SessionPool {
    sessions: DashMap<Origin, Arc<Session>>,
    /// Origins where ALPN fell back to HTTP/1.1. Kept until
    /// [`SessionPool::disconnect_all`] so reconnects skip the h2 attempt.
    downgraded: DashMap<Origin, ()>,
    connector: Arc<dyn Connect>,
    https_protocols: Vec<Protocol>,
}

impl SessionPool {
    pub fn new(connector: Arc<dyn Connect>, https_protocols: Vec<Protocol>) -> Self {
        Self {
            sessions: DashMap::new(),
            downgraded: DashMap::new(),
            connector,
            https_protocols,
        }
    }

    /// Get the live session for `origin`, opening one if needed. The
    /// returned flag is true when an existing session was reused.
    ///
    /// Two concurrent acquires for a fresh origin may both connect; the
    /// later insert wins and the loser's transport is dropped with its
    /// last in-flight send unaffected.
    pub async fn acquire(
        &self,
        origin: &Origin,
        pushes: PushSink,
    ) -> Result<(Arc<Session>, bool), FetchError> {
        if let Some(existing) = self.sessions.get(origin) {
            if existing.transport.is_alive() {
                existing.touch();
                return Ok((Arc::clone(&existing), true));
            }
            drop(existing);
            self.sessions.remove(origin);
            tracing::debug!(origin = %origin, "dropped dead session");
        }

        let protocols = self.protocols_for(origin);
        let transport = self.connector.connect(origin, &protocols, pushes).await?;
        let session = Arc::new(Session::new(transport));

        if origin.is_https()
            && session.protocol == Protocol::Http1
            && protocols.contains(&Protocol::Http2)
        {
            tracing::debug!(origin = %origin, "caching http/1.1 downgrade");
            self.downgraded.insert(origin.clone(), ());
        }

        self.sessions.insert(origin.clone(), Arc::clone(&session));
        Ok((session, false))
    }

    /// Drop the pooled session for one origin, e.g. after a send over a
    /// reused session failed. The next acquire reconnects.
    pub fn discard(&self, origin: &Origin) {
        self.sessions.remove(origin);
    }

    /// Protocol preference for an origin: cleartext is always HTTP/1.1;
    /// https follows the configured preference unless a downgrade was
    /// cached.
    fn protocols_for(&self, origin: &Origin) -> Vec<Protocol> {
        if !origin.is_https() || self.downgraded.contains_key(origin) {
            vec![Protocol::Http1]
        } else {
            self.https_protocols.clone()
        }
    }

    /// Close every session. Downgrade knowledge is dropped with them;
    /// further use re-opens (and re-negotiates) lazily.
    pub fn disconnect_all(&self) {
        self.sessions.clear();
        self.downgraded.clear();
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Headers;
    use crate::session::transport::{Connecting, ResponseHead, Sending, TransportRequest};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FakeTransport {
        protocol: Protocol,
        alive: Arc<AtomicBool>,
    }

    impl Transport for FakeTransport {
        fn protocol(&self) -> Protocol {
            self.protocol
        }
        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::Relaxed)
        }
        fn send(&self, _req: TransportRequest) -> Sending {
            Box::pin(async {
                Ok((
                    ResponseHead {
                        status: http::StatusCode::OK,
                        version: Protocol::Http1,
                        headers: Headers::new(),
                    },
                    Box::pin(futures::stream::empty()) as crate::http::ByteStream,
                ))
            })
        }
    }

    /// Connector that "negotiates" the first requested protocol the fake
    /// server supports.
    struct FakeConnector {
        supports_h2: bool,
        connects: AtomicUsize,
        alive: Arc<AtomicBool>,
    }

    impl Connect for FakeConnector {
        fn connect(
            &self,
            _origin: &Origin,
            protocols: &[Protocol],
            _pushes: PushSink,
        ) -> Connecting {
            self.connects.fetch_add(1, Ordering::Relaxed);
            let negotiated = protocols
                .iter()
                .copied()
                .find(|p| *p == Protocol::Http1 || self.supports_h2)
                .unwrap_or(Protocol::Http1);
            let alive = Arc::clone(&self.alive);
            Box::pin(async move {
                Ok(Arc::new(FakeTransport { protocol: negotiated, alive }) as Arc<dyn Transport>)
            })
        }
    }

    fn sink() -> PushSink {
        Arc::new(|_, _, _| {})
    }

    fn https_origin() -> Origin {
        Origin { scheme: "https".into(), host: "example.com".into(), port: 443 }
    }

    #[tokio::test]
    async fn test_sessions_are_reused() {
        let alive = Arc::new(AtomicBool::new(true));
        let connector = Arc::new(FakeConnector {
            supports_h2: true,
            connects: AtomicUsize::new(0),
            alive,
        });
        let pool = SessionPool::new(
            Arc::clone(&connector) as Arc<dyn Connect>,
            vec![Protocol::Http2, Protocol::Http1],
        );

        let origin = https_origin();
        let (first, reused) = pool.acquire(&origin, sink()).await.unwrap();
        assert!(!reused);
        let (second, reused) = pool.acquire(&origin, sink()).await.unwrap();
        assert!(reused);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connector.connects.load(Ordering::Relaxed), 1);
        assert_eq!(first.protocol, Protocol::Http2);
    }

    #[tokio::test]
    async fn test_downgrade_is_cached_until_disconnect() {
        let alive = Arc::new(AtomicBool::new(true));
        let connector = Arc::new(FakeConnector {
            supports_h2: false,
            connects: AtomicUsize::new(0),
            alive: Arc::clone(&alive),
        });
        let pool = SessionPool::new(
            Arc::clone(&connector) as Arc<dyn Connect>,
            vec![Protocol::Http2, Protocol::Http1],
        );

        let origin = https_origin();
        let (session, _) = pool.acquire(&origin, sink()).await.unwrap();
        assert_eq!(session.protocol, Protocol::Http1);

        // Kill the session; the reconnect must not retry h2.
        alive.store(false, Ordering::Relaxed);
        pool.acquire(&origin, sink()).await.unwrap();
        assert!(pool.downgraded.contains_key(&origin));

        pool.disconnect_all();
        assert_eq!(pool.session_count(), 0);
        assert!(!pool.downgraded.contains_key(&origin));
    }

    #[tokio::test]
    async fn test_cleartext_never_attempts_h2() {
        let alive = Arc::new(AtomicBool::new(true));
        let connector = Arc::new(FakeConnector {
            supports_h2: true,
            connects: AtomicUsize::new(0),
            alive,
        });
        let pool = SessionPool::new(
            Arc::clone(&connector) as Arc<dyn Connect>,
            vec![Protocol::Http2, Protocol::Http1],
        );

        let origin = Origin { scheme: "http".into(), host: "example.com".into(), port: 80 };
        let (session, _) = pool.acquire(&origin, sink()).await.unwrap();
        assert_eq!(session.protocol, Protocol::Http1);
    }
}
