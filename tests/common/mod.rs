//! In-process transport fakes for protocol-selection and push tests.

#![allow(dead_code)]

use bytes::Bytes;
use duofetch::http::{ByteStream, Headers};
use duofetch::session::transport::{
    Connect, Connecting, Origin, Protocol, PushSink, ResponseHead, Sending, Transport,
    TransportRequest,
};
use futures::stream;
use http::StatusCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use url::Url;

/// A pushed resource a [`MockTransport`] delivers alongside every
/// response.
#[derive(Clone)]
pub struct CannedPush {
    pub url: &'static str,
    pub headers: Vec<(&'static str, &'static str)>,
    pub body: &'static [u8],
}

/// Serves a canned 200 response on every request; optionally emits
/// server pushes first.
pub struct MockTransport {
    protocol: Protocol,
    response_headers: Vec<(&'static str, &'static str)>,
    body: &'static [u8],
    pushes: Vec<CannedPush>,
    sink: PushSink,
    pub requests: Arc<AtomicUsize>,
}

impl Transport for MockTransport {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn is_alive(&self) -> bool {
        true
    }

    fn send(&self, _req: TransportRequest) -> Sending {
        self.requests.fetch_add(1, Ordering::SeqCst);
        for push in &self.pushes {
            let mut headers = Headers::new();
            for (n, v) in &push.headers {
                headers.insert(*n, *v);
            }
            let head =
                ResponseHead { status: StatusCode::OK, version: self.protocol, headers };
            let body = push.body;
            let stream: ByteStream =
                Box::pin(stream::once(async move { Ok(Bytes::from_static(body)) }));
            (self.sink)(Url::parse(push.url).unwrap(), head, stream);
        }

        let mut headers = Headers::new();
        for (n, v) in &self.response_headers {
            headers.insert(*n, *v);
        }
        let head = ResponseHead { status: StatusCode::OK, version: self.protocol, headers };
        let body = self.body;
        Box::pin(async move {
            let stream: ByteStream =
                Box::pin(stream::once(async move { Ok(Bytes::from_static(body)) }));
            Ok((head, stream))
        })
    }
}

/// Fake connector: negotiates the first preferred protocol the fake
/// server supports, like ALPN would.
pub struct MockConnector {
    pub supports_h2: bool,
    pub response_headers: Vec<(&'static str, &'static str)>,
    pub body: &'static [u8],
    pub pushes: Vec<CannedPush>,
    pub connects: Arc<AtomicUsize>,
    pub requests: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new(supports_h2: bool) -> Self {
        Self {
            supports_h2,
            response_headers: vec![("cache-control", "no-store")],
            body: b"ok",
            pushes: Vec::new(),
            connects: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Connect for MockConnector {
    fn connect(&self, _origin: &Origin, protocols: &[Protocol], pushes: PushSink) -> Connecting {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let negotiated = protocols
            .iter()
            .copied()
            .find(|p| self.supports_h2 || *p == Protocol::Http1);
        let transport = negotiated.map(|protocol| MockTransport {
            protocol,
            response_headers: self.response_headers.clone(),
            body: self.body,
            pushes: self.pushes.clone(),
            sink: pushes,
            requests: Arc::clone(&self.requests),
        });
        Box::pin(async move {
            match transport {
                Some(t) => Ok(Arc::new(t) as Arc<dyn Transport>),
                None => Err(duofetch::FetchError::network("ALPN negotiation failed")),
            }
        })
    }
}
