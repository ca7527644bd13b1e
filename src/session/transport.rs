//! The transport seam.
//!
//! The TLS/ALPN stack and the HTTP/1 and HTTP/2 framing codecs live behind
//! these traits: a transport takes a request and yields a response head
//! plus a body stream, and may hand server-pushed responses to the sink it
//! was connected with.
//!
//! # Design Notes
//!
//! - `&self` methods for concurrent dispatch over a multiplexed session.
//! - Boxed futures for trait object compatibility.

use crate::base::error::FetchError;
use crate::http::{ByteStream, Headers};
use http::{Method, StatusCode};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use url::Url;

/// Wire protocol of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http1,
    Http2,
}

impl Protocol {
    /// The major HTTP version: 1 or 2.
    pub fn version_number(self) -> u8 {
        match self {
            Protocol::Http1 => 1,
            Protocol::Http2 => 2,
        }
    }

    /// ALPN protocol identifier.
    pub fn alpn_id(self) -> &'static [u8] {
        match self {
            Protocol::Http1 => b"http/1.1",
            Protocol::Http2 => b"h2",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Http1 => f.write_str("http/1.1"),
            Protocol::Http2 => f.write_str("h2"),
        }
    }
}

/// A connection target: scheme + host + effective port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl Origin {
    pub fn from_url(url: &Url) -> Result<Self, FetchError> {
        let host = url
            .host_str()
            .ok_or_else(|| FetchError::invalid(format!("URL has no host: {url}")))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| FetchError::invalid(format!("URL has no port: {url}")))?;
        Ok(Origin {
            scheme: url.scheme().to_ascii_lowercase(),
            host: host.to_ascii_lowercase(),
            port,
        })
    }

    pub fn is_https(&self) -> bool {
        self.scheme == "https"
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// A request as handed to the transport: resolved method, absolute URL,
/// finalized headers, and an optional streaming body.
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Headers,
    pub body: Option<ByteStream>,
}

/// The head of a received response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub version: Protocol,
    pub headers: Headers,
}

/// Receiver for server-pushed responses: `(pushed URL, head, body stream)`.
/// Invoked by the transport as pushed streams arrive; implementations must
/// not block.
pub type PushSink = Arc<dyn Fn(Url, ResponseHead, ByteStream) + Send + Sync>;

/// Future returned by [`Transport::send`].
pub type Sending =
    Pin<Box<dyn Future<Output = Result<(ResponseHead, ByteStream), FetchError>> + Send>>;

/// A live protocol session to one origin.
pub trait Transport: Send + Sync {
    /// Negotiated protocol of this session.
    fn protocol(&self) -> Protocol;

    /// Whether the underlying connection can still carry requests.
    fn is_alive(&self) -> bool;

    /// Dispatch one request. The returned body stream delivers the
    /// response as it arrives; the transport must not buffer it whole.
    fn send(&self, req: TransportRequest) -> Sending;
}

/// Future returned by [`Connect::connect`].
pub type Connecting = Pin<Box<dyn Future<Output = Result<Arc<dyn Transport>, FetchError>> + Send>>;

/// Opens transports. `protocols` is the caller's preference order; the
/// implementation negotiates within it (ALPN for `https`) and reports the
/// outcome via [`Transport::protocol`].
pub trait Connect: Send + Sync {
    fn connect(&self, origin: &Origin, protocols: &[Protocol], pushes: PushSink) -> Connecting;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_from_url_normalizes() {
        let origin = Origin::from_url(&Url::parse("HTTPS://Example.COM/a/b").unwrap()).unwrap();
        assert_eq!(origin.scheme, "https");
        assert_eq!(origin.host, "example.com");
        assert_eq!(origin.port, 443);
        assert!(origin.is_https());
    }

    #[test]
    fn test_origin_distinguishes_port() {
        let a = Origin::from_url(&Url::parse("http://h/").unwrap()).unwrap();
        let b = Origin::from_url(&Url::parse("http://h:8080/").unwrap()).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.port, 80);
    }

    #[test]
    fn test_protocol_version_numbers() {
        assert_eq!(Protocol::Http1.version_number(), 1);
        assert_eq!(Protocol::Http2.version_number(), 2);
        assert_eq!(Protocol::Http2.alpn_id(), b"h2");
    }
}
