//! Request options and body variants.

use crate::http::{ByteStream, Headers};
use bytes::Bytes;
use std::time::Duration;

/// Request body for methods that send data.
///
/// The engine dispatches on the tag to serialize and to pick a default
/// `Content-Type`.
#[derive(Default)]
pub enum Body {
    /// No body (GET, HEAD, DELETE).
    #[default]
    Empty,
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Bytes),
    /// A structured value, serialized to UTF-8 JSON on dispatch.
    Json(serde_json::Value),
    /// A readable byte stream, forwarded without buffering.
    Stream(ByteStream),
}

impl Body {
    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }

    /// Default `Content-Type` implied by the body tag, if any.
    pub fn default_content_type(&self) -> Option<&'static str> {
        match self {
            Body::Text(_) => Some("text/plain; charset=utf-8"),
            Body::Json(_) => Some("application/json"),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Empty => f.write_str("Body::Empty"),
            Body::Text(s) => f.debug_tuple("Body::Text").field(&s.len()).finish(),
            Body::Bytes(b) => f.debug_tuple("Body::Bytes").field(&b.len()).finish(),
            Body::Json(_) => f.write_str("Body::Json"),
            Body::Stream(_) => f.write_str("Body::Stream"),
        }
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::Text(s)
    }
}

impl From<&str> for Body {
    fn from(s: &str) -> Self {
        Body::Text(s.to_owned())
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Self {
        Body::Bytes(Bytes::from(v))
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self {
        Body::Bytes(b)
    }
}

impl From<serde_json::Value> for Body {
    fn from(v: serde_json::Value) -> Self {
        Body::Json(v)
    }
}

/// What to do when the server answers with a redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedirectMode {
    /// Follow 301/302/303/307/308 up to the configured limit.
    #[default]
    Follow,
    /// Return the redirect response as-is.
    Manual,
    /// Surface an error on any redirect response.
    Error,
}

/// Per-request cache behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Normal RFC 7234 behavior.
    #[default]
    Default,
    /// Bypass the cache for both reads and writes.
    NoStore,
}

/// Options accepted by `fetch`.
#[derive(Debug, Default)]
pub struct FetchOptions {
    /// HTTP method. Uppercased before dispatch; empty is rejected.
    pub method: Option<String>,
    pub headers: Headers,
    pub body: Option<Body>,
    /// Per-request deadline covering dispatch and, on buffered paths,
    /// body draining.
    pub timeout: Option<Duration>,
    pub redirect: RedirectMode,
    pub cache: CacheMode,
    /// Explicit `Content-Type`, overriding whatever the body tag implies.
    pub content_type: Option<String>,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = Some(Body::Json(value));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn redirect(mut self, mode: RedirectMode) -> Self {
        self.redirect = mode;
        self
    }

    pub fn no_store(mut self) -> Self {
        self.cache = CacheMode::NoStore;
        self
    }
}
