pub mod bodybuffer;
pub mod headers;
pub mod request;
pub mod response;

// Re-exports for convenience
pub use bodybuffer::BodyBuffer;
pub use headers::Headers;
pub use request::{Body, CacheMode, FetchOptions, RedirectMode};
pub use response::Response;

use crate::base::error::FetchError;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// A one-shot readable byte stream. Live response bodies and the streams
/// produced by [`BodyBuffer::readable_stream`] both take this shape.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, FetchError>> + Send + Sync>>;
