//! Buffered response bodies.

use crate::base::error::FetchError;
use crate::http::ByteStream;
use bytes::Bytes;
use futures::stream;

/// Chunk size used by [`BodyBuffer::readable_stream`].
const STREAM_CHUNK_SIZE: usize = 16 * 1024;

/// An owned response body with repeatable accessors.
///
/// Every accessor may be called any number of times; `readable_stream`
/// produces a fresh one-shot stream per call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyBuffer {
    data: Bytes,
    content_type: Option<String>,
}

impl BodyBuffer {
    pub fn new(data: Bytes, content_type: Option<String>) -> Self {
        Self { data, content_type }
    }

    /// Zero-copy view of the body bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Declared `Content-Type` of the response, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Decode the body as UTF-8.
    pub fn text(&self) -> Result<&str, FetchError> {
        std::str::from_utf8(&self.data).map_err(|e| FetchError::Decode(e.to_string()))
    }

    /// Parse the body as JSON.
    pub fn json(&self) -> Result<serde_json::Value, FetchError> {
        let text = self.text()?;
        serde_json::from_str(text).map_err(|e| FetchError::Parse(e.to_string()))
    }

    /// Parse the body as JSON into a typed value.
    pub fn json_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, FetchError> {
        serde_json::from_slice(&self.data).map_err(|e| FetchError::Parse(e.to_string()))
    }

    /// Owned copy of the body bytes.
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.to_vec()
    }

    /// A fresh one-shot stream over the buffered bytes, emitted in chunks
    /// and ending cleanly.
    pub fn readable_stream(&self) -> ByteStream {
        let mut remaining = self.data.clone();
        let mut chunks = Vec::with_capacity(remaining.len() / STREAM_CHUNK_SIZE + 1);
        while remaining.len() > STREAM_CHUNK_SIZE {
            chunks.push(Ok(remaining.split_to(STREAM_CHUNK_SIZE)));
        }
        if !remaining.is_empty() {
            chunks.push(Ok(remaining));
        }
        Box::pin(stream::iter(chunks))
    }
}
