//! The user-facing response type.

use crate::base::error::FetchError;
use crate::http::{BodyBuffer, ByteStream, Headers};
use crate::session::transport::Protocol;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use http::StatusCode;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::sync::watch;
use url::Url;

/// Bytes observed from a handed-out live stream, and whether that stream
/// has finished (read to its end, failed, or been dropped).
struct TeeState {
    data: BytesMut,
    done: bool,
}

/// Wraps a handed-out live stream, copying each chunk into shared state
/// so buffered accessors can still produce the body afterwards.
struct TeeStream {
    inner: ByteStream,
    state: Arc<Mutex<TeeState>>,
    done_tx: watch::Sender<bool>,
}

impl TeeStream {
    fn finish(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.done = true;
        drop(state);
        let _ = self.done_tx.send(true);
    }
}

impl Stream for TeeStream {
    type Item = Result<Bytes, FetchError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                let mut state = this.state.lock().unwrap_or_else(|e| e.into_inner());
                state.data.extend_from_slice(&chunk);
                drop(state);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                this.finish();
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for TeeStream {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Dual-natured response body: fully buffered, a live transport stream,
/// or a live stream handed out to the caller with its bytes teed.
enum ResponseBody {
    Buffered(BodyBuffer),
    Live(ByteStream),
    /// The live stream is out with the caller; `state` accumulates what
    /// it has delivered, `done` flips when it finishes.
    Streamed {
        state: Arc<Mutex<TeeState>>,
        done: watch::Receiver<bool>,
    },
}

/// An HTTP response.
///
/// Cache hits always carry a buffered body; network responses the cache
/// does not retain carry a live one. Buffered accessors (`text`, `json`,
/// `bytes`) may be called repeatedly. The live stream is handed out once
/// via [`Response::readable_stream`], and its bytes are teed as the
/// caller consumes it, so buffered accessors called afterwards still
/// yield the buffered view.
pub struct Response {
    status: StatusCode,
    version: Protocol,
    headers: Headers,
    url: Url,
    redirected: bool,
    from_cache: bool,
    body: ResponseBody,
}

impl Response {
    pub(crate) fn buffered(
        status: StatusCode,
        version: Protocol,
        headers: Headers,
        url: Url,
        redirected: bool,
        from_cache: bool,
        body: BodyBuffer,
    ) -> Self {
        Self {
            status,
            version,
            headers,
            url,
            redirected,
            from_cache,
            body: ResponseBody::Buffered(body),
        }
    }

    pub(crate) fn live(
        status: StatusCode,
        version: Protocol,
        headers: Headers,
        url: Url,
        redirected: bool,
        stream: ByteStream,
    ) -> Self {
        Self {
            status,
            version,
            headers,
            url,
            redirected,
            from_cache: false,
            body: ResponseBody::Live(stream),
        }
    }

    pub fn status(&self) -> u16 {
        self.status.as_u16()
    }

    pub fn status_text(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("")
    }

    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// HTTP version the response arrived over: 1 or 2.
    pub fn http_version(&self) -> u8 {
        self.version.version_number()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Final URL after any redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn redirected(&self) -> bool {
        self.redirected
    }

    pub fn from_cache(&self) -> bool {
        self.from_cache
    }

    /// The buffered body, if the response is (already) buffered.
    pub fn buffered_body(&self) -> Option<&BodyBuffer> {
        match &self.body {
            ResponseBody::Buffered(b) => Some(b),
            _ => None,
        }
    }

    pub fn is_live(&self) -> bool {
        !matches!(self.body, ResponseBody::Buffered(_))
    }

    /// Drain a live body into a buffer; no-op when already buffered.
    ///
    /// If the live stream was handed out via
    /// [`Response::readable_stream`], this waits until it finishes and
    /// then serves the teed bytes.
    pub async fn buffer(&mut self) -> Result<&BodyBuffer, FetchError> {
        match &self.body {
            ResponseBody::Buffered(_) => {}
            ResponseBody::Live(_) => {
                let ResponseBody::Live(mut stream) = std::mem::replace(
                    &mut self.body,
                    ResponseBody::Buffered(BodyBuffer::default()),
                ) else {
                    unreachable!("matched Live above")
                };
                let mut data = BytesMut::new();
                let mut failure = None;
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(chunk) => data.extend_from_slice(&chunk),
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
                let content_type = self.headers.get("content-type");
                self.body = ResponseBody::Buffered(BodyBuffer::new(data.freeze(), content_type));
                if let Some(e) = failure {
                    return Err(e);
                }
            }
            ResponseBody::Streamed { state, done } => {
                let state = Arc::clone(state);
                let mut done = done.clone();
                while !*done.borrow() {
                    if done.changed().await.is_err() {
                        break;
                    }
                }
                let data = {
                    let state = state.lock().unwrap_or_else(|e| e.into_inner());
                    Bytes::copy_from_slice(&state.data)
                };
                let content_type = self.headers.get("content-type");
                self.body = ResponseBody::Buffered(BodyBuffer::new(data, content_type));
            }
        }
        match &self.body {
            ResponseBody::Buffered(b) => Ok(b),
            _ => unreachable!("body buffered above"),
        }
    }

    /// Body bytes, buffering on first access.
    pub async fn bytes(&mut self) -> Result<Bytes, FetchError> {
        let body = self.buffer().await?;
        Ok(Bytes::copy_from_slice(body.bytes()))
    }

    /// Body decoded as UTF-8, buffering on first access.
    pub async fn text(&mut self) -> Result<String, FetchError> {
        Ok(self.buffer().await?.text()?.to_owned())
    }

    /// Body parsed as JSON, buffering on first access.
    pub async fn json(&mut self) -> Result<serde_json::Value, FetchError> {
        self.buffer().await?.json()
    }

    /// A readable stream over the body. For a buffered body this is a
    /// fresh stream per call; for a live body it is the one-shot
    /// transport stream, teed so buffered accessors keep working after
    /// it finishes. Fails only if the live stream is still outstanding
    /// with the caller.
    pub fn readable_stream(&mut self) -> Result<ByteStream, FetchError> {
        match &self.body {
            ResponseBody::Buffered(b) => return Ok(b.readable_stream()),
            ResponseBody::Streamed { state, .. } => {
                let state = Arc::clone(state);
                let guard = state.lock().unwrap_or_else(|e| e.into_inner());
                if !guard.done {
                    return Err(FetchError::invalid(
                        "live body stream is still outstanding",
                    ));
                }
                let data = Bytes::copy_from_slice(&guard.data);
                drop(guard);
                let content_type = self.headers.get("content-type");
                let buffer = BodyBuffer::new(data, content_type);
                let stream = buffer.readable_stream();
                self.body = ResponseBody::Buffered(buffer);
                return Ok(stream);
            }
            ResponseBody::Live(_) => {}
        }

        let ResponseBody::Live(inner) = std::mem::replace(
            &mut self.body,
            ResponseBody::Buffered(BodyBuffer::default()),
        ) else {
            unreachable!("matched Live above")
        };
        let state = Arc::new(Mutex::new(TeeState { data: BytesMut::new(), done: false }));
        let (done_tx, done_rx) = watch::channel(false);
        self.body = ResponseBody::Streamed { state: Arc::clone(&state), done: done_rx };
        Ok(Box::pin(TeeStream { inner, state, done_tx }))
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("version", &self.version)
            .field("url", &self.url.as_str())
            .field("redirected", &self.redirected)
            .field("from_cache", &self.from_cache)
            .field("live", &self.is_live())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn live_response(chunks: Vec<&'static [u8]>) -> Response {
        let stream: ByteStream =
            Box::pin(stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c)))));
        Response::live(
            StatusCode::OK,
            Protocol::Http1,
            Headers::new(),
            Url::parse("http://example.com/").unwrap(),
            false,
            stream,
        )
    }

    #[tokio::test]
    async fn test_live_body_buffers_on_first_access() {
        let mut resp = live_response(vec![b"hel", b"lo"]);
        assert!(resp.is_live());
        assert_eq!(resp.text().await.unwrap(), "hello");
        // Repeatable after buffering.
        assert_eq!(resp.text().await.unwrap(), "hello");
        assert!(!resp.is_live());
    }

    #[tokio::test]
    async fn test_stream_after_buffered_access_yields_buffered_view() {
        let mut resp = live_response(vec![b"data"]);
        resp.buffer().await.unwrap();
        let collected: Vec<_> = resp.readable_stream().unwrap().collect().await;
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].as_ref().unwrap().as_ref(), b"data");
        // Buffered streams are repeatable.
        assert!(resp.readable_stream().is_ok());
    }

    #[tokio::test]
    async fn test_buffered_access_after_live_stream_yields_buffered_view() {
        let mut resp = live_response(vec![b"da", b"ta"]);
        let mut stream = resp.readable_stream().unwrap();
        let mut consumed = Vec::new();
        while let Some(chunk) = stream.next().await {
            consumed.extend_from_slice(&chunk.unwrap());
        }
        drop(stream);
        assert_eq!(consumed, b"data");

        // The consumed stream was teed; buffered accessors see the body.
        assert_eq!(resp.text().await.unwrap(), "data");
        assert_eq!(resp.bytes().await.unwrap().as_ref(), b"data");
        // And the stream is available again, now as a buffered view.
        let collected: Vec<_> = resp.readable_stream().unwrap().collect().await;
        assert_eq!(collected[0].as_ref().unwrap().as_ref(), b"data");
    }

    #[tokio::test]
    async fn test_dropped_live_stream_buffers_consumed_prefix() {
        let mut resp = live_response(vec![b"abc", b"def"]);
        let mut stream = resp.readable_stream().unwrap();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.as_ref(), b"abc");
        drop(stream);

        // Only what the caller actually consumed was teed.
        assert_eq!(resp.text().await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_second_live_stream_while_outstanding_fails() {
        let mut resp = live_response(vec![b"x"]);
        let outstanding = resp.readable_stream().unwrap();
        assert!(resp.readable_stream().is_err());
        drop(outstanding);
        // Once the stream is gone, the teed view is served.
        assert!(resp.readable_stream().is_ok());
    }

    #[test]
    fn test_status_text() {
        let resp = live_response(vec![]);
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.status_text(), "OK");
        assert!(resp.ok());
    }
}
