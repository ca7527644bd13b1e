//! The built-in transport: hyper for HTTP/1.1, the `h2` crate for HTTP/2,
//! rustls for TLS with ALPN.

use crate::base::error::FetchError;
use crate::http::{ByteStream, Headers};
use crate::session::transport::{
    Connect, Connecting, Origin, Protocol, PushSink, ResponseHead, Sending, Transport,
    TransportRequest,
};
use bytes::Bytes;
use futures::StreamExt;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, BodyStream, Empty, StreamBody};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use url::Url;

/// Default [`Connect`] implementation over TCP and rustls.
pub struct NetConnector {
    roots: Arc<rustls::RootCertStore>,
    push_promise_timeout: Duration,
}

impl NetConnector {
    pub fn new(push_promise_timeout: Duration) -> Self {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Self { roots: Arc::new(roots), push_promise_timeout }
    }
}

impl Connect for NetConnector {
    fn connect(&self, origin: &Origin, protocols: &[Protocol], pushes: PushSink) -> Connecting {
        let origin = origin.clone();
        let protocols = protocols.to_vec();
        let roots = Arc::clone(&self.roots);
        let push_timeout = self.push_promise_timeout;

        Box::pin(async move {
            let tcp = TcpStream::connect((origin.host.as_str(), origin.port)).await?;
            let _ = tcp.set_nodelay(true);

            if !origin.is_https() {
                tracing::debug!(origin = %origin, "opened cleartext http/1.1 session");
                return H1Transport::handshake(tcp).await;
            }

            let mut config = rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth();
            config.alpn_protocols = protocols.iter().map(|p| p.alpn_id().to_vec()).collect();

            let server_name = ServerName::try_from(origin.host.clone())
                .map_err(|e| FetchError::invalid(format!("bad server name: {e}")))?;
            let tls = TlsConnector::from(Arc::new(config))
                .connect(server_name, tcp)
                .await?;

            let negotiated_h2 =
                tls.get_ref().1.alpn_protocol() == Some(Protocol::Http2.alpn_id());
            if negotiated_h2 {
                tracing::debug!(origin = %origin, "ALPN selected h2");
                H2Transport::handshake(tls, pushes, push_timeout).await
            } else if protocols.contains(&Protocol::Http1) {
                tracing::debug!(origin = %origin, "ALPN fell back to http/1.1");
                H1Transport::handshake(tls).await
            } else {
                Err(FetchError::network(format!(
                    "ALPN negotiation failed: {origin} does not speak h2"
                )))
            }
        })
    }
}

type H1Body = BoxBody<Bytes, FetchError>;

struct H1Transport {
    sender: Arc<tokio::sync::Mutex<hyper::client::conn::http1::SendRequest<H1Body>>>,
    alive: Arc<AtomicBool>,
}

impl H1Transport {
    async fn handshake<T>(io: T) -> Result<Arc<dyn Transport>, FetchError>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io)).await?;
        let alive = Arc::new(AtomicBool::new(true));
        let alive_flag = Arc::clone(&alive);
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                tracing::debug!(error = %e, "http/1.1 connection closed");
            }
            alive_flag.store(false, Ordering::Relaxed);
        });
        Ok(Arc::new(Self { sender: Arc::new(tokio::sync::Mutex::new(sender)), alive }))
    }
}

impl Transport for H1Transport {
    fn protocol(&self) -> Protocol {
        Protocol::Http1
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    fn send(&self, req: TransportRequest) -> Sending {
        let sender = Arc::clone(&self.sender);
        Box::pin(async move {
            let mut target = req.url.path().to_string();
            if let Some(query) = req.url.query() {
                target.push('?');
                target.push_str(query);
            }
            let mut request = http::Request::builder()
                .method(req.method)
                .uri(target)
                .body(request_body(req.body))
                .map_err(|e| FetchError::invalid(e.to_string()))?;
            *request.headers_mut() = req.headers.to_header_map();
            if !request.headers().contains_key(http::header::HOST) {
                let host = host_header(&req.url);
                if let Ok(value) = http::HeaderValue::from_str(&host) {
                    request.headers_mut().insert(http::header::HOST, value);
                }
            }

            // HTTP/1.1 does not multiplex; hold the sender for the full
            // request/response-head exchange.
            let mut sender = sender.lock().await;
            sender.ready().await?;
            let response = sender.send_request(request).await?;
            drop(sender);

            let (parts, body) = response.into_parts();
            let head = ResponseHead {
                status: parts.status,
                version: Protocol::Http1,
                headers: Headers::from_header_map(&parts.headers),
            };
            Ok((head, incoming_stream(body)))
        })
    }
}

struct H2Transport {
    sender: h2::client::SendRequest<Bytes>,
    alive: Arc<AtomicBool>,
    pushes: PushSink,
    push_timeout: Duration,
}

impl H2Transport {
    async fn handshake<T>(
        io: T,
        pushes: PushSink,
        push_timeout: Duration,
    ) -> Result<Arc<dyn Transport>, FetchError>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sender, connection) = h2::client::Builder::new()
            .enable_push(true)
            .handshake::<_, Bytes>(io)
            .await?;
        let alive = Arc::new(AtomicBool::new(true));
        let alive_flag = Arc::clone(&alive);
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(error = %e, "h2 connection closed");
            }
            alive_flag.store(false, Ordering::Relaxed);
        });
        Ok(Arc::new(Self { sender, alive, pushes, push_timeout }))
    }
}

impl Transport for H2Transport {
    fn protocol(&self) -> Protocol {
        Protocol::Http2
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    fn send(&self, req: TransportRequest) -> Sending {
        let sender = self.sender.clone();
        let pushes = Arc::clone(&self.pushes);
        let push_timeout = self.push_timeout;
        Box::pin(async move {
            let mut request = http::Request::builder()
                .method(req.method)
                .uri(req.url.as_str())
                .body(())
                .map_err(|e| FetchError::invalid(e.to_string()))?;
            *request.headers_mut() = req.headers.to_header_map();
            // :authority carries the host over h2.
            request.headers_mut().remove(http::header::HOST);

            let end_of_stream = req.body.is_none();
            let mut sender = sender.ready().await?;
            let (mut response, send_stream) = sender.send_request(request, end_of_stream)?;

            let mut promises = response.push_promises();
            tokio::spawn(async move {
                while let Some(promise) = promises.push_promise().await {
                    match promise {
                        Ok(promise) => {
                            let sink = Arc::clone(&pushes);
                            tokio::spawn(handle_push(promise, sink, push_timeout));
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "push promise stream ended");
                            break;
                        }
                    }
                }
            });

            if let Some(body) = req.body {
                tokio::spawn(send_request_body(send_stream, body));
            }

            let resp = response.await?;
            let (parts, recv) = resp.into_parts();
            let head = ResponseHead {
                status: parts.status,
                version: Protocol::Http2,
                headers: Headers::from_header_map(&parts.headers),
            };
            Ok((head, recv_stream(recv)))
        })
    }
}

async fn handle_push(promise: h2::client::PushPromise, sink: PushSink, timeout: Duration) {
    let (request, response) = promise.into_parts();
    let Ok(url) = Url::parse(&request.uri().to_string()) else {
        tracing::debug!(uri = %request.uri(), "discarding push with unparsable URI");
        return;
    };
    let response = match tokio::time::timeout(timeout, response).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            tracing::debug!(url = %url, error = %e, "pushed stream failed");
            return;
        }
        Err(_) => {
            tracing::debug!(url = %url, "push promise timed out, discarded");
            return;
        }
    };
    let (parts, recv) = response.into_parts();
    let head = ResponseHead {
        status: parts.status,
        version: Protocol::Http2,
        headers: Headers::from_header_map(&parts.headers),
    };
    sink(url, head, recv_stream(recv));
}

/// Stream a request body into an h2 stream, honoring flow-control
/// capacity.
async fn send_request_body(mut stream: h2::SendStream<Bytes>, mut body: ByteStream) {
    while let Some(chunk) = body.next().await {
        let mut chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!(error = %e, "request body stream failed, resetting");
                stream.send_reset(h2::Reason::CANCEL);
                return;
            }
        };
        while !chunk.is_empty() {
            stream.reserve_capacity(chunk.len());
            let capacity =
                match futures::future::poll_fn(|cx| stream.poll_capacity(cx)).await {
                    Some(Ok(n)) if n > 0 => n,
                    Some(Ok(_)) => continue,
                    _ => return,
                };
            let frame = chunk.split_to(capacity.min(chunk.len()));
            if stream.send_data(frame, false).is_err() {
                return;
            }
        }
    }
    let _ = stream.send_data(Bytes::new(), true);
}

fn request_body(body: Option<ByteStream>) -> H1Body {
    match body {
        None => Empty::<Bytes>::new().map_err(|never| match never {}).boxed(),
        Some(stream) => {
            BodyExt::boxed(StreamBody::new(stream.map(|r| r.map(hyper::body::Frame::data))))
        }
    }
}

fn incoming_stream(body: hyper::body::Incoming) -> ByteStream {
    Box::pin(BodyStream::new(body).filter_map(|frame| {
        futures::future::ready(match frame {
            Ok(frame) => frame.into_data().ok().map(Ok),
            Err(e) => Some(Err(FetchError::network(e))),
        })
    }))
}

fn recv_stream(recv: h2::RecvStream) -> ByteStream {
    Box::pin(futures::stream::unfold(recv, |mut recv| async move {
        match recv.data().await {
            Some(Ok(chunk)) => {
                let _ = recv.flow_control().release_capacity(chunk.len());
                Some((Ok(chunk), recv))
            }
            Some(Err(e)) => Some((Err(FetchError::network(e)), recv)),
            None => None,
        }
    }))
}

fn host_header(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}
