//! The fetch pipeline: validation, cache consultation, dispatch,
//! revalidation, store-through, and redirect handling.

use crate::base::error::FetchError;
use crate::cache::{fingerprint, freshness, CacheEntry, CacheStore, Decision};
use crate::context::Config;
use crate::http::{Body, BodyBuffer, ByteStream, FetchOptions, Headers, RedirectMode, Response};
use crate::push::{self, PushRegistry};
use crate::session::pool::SessionPool;
use crate::session::transport::{Origin, PushSink, ResponseHead, TransportRequest};
use bytes::{Bytes, BytesMut};
use futures::{stream, StreamExt};
use http::{Method, StatusCode};
use std::future::Future;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::time::Instant;
use url::Url;

const REDIRECT_STATUSES: &[u16] = &[301, 302, 303, 307, 308];

/// Request body as carried through the redirect loop. Byte bodies replay
/// across hops; a stream body can be sent once.
enum DispatchBody {
    None,
    Bytes(Bytes),
    Stream(Option<ByteStream>),
}

impl DispatchBody {
    fn take_stream(&mut self) -> Result<Option<ByteStream>, FetchError> {
        match self {
            DispatchBody::None => Ok(None),
            DispatchBody::Bytes(b) => {
                let b = b.clone();
                let replay: ByteStream =
                    Box::pin(stream::once(async move { Ok::<_, FetchError>(b) }));
                Ok(Some(replay))
            }
            DispatchBody::Stream(s) => s
                .take()
                .map(Some)
                .ok_or_else(|| FetchError::network("cannot replay a streamed request body")),
        }
    }
}

/// Orchestrates one Context's fetches over its pool, cache, and registry.
pub struct RequestEngine {
    config: Config,
    pool: Arc<SessionPool>,
    cache: Arc<CacheStore>,
    push_sink: PushSink,
}

impl RequestEngine {
    pub fn new(
        config: Config,
        pool: Arc<SessionPool>,
        cache: Arc<CacheStore>,
        registry: Arc<PushRegistry>,
    ) -> Self {
        let sink_cache = Arc::clone(&cache);
        let push_sink: PushSink = Arc::new(move |url, head, body| {
            let cache = Arc::clone(&sink_cache);
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                push::ingest(&cache, &registry, url, head, body).await;
            });
        });
        Self { config, pool, cache, push_sink }
    }

    pub async fn fetch(&self, url: &str, mut options: FetchOptions) -> Result<Response, FetchError> {
        let method = validate_method(options.method.as_deref())?;
        let url = Url::parse(url)?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(FetchError::invalid(format!(
                "unsupported URL scheme: {}",
                url.scheme()
            )));
        }

        let mut headers = std::mem::take(&mut options.headers);
        if self.config.overwrite_user_agent || !headers.contains("user-agent") {
            headers.insert("user-agent", self.config.user_agent.clone());
        }

        let (body, implied_content_type) = prepare_body(options.body.take())?;
        if let Some(ct) = options.content_type.take() {
            headers.insert("content-type", ct);
        } else if let Some(ct) = implied_content_type {
            if !headers.contains("content-type") {
                headers.insert("content-type", ct);
            }
        }

        let plain_key = fingerprint::compute(method.as_str(), &url, &headers, None);

        // Upfront decision: non-cacheable methods and no-store requests
        // skip the cache entirely.
        let now = SystemTime::now();
        let upfront = freshness::decide(method.as_str(), options.cache, &headers, None, now);

        let mut stale: Option<(Arc<CacheEntry>, Vec<u8>)> = None;
        let mut key = plain_key.clone();
        if upfront.consults_cache() {
            if let Some(vary) = self.cache.known_vary(&plain_key) {
                key = fingerprint::compute(method.as_str(), &url, &headers, Some(&vary));
            }
            if let Some((entry, age)) = self.cache.lookup(&key) {
                match freshness::decide(
                    method.as_str(),
                    options.cache,
                    &headers,
                    Some((&entry, age)),
                    now,
                ) {
                    Decision::HitFresh => {
                        tracing::debug!(url = %url, age, "cache hit");
                        return Ok(hit_response(&entry, age, url));
                    }
                    Decision::HitStaleRevalidate => {
                        tracing::debug!(url = %url, age, "stale entry, revalidating");
                        stale = Some((entry, key.clone()));
                    }
                    _ => {}
                }
            }
        }

        let deadline = options.timeout.map(|t| Instant::now() + t);
        let may_store = upfront == Decision::MissStore || stale.is_some();
        self.network_fetch(
            method,
            url,
            headers,
            body,
            options.redirect,
            stale,
            may_store,
            deadline,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn network_fetch(
        &self,
        method: Method,
        url: Url,
        headers: Headers,
        body: Body,
        redirect: RedirectMode,
        stale: Option<(Arc<CacheEntry>, Vec<u8>)>,
        may_store: bool,
        deadline: Option<Instant>,
    ) -> Result<Response, FetchError> {
        let mut current_method = method;
        let mut current_url = url;
        let mut current_headers = headers;
        let mut dispatch_body = match body {
            Body::Empty => DispatchBody::None,
            Body::Bytes(b) => DispatchBody::Bytes(b),
            Body::Stream(s) => DispatchBody::Stream(Some(s)),
            // Text and Json were serialized by prepare_body.
            Body::Text(s) => DispatchBody::Bytes(Bytes::from(s)),
            Body::Json(_) => unreachable!("json body serialized before dispatch"),
        };
        if let DispatchBody::Bytes(b) = &dispatch_body {
            if !current_headers.contains("content-length") {
                current_headers.insert("content-length", b.len().to_string());
            }
        }

        let mut sent_conditionals = false;
        if let Some((entry, _)) = &stale {
            for (name, value) in freshness::conditional_headers(entry) {
                current_headers.insert(name, value);
                sent_conditionals = true;
            }
        }

        let mut hops = 0usize;
        let mut redirected = false;
        let mut retried_reuse = false;
        let (head, body_stream) = loop {
            let origin = Origin::from_url(&current_url)?;
            let (session, reused) = with_deadline(
                deadline,
                self.pool.acquire(&origin, Arc::clone(&self.push_sink)),
            )
            .await?;

            let request = TransportRequest {
                method: current_method.clone(),
                url: current_url.clone(),
                headers: current_headers.clone(),
                body: dispatch_body.take_stream()?,
            };
            let (head, body_stream) =
                match with_deadline(deadline, session.transport.send(request)).await {
                    Ok(result) => {
                        // A fresh retry budget for the next hop.
                        retried_reuse = false;
                        result
                    }
                    // A reused session can die under us (server closed the
                    // idle connection); reconnect once and resend, unless
                    // the body cannot be replayed.
                    Err(e)
                        if reused
                            && !retried_reuse
                            && !e.is_timeout()
                            && !matches!(dispatch_body, DispatchBody::Stream(_)) =>
                    {
                        tracing::debug!(origin = %origin, error = %e, "send over reused session failed, reconnecting");
                        self.pool.discard(&origin);
                        retried_reuse = true;
                        continue;
                    }
                    Err(e) => return Err(e),
                };

            let status = head.status.as_u16();
            if REDIRECT_STATUSES.contains(&status) {
                if let Some(location) = head.headers.first("location") {
                    match redirect {
                        RedirectMode::Follow => {
                            hops += 1;
                            if hops > self.config.redirect_limit {
                                return Err(FetchError::TooManyRedirects(
                                    self.config.redirect_limit,
                                ));
                            }
                            let next = current_url
                                .join(location)
                                .map_err(|e| FetchError::network(format!("bad Location: {e}")))?;
                            tracing::debug!(from = %current_url, to = %next, status, "following redirect");

                            if status == 303 {
                                current_method = Method::GET;
                                dispatch_body = DispatchBody::None;
                                current_headers.remove("content-type");
                                current_headers.remove("content-length");
                            }
                            if sent_conditionals {
                                current_headers.remove("if-none-match");
                                current_headers.remove("if-modified-since");
                                sent_conditionals = false;
                            }
                            if current_url.origin() != next.origin() {
                                current_headers.remove("authorization");
                            }
                            let mut next = next;
                            let _ = next.set_username("");
                            let _ = next.set_password(None);

                            current_url = next;
                            redirected = true;
                            continue;
                        }
                        RedirectMode::Error => {
                            return Err(FetchError::network(format!(
                                "redirect to {location} refused by redirect mode"
                            )));
                        }
                        RedirectMode::Manual => break (head, body_stream),
                    }
                }
            }

            // A 304 answer to our conditionals refreshes and serves the
            // stale entry.
            if head.status == StatusCode::NOT_MODIFIED && sent_conditionals {
                if let Some((entry, key)) = &stale {
                    let refreshed = refresh_entry(entry, &head);
                    let plain_key =
                        fingerprint::compute(current_method.as_str(), &current_url, &Headers::new(), None);
                    let age = refreshed.age_seconds();
                    let response = hit_response(&refreshed, age, current_url.clone());
                    self.cache.store(&plain_key, key.clone(), refreshed);
                    return Ok(response);
                }
            }

            break (head, body_stream);
        };

        let status = head.status.as_u16();
        if may_store && freshness::response_storable(status, &head.headers) {
            // Buffer, store, and hand the caller the buffered body.
            let data = with_deadline(deadline, drain(body_stream)).await?;
            let entry = CacheEntry::new(head.status, head.version, head.headers.clone(), data);
            let final_plain =
                fingerprint::compute(current_method.as_str(), &current_url, &Headers::new(), None);
            let final_key = if entry.vary.is_empty() {
                final_plain.clone()
            } else {
                fingerprint::compute(
                    current_method.as_str(),
                    &current_url,
                    &current_headers,
                    Some(&entry.vary),
                )
            };
            let buffer = BodyBuffer::new(entry.body.clone(), head.headers.get("content-type"));
            tracing::debug!(url = %current_url, bytes = buffer.len(), "stored response");
            self.cache.store(&final_plain, final_key, entry);
            return Ok(Response::buffered(
                head.status,
                head.version,
                head.headers,
                current_url,
                redirected,
                false,
                buffer,
            ));
        }

        Ok(Response::live(
            head.status,
            head.version,
            head.headers,
            current_url,
            redirected,
            body_stream,
        ))
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }
}

fn validate_method(method: Option<&str>) -> Result<Method, FetchError> {
    let method = method.unwrap_or("GET");
    if method.is_empty() {
        return Err(FetchError::invalid("method must be a non-empty string"));
    }
    let upper = method.to_ascii_uppercase();
    Method::from_bytes(upper.as_bytes())
        .map_err(|_| FetchError::invalid(format!("malformed method: {method:?}")))
}

/// Serialize structured bodies and report the content type the body tag
/// implies.
fn prepare_body(body: Option<Body>) -> Result<(Body, Option<&'static str>), FetchError> {
    let body = body.unwrap_or_default();
    let implied = body.default_content_type();
    let body = match body {
        Body::Json(value) => {
            let bytes = serde_json::to_vec(&value)
                .map_err(|e| FetchError::invalid(format!("unserializable JSON body: {e}")))?;
            Body::Bytes(Bytes::from(bytes))
        }
        other => other,
    };
    Ok((body, implied))
}

async fn with_deadline<T>(
    deadline: Option<Instant>,
    fut: impl Future<Output = Result<T, FetchError>>,
) -> Result<T, FetchError> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut)
            .await
            .map_err(|_| FetchError::Timeout)?,
        None => fut.await,
    }
}

async fn drain(mut stream: ByteStream) -> Result<Bytes, FetchError> {
    let mut data = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        data.extend_from_slice(&chunk?);
    }
    Ok(data.freeze())
}

/// Serve a cache entry: its headers plus a computed `age`, backed by the
/// entry's body.
fn hit_response(entry: &CacheEntry, age: u64, url: Url) -> Response {
    let mut headers = entry.headers.clone();
    headers.insert("age", age.to_string());
    let buffer = BodyBuffer::new(entry.body.clone(), entry.headers.get("content-type"));
    Response::buffered(entry.status, entry.version, headers, url, false, true, buffer)
}

/// RFC 7234 §4.3.4: a 304 refreshes the stored response, replacing stored
/// header fields with those the 304 provides.
fn refresh_entry(stale: &CacheEntry, head: &ResponseHead) -> CacheEntry {
    let mut headers = stale.headers.clone();
    let mut replaced: Vec<&str> = Vec::new();
    for (name, value) in head.headers.iter() {
        if name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        if replaced.iter().any(|n| n.eq_ignore_ascii_case(name)) {
            headers.append(name, value);
        } else {
            headers.insert(name, value);
            replaced.push(name);
        }
    }
    CacheEntry::new(stale.status, stale.version, headers, stale.body.clone())
}
