mod common;

use common::MockConnector;
use duofetch::{Config, Context, FetchOptions, Protocol};
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn context_with(connector: MockConnector, https_protocols: Vec<Protocol>) -> Context {
    Context::with_config(Config {
        https_protocols,
        connector: Some(Arc::new(connector)),
        ..Config::default()
    })
}

#[tokio::test]
async fn test_h2_negotiated_by_default() {
    let ctx = context_with(
        MockConnector::new(true),
        vec![Protocol::Http2, Protocol::Http1],
    );
    let resp = ctx.fetch("https://example.com/status/200", FetchOptions::new()).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.http_version(), 2);
}

#[tokio::test]
async fn test_http1_only_preference_never_uses_h2() {
    // The origin supports h2, but the context restricts ALPN to http/1.1.
    let ctx = context_with(MockConnector::new(true), vec![Protocol::Http1]);
    let resp = ctx.fetch("https://example.com/status/200", FetchOptions::new()).await.unwrap();
    assert_eq!(resp.http_version(), 1);
}

#[tokio::test]
async fn test_downgrade_when_origin_lacks_h2() {
    let ctx = context_with(
        MockConnector::new(false),
        vec![Protocol::Http2, Protocol::Http1],
    );
    let resp = ctx.fetch("https://example.com/", FetchOptions::new()).await.unwrap();
    assert_eq!(resp.http_version(), 1);
}

#[tokio::test]
async fn test_sessions_are_reused_across_fetches() {
    let connector = MockConnector::new(true);
    let connects = Arc::clone(&connector.connects);
    let ctx = context_with(connector, vec![Protocol::Http2, Protocol::Http1]);

    for _ in 0..3 {
        ctx.fetch("https://example.com/a", FetchOptions::new()).await.unwrap();
    }
    assert_eq!(connects.load(Ordering::SeqCst), 1, "one session per origin");

    ctx.disconnect_all();
    ctx.fetch("https://example.com/a", FetchOptions::new()).await.unwrap();
    assert_eq!(connects.load(Ordering::SeqCst), 2, "disconnect_all forces a reconnect");
}

#[tokio::test]
async fn test_h2_only_preference_fails_without_h2() {
    let ctx = context_with(MockConnector::new(false), vec![Protocol::Http2]);
    let err = ctx.fetch("https://example.com/", FetchOptions::new()).await.unwrap_err();
    assert!(matches!(err, duofetch::FetchError::Network(_)));
}
