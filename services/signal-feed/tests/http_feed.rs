//! HTTP feed classification against a mock server

use signal_feed::{FeedError, HttpFeedConfig, HttpSignalFeed, MarketDataFeed, Sentiment};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn feed_for(server: &MockServer) -> HttpSignalFeed {
    HttpSignalFeed::new(HttpFeedConfig {
        base_url: format!("{}/", server.uri()),
        api_key: Some("test-key".to_string()),
        request_timeout: Duration::from_secs(2),
        source_name: "mock_feed".to_string(),
    })
    .unwrap()
}

#[tokio::test]
async fn test_success_parses_sparse_payload() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/signals/AAPL"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ratelimit-remaining", "42")
                .set_body_json(serde_json::json!({
                    "captured_at": "2026-02-10T14:30:00Z",
                    "sentiment": "bullish",
                    "call_premium": 1250000.0
                })),
        )
        .mount(&server)
        .await;

    let feed = feed_for(&server);
    let partial = assert_ok!(feed.fetch("aapl").await);
    assert_eq!(partial.symbol, "AAPL");
    assert_eq!(partial.fields.sentiment, Some(Sentiment::Bullish));
    assert_eq!(partial.fields.call_premium, Some(1_250_000.0));
    assert!(partial.fields.put_premium.is_none());
    assert_eq!(feed.rate_limit_remaining(), Some(42));

    let health = feed.health().await;
    assert!(health.is_healthy);
}

#[tokio::test]
async fn test_429_is_rate_limited_with_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
        .mount(&server)
        .await;

    let err = assert_err!(feed_for(&server).fetch("SPY").await);
    assert_eq!(
        err,
        FeedError::RateLimited {
            source_name: "mock_feed".to_string(),
            retry_after: Some(7),
        }
    );
}

#[tokio::test]
async fn test_401_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;

    let err = assert_err!(feed_for(&server).fetch("SPY").await);
    assert!(matches!(err, FeedError::Auth { .. }));
}

#[tokio::test]
async fn test_5xx_is_transient_and_garbage_is_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/signals/QQQ"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/signals/IWM"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let feed = feed_for(&server);
    assert!(matches!(feed.fetch("QQQ").await, Err(FeedError::Transient(_))));
    assert!(matches!(feed.fetch("IWM").await, Err(FeedError::Unknown(_))));
    assert!(!feed.health().await.is_healthy);
}
