use crate::types::*;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use url::Url;

/// Sentinel stored when the feed has not reported a remaining-quota header
const REMAINING_UNKNOWN: u64 = u64::MAX;

/// Internal health tracking fed by real requests (no dedicated health calls)
struct HealthTracker {
    /// Timestamp of last successful request (millis since epoch)
    last_success_ms: AtomicU64,
    /// Timestamp of last failed request (millis since epoch)
    last_failure_ms: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    last_latency_ms: AtomicU64,
    rate_limit_remaining: AtomicU64,
}

impl HealthTracker {
    fn new() -> Self {
        Self {
            last_success_ms: AtomicU64::new(0),
            last_failure_ms: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            last_latency_ms: AtomicU64::new(0),
            rate_limit_remaining: AtomicU64::new(REMAINING_UNKNOWN),
        }
    }

    fn record_success(&self, latency_ms: u64) {
        let now_ms = Utc::now().timestamp_millis() as u64;
        self.last_success_ms.store(now_ms, Ordering::Relaxed);
        self.last_latency_ms.store(latency_ms, Ordering::Relaxed);
        self.success_count.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        let now_ms = Utc::now().timestamp_millis() as u64;
        self.last_failure_ms.store(now_ms, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    fn record_remaining(&self, remaining: Option<u32>) {
        if let Some(r) = remaining {
            self.rate_limit_remaining.store(r as u64, Ordering::Relaxed);
        }
    }

    fn remaining(&self) -> Option<u32> {
        match self.rate_limit_remaining.load(Ordering::Relaxed) {
            REMAINING_UNKNOWN => None,
            r => Some(r.min(u32::MAX as u64) as u32),
        }
    }

    fn is_healthy(&self) -> bool {
        let last_success = self.last_success_ms.load(Ordering::Relaxed);
        let last_failure = self.last_failure_ms.load(Ordering::Relaxed);

        // Healthy if: had at least one success AND (no failures OR last success > last failure)
        last_success > 0 && (last_failure == 0 || last_success > last_failure)
    }

    fn success_rate(&self) -> f64 {
        let successes = self.success_count.load(Ordering::Relaxed);
        let failures = self.failure_count.load(Ordering::Relaxed);
        let total = successes + failures;
        if total == 0 {
            return 1.0;
        }
        successes as f64 / total as f64
    }
}

/// Connection settings for the HTTP signal feed
#[derive(Debug, Clone)]
pub struct HttpFeedConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
    pub source_name: String,
}

impl Default for HttpFeedConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(10),
            source_name: "signal_feed".to_string(),
        }
    }
}

/// JSON signal feed client: `GET {base}/v1/signals/{symbol}`
///
/// Performs exactly one request per call and classifies the failure. Retry and
/// backoff policy lives in the poller.
pub struct HttpSignalFeed {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    request_timeout: Duration,
    source_name: String,
    health_tracker: HealthTracker,
}

/// Wire payload: any subset of signal fields, symbol/timestamp optional
#[derive(Debug, Deserialize)]
struct SignalPayload {
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    captured_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    fields: RawSignal,
}

impl HttpSignalFeed {
    pub fn new(config: HttpFeedConfig) -> Result<Self> {
        // Trailing slash keeps any base path when joining endpoints
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| FeedError::Unknown(format!("invalid feed url {}: {}", config.base_url, e)))?;

        let client = Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| FeedError::Unknown(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key,
            request_timeout: config.request_timeout,
            source_name: config.source_name,
            health_tracker: HealthTracker::new(),
        })
    }

    fn endpoint(&self, symbol: &str) -> Result<Url> {
        self.base_url
            .join(&format!("v1/signals/{}", symbol.to_uppercase()))
            .map_err(|e| FeedError::Unknown(format!("bad endpoint for {}: {}", symbol, e)))
    }

    fn header_u64(response: &reqwest::Response, name: &str) -> Option<u64> {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
    }

    async fn request(&self, symbol: &str) -> Result<PartialSignal> {
        let url = self.endpoint(symbol)?;
        let request_start = Instant::now();

        let mut req = self.client.get(url);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        // Explicit per-request timeout on top of the client default
        let response = match tokio::time::timeout(self.request_timeout, req.send()).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                self.health_tracker.record_failure();
                return Err(if e.is_timeout() || e.is_connect() || e.is_request() {
                    FeedError::Transient(e.to_string())
                } else {
                    FeedError::Unknown(e.to_string())
                });
            }
            Err(_) => {
                self.health_tracker.record_failure();
                return Err(FeedError::Transient(format!(
                    "{} request for {} timed out after {:?}",
                    self.source_name, symbol, self.request_timeout
                )));
            }
        };

        self.health_tracker.record_remaining(
            Self::header_u64(&response, "x-ratelimit-remaining").map(|r| r.min(u32::MAX as u64) as u32),
        );

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            self.health_tracker.record_failure();
            self.health_tracker.record_remaining(Some(0));
            return Err(FeedError::RateLimited {
                source_name: self.source_name.clone(),
                retry_after: Self::header_u64(&response, "retry-after"),
            });
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            self.health_tracker.record_failure();
            let text = response.text().await.unwrap_or_default();
            return Err(FeedError::Auth {
                source_name: self.source_name.clone(),
                message: format!("{}: {}", status, text),
            });
        }

        if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
            self.health_tracker.record_failure();
            return Err(FeedError::Transient(format!("{} returned {}", self.source_name, status)));
        }

        if !status.is_success() {
            self.health_tracker.record_failure();
            let text = response.text().await.unwrap_or_default();
            return Err(FeedError::Unknown(format!(
                "{} API error ({}): {}",
                self.source_name, status, text
            )));
        }

        let payload: SignalPayload = response.json().await.map_err(|e| {
            self.health_tracker.record_failure();
            FeedError::Unknown(format!("invalid payload for {}: {}", symbol, e))
        })?;

        let latency_ms = request_start.elapsed().as_millis() as u64;
        self.health_tracker.record_success(latency_ms);

        Ok(PartialSignal {
            symbol: payload
                .symbol
                .map(|s| s.to_uppercase())
                .unwrap_or_else(|| symbol.to_uppercase()),
            captured_at: payload.captured_at.unwrap_or_else(Utc::now),
            fields: payload.fields,
        })
    }
}

#[async_trait::async_trait]
impl MarketDataFeed for HttpSignalFeed {
    async fn fetch(&self, symbol: &str) -> Result<PartialSignal> {
        self.request(symbol).await
    }

    fn rate_limit_remaining(&self) -> Option<u32> {
        self.health_tracker.remaining()
    }

    async fn health(&self) -> SourceHealth {
        let last_success_ms = self.health_tracker.last_success_ms.load(Ordering::Relaxed);
        let last_success = if last_success_ms > 0 {
            DateTime::from_timestamp_millis(last_success_ms as i64)
        } else {
            None
        };

        SourceHealth {
            source: self.source_name.clone(),
            is_healthy: self.health_tracker.is_healthy(),
            last_success,
            success_rate: self.health_tracker.success_rate(),
            avg_latency_ms: self.health_tracker.last_latency_ms.load(Ordering::Relaxed),
            rate_limit_remaining: self.health_tracker.remaining(),
        }
    }

    fn name(&self) -> &str {
        &self.source_name
    }
}
