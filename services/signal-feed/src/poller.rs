//! Background poller: fetches raw signals from the feed and merges them into the cache.
//!
//! Failure policy per feed error class:
//! - **RateLimited** during a high-volatility regime: deferred into a bounded
//!   queue and replayed once the regime clears
//! - **RateLimited** otherwise, **Transient**: exponential backoff, bounded retries
//! - **Auth**: fatal for the feed, no retry until reset
//! - **Unknown**: logged, symbol skipped this cycle

use crate::backoff::BackoffPolicy;
use crate::cache::SignalCache;
use crate::types::*;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

/// Poller tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub backoff: BackoffPolicy,
    /// Bound on requests parked while rate limited in a high-volatility regime
    #[serde(default = "default_deferred_capacity")]
    pub deferred_capacity: usize,
    /// Slow down proactively once the feed reports fewer remaining requests
    #[serde(default = "default_proactive_floor")]
    pub proactive_floor: u32,
    #[serde(default = "default_proactive_delay_ms")]
    pub proactive_delay_ms: u64,
    /// Concurrent in-flight fetches per cycle
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            backoff: BackoffPolicy::default(),
            deferred_capacity: default_deferred_capacity(),
            proactive_floor: default_proactive_floor(),
            proactive_delay_ms: default_proactive_delay_ms(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

fn default_interval_secs() -> u64 { 15 }
fn default_deferred_capacity() -> usize { 64 }
fn default_proactive_floor() -> u32 { 5 }
fn default_proactive_delay_ms() -> u64 { 1_000 }
fn default_max_concurrency() -> usize { 4 }

/// Result of polling one symbol
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Updated,
    Deferred,
    Skipped { reason: String },
    GaveUp { error: FeedError },
    AuthFailed,
}

/// A rate-limited request parked for replay
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredRequest {
    pub symbol: String,
    pub enqueued_at: DateTime<Utc>,
    pub regime: Regime,
}

/// Per-cycle counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PollCycleReport {
    pub updated: usize,
    pub deferred: usize,
    pub replayed: usize,
    pub skipped: usize,
    pub gave_up: usize,
    pub auth_failed: bool,
}

impl PollCycleReport {
    fn record(&mut self, outcome: &PollOutcome) {
        match outcome {
            PollOutcome::Updated => self.updated += 1,
            PollOutcome::Deferred => self.deferred += 1,
            PollOutcome::Skipped { .. } => self.skipped += 1,
            PollOutcome::GaveUp { .. } => self.gave_up += 1,
            PollOutcome::AuthFailed => self.auth_failed = true,
        }
    }
}

/// Shared, lock-free view of poller health for the decision loop's watchdog
#[derive(Debug, Default)]
pub struct PollerStatus {
    auth_failed: AtomicBool,
    /// Millis since epoch of the last cycle with at least one update
    last_update_ms: AtomicI64,
    consecutive_empty_cycles: AtomicU64,
}

impl PollerStatus {
    pub fn auth_failed(&self) -> bool {
        self.auth_failed.load(Ordering::Relaxed)
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        match self.last_update_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    pub fn consecutive_empty_cycles(&self) -> u64 {
        self.consecutive_empty_cycles.load(Ordering::Relaxed)
    }

    fn record_cycle(&self, report: &PollCycleReport) {
        if report.updated + report.replayed > 0 {
            self.last_update_ms
                .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
            self.consecutive_empty_cycles.store(0, Ordering::Relaxed);
        } else {
            self.consecutive_empty_cycles.fetch_add(1, Ordering::Relaxed);
        }
    }
}

pub struct Poller {
    feed: Arc<dyn MarketDataFeed>,
    cache: SignalCache,
    regime: Arc<dyn RegimeClassifier>,
    config: PollerConfig,
    deferred: Mutex<VecDeque<DeferredRequest>>,
    status: Arc<PollerStatus>,
}

impl Poller {
    pub fn new(
        feed: Arc<dyn MarketDataFeed>,
        cache: SignalCache,
        regime: Arc<dyn RegimeClassifier>,
        config: PollerConfig,
    ) -> Self {
        Self {
            feed,
            cache,
            regime,
            config,
            deferred: Mutex::new(VecDeque::new()),
            status: Arc::new(PollerStatus::default()),
        }
    }

    pub fn status(&self) -> Arc<PollerStatus> {
        Arc::clone(&self.status)
    }

    pub fn cache(&self) -> &SignalCache {
        &self.cache
    }

    /// Single fetch, with a proactive pause when the feed is close to its limit
    pub async fn poll_once(&self, symbol: &str) -> Result<PartialSignal> {
        if let Some(remaining) = self.feed.rate_limit_remaining() {
            if remaining < self.config.proactive_floor {
                debug!(
                    "{} has {} requests left, pausing {}ms before {}",
                    self.feed.name(),
                    remaining,
                    self.config.proactive_delay_ms,
                    symbol
                );
                tokio::time::sleep(Duration::from_millis(self.config.proactive_delay_ms)).await;
            }
        }
        self.feed.fetch(symbol).await
    }

    /// Poll a symbol applying the full retry/backoff/defer policy
    pub async fn poll_symbol(&self, symbol: &str) -> PollOutcome {
        if self.status.auth_failed() {
            return PollOutcome::AuthFailed;
        }

        let mut attempt: u32 = 0;
        loop {
            let error = match self.poll_once(symbol).await {
                Ok(partial) => {
                    self.cache.update(symbol, &partial).await;
                    return PollOutcome::Updated;
                }
                Err(e) => e,
            };

            match &error {
                FeedError::RateLimited { .. } => {
                    let regime = self.regime.current_regime();
                    if regime.is_high_volatility() {
                        self.defer(symbol, regime).await;
                        return PollOutcome::Deferred;
                    }
                }
                FeedError::Auth { source_name, message } => {
                    error!(
                        source = %source_name,
                        "Feed authentication failed, halting polling: {}",
                        message
                    );
                    self.status.auth_failed.store(true, Ordering::Relaxed);
                    return PollOutcome::AuthFailed;
                }
                FeedError::Unknown(msg) => {
                    warn!("Skipping {} this cycle after unclassified feed error: {}", symbol, msg);
                    return PollOutcome::Skipped {
                        reason: msg.clone(),
                    };
                }
                FeedError::Transient(_) => {}
            }

            if !self.config.backoff.should_retry(attempt) {
                warn!(
                    "Giving up on {} after {} attempts: {}",
                    symbol,
                    attempt + 1,
                    error
                );
                return PollOutcome::GaveUp { error };
            }

            let mut delay = self.config.backoff.delay(attempt);
            if let FeedError::RateLimited {
                retry_after: Some(secs),
                ..
            } = &error
            {
                let cap = Duration::from_millis(self.config.backoff.max_delay_ms);
                delay = delay.max(Duration::from_secs(*secs)).min(cap);
            }
            debug!(
                "Retrying {} in {:?} (attempt {}, {})",
                symbol,
                delay,
                attempt + 1,
                error.kind()
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Park a rate-limited request. Returns false when the symbol is already queued.
    pub async fn defer(&self, symbol: &str, regime: Regime) -> bool {
        let key = symbol.to_uppercase();
        let mut queue = self.deferred.lock().await;
        if queue.iter().any(|r| r.symbol == key) {
            debug!("{} already deferred", key);
            return false;
        }
        if queue.len() >= self.config.deferred_capacity.max(1) {
            if let Some(dropped) = queue.pop_front() {
                warn!(
                    "Deferred queue full ({}), dropping oldest request for {}",
                    self.config.deferred_capacity, dropped.symbol
                );
            }
        }
        info!("Rate limited during {} regime, deferring {}", regime, key);
        queue.push_back(DeferredRequest {
            symbol: key,
            enqueued_at: Utc::now(),
            regime,
        });
        true
    }

    pub async fn deferred_len(&self) -> usize {
        self.deferred.lock().await.len()
    }

    pub async fn deferred_symbols(&self) -> Vec<String> {
        self.deferred
            .lock()
            .await
            .iter()
            .map(|r| r.symbol.clone())
            .collect()
    }

    /// Replay parked requests once the high-volatility condition has cleared.
    ///
    /// The queue is taken atomically, so concurrent or repeated drains process
    /// each parked request at most once.
    pub async fn drain_deferred(&self) -> Vec<(String, PollOutcome)> {
        if self.regime.current_regime().is_high_volatility() {
            return Vec::new();
        }

        let pending: Vec<DeferredRequest> = {
            let mut queue = self.deferred.lock().await;
            queue.drain(..).collect()
        };
        if pending.is_empty() {
            return Vec::new();
        }

        info!("Replaying {} deferred signal requests", pending.len());
        let mut results = Vec::with_capacity(pending.len());
        for request in pending {
            let outcome = self.poll_symbol(&request.symbol).await;
            debug!(
                "Deferred {} (parked since {}) -> {:?}",
                request.symbol, request.enqueued_at, outcome
            );
            results.push((request.symbol, outcome));
        }
        results
    }

    /// One full polling pass: replay deferred work, then poll every symbol
    pub async fn run_cycle(&self, symbols: &[String]) -> PollCycleReport {
        let mut report = PollCycleReport::default();
        if self.status.auth_failed() {
            report.auth_failed = true;
            debug!("Feed auth failed earlier, skipping poll cycle");
            return report;
        }

        for (_, outcome) in self.drain_deferred().await {
            if outcome == PollOutcome::Updated {
                report.replayed += 1;
            } else {
                report.record(&outcome);
            }
        }

        let parked = self.deferred_symbols().await;
        let targets: Vec<String> = symbols
            .iter()
            .map(|s| s.to_uppercase())
            .filter(|s| !parked.contains(s))
            .collect();

        let outcomes: Vec<PollOutcome> = stream::iter(targets)
            .map(|symbol| async move { self.poll_symbol(&symbol).await })
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        for outcome in &outcomes {
            report.record(outcome);
        }

        self.status.record_cycle(&report);
        debug!("Poll cycle complete: {:?}", report);
        report
    }

    /// Long-lived polling loop; exits when `shutdown` flips to true
    pub async fn run(self: Arc<Self>, symbols: Vec<String>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Poller starting for {} symbols every {}s via {}",
            symbols.len(),
            self.config.interval_secs,
            self.feed.name()
        );
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run_cycle(&symbols).await;
                    if report.auth_failed {
                        error!("Poller halted: feed authentication failure");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Poller shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Operator action after credentials are fixed
    pub fn reset_auth(&self) {
        if self.status.auth_failed.swap(false, Ordering::Relaxed) {
            info!("Feed auth failure cleared, polling resumes");
        }
    }
}
