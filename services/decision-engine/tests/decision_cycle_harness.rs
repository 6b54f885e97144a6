//! End-to-end decision loop harness
//!
//! Drives the full path with a scripted feed and a mock broker:
//! feed → poller → cache → score → gate → order → positions → exits → learning


use chrono::Utc;
use decision_engine::events::EventSink;
use decision_engine::state::{OPERATOR_FILE, REGIME_FILE};
use decision_engine::{
    AlertKind, Broker, BrokerError, DecisionEvent, EngineConfig, EngineStores, FreezeOrigin, MemoryEventSink,
    OrderExecutor, OrderSide, Orchestrator, SharedRegime, Side,
};
use mock_broker::MockBroker;
use rust_decimal::Decimal;
use signal_feed::{
    BackoffPolicy, FeedError, PartialSignal, Poller, PollerConfig, RawSignal, Regime, RegimeClassifier, ScriptedFeed,
    Sentiment, SignalCache,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const UNIVERSE: [&str; 2] = ["NVDA", "TSLA"];

fn bullish_fields(price: f64) -> RawSignal {
    RawSignal {
        sentiment: Some(Sentiment::Bullish),
        bullish_ratio: Some(0.9),
        conviction: Some(0.95),
        put_call_ratio: Some(0.4),
        call_premium: Some(9_000_000.0),
        put_premium: Some(500_000.0),
        bullish_sweep_notional: Some(4_000_000.0),
        dark_pool_notional: Some(40_000_000.0),
        put_iv: Some(0.30),
        call_iv: Some(0.45),
        last_price: Some(price),
        ..Default::default()
    }
}

fn bearish_fields(price: f64) -> RawSignal {
    RawSignal {
        sentiment: Some(Sentiment::Bearish),
        bullish_ratio: Some(0.1),
        conviction: Some(0.95),
        put_call_ratio: Some(2.5),
        call_premium: Some(500_000.0),
        put_premium: Some(9_000_000.0),
        bearish_sweep_notional: Some(4_000_000.0),
        dark_pool_notional: Some(40_000_000.0),
        put_iv: Some(0.45),
        call_iv: Some(0.30),
        last_price: Some(price),
        ..Default::default()
    }
}

struct Rig {
    engine: Orchestrator,
    feed: Arc<ScriptedFeed>,
    poller: Arc<Poller>,
    broker: Arc<MockBroker>,
    events: Arc<MemoryEventSink>,
    regime: Arc<SharedRegime>,
}

fn rig(dir: &Path, initial: Regime) -> Rig {
    let mut config = EngineConfig::default();
    config.engine.universe = UNIVERSE.iter().map(|s| s.to_string()).collect();
    config.engine.state_dir = dir.to_path_buf();

    let regime = Arc::new(SharedRegime::new(initial));
    let classifier: Arc<dyn RegimeClassifier> = regime.clone();
    let cache = SignalCache::new();
    let feed = Arc::new(ScriptedFeed::new("scripted"));
    let poller = Arc::new(Poller::new(
        feed.clone(),
        cache.clone(),
        classifier.clone(),
        PollerConfig {
            backoff: BackoffPolicy::fixed(1, 1.0, 1, 0),
            ..Default::default()
        },
    ));

    let broker = Arc::new(MockBroker::new(100_000));
    let executor = OrderExecutor::new(
        broker.clone() as Arc<dyn Broker>,
        Duration::from_secs(1),
        BackoffPolicy::fixed(1, 1.0, 5, 2),
    );
    let events = Arc::new(MemoryEventSink::new());
    let engine = Orchestrator::new(
        config,
        cache,
        classifier,
        executor,
        events.clone() as Arc<dyn EventSink>,
        EngineStores::in_dir(dir),
    )
    .with_poller(poller.clone())
    .with_shared_regime(regime.clone());

    Rig {
        engine,
        feed,
        poller,
        broker,
        events,
        regime,
    }
}

fn symbols() -> Vec<String> {
    UNIVERSE.iter().map(|s| s.to_string()).collect()
}

async fn alerts_of(events: &MemoryEventSink, kind: AlertKind) -> usize {
    events
        .records()
        .await
        .iter()
        .filter(|r| matches!(&r.event, DecisionEvent::Alert { kind: k, .. } if *k == kind))
        .count()
}

/// Test: long and short entries from opposing flow
#[tokio::test]
async fn test_long_and_short_entries() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig(dir.path(), Regime::Neutral);
    rig.feed.set_steady("NVDA", bullish_fields(120.0));
    rig.feed.set_steady("TSLA", bearish_fields(250.0));

    let polled = rig.poller.run_cycle(&symbols()).await;
    assert_eq!(polled.updated, 2);

    let report = rig.engine.run_cycle(Utc::now()).await;
    assert_eq!(report.entered, 2);

    let orders = rig.broker.orders();
    let side_of = |symbol: &str| orders.iter().find(|o| o.symbol == symbol).map(|o| o.side);
    assert_eq!(side_of("NVDA"), Some(OrderSide::Buy));
    assert_eq!(side_of("TSLA"), Some(OrderSide::Sell));

    let book = rig.engine.positions().snapshot().await;
    assert_eq!(book.get("NVDA").unwrap().side, Side::Long);
    assert_eq!(book.get("TSLA").unwrap().side, Side::Short);
    assert!(book.get("TSLA").unwrap().entry_score < 0.0);
}

/// Test: rate limiting in a panic regime parks requests until it clears
#[tokio::test]
async fn test_panic_regime_defers_then_replays() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig(dir.path(), Regime::Panic);
    rig.feed.push(
        "NVDA",
        Err(FeedError::RateLimited {
            source_name: "scripted".to_string(),
            retry_after: None,
        }),
    );
    rig.feed.set_steady("NVDA", bullish_fields(120.0));

    let polled = rig.poller.run_cycle(&["NVDA".to_string()]).await;
    assert_eq!(polled.deferred, 1);
    assert_eq!(rig.poller.deferred_symbols().await, vec!["NVDA".to_string()]);

    // Nothing cached yet: no decision, no order
    let report = rig.engine.run_cycle(Utc::now()).await;
    assert_eq!(report.scored, 0);
    assert!(rig.broker.orders().is_empty());

    // Still panicking: the queue holds
    assert!(rig.poller.drain_deferred().await.is_empty());

    // External classifier publishes a calmer regime; the engine picks it up
    std::fs::write(dir.path().join(REGIME_FILE), r#"{"regime": "risk_on"}"#).unwrap();
    let report = rig.engine.run_cycle(Utc::now()).await;
    assert_eq!(rig.regime.current_regime(), Regime::RiskOn);
    assert_eq!(report.entered, 0);

    let replayed = rig.poller.drain_deferred().await;
    assert_eq!(replayed.len(), 1);
    assert_eq!(rig.poller.deferred_len().await, 0);

    let report = rig.engine.run_cycle(Utc::now()).await;
    assert_eq!(report.entered, 1);
    let book = rig.engine.positions().snapshot().await;
    assert_eq!(book.get("NVDA").unwrap().entry_regime, Some(Regime::RiskOn));
}

/// Test: feed auth failure freezes trading until the operator releases it
#[tokio::test]
async fn test_feed_auth_failure_requires_operator() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig(dir.path(), Regime::Neutral);
    std::fs::write(dir.path().join(OPERATOR_FILE), r#"{"frozen": false}"#).unwrap();
    rig.feed.push(
        "NVDA",
        Err(FeedError::Auth {
            source_name: "scripted".to_string(),
            message: "key revoked".to_string(),
        }),
    );
    rig.feed.set_steady("NVDA", bullish_fields(120.0));

    let polled = rig.poller.run_cycle(&["NVDA".to_string()]).await;
    assert!(polled.auth_failed);

    let report = rig.engine.run_cycle(Utc::now()).await;
    assert!(report.frozen);
    assert_eq!(rig.engine.freeze().origin(), Some(FreezeOrigin::Operator));
    assert_eq!(alerts_of(&rig.events, AlertKind::FeedAuth).await, 1);

    // Polling stays halted and the freeze survives healthy-looking cycles
    assert!(rig.poller.run_cycle(&["NVDA".to_string()]).await.auth_failed);
    assert!(rig.engine.run_cycle(Utc::now()).await.frozen);
    assert_eq!(alerts_of(&rig.events, AlertKind::FeedAuth).await, 1);

    // Operator release re-arms the poller
    std::fs::write(dir.path().join(OPERATOR_FILE), r#"{"frozen": false, "generation": 1}"#).unwrap();
    assert!(!rig.engine.run_cycle(Utc::now()).await.frozen);
    assert!(!rig.poller.status().auth_failed());

    assert_eq!(rig.poller.run_cycle(&["NVDA".to_string()]).await.updated, 1);
    let report = rig.engine.run_cycle(Utc::now()).await;
    assert_eq!(report.entered, 1);
}

/// Test: broker auth rejection blocks the order and freezes trading
#[tokio::test]
async fn test_broker_auth_failure_freezes() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig(dir.path(), Regime::Neutral);
    rig.feed.set_steady("NVDA", bullish_fields(120.0));
    rig.poller.run_cycle(&["NVDA".to_string()]).await;

    rig.broker
        .set_failure(Some(BrokerError::Auth("401 - expired".to_string())));
    let report = rig.engine.run_cycle(Utc::now()).await;
    assert_eq!(report.entered, 0);
    assert!(rig.engine.freeze().is_frozen());
    assert_eq!(rig.engine.freeze().origin(), Some(FreezeOrigin::Operator));
    assert_eq!(alerts_of(&rig.events, AlertKind::BrokerAuth).await, 1);
    assert!(rig.engine.positions().snapshot().await.is_empty());

    // Credentials fixed but no operator action yet
    rig.broker.set_failure(None);
    assert!(rig.engine.run_cycle(Utc::now()).await.frozen);
}

/// Test: connectivity failures are retried and then reported as blocked
#[tokio::test]
async fn test_unreachable_broker_blocks_without_position() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig(dir.path(), Regime::Neutral);
    rig.feed.set_steady("NVDA", bullish_fields(120.0));
    rig.poller.run_cycle(&["NVDA".to_string()]).await;

    // Account fetch fails first, so no entry is attempted at all
    rig.broker
        .set_failure(Some(BrokerError::Connectivity("connection refused".to_string())));
    let report = rig.engine.run_cycle(Utc::now()).await;
    assert_eq!(report.entered, 0);
    assert!(!rig.engine.freeze().is_frozen());
    assert!(rig.engine.positions().snapshot().await.is_empty());

    // Reconciliation failure leaves local state alone and raises an alert
    assert!(rig.engine.reconcile(Utc::now()).await.is_none());
    assert_eq!(alerts_of(&rig.events, AlertKind::ReconciliationFailed).await, 1);
}

/// Test: reconciliation makes the broker authoritative
#[tokio::test]
async fn test_reconciliation_recovers_and_flushes() {
    let dir = tempfile::tempdir().unwrap();
    let mut rig = rig(dir.path(), Regime::Neutral);
    rig.feed.set_steady("NVDA", bullish_fields(120.0));
    rig.poller.run_cycle(&["NVDA".to_string()]).await;
    assert_eq!(rig.engine.run_cycle(Utc::now()).await.entered, 1);

    // Venue closed NVDA out-of-band and holds an unknown AMD position
    rig.broker.close_position("NVDA").await.unwrap();
    rig.broker.set_position("AMD", 40, 150);

    let report = rig.engine.reconcile(Utc::now()).await.unwrap();
    assert_eq!(report.flushed.len(), 1);
    assert_eq!(report.recovered.len(), 1);

    let book = rig.engine.positions().snapshot().await;
    assert!(book.get("NVDA").is_none());
    let amd = book.get("AMD").unwrap();
    assert!(amd.recovered);
    assert_eq!(amd.qty, Decimal::from(40));

    assert_eq!(rig.events.count("flushed").await, 1);
    assert_eq!(rig.events.count("trade_outcome").await, 0);
    assert_eq!(alerts_of(&rig.events, AlertKind::ReconciliationRecovery).await, 1);

    // Second pass with an unchanged broker is clean
    assert!(rig.engine.reconcile(Utc::now()).await.unwrap().is_clean());
}

/// Test: identical recorded input replays to identical decisions
#[tokio::test]
async fn test_replay_is_deterministic() {
    async fn gate_scores(dir: &Path, captured_at: chrono::DateTime<Utc>) -> Vec<(String, f64)> {
        let mut rig = rig(dir, Regime::RiskOn);
        for (symbol, fields) in [("NVDA", bullish_fields(120.0)), ("TSLA", bearish_fields(250.0))] {
            rig.feed.push(
                symbol,
                Ok(PartialSignal {
                    symbol: symbol.to_string(),
                    captured_at,
                    fields,
                }),
            );
        }
        rig.poller.run_cycle(&symbols()).await;
        rig.engine.run_cycle(captured_at).await;
        rig.events
            .records()
            .await
            .into_iter()
            .filter_map(|r| match r.event {
                DecisionEvent::GateDecision { symbol, score, .. } => Some((symbol, score)),
                _ => None,
            })
            .collect()
    }

    let captured_at = Utc::now();
    let first_dir = tempfile::tempdir().unwrap();
    let second_dir = tempfile::tempdir().unwrap();
    let first = gate_scores(first_dir.path(), captured_at).await;
    let second = gate_scores(second_dir.path(), captured_at).await;
    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
}
