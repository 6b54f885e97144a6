//! Decision Engine - options-flow driven trading loop
//!
//! 1. Polls the signal feed into the shared cache
//! 2. Scores and gates entries every cycle
//! 3. Watches open positions for exits
//! 4. Reconciles against the broker and learns from closed trades

use chrono::Utc;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use signal_feed::{BackoffPolicy, HttpFeedConfig, HttpSignalFeed, Poller, RegimeClassifier, SignalCache};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use decision_engine::state::EVENTS_FILE;
use decision_engine::{
    Broker, EngineConfig, EngineStores, HttpBroker, HttpBrokerConfig, JsonlEventSink, OrderExecutor, Orchestrator,
    PaperBroker, SharedRegime, TradingMode,
};

/// Decision engine entry point
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = EngineConfig::load(config_path().as_deref())?;

    let level = config
        .engine
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    info!(
        "Starting Decision Engine ({:?} mode, {} symbols)",
        config.engine.trading_mode,
        config.engine.universe.len()
    );
    let state_dir = config.engine.state_dir.clone();
    info!("State directory: {}", state_dir.display());

    let regime = Arc::new(SharedRegime::new(config.engine.regime));
    let classifier: Arc<dyn RegimeClassifier> = regime.clone();

    // Signal ingestion
    let feed = HttpSignalFeed::new(HttpFeedConfig {
        base_url: config.engine.feed_url.clone(),
        api_key: config.engine.feed_api_key.clone(),
        request_timeout: Duration::from_secs(config.engine.feed_timeout_secs),
        ..Default::default()
    })?;
    let cache = SignalCache::new();
    let poller = Arc::new(Poller::new(
        Arc::new(feed),
        cache.clone(),
        classifier.clone(),
        config.poller.clone(),
    ));

    let broker = build_broker(&config)?;
    info!("Broker: {}", broker.name());
    let executor = OrderExecutor::new(
        broker,
        Duration::from_secs(config.engine.broker_timeout_secs),
        BackoffPolicy::fixed(500, 2.0, 5_000, config.engine.broker_max_retries),
    );

    let events = Arc::new(JsonlEventSink::new(state_dir.join(EVENTS_FILE)));
    let mut orchestrator = Orchestrator::new(
        config.clone(),
        cache,
        classifier,
        executor,
        events,
        EngineStores::in_dir(&state_dir),
    )
    .with_poller(poller.clone())
    .with_shared_regime(regime);
    orchestrator.restore(Utc::now()).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller_task = tokio::spawn(poller.run(config.engine.universe.clone(), shutdown_rx.clone()));
    let engine_task = tokio::spawn(orchestrator.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    let _ = shutdown_tx.send(true);

    if let Err(e) = poller_task.await {
        error!("Poller task failed: {}", e);
    }
    if let Err(e) = engine_task.await {
        error!("Decision loop task failed: {}", e);
    }
    info!("Decision Engine stopped");
    Ok(())
}

/// `--config <path>` or `DECISION_ENGINE_CONFIG`
fn config_path() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    std::env::var("DECISION_ENGINE_CONFIG").ok().map(PathBuf::from)
}

fn build_broker(config: &EngineConfig) -> anyhow::Result<Arc<dyn Broker>> {
    match config.engine.trading_mode {
        TradingMode::Paper => {
            let cash = Decimal::from_f64(config.engine.paper_starting_equity)
                .ok_or_else(|| anyhow::anyhow!("invalid paper_starting_equity"))?;
            Ok(Arc::new(PaperBroker::new(cash, config.engine.paper_slippage_bps)))
        }
        TradingMode::Live => {
            let broker = HttpBroker::new(HttpBrokerConfig {
                base_url: config.engine.broker_url.clone(),
                api_key: config.engine.broker_api_key.clone(),
                request_timeout: Duration::from_secs(config.engine.broker_timeout_secs),
            })?;
            Ok(Arc::new(broker))
        }
    }
}
