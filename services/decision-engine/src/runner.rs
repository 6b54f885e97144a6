//! Orchestrator - fixed-interval decision loop
//!
//! Each cycle reads the cache once per symbol, scores, gates, places entries,
//! evaluates exits for every open position and persists state. Reconciliation
//! runs on its own interval and shares the position lock with the cycle.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use signal_feed::{Poller, RegimeClassifier, SignalCache};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::OrderSpec;
use crate::config::EngineConfig;
use crate::enrich::{enrich, EnrichedSignal};
use crate::events::{AlertKind, DecisionEvent, EventSink};
use crate::executor::{ExecutionOutcome, OrderExecutor};
use crate::exit::{ExitAction, ExitEngine, ExitEvaluation, ExitInputs};
use crate::freeze::{FreezeOrigin, FreezeSwitch, OperatorAction, OperatorControl, OperatorWatch, WatchdogHealth};
use crate::gate::{EntryCandidate, EntryGate, GateDecision, PlannedEntry, PortfolioView};
use crate::intent::{IntentPurpose, IntentRegistry, IntentState};
use crate::learner::{TradeOutcome, WeightLearner};
use crate::portfolio::{EntryContext, Position, PositionBook, PositionStore};
use crate::reconciler::{self, ReconcileReport};
use crate::regime::SharedRegime;
use crate::scoring::{CompositeScore, CompositeScorer};
use crate::state::{
    CycleReport, NowFile, NowState, PositionFile, ThresholdStore, WeightStore, NOW_FILE, OPERATOR_FILE,
    POSITIONS_FILE, REGIME_FILE, THRESHOLD_FILE, WEIGHTS_FILE,
};
use crate::threshold::SelfHealingThreshold;
use crate::types::Regime;

/// Order quantities are truncated to this many decimal places
const QTY_DP: u32 = 4;

/// Files under the state directory
#[derive(Debug, Clone)]
pub struct EngineStores {
    pub weights: WeightStore,
    pub threshold: ThresholdStore,
    pub positions: PositionFile,
    pub now: NowFile,
    pub operator_path: PathBuf,
    pub regime_path: PathBuf,
}

impl EngineStores {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            weights: WeightStore::new(dir.join(WEIGHTS_FILE)),
            threshold: ThresholdStore::new(dir.join(THRESHOLD_FILE)),
            positions: PositionFile::new(dir.join(POSITIONS_FILE)),
            now: NowFile::new(dir.join(NOW_FILE)),
            operator_path: dir.join(OPERATOR_FILE),
            regime_path: dir.join(REGIME_FILE),
        }
    }
}

/// One symbol's read of the cache for this cycle
struct Evaluated {
    signal: EnrichedSignal,
    score: CompositeScore,
    decision: GateDecision,
    /// Last price as a usable mark
    mark: Option<Decimal>,
}

pub struct Orchestrator {
    config: EngineConfig,
    cache: SignalCache,
    regime: Arc<dyn RegimeClassifier>,
    shared_regime: Option<Arc<SharedRegime>>,
    poller: Option<Arc<Poller>>,
    scorer: CompositeScorer,
    learner: WeightLearner,
    threshold: SelfHealingThreshold,
    gate: EntryGate,
    exit: ExitEngine,
    positions: PositionStore,
    executor: OrderExecutor,
    intents: IntentRegistry,
    events: Arc<dyn EventSink>,
    freeze: FreezeSwitch,
    operator: OperatorWatch,
    stores: EngineStores,
    positions_verified: bool,
    learning_dirty: bool,
    last_reconciliation: Option<DateTime<Utc>>,
    last_report: CycleReport,
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        cache: SignalCache,
        regime: Arc<dyn RegimeClassifier>,
        executor: OrderExecutor,
        events: Arc<dyn EventSink>,
        stores: EngineStores,
    ) -> Self {
        Self {
            scorer: CompositeScorer::new(config.scoring.clone()),
            learner: WeightLearner::new(config.learner.clone(), config.scoring.base_weights.clone()),
            threshold: SelfHealingThreshold::new(config.threshold.clone()),
            gate: EntryGate::new(config.gate.clone()),
            exit: ExitEngine::new(config.exit.clone()),
            positions: PositionStore::new(PositionBook::new()),
            intents: IntentRegistry::new(),
            freeze: FreezeSwitch::new(),
            operator: OperatorWatch::default(),
            shared_regime: None,
            poller: None,
            positions_verified: true,
            learning_dirty: false,
            last_reconciliation: None,
            last_report: CycleReport::default(),
            config,
            cache,
            regime,
            executor,
            events,
            stores,
        }
    }

    /// Watch the poller's auth flag and re-arm it on operator release
    pub fn with_poller(mut self, poller: Arc<Poller>) -> Self {
        self.poller = Some(poller);
        self
    }

    /// Refresh this regime from the state directory at the start of each cycle
    pub fn with_shared_regime(mut self, regime: Arc<SharedRegime>) -> Self {
        self.shared_regime = Some(regime);
        self
    }

    pub fn positions(&self) -> &PositionStore {
        &self.positions
    }

    pub fn learner(&self) -> &WeightLearner {
        &self.learner
    }

    pub fn threshold(&self) -> &SelfHealingThreshold {
        &self.threshold
    }

    pub fn freeze(&self) -> &FreezeSwitch {
        &self.freeze
    }

    pub fn intents(&self) -> &IntentRegistry {
        &self.intents
    }

    pub fn last_report(&self) -> &CycleReport {
        &self.last_report
    }

    /// Load persisted weights, threshold and positions.
    ///
    /// Corrupt files fall back to defaults and raise an alert. Corrupt
    /// positions additionally hold trading under a watchdog freeze until the
    /// next successful reconciliation.
    pub async fn restore(&mut self, now: DateTime<Utc>) {
        let (table, status) = self.stores.weights.load().await;
        if status.is_corrupt() {
            self.alert(AlertKind::StateCorruption, "weights file corrupt, learning restarts from priors", now)
                .await;
        }
        self.learner = WeightLearner::from_table(
            self.config.learner.clone(),
            self.config.scoring.base_weights.clone(),
            table,
        );

        let (threshold, status) = self.stores.threshold.load().await;
        if status.is_corrupt() {
            self.alert(AlertKind::StateCorruption, "threshold file corrupt, reset to base", now)
                .await;
        }
        self.threshold = SelfHealingThreshold::from_state(self.config.threshold.clone(), threshold);

        let (book, status) = self.stores.positions.load().await;
        if status.is_corrupt() {
            self.alert(AlertKind::StateCorruption, "positions file corrupt, awaiting broker reconciliation", now)
                .await;
            self.positions_verified = false;
            self.trip(FreezeOrigin::Watchdog, "positions unverified after corrupt state", None, now)
                .await;
        }
        info!("Restored {} open positions", book.len());
        *self.positions.lock().await = book;
    }

    /// Run the loop until shutdown is signalled
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Decision loop starting: {} symbols, cycle {}s, reconcile {}s",
            self.config.engine.universe.len(),
            self.config.engine.cycle_interval_secs,
            self.config.engine.reconcile_interval_secs
        );

        // Startup reconciliation before any decision
        self.reconcile(Utc::now()).await;

        let mut cycle_interval = interval(Duration::from_secs(self.config.engine.cycle_interval_secs.max(1)));
        cycle_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut reconcile_interval =
            interval(Duration::from_secs(self.config.engine.reconcile_interval_secs.max(1)));
        reconcile_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        reconcile_interval.reset();
        let mut cleanup_interval = interval(Duration::from_secs(300));

        loop {
            tokio::select! {
                _ = cycle_interval.tick() => {
                    let report = self.run_cycle(Utc::now()).await;
                    debug!(
                        "Cycle done: scored={} eligible={} entered={} reduces={} exits={} frozen={}",
                        report.scored, report.eligible, report.entered, report.reduces, report.exits, report.frozen
                    );
                }
                _ = reconcile_interval.tick() => {
                    self.reconcile(Utc::now()).await;
                }
                _ = cleanup_interval.tick() => {
                    self.intents.cleanup(Utc::now());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Decision loop shutting down");
                        break;
                    }
                }
            }
        }

        let book = self.positions.snapshot().await;
        self.persist(&book).await;
    }

    /// One decision cycle
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport {
            started_at: Some(now),
            ..Default::default()
        };

        if let Some(shared) = &self.shared_regime {
            shared.refresh_from(&self.stores.regime_path).await;
        }
        self.apply_operator_control(now).await;
        self.check_feed_auth(now).await;
        self.check_watchdog(now).await;

        if self.freeze.is_frozen() {
            debug!("Trading frozen, skipping cycle");
            report.frozen = true;
            self.finish_cycle(report.clone(), now).await;
            return report;
        }

        if let Some(change) = self.threshold.tick(now) {
            self.events.emit(now, DecisionEvent::ThresholdChanged(change)).await;
            self.learning_dirty = true;
        }

        let regime = self.regime.current_regime();
        let threshold = self.threshold.effective_threshold(now);

        let mut evaluated: BTreeMap<String, Evaluated> = BTreeMap::new();
        for symbol in self.config.engine.universe.clone() {
            let symbol = symbol.to_uppercase();
            match self.evaluate_symbol(&symbol, regime, threshold, now).await {
                Ok(Some(ev)) => {
                    report.scored += 1;
                    if ev.decision.is_eligible() {
                        report.eligible += 1;
                    }
                    self.emit_gate(&ev, threshold, ev.decision.clone(), now).await;
                    evaluated.insert(symbol, ev);
                }
                Ok(None) => debug!(symbol = %symbol, "No data yet"),
                Err(e) => {
                    warn!(symbol = %symbol, "Skipping symbol this cycle: {}", e);
                    report.skipped_symbols.push(symbol);
                }
            }
        }

        let store = self.positions.clone();
        let mut book = store.lock().await;

        for (symbol, ev) in &evaluated {
            let Some(price) = ev.mark else {
                continue;
            };
            book.mark(symbol, price);
            self.executor.observe_mark(symbol, price).await;
        }

        self.process_entries(&mut book, &evaluated, now, &mut report).await;
        self.process_exits(&mut book, &evaluated, regime, threshold, now, &mut report)
            .await;

        self.persist(&book).await;
        drop(book);

        self.intents.cleanup(now);
        self.finish_cycle(report.clone(), now).await;
        report
    }

    /// Converge local positions onto the broker
    pub async fn reconcile(&mut self, now: DateTime<Utc>) -> Option<ReconcileReport> {
        match reconciler::reconcile(&self.executor, &self.positions, now).await {
            Ok(report) => {
                for pos in &report.recovered {
                    self.events
                        .emit(
                            now,
                            DecisionEvent::Recovery {
                                symbol: pos.symbol.clone(),
                                correlation_id: pos.correlation_id,
                                side: pos.side,
                                qty: pos.qty,
                                avg_entry_price: pos.entry_price,
                            },
                        )
                        .await;
                    self.alert(
                        AlertKind::ReconciliationRecovery,
                        format!("{} {} {} rebuilt from broker", pos.symbol, pos.side, pos.qty),
                        now,
                    )
                    .await;
                }
                for pos in &report.flushed {
                    self.events
                        .emit(
                            now,
                            DecisionEvent::Flushed {
                                symbol: pos.symbol.clone(),
                                correlation_id: pos.correlation_id,
                                side: pos.side,
                                qty: pos.qty,
                            },
                        )
                        .await;
                }
                for c in &report.corrected {
                    self.events
                        .emit(
                            now,
                            DecisionEvent::QuantityCorrected {
                                symbol: c.symbol.clone(),
                                from: c.from,
                                to: c.to,
                            },
                        )
                        .await;
                }

                let book = self.positions.snapshot().await;
                if let Err(e) = self.stores.positions.save(&book).await {
                    error!("Failed to persist reconciled positions: {}", e);
                }
                self.positions_verified = true;
                self.last_reconciliation = Some(now);
                Some(report)
            }
            Err(e) if e.is_auth() => {
                self.trip(
                    FreezeOrigin::Operator,
                    format!("broker authentication failed: {}", e),
                    Some(AlertKind::BrokerAuth),
                    now,
                )
                .await;
                None
            }
            Err(e) => {
                warn!("Reconciliation failed, local positions unchanged: {}", e);
                self.alert(AlertKind::ReconciliationFailed, e.to_string(), now).await;
                None
            }
        }
    }

    async fn evaluate_symbol(
        &self,
        symbol: &str,
        regime: Regime,
        threshold: f64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<Evaluated>> {
        let Some(cached) = self.cache.read_at(symbol, now).await else {
            return Ok(None);
        };
        let signal = enrich(&cached.snapshot, now, &self.config.enrich);
        let mark = match signal.last_price {
            Some(price) => Some(
                Decimal::from_f64(price)
                    .filter(|p| *p > Decimal::ZERO)
                    .ok_or_else(|| anyhow::anyhow!("last price {} cannot be used as a mark", price))?,
            ),
            None => None,
        };
        let score = self.scorer.score(&signal, regime, &self.learner, now);
        let decision = self.gate.evaluate(&score, &signal, threshold);
        Ok(Some(Evaluated {
            signal,
            score,
            decision,
            mark,
        }))
    }

    async fn process_entries(
        &mut self,
        book: &mut PositionBook,
        evaluated: &BTreeMap<String, Evaluated>,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) {
        let candidates: Vec<EntryCandidate> = evaluated
            .iter()
            .filter(|(_, ev)| ev.decision.is_eligible())
            .filter_map(|(symbol, ev)| {
                Some(EntryCandidate {
                    symbol: symbol.clone(),
                    side: ev.score.direction()?,
                    strength: ev.score.strength(),
                    reference_price: ev.signal.last_price,
                })
            })
            .collect();
        if candidates.is_empty() {
            return;
        }

        let equity = match self.executor.account().await {
            Ok(account) => account.equity.to_f64().unwrap_or(0.0),
            Err(e) => {
                if e.is_auth() {
                    self.trip(
                        FreezeOrigin::Operator,
                        format!("broker authentication failed: {}", e),
                        Some(AlertKind::BrokerAuth),
                        now,
                    )
                    .await;
                }
                warn!("Account unavailable, no entries this cycle: {}", e);
                return;
            }
        };

        let view = PortfolioView {
            open_symbols: book.symbols(),
            gross_exposure: book.gross_exposure().to_f64().unwrap_or(0.0),
            equity,
        };
        let threshold = self.threshold.effective_threshold(now);
        let selection = self.gate.select_entries(candidates, &view, now);

        for (symbol, reason) in selection.blocked {
            if let Some(ev) = evaluated.get(&symbol) {
                self.emit_gate(ev, threshold, GateDecision::Blocked(reason), now).await;
            }
        }

        for entry in selection.entries {
            if self.freeze.is_frozen() {
                break;
            }
            let Some(ev) = evaluated.get(&entry.symbol) else {
                continue;
            };
            self.enter(book, ev, &entry, now, report).await;
        }
    }

    async fn enter(
        &mut self,
        book: &mut PositionBook,
        ev: &Evaluated,
        entry: &PlannedEntry,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) {
        let (Some(notional), Some(price)) = (
            Decimal::from_f64(entry.notional),
            Decimal::from_f64(entry.reference_price),
        ) else {
            warn!(symbol = %entry.symbol, "Unrepresentable entry size, skipping");
            return;
        };
        if price <= Decimal::ZERO {
            return;
        }
        let qty = (notional / price).round_dp_with_strategy(QTY_DP, RoundingStrategy::ToZero);
        if qty <= Decimal::ZERO {
            debug!(symbol = %entry.symbol, "Entry rounds to zero quantity");
            return;
        }

        let correlation_id = Uuid::new_v4();
        let spec = OrderSpec {
            symbol: entry.symbol.clone(),
            side: entry.side.entry_order(),
            qty,
            client_order_id: correlation_id,
            reference_price: Some(price),
        };
        if self
            .intents
            .create(correlation_id, &spec.symbol, spec.side, qty, IntentPurpose::Entry, now)
            .is_none()
        {
            return;
        }

        info!(
            symbol = %entry.symbol,
            correlation_id = %correlation_id,
            "Entering {} {} (score {:.2})",
            entry.side,
            qty,
            ev.score.score
        );
        let outcome = self.executor.submit(&spec).await;
        self.record_order(&spec, IntentPurpose::Entry, &outcome, now, report).await;

        if let ExecutionOutcome::Filled(fill) = outcome {
            let ctx = EntryContext {
                symbol: entry.symbol.clone(),
                side: entry.side,
                entry_score: ev.score.score,
                components: ev.score.component_snapshot(),
                regime: ev.score.regime,
                correlation_id,
            };
            book.open_from_fill(&ctx, fill.filled_qty, fill.avg_fill_price, now);
            self.gate.record_activity(&entry.symbol, now);
            report.entered += 1;
        }
    }

    async fn process_exits(
        &mut self,
        book: &mut PositionBook,
        evaluated: &BTreeMap<String, Evaluated>,
        regime: Regime,
        threshold: f64,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) {
        for symbol in book.symbols() {
            if self.freeze.is_frozen() {
                break;
            }
            let Some(position) = book.get(&symbol).cloned() else {
                continue;
            };
            let ev = evaluated.get(&symbol);
            let inputs = ExitInputs {
                current_score: ev.map(|e| e.score.score),
                flow_bias: ev.map(|e| e.score.flow_bias()).unwrap_or(0.0),
                momentum_pct: ev.map(|e| e.signal.momentum_pct).unwrap_or(0.0),
                mark: position.current_mark(),
                now,
            };
            let evaluation = self.exit.evaluate(&position, &inputs);
            self.emit_exit(&position, ev, regime, threshold, &evaluation, now).await;

            match evaluation.action {
                ExitAction::Hold => {}
                ExitAction::Reduce => self.reduce(book, &position, now, report).await,
                ExitAction::Exit => {
                    let reason = evaluation
                        .hard_rule
                        .map(|rule| rule.as_str())
                        .unwrap_or("urgency");
                    self.close(book, &position, reason, now, report).await;
                }
            }
        }
    }

    async fn reduce(&mut self, book: &mut PositionBook, position: &Position, now: DateTime<Utc>, report: &mut CycleReport) {
        let fraction = Decimal::from_f64(self.exit.config().reduce_fraction).unwrap_or(Decimal::new(5, 1));
        let qty = (position.qty * fraction).round_dp_with_strategy(QTY_DP, RoundingStrategy::ToZero);
        if qty <= Decimal::ZERO || qty >= position.qty {
            debug!(symbol = %position.symbol, "Reduce size {} not below position {}, holding", qty, position.qty);
            return;
        }

        let spec = OrderSpec {
            symbol: position.symbol.clone(),
            side: position.side.exit_order(),
            qty,
            client_order_id: Uuid::new_v4(),
            reference_price: Some(position.current_mark()),
        };
        if self
            .intents
            .create(spec.client_order_id, &spec.symbol, spec.side, qty, IntentPurpose::Reduce, now)
            .is_none()
        {
            return;
        }

        info!(
            symbol = %position.symbol,
            correlation_id = %position.correlation_id,
            "Reducing {} by {}",
            position.side,
            qty
        );
        let outcome = self.executor.submit(&spec).await;
        self.record_order(&spec, IntentPurpose::Reduce, &outcome, now, report).await;
        if let ExecutionOutcome::Filled(fill) = outcome {
            book.apply_reduce(&position.symbol, fill.filled_qty);
            report.reduces += 1;
        }
    }

    async fn close(
        &mut self,
        book: &mut PositionBook,
        position: &Position,
        reason: &str,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) {
        let spec = OrderSpec {
            symbol: position.symbol.clone(),
            side: position.side.exit_order(),
            qty: position.qty,
            client_order_id: Uuid::new_v4(),
            reference_price: Some(position.current_mark()),
        };
        if self
            .intents
            .create(spec.client_order_id, &spec.symbol, spec.side, spec.qty, IntentPurpose::Exit, now)
            .is_none()
        {
            return;
        }

        info!(
            symbol = %position.symbol,
            correlation_id = %position.correlation_id,
            "Closing {} {} ({})",
            position.side,
            position.qty,
            reason
        );
        let outcome = self.executor.close(&position.symbol).await;
        self.record_order(&spec, IntentPurpose::Exit, &outcome, now, report).await;

        match outcome {
            ExecutionOutcome::Filled(fill) => {
                if let Some(closed) = book.close(&position.symbol) {
                    self.realize(closed, fill.avg_fill_price, reason, now).await;
                }
                self.gate.record_activity(&position.symbol, now);
                report.exits += 1;
            }
            ExecutionOutcome::Blocked { error, .. } => {
                debug!(symbol = %position.symbol, "Close not filled ({}), retrying next cycle", error);
            }
        }
    }

    /// Feed a closed position back into the learner and the threshold
    async fn realize(&mut self, position: Position, exit_price: Decimal, reason: &str, now: DateTime<Utc>) {
        let outcome = TradeOutcome {
            correlation_id: position.correlation_id,
            symbol: position.symbol.clone(),
            side: position.side,
            regime: position.entry_regime,
            entry_score: position.entry_score,
            entry_components: position.entry_component_snapshot.clone(),
            pnl_pct: position.pnl_pct(exit_price),
            opened_at: position.entry_time,
            closed_at: now,
            exit_reason: reason.to_string(),
        };
        info!(
            symbol = %outcome.symbol,
            correlation_id = %outcome.correlation_id,
            "Trade closed: {:+.2}% ({})",
            outcome.pnl_pct,
            reason
        );
        self.events.emit(now, DecisionEvent::TradeOutcome(outcome.clone())).await;

        if let Some(change) = self.threshold.record_outcome(outcome.is_win(), now) {
            self.events.emit(now, DecisionEvent::ThresholdChanged(change)).await;
        }

        match self.learner.observe_trade(&outcome) {
            Ok(learned) => {
                for change in learned.changes {
                    self.events.emit(now, DecisionEvent::WeightChanged(change)).await;
                }
            }
            Err(e) if position.recovered => {
                debug!(symbol = %position.symbol, "Recovered position not learned from: {}", e);
            }
            Err(e) => {
                warn!(symbol = %position.symbol, correlation_id = %position.correlation_id, "{}", e);
                self.alert(AlertKind::MalformedOutcome, e.to_string(), now).await;
            }
        }
        self.learning_dirty = true;
    }

    async fn record_order(
        &mut self,
        spec: &OrderSpec,
        purpose: IntentPurpose,
        outcome: &ExecutionOutcome,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) {
        let state = match outcome {
            ExecutionOutcome::Filled(fill) => IntentState::Filled {
                order_id: fill.order_id.clone(),
                qty: fill.filled_qty,
                price: fill.avg_fill_price,
            },
            ExecutionOutcome::Blocked { reason, .. } => IntentState::Blocked { reason: reason.clone() },
        };
        if let Err(e) = self.intents.update_state(&spec.client_order_id, state) {
            warn!("Intent bookkeeping failed: {}", e);
        }

        let fill = outcome.fill();
        let blocked_reason = match outcome {
            ExecutionOutcome::Blocked { reason, .. } => Some(reason.clone()),
            ExecutionOutcome::Filled(_) => None,
        };
        self.events
            .emit(
                now,
                DecisionEvent::Order {
                    symbol: spec.symbol.clone(),
                    correlation_id: spec.client_order_id,
                    side: spec.side,
                    qty: spec.qty,
                    purpose: format!("{:?}", purpose).to_lowercase(),
                    filled: fill.is_some(),
                    fill_price: fill.map(|f| f.avg_fill_price),
                    blocked_reason,
                },
            )
            .await;

        if let ExecutionOutcome::Blocked { error, .. } = outcome {
            report.blocked_orders += 1;
            if error.is_auth() {
                self.trip(
                    FreezeOrigin::Operator,
                    format!("broker authentication failed: {}", error),
                    Some(AlertKind::BrokerAuth),
                    now,
                )
                .await;
            }
        }
    }

    async fn apply_operator_control(&mut self, now: DateTime<Utc>) {
        let control = match OperatorControl::load(&self.stores.operator_path).await {
            Ok(Some(control)) => control,
            Ok(None) => return,
            Err(e) => {
                warn!("Ignoring unreadable operator control file: {}", e);
                return;
            }
        };

        match self.operator.apply(control, &mut self.freeze, now) {
            OperatorAction::None => {}
            OperatorAction::Froze => {
                let reason = self.freeze.state().map(|s| s.reason.clone()).unwrap_or_default();
                self.emit_freeze(FreezeOrigin::Operator, true, reason, now).await;
            }
            OperatorAction::Released => {
                if let Some(poller) = &self.poller {
                    poller.reset_auth();
                }
                self.emit_freeze(FreezeOrigin::Operator, false, "released by operator".to_string(), now)
                    .await;
            }
        }
    }

    async fn check_feed_auth(&mut self, now: DateTime<Utc>) {
        let failed = self
            .poller
            .as_ref()
            .map(|p| p.status().auth_failed())
            .unwrap_or(false);
        if failed {
            self.trip(
                FreezeOrigin::Operator,
                "signal feed authentication failed",
                Some(AlertKind::FeedAuth),
                now,
            )
            .await;
        }
    }

    async fn check_watchdog(&mut self, now: DateTime<Utc>) {
        // An operator release does not verify positions
        if !self.positions_verified && !self.freeze.is_frozen() {
            self.trip(
                FreezeOrigin::Watchdog,
                "positions not verified against the broker",
                None,
                now,
            )
            .await;
        }
        if self.freeze.origin() != Some(FreezeOrigin::Watchdog) {
            return;
        }
        let health = WatchdogHealth {
            newest_data_age: self.cache.newest_update().await.map(|t| now - t),
            max_data_age: chrono::Duration::seconds(self.config.engine.watchdog_max_cache_age_secs as i64),
            positions_verified: self.positions_verified,
        };
        if self.freeze.try_clear_watchdog(&health) {
            self.emit_freeze(FreezeOrigin::Watchdog, false, "health check passed".to_string(), now)
                .await;
        }
    }

    async fn trip(
        &mut self,
        origin: FreezeOrigin,
        reason: impl Into<String>,
        alert: Option<AlertKind>,
        now: DateTime<Utc>,
    ) {
        let reason = reason.into();
        if !self.freeze.trip(origin, reason.clone(), now) {
            return;
        }
        if let Some(kind) = alert {
            self.alert(kind, reason.clone(), now).await;
        }
        self.emit_freeze(origin, true, reason, now).await;
    }

    async fn alert(&self, kind: AlertKind, message: impl Into<String>, now: DateTime<Utc>) {
        self.events.emit(now, DecisionEvent::alert(kind, message)).await;
    }

    async fn emit_freeze(&self, origin: FreezeOrigin, active: bool, reason: String, now: DateTime<Utc>) {
        self.events
            .emit(
                now,
                DecisionEvent::Freeze {
                    origin: origin.as_str().to_string(),
                    active,
                    reason,
                },
            )
            .await;
    }

    async fn emit_gate(&self, ev: &Evaluated, threshold: f64, decision: GateDecision, now: DateTime<Utc>) {
        self.events
            .emit(
                now,
                DecisionEvent::GateDecision {
                    symbol: ev.score.symbol.clone(),
                    score: ev.score.score,
                    breakdown: ev.score.breakdown.clone(),
                    regime: ev.score.regime,
                    threshold,
                    toxicity: ev.signal.toxicity,
                    freshness: ev.signal.freshness,
                    decision,
                },
            )
            .await;
    }

    async fn emit_exit(
        &self,
        position: &Position,
        ev: Option<&Evaluated>,
        regime: Regime,
        threshold: f64,
        evaluation: &ExitEvaluation,
        now: DateTime<Utc>,
    ) {
        self.events
            .emit(
                now,
                DecisionEvent::ExitDecision {
                    symbol: position.symbol.clone(),
                    correlation_id: position.correlation_id,
                    entry_score: position.entry_score,
                    current_score: ev.map(|e| e.score.score),
                    breakdown: ev.map(|e| e.score.breakdown.clone()),
                    regime,
                    threshold,
                    urgency: evaluation.urgency,
                    urgency_breakdown: evaluation.breakdown,
                    hard_rule: evaluation.hard_rule,
                    action: evaluation.action,
                    pnl_pct: evaluation.pnl_pct,
                },
            )
            .await;
    }

    /// Persist positions every cycle, learning state only when it moved
    async fn persist(&mut self, book: &PositionBook) {
        if let Err(e) = self.stores.positions.save(book).await {
            error!("Failed to persist positions: {}", e);
        }
        if !self.learning_dirty {
            return;
        }
        if let Err(e) = self.stores.weights.save(self.learner.table()).await {
            error!("Failed to persist weights: {}", e);
            return;
        }
        if let Err(e) = self.stores.threshold.save(self.threshold.state()).await {
            error!("Failed to persist threshold: {}", e);
            return;
        }
        self.learning_dirty = false;
    }

    async fn finish_cycle(&mut self, report: CycleReport, now: DateTime<Utc>) {
        let open_positions = self.positions.lock().await.len();
        let status = NowState {
            timestamp: Some(now),
            mode: format!("{:?}", self.config.engine.trading_mode).to_lowercase(),
            status: if report.frozen { "frozen" } else { "running" }.to_string(),
            regime: Some(self.regime.current_regime()),
            effective_threshold: self.threshold.effective_threshold(now),
            open_positions,
            freeze: self.freeze.state().cloned(),
            last_cycle: report.clone(),
            last_reconciliation: self.last_reconciliation,
        };
        if let Err(e) = self.stores.now.save(&status).await {
            warn!("Failed to write status file: {}", e);
        }
        self.last_report = report;
    }
}
