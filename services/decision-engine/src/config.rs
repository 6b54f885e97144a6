//! Engine Configuration
//!
//! Loaded from an optional YAML/TOML/JSON file layered under environment
//! variables (`DECISION_ENGINE_<SECTION>__<KEY>`, e.g.
//! `DECISION_ENGINE_ENGINE__CYCLE_INTERVAL_SECS=30`). Every field has a default.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use signal_feed::{PollerConfig, Regime};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::types::ComponentId;

/// Environment prefix for overrides
pub const ENV_PREFIX: &str = "DECISION_ENGINE";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub enrich: EnrichConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub learner: LearnerConfig,
    #[serde(default)]
    pub threshold: ThresholdConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub exit: ExitConfig,
}

impl EngineConfig {
    /// Load from an optional file plus environment overrides, then validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("engine.universe")
                .with_list_parse_key("threshold.liquidity_windows"),
        );

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject bounds that would make the engine misbehave silently
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn check(ok: bool, msg: &str) -> Result<(), ConfigError> {
            if ok {
                Ok(())
            } else {
                Err(ConfigError::Invalid(msg.to_string()))
            }
        }

        check(self.engine.cycle_interval_secs > 0, "engine.cycle_interval_secs must be > 0")?;
        check(
            self.engine.reconcile_interval_secs > 0,
            "engine.reconcile_interval_secs must be > 0",
        )?;
        check(
            self.engine.paper_starting_equity.is_finite() && self.engine.paper_starting_equity > 0.0,
            "engine.paper_starting_equity must be positive",
        )?;

        check(
            self.enrich.freshness_half_life_secs > 0.0 && self.enrich.freshness_half_life_secs.is_finite(),
            "enrich.freshness_half_life_secs must be positive",
        )?;
        check(
            (0.0..=1.0).contains(&self.enrich.freshness_floor),
            "enrich.freshness_floor must be within [0, 1]",
        )?;
        check(
            (1..=MAX_MOTIF_WINDOW_SECS).contains(&self.enrich.motif_window_secs),
            "enrich.motif_window_secs must be within [1, 86400]",
        )?;
        check(
            (1..=self.enrich.motif_window_secs).contains(&self.enrich.burst_span_secs),
            "enrich.burst_span_secs must be within [1, motif_window_secs]",
        )?;

        for component in ComponentId::ALL {
            let w = self.scoring.base_weights.get(component);
            check(
                w.is_finite() && w >= 0.0,
                &format!("scoring.base_weights.{} must be finite and >= 0", component),
            )?;
        }

        let l = &self.learner;
        check(
            l.multiplier_floor > 0.0 && l.multiplier_floor <= 1.0 && l.multiplier_cap >= 1.0,
            "learner multiplier bounds must bracket 1.0",
        )?;
        check(l.multiplier_floor <= l.multiplier_cap, "learner.multiplier_floor > multiplier_cap")?;
        check(l.step > 0.0 && l.step.is_finite(), "learner.step must be positive")?;
        check(l.z > 0.0 && l.z.is_finite(), "learner.z must be positive")?;
        check(
            l.ewma_alpha > 0.0 && l.ewma_alpha <= 1.0,
            "learner.ewma_alpha must be within (0, 1]",
        )?;

        let t = &self.threshold;
        check(t.base.is_finite() && t.base >= 0.0, "threshold.base must be >= 0")?;
        check(t.increment > 0.0, "threshold.increment must be positive")?;
        check(t.max_delta >= 0.0, "threshold.max_delta must be >= 0")?;
        check(t.loss_streak > 0, "threshold.loss_streak must be > 0")?;
        for window in &t.liquidity_windows {
            LiquidityWindow::parse(window)?;
        }

        let g = &self.gate;
        check(
            (0.0..=1.0).contains(&g.toxicity_ceiling),
            "gate.toxicity_ceiling must be within [0, 1]",
        )?;
        check(
            g.position_size_pct > 0.0 && g.position_size_pct <= g.max_gross_exposure_pct,
            "gate.position_size_pct must be positive and <= max_gross_exposure_pct",
        )?;

        let e = &self.exit;
        check(
            e.reduce_threshold > 0.0 && e.reduce_threshold <= e.exit_threshold,
            "exit.reduce_threshold must be positive and <= exit_threshold",
        )?;
        check(e.exit_threshold <= 10.0, "exit.exit_threshold must be <= 10")?;
        check(
            e.reduce_fraction > 0.0 && e.reduce_fraction < 1.0,
            "exit.reduce_fraction must be within (0, 1)",
        )?;
        check(e.hard_loss_floor_pct < 0.0, "exit.hard_loss_floor_pct must be negative")?;
        check(
            e.hard_loss_addend.is_finite() && e.hard_loss_addend >= e.exit_threshold,
            "exit.hard_loss_addend must be >= exit_threshold",
        )?;

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TradingMode {
    #[default]
    Paper,
    Live,
}

/// Process-level settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineSection {
    #[serde(default = "default_universe")]
    pub universe: Vec<String>,
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,
    #[serde(default = "default_reconcile_interval_secs")]
    pub reconcile_interval_secs: u64,
    #[serde(default)]
    pub trading_mode: TradingMode,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_feed_url")]
    pub feed_url: String,
    #[serde(default)]
    pub feed_api_key: Option<String>,
    #[serde(default = "default_feed_timeout_secs")]
    pub feed_timeout_secs: u64,
    #[serde(default = "default_broker_url")]
    pub broker_url: String,
    #[serde(default)]
    pub broker_api_key: Option<String>,
    #[serde(default = "default_broker_timeout_secs")]
    pub broker_timeout_secs: u64,
    /// Retries for connectivity failures only
    #[serde(default = "default_broker_max_retries")]
    pub broker_max_retries: u32,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Regime used until a classifier file provides one
    #[serde(default = "default_regime")]
    pub regime: Regime,
    #[serde(default = "default_paper_starting_equity")]
    pub paper_starting_equity: f64,
    /// Max random paper slippage in basis points
    #[serde(default = "default_paper_slippage_bps")]
    pub paper_slippage_bps: f64,
    /// Watchdog freezes trading when no cache update arrives for this long
    #[serde(default = "default_watchdog_max_cache_age_secs")]
    pub watchdog_max_cache_age_secs: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            universe: default_universe(),
            cycle_interval_secs: default_cycle_interval_secs(),
            reconcile_interval_secs: default_reconcile_interval_secs(),
            trading_mode: TradingMode::default(),
            state_dir: default_state_dir(),
            feed_url: default_feed_url(),
            feed_api_key: None,
            feed_timeout_secs: default_feed_timeout_secs(),
            broker_url: default_broker_url(),
            broker_api_key: None,
            broker_timeout_secs: default_broker_timeout_secs(),
            broker_max_retries: default_broker_max_retries(),
            log_level: default_log_level(),
            regime: default_regime(),
            paper_starting_equity: default_paper_starting_equity(),
            paper_slippage_bps: default_paper_slippage_bps(),
            watchdog_max_cache_age_secs: default_watchdog_max_cache_age_secs(),
        }
    }
}

fn default_universe() -> Vec<String> {
    ["SPY", "QQQ", "AAPL", "MSFT", "NVDA"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_cycle_interval_secs() -> u64 { 60 }
fn default_reconcile_interval_secs() -> u64 { 300 }
fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("decision-engine")
        .join("state")
}
fn default_feed_url() -> String { "http://localhost:8080".to_string() }
fn default_feed_timeout_secs() -> u64 { 10 }
fn default_broker_url() -> String { "http://localhost:9090".to_string() }
fn default_broker_timeout_secs() -> u64 { 15 }
fn default_broker_max_retries() -> u32 { 2 }
fn default_log_level() -> String { "info".to_string() }
fn default_regime() -> Regime { Regime::Neutral }
fn default_paper_starting_equity() -> f64 { 100_000.0 }
fn default_paper_slippage_bps() -> f64 { 5.0 }
fn default_watchdog_max_cache_age_secs() -> u64 { 900 }

/// Enricher tuning (freshness, motifs, toxicity)
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EnrichConfig {
    #[serde(default = "default_freshness_half_life_secs")]
    pub freshness_half_life_secs: f64,
    /// Freshness never drops below this, so moderately stale data still scores
    #[serde(default = "default_freshness_floor")]
    pub freshness_floor: f64,
    #[serde(default = "default_motif_window_secs")]
    pub motif_window_secs: i64,
    #[serde(default = "default_staircase_min_prints")]
    pub staircase_min_prints: usize,
    #[serde(default = "default_burst_min_prints")]
    pub burst_min_prints: usize,
    #[serde(default = "default_burst_span_secs")]
    pub burst_span_secs: i64,
    /// Age at which staleness saturates at 1.0
    #[serde(default = "default_staleness_horizon_secs")]
    pub staleness_horizon_secs: f64,
    #[serde(default = "default_crowding_min_prints")]
    pub crowding_min_prints: usize,
    #[serde(default = "default_staleness_weight")]
    pub staleness_weight: f64,
    #[serde(default = "default_crowding_weight")]
    pub crowding_weight: f64,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            freshness_half_life_secs: default_freshness_half_life_secs(),
            freshness_floor: default_freshness_floor(),
            motif_window_secs: default_motif_window_secs(),
            staircase_min_prints: default_staircase_min_prints(),
            burst_min_prints: default_burst_min_prints(),
            burst_span_secs: default_burst_span_secs(),
            staleness_horizon_secs: default_staleness_horizon_secs(),
            crowding_min_prints: default_crowding_min_prints(),
            staleness_weight: default_staleness_weight(),
            crowding_weight: default_crowding_weight(),
        }
    }
}

fn default_freshness_half_life_secs() -> f64 { 300.0 }
fn default_freshness_floor() -> f64 { 0.35 }
/// One day
const MAX_MOTIF_WINDOW_SECS: i64 = 86_400;

fn default_motif_window_secs() -> i64 { 900 }
fn default_staircase_min_prints() -> usize { 3 }
fn default_burst_min_prints() -> usize { 4 }
fn default_burst_span_secs() -> i64 { 60 }
fn default_staleness_horizon_secs() -> f64 { 900.0 }
fn default_crowding_min_prints() -> usize { 3 }
fn default_staleness_weight() -> f64 { 0.6 }
fn default_crowding_weight() -> f64 { 0.4 }

/// Per-component base weights before learned multipliers
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct BaseWeights {
    #[serde(default = "default_w_sentiment")]
    pub sentiment: f64,
    #[serde(default = "default_w_conviction")]
    pub conviction: f64,
    #[serde(default = "default_w_put_call_ratio")]
    pub put_call_ratio: f64,
    #[serde(default = "default_w_net_premium")]
    pub net_premium: f64,
    #[serde(default = "default_w_sweep_flow")]
    pub sweep_flow: f64,
    #[serde(default = "default_w_dark_pool")]
    pub dark_pool: f64,
    #[serde(default = "default_w_vol_skew")]
    pub vol_skew: f64,
    #[serde(default = "default_w_motif")]
    pub motif: f64,
    #[serde(default = "default_w_gamma_regime")]
    pub gamma_regime: f64,
}

impl BaseWeights {
    pub fn get(&self, component: ComponentId) -> f64 {
        match component {
            ComponentId::Sentiment => self.sentiment,
            ComponentId::Conviction => self.conviction,
            ComponentId::PutCallRatio => self.put_call_ratio,
            ComponentId::NetPremium => self.net_premium,
            ComponentId::SweepFlow => self.sweep_flow,
            ComponentId::DarkPool => self.dark_pool,
            ComponentId::VolSkew => self.vol_skew,
            ComponentId::Motif => self.motif,
            ComponentId::GammaRegime => self.gamma_regime,
        }
    }
}

impl Default for BaseWeights {
    fn default() -> Self {
        Self {
            sentiment: default_w_sentiment(),
            conviction: default_w_conviction(),
            put_call_ratio: default_w_put_call_ratio(),
            net_premium: default_w_net_premium(),
            sweep_flow: default_w_sweep_flow(),
            dark_pool: default_w_dark_pool(),
            vol_skew: default_w_vol_skew(),
            motif: default_w_motif(),
            gamma_regime: default_w_gamma_regime(),
        }
    }
}

fn default_w_sentiment() -> f64 { 1.5 }
fn default_w_conviction() -> f64 { 1.0 }
fn default_w_put_call_ratio() -> f64 { 1.0 }
fn default_w_net_premium() -> f64 { 2.0 }
fn default_w_sweep_flow() -> f64 { 1.5 }
fn default_w_dark_pool() -> f64 { 1.0 }
fn default_w_vol_skew() -> f64 { 0.75 }
fn default_w_motif() -> f64 { 1.0 }
fn default_w_gamma_regime() -> f64 { 0.75 }

/// Scorer transform parameters
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ScoringConfig {
    #[serde(default)]
    pub base_weights: BaseWeights,
    /// Notional at which the log transform reaches ~0.6
    #[serde(default = "default_premium_reference")]
    pub premium_reference: f64,
    #[serde(default = "default_sweep_reference")]
    pub sweep_reference: f64,
    #[serde(default = "default_dark_pool_reference")]
    pub dark_pool_reference: f64,
    /// Put-minus-call IV (vol points) for the mild and strong skew bands
    #[serde(default = "default_skew_mild")]
    pub skew_mild: f64,
    #[serde(default = "default_skew_strong")]
    pub skew_strong: f64,
    /// |dealer gamma| below this is treated as flat
    #[serde(default = "default_gamma_band")]
    pub gamma_band: f64,
    #[serde(default = "default_gamma_strong")]
    pub gamma_strong: f64,
    #[serde(default = "default_convergence_bonus")]
    pub convergence_bonus: f64,
    #[serde(default = "default_convergence_min_components")]
    pub convergence_min_components: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            base_weights: BaseWeights::default(),
            premium_reference: default_premium_reference(),
            sweep_reference: default_sweep_reference(),
            dark_pool_reference: default_dark_pool_reference(),
            skew_mild: default_skew_mild(),
            skew_strong: default_skew_strong(),
            gamma_band: default_gamma_band(),
            gamma_strong: default_gamma_strong(),
            convergence_bonus: default_convergence_bonus(),
            convergence_min_components: default_convergence_min_components(),
        }
    }
}

fn default_premium_reference() -> f64 { 1_000_000.0 }
fn default_sweep_reference() -> f64 { 500_000.0 }
fn default_dark_pool_reference() -> f64 { 5_000_000.0 }
fn default_skew_mild() -> f64 { 0.05 }
fn default_skew_strong() -> f64 { 0.10 }
fn default_gamma_band() -> f64 { 100_000_000.0 }
fn default_gamma_strong() -> f64 { 1_000_000_000.0 }
fn default_convergence_bonus() -> f64 { 1.0 }
fn default_convergence_min_components() -> usize { 4 }

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LearnerMethod {
    #[default]
    Beta,
    Ewma,
}

/// Weight learner parameters
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LearnerConfig {
    #[serde(default)]
    pub method: LearnerMethod,
    #[serde(default = "default_min_samples")]
    pub min_samples: u64,
    /// Wilson interval z-score
    #[serde(default = "default_z")]
    pub z: f64,
    #[serde(default = "default_step")]
    pub step: f64,
    #[serde(default = "default_multiplier_floor")]
    pub multiplier_floor: f64,
    #[serde(default = "default_multiplier_cap")]
    pub multiplier_cap: f64,
    #[serde(default = "default_ewma_alpha")]
    pub ewma_alpha: f64,
    /// EWMA win rate must clear 0.5 by this margin to count as significant
    #[serde(default = "default_ewma_margin")]
    pub ewma_margin: f64,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            method: LearnerMethod::default(),
            min_samples: default_min_samples(),
            z: default_z(),
            step: default_step(),
            multiplier_floor: default_multiplier_floor(),
            multiplier_cap: default_multiplier_cap(),
            ewma_alpha: default_ewma_alpha(),
            ewma_margin: default_ewma_margin(),
        }
    }
}

fn default_min_samples() -> u64 { 10 }
fn default_z() -> f64 { 1.96 }
fn default_step() -> f64 { 0.15 }
fn default_multiplier_floor() -> f64 { 0.25 }
fn default_multiplier_cap() -> f64 { 2.5 }
fn default_ewma_alpha() -> f64 { 0.1 }
fn default_ewma_margin() -> f64 { 0.15 }

/// Self-healing entry threshold parameters
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ThresholdConfig {
    #[serde(default = "default_base_threshold")]
    pub base: f64,
    #[serde(default = "default_increment")]
    pub increment: f64,
    /// Consecutive losses that trigger one raise
    #[serde(default = "default_loss_streak")]
    pub loss_streak: u32,
    #[serde(default = "default_max_delta")]
    pub max_delta: f64,
    /// Loss-free period after which one decay step applies
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: i64,
    /// Minimum spacing between two adjustments
    #[serde(default = "default_min_step_interval_secs")]
    pub min_step_interval_secs: i64,
    /// UTC `HH:MM-HH:MM` windows with thin liquidity
    #[serde(default = "default_liquidity_windows")]
    pub liquidity_windows: Vec<String>,
    #[serde(default = "default_liquidity_adjustment")]
    pub liquidity_adjustment: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            base: default_base_threshold(),
            increment: default_increment(),
            loss_streak: default_loss_streak(),
            max_delta: default_max_delta(),
            cooldown_secs: default_cooldown_secs(),
            min_step_interval_secs: default_min_step_interval_secs(),
            liquidity_windows: default_liquidity_windows(),
            liquidity_adjustment: default_liquidity_adjustment(),
        }
    }
}

fn default_base_threshold() -> f64 { 3.0 }
fn default_increment() -> f64 { 0.5 }
fn default_loss_streak() -> u32 { 3 }
fn default_max_delta() -> f64 { 2.0 }
fn default_cooldown_secs() -> i64 { 4 * 3600 }
fn default_min_step_interval_secs() -> i64 { 1800 }
fn default_liquidity_windows() -> Vec<String> { vec!["16:00-17:30".to_string()] }
fn default_liquidity_adjustment() -> f64 { 0.5 }

/// Daily UTC window, may wrap past midnight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiquidityWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl LiquidityWindow {
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let (start, end) = spec
            .split_once('-')
            .ok_or_else(|| ConfigError::Invalid(format!("liquidity window {:?} is not HH:MM-HH:MM", spec)))?;
        let parse = |s: &str| {
            NaiveTime::parse_from_str(s.trim(), "%H:%M")
                .map_err(|e| ConfigError::Invalid(format!("liquidity window {:?}: {}", spec, e)))
        };
        Ok(Self {
            start: parse(start)?,
            end: parse(end)?,
        })
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        if self.start <= self.end {
            t >= self.start && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }
}

/// Entry gate parameters
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct GateConfig {
    #[serde(default = "default_toxicity_ceiling")]
    pub toxicity_ceiling: f64,
    #[serde(default = "default_gate_freshness_floor")]
    pub freshness_floor: f64,
    #[serde(default = "default_max_new_per_cycle")]
    pub max_new_per_cycle: usize,
    /// Quiet period after any entry or exit in a symbol
    #[serde(default = "default_symbol_cooldown_secs")]
    pub symbol_cooldown_secs: i64,
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: usize,
    /// Gross exposure cap as percent of equity
    #[serde(default = "default_max_gross_exposure_pct")]
    pub max_gross_exposure_pct: f64,
    /// New position notional as percent of equity
    #[serde(default = "default_position_size_pct")]
    pub position_size_pct: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            toxicity_ceiling: default_toxicity_ceiling(),
            freshness_floor: default_gate_freshness_floor(),
            max_new_per_cycle: default_max_new_per_cycle(),
            symbol_cooldown_secs: default_symbol_cooldown_secs(),
            max_open_positions: default_max_open_positions(),
            max_gross_exposure_pct: default_max_gross_exposure_pct(),
            position_size_pct: default_position_size_pct(),
        }
    }
}

fn default_toxicity_ceiling() -> f64 { 0.7 }
fn default_gate_freshness_floor() -> f64 { 0.5 }
fn default_max_new_per_cycle() -> usize { 2 }
fn default_symbol_cooldown_secs() -> i64 { 1800 }
fn default_max_open_positions() -> usize { 5 }
fn default_max_gross_exposure_pct() -> f64 { 60.0 }
fn default_position_size_pct() -> f64 { 10.0 }

/// Exit engine parameters
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ExitConfig {
    #[serde(default = "default_w_entry_decay")]
    pub weight_entry_decay: f64,
    #[serde(default = "default_w_adverse_flow")]
    pub weight_adverse_flow: f64,
    #[serde(default = "default_w_drawdown_velocity")]
    pub weight_drawdown_velocity: f64,
    #[serde(default = "default_w_time_decay")]
    pub weight_time_decay: f64,
    #[serde(default = "default_w_momentum_reversal")]
    pub weight_momentum_reversal: f64,
    #[serde(default = "default_decay_ratio")]
    pub decay_ratio: f64,
    /// Adverse short-horizon momentum (percent) that counts as a reversal
    #[serde(default = "default_momentum_threshold_pct")]
    pub momentum_threshold_pct: f64,
    #[serde(default = "default_drawdown_threshold_pct")]
    pub drawdown_threshold_pct: f64,
    /// Holding time against which drawdown speed is measured
    #[serde(default = "default_drawdown_reference_secs")]
    pub drawdown_reference_secs: i64,
    #[serde(default = "default_age_threshold_secs")]
    pub age_threshold_secs: i64,
    #[serde(default = "default_hard_loss_floor_pct")]
    pub hard_loss_floor_pct: f64,
    #[serde(default = "default_hard_loss_addend")]
    pub hard_loss_addend: f64,
    #[serde(default = "default_reduce_threshold")]
    pub reduce_threshold: f64,
    #[serde(default = "default_exit_threshold")]
    pub exit_threshold: f64,
    #[serde(default = "default_trailing_stop_pct")]
    pub trailing_stop_pct: f64,
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,
    #[serde(default = "default_profit_target_pct")]
    pub profit_target_pct: f64,
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: i64,
    #[serde(default = "default_reduce_fraction")]
    pub reduce_fraction: f64,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            weight_entry_decay: default_w_entry_decay(),
            weight_adverse_flow: default_w_adverse_flow(),
            weight_drawdown_velocity: default_w_drawdown_velocity(),
            weight_time_decay: default_w_time_decay(),
            weight_momentum_reversal: default_w_momentum_reversal(),
            decay_ratio: default_decay_ratio(),
            momentum_threshold_pct: default_momentum_threshold_pct(),
            drawdown_threshold_pct: default_drawdown_threshold_pct(),
            drawdown_reference_secs: default_drawdown_reference_secs(),
            age_threshold_secs: default_age_threshold_secs(),
            hard_loss_floor_pct: default_hard_loss_floor_pct(),
            hard_loss_addend: default_hard_loss_addend(),
            reduce_threshold: default_reduce_threshold(),
            exit_threshold: default_exit_threshold(),
            trailing_stop_pct: default_trailing_stop_pct(),
            stop_loss_pct: default_stop_loss_pct(),
            profit_target_pct: default_profit_target_pct(),
            max_age_secs: default_max_age_secs(),
            reduce_fraction: default_reduce_fraction(),
        }
    }
}

fn default_w_entry_decay() -> f64 { 3.0 }
fn default_w_adverse_flow() -> f64 { 2.5 }
fn default_w_drawdown_velocity() -> f64 { 2.0 }
fn default_w_time_decay() -> f64 { 1.0 }
fn default_w_momentum_reversal() -> f64 { 1.5 }
fn default_decay_ratio() -> f64 { 0.7 }
fn default_momentum_threshold_pct() -> f64 { 0.3 }
fn default_drawdown_threshold_pct() -> f64 { 1.5 }
fn default_drawdown_reference_secs() -> i64 { 3600 }
fn default_age_threshold_secs() -> i64 { 4 * 3600 }
fn default_hard_loss_floor_pct() -> f64 { -5.0 }
fn default_hard_loss_addend() -> f64 { 10.0 }
fn default_reduce_threshold() -> f64 { 3.0 }
fn default_exit_threshold() -> f64 { 6.0 }
fn default_trailing_stop_pct() -> f64 { 3.0 }
fn default_stop_loss_pct() -> f64 { 6.0 }
fn default_profit_target_pct() -> f64 { 8.0 }
fn default_max_age_secs() -> i64 { 24 * 3600 }
fn default_reduce_fraction() -> f64 { 0.5 }
