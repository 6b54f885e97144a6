//! Adaptive weight learner.
//!
//! One [`WeightState`] per (component, regime). Outcomes are applied only to
//! the regime the trade was opened in and only for components that actually
//! contributed to its entry score; other regimes are never touched.

pub mod distribution;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{BaseWeights, LearnerConfig};
use crate::error::LearnError;
use crate::scoring::{ComponentWeight, WeightSource};
use crate::types::{ComponentId, Regime, Side};

pub use distribution::{wilson_interval, Distribution, Verdict};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightState {
    pub base_weight: f64,
    pub distribution: Distribution,
    /// Always within [multiplier_floor, multiplier_cap]
    pub multiplier: f64,
    pub sample_count: u64,
}

/// Persisted learner state: regime -> component -> state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightTable {
    pub regimes: BTreeMap<Regime, BTreeMap<ComponentId, WeightState>>,
}

impl WeightTable {
    pub fn get(&self, component: ComponentId, regime: Regime) -> Option<&WeightState> {
        self.regimes.get(&regime).and_then(|m| m.get(&component))
    }
}

/// Realized result of a closed trade, as fed back to the learner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub correlation_id: Uuid,
    pub symbol: String,
    pub side: Side,
    /// Regime at entry; `None` for positions rebuilt without metadata
    pub regime: Option<Regime>,
    pub entry_score: f64,
    pub entry_components: BTreeMap<ComponentId, f64>,
    pub pnl_pct: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub exit_reason: String,
}

impl TradeOutcome {
    pub fn is_win(&self) -> bool {
        self.pnl_pct > 0.0
    }

    fn validate(&self) -> Result<Regime, LearnError> {
        let malformed = |reason: &str| LearnError::MalformedOutcome {
            symbol: self.symbol.clone(),
            reason: reason.to_string(),
        };
        let regime = self.regime.ok_or_else(|| malformed("entry regime unknown"))?;
        if !self.pnl_pct.is_finite() {
            return Err(malformed("non-finite pnl"));
        }
        if self.entry_components.is_empty() {
            return Err(malformed("no entry component snapshot"));
        }
        if self.entry_components.values().any(|v| !v.is_finite()) {
            return Err(malformed("non-finite component contribution"));
        }
        if self.closed_at < self.opened_at {
            return Err(malformed("closed before opened"));
        }
        Ok(regime)
    }
}

/// A multiplier step taken by the learner
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MultiplierChange {
    pub component: ComponentId,
    pub regime: Regime,
    pub from: f64,
    pub to: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LearnReport {
    pub observed: Vec<ComponentId>,
    pub changes: Vec<MultiplierChange>,
}

pub struct WeightLearner {
    config: LearnerConfig,
    base_weights: BaseWeights,
    table: WeightTable,
}

impl WeightLearner {
    pub fn new(config: LearnerConfig, base_weights: BaseWeights) -> Self {
        Self::from_table(config, base_weights, WeightTable::default())
    }

    /// Resume from persisted state. Configured base weights win over stored
    /// ones; invalid entries are reset and multipliers re-clamped.
    pub fn from_table(config: LearnerConfig, base_weights: BaseWeights, mut table: WeightTable) -> Self {
        for (regime, components) in table.regimes.iter_mut() {
            for (component, state) in components.iter_mut() {
                state.base_weight = base_weights.get(*component);
                if !state.distribution.is_valid() || !state.multiplier.is_finite() {
                    warn!(
                        "Resetting invalid weight state for {}/{}: {:?}",
                        component, regime, state
                    );
                    state.distribution = Distribution::prior(&config);
                    state.multiplier = 1.0;
                    state.sample_count = 0;
                }
                state.multiplier = state
                    .multiplier
                    .clamp(config.multiplier_floor, config.multiplier_cap);
            }
        }
        Self {
            config,
            base_weights,
            table,
        }
    }

    pub fn table(&self) -> &WeightTable {
        &self.table
    }

    pub fn state(&self, component: ComponentId, regime: Regime) -> Option<&WeightState> {
        self.table.get(component, regime)
    }

    pub fn multiplier(&self, component: ComponentId, regime: Regime) -> f64 {
        self.state(component, regime).map(|s| s.multiplier).unwrap_or(1.0)
    }

    pub fn effective_weight(&self, component: ComponentId, regime: Regime) -> f64 {
        self.base_weights.get(component) * self.multiplier(component, regime)
    }

    /// Apply one outcome to one (component, regime) distribution.
    ///
    /// No-op when the component did not contribute to the entry score. The
    /// multiplier only moves once `min_samples` is reached and the verdict is
    /// significant.
    pub fn observe(
        &mut self,
        component: ComponentId,
        regime: Regime,
        contributed_nonzero: bool,
        pnl_pct: f64,
    ) -> Result<Option<MultiplierChange>, LearnError> {
        if !pnl_pct.is_finite() {
            return Err(LearnError::MalformedOutcome {
                symbol: String::new(),
                reason: format!("non-finite pnl for {}", component),
            });
        }
        if !contributed_nonzero {
            return Ok(None);
        }

        let config = &self.config;
        let base_weight = self.base_weights.get(component);
        let state = self
            .table
            .regimes
            .entry(regime)
            .or_default()
            .entry(component)
            .or_insert_with(|| WeightState {
                base_weight,
                distribution: Distribution::prior(config),
                multiplier: 1.0,
                sample_count: 0,
            });

        state.distribution = state.distribution.observe(pnl_pct > 0.0);
        state.sample_count += 1;

        if state.sample_count < config.min_samples {
            return Ok(None);
        }

        let from = state.multiplier;
        let to = match state.distribution.verdict(config) {
            Verdict::Promote => (from + config.step).min(config.multiplier_cap),
            Verdict::Demote => (from - config.step).max(config.multiplier_floor),
            Verdict::Hold => from,
        };
        let to = to.clamp(config.multiplier_floor, config.multiplier_cap);

        if (to - from).abs() > f64::EPSILON {
            state.multiplier = to;
            info!(
                component = %component,
                regime = %regime,
                samples = state.sample_count,
                win_rate = state.distribution.win_rate(),
                "Weight multiplier {:.2} -> {:.2}",
                from,
                to
            );
            Ok(Some(MultiplierChange {
                component,
                regime,
                from,
                to,
            }))
        } else {
            Ok(None)
        }
    }

    /// Apply a closed trade to every component that contributed at entry.
    /// Malformed records are rejected whole, before any distribution changes.
    pub fn observe_trade(&mut self, outcome: &TradeOutcome) -> Result<LearnReport, LearnError> {
        let regime = outcome.validate()?;

        let mut report = LearnReport::default();
        for component in ComponentId::ALL {
            let contributed = outcome
                .entry_components
                .get(&component)
                .map(|v| *v != 0.0)
                .unwrap_or(false);
            if !contributed {
                continue;
            }
            if let Some(change) = self.observe(component, regime, true, outcome.pnl_pct)? {
                report.changes.push(change);
            }
            report.observed.push(component);
        }
        debug!(
            symbol = %outcome.symbol,
            correlation_id = %outcome.correlation_id,
            regime = %regime,
            "Learned from outcome: {} components, {} multiplier changes",
            report.observed.len(),
            report.changes.len()
        );
        Ok(report)
    }
}

impl WeightSource for WeightLearner {
    fn weight(&self, component: ComponentId, regime: Regime) -> ComponentWeight {
        ComponentWeight {
            base: self.base_weights.get(component),
            multiplier: self.multiplier(component, regime),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn learner() -> WeightLearner {
        WeightLearner::new(LearnerConfig::default(), BaseWeights::default())
    }

    fn outcome(regime: Option<Regime>, pnl_pct: f64) -> TradeOutcome {
        let opened_at = Utc::now() - Duration::hours(2);
        let mut entry_components = BTreeMap::new();
        entry_components.insert(ComponentId::NetPremium, 1.4);
        entry_components.insert(ComponentId::SweepFlow, 0.9);
        entry_components.insert(ComponentId::Motif, 0.0);
        TradeOutcome {
            correlation_id: Uuid::new_v4(),
            symbol: "AAPL".to_string(),
            side: Side::Long,
            regime,
            entry_score: 4.2,
            entry_components,
            pnl_pct,
            opened_at,
            closed_at: opened_at + Duration::hours(1),
            exit_reason: "urgency".to_string(),
        }
    }

    #[test]
    fn test_non_contributing_component_is_ignored() {
        let mut l = learner();
        let change = l.observe(ComponentId::Motif, Regime::RiskOn, false, 2.0).unwrap();
        assert!(change.is_none());
        assert!(l.state(ComponentId::Motif, Regime::RiskOn).is_none());
    }

    #[test]
    fn test_multiplier_holds_below_min_samples() {
        let mut l = learner();
        for _ in 0..9 {
            assert!(l.observe(ComponentId::NetPremium, Regime::RiskOn, true, 1.0).unwrap().is_none());
        }
        assert_eq!(l.multiplier(ComponentId::NetPremium, Regime::RiskOn), 1.0);

        let change = l.observe(ComponentId::NetPremium, Regime::RiskOn, true, 1.0).unwrap();
        let change = change.unwrap();
        assert_eq!(change.from, 1.0);
        assert!((change.to - 1.15).abs() < 1e-9);
    }

    #[test]
    fn test_regime_isolation() {
        let mut l = learner();
        for _ in 0..12 {
            l.observe(ComponentId::SweepFlow, Regime::Panic, true, 3.0).unwrap();
        }
        let others = |l: &WeightLearner| -> Vec<String> {
            Regime::ALL
                .iter()
                .filter(|r| **r != Regime::Mixed)
                .map(|r| serde_json::to_string(&l.table().regimes.get(r)).unwrap())
                .collect()
        };
        let before = others(&l);

        for _ in 0..12 {
            l.observe(ComponentId::SweepFlow, Regime::Mixed, true, -2.0).unwrap();
        }

        assert_eq!(others(&l), before);
        assert_eq!(l.state(ComponentId::SweepFlow, Regime::Mixed).unwrap().sample_count, 12);
        assert!(l.multiplier(ComponentId::SweepFlow, Regime::Mixed) < 1.0);
        assert!(l.multiplier(ComponentId::SweepFlow, Regime::Panic) > 1.0);
    }

    #[test]
    fn test_multiplier_stays_bounded() {
        let mut l = learner();
        for _ in 0..200 {
            l.observe(ComponentId::Sentiment, Regime::RiskOn, true, 1.0).unwrap();
            l.observe(ComponentId::Conviction, Regime::RiskOn, true, -1.0).unwrap();
        }
        assert_eq!(l.multiplier(ComponentId::Sentiment, Regime::RiskOn), 2.5);
        assert_eq!(l.multiplier(ComponentId::Conviction, Regime::RiskOn), 0.25);
    }

    #[test]
    fn test_observe_trade_only_touches_contributing_components() {
        let mut l = learner();
        let report = l.observe_trade(&outcome(Some(Regime::RiskOff), 1.2)).unwrap();
        assert_eq!(report.observed, vec![ComponentId::NetPremium, ComponentId::SweepFlow]);
        assert!(l.state(ComponentId::Motif, Regime::RiskOff).is_none());
        assert_eq!(
            l.state(ComponentId::NetPremium, Regime::RiskOff).unwrap().sample_count,
            1
        );
    }

    #[test]
    fn test_malformed_outcomes_are_skipped_without_side_effects() {
        let mut l = learner();
        let before = l.table().clone();

        assert!(l.observe_trade(&outcome(None, 1.0)).is_err());
        assert!(l.observe_trade(&outcome(Some(Regime::RiskOn), f64::NAN)).is_err());
        let mut empty = outcome(Some(Regime::RiskOn), 1.0);
        empty.entry_components.clear();
        assert!(l.observe_trade(&empty).is_err());

        assert_eq!(l.table(), &before);
    }

    #[test]
    fn test_from_table_reclamps_and_resets_invalid_state() {
        let mut table = WeightTable::default();
        let mut m = BTreeMap::new();
        m.insert(
            ComponentId::DarkPool,
            WeightState {
                base_weight: 99.0,
                distribution: Distribution::Beta { alpha: 5.0, beta: 2.0 },
                multiplier: 7.0,
                sample_count: 5,
            },
        );
        m.insert(
            ComponentId::VolSkew,
            WeightState {
                base_weight: 1.0,
                distribution: Distribution::Beta { alpha: f64::NAN, beta: 2.0 },
                multiplier: 1.3,
                sample_count: 5,
            },
        );
        table.regimes.insert(Regime::Neutral, m);

        let l = WeightLearner::from_table(LearnerConfig::default(), BaseWeights::default(), table);
        let dp = l.state(ComponentId::DarkPool, Regime::Neutral).unwrap();
        assert_eq!(dp.multiplier, 2.5);
        assert_eq!(dp.base_weight, BaseWeights::default().dark_pool);
        let vs = l.state(ComponentId::VolSkew, Regime::Neutral).unwrap();
        assert_eq!(vs.multiplier, 1.0);
        assert_eq!(vs.sample_count, 0);
    }

    #[test]
    fn test_weight_table_json_round_trip() {
        let mut l = learner();
        l.observe(ComponentId::GammaRegime, Regime::RiskOn, true, 0.4).unwrap();
        let json = serde_json::to_string(l.table()).unwrap();
        let back: WeightTable = serde_json::from_str(&json).unwrap();
        assert_eq!(&back, l.table());
    }
}
