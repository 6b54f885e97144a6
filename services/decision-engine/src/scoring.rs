//! Composite multi-factor scorer.
//!
//! Each component maps through a bounded transform into [-1, 1], is weighted
//! by `base_weight x learned_multiplier(component, regime)`, summed, scaled by
//! freshness, given an optional convergence bonus and finally clamped to
//! [`SCORE_MIN`, `SCORE_MAX`]. The raw sum may exceed the nominal per-component
//! ceiling when multipliers stack; the clamp is the authoritative bound.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{BaseWeights, ScoringConfig};
use crate::enrich::EnrichedSignal;
use crate::types::{ComponentId, Regime, Side, SCORE_MAX, SCORE_MIN};

/// Effective weight parts for one component in one regime
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComponentWeight {
    pub base: f64,
    pub multiplier: f64,
}

impl ComponentWeight {
    pub fn effective(&self) -> f64 {
        self.base * self.multiplier
    }
}

/// Read-only weight lookup used by the scorer
pub trait WeightSource {
    fn weight(&self, component: ComponentId, regime: Regime) -> ComponentWeight;
}

/// Base weights with every multiplier at 1.0
impl WeightSource for BaseWeights {
    fn weight(&self, component: ComponentId, _regime: Regime) -> ComponentWeight {
        ComponentWeight {
            base: self.get(component),
            multiplier: 1.0,
        }
    }
}

/// One component's share of a score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    /// Transform output in [-1, 1]
    pub transform: f64,
    pub base_weight: f64,
    pub multiplier: f64,
    /// transform x base_weight x multiplier, before freshness
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeScore {
    pub symbol: String,
    /// Clamped, signed score
    pub score: f64,
    /// Sum of contributions before freshness, bonus and clamp
    pub raw_sum: f64,
    pub freshness: f64,
    pub convergence_bonus: f64,
    pub breakdown: BTreeMap<ComponentId, Contribution>,
    pub regime: Regime,
    pub timestamp: DateTime<Utc>,
}

impl CompositeScore {
    pub fn direction(&self) -> Option<Side> {
        Side::from_score(self.score)
    }

    /// Gate strength
    pub fn strength(&self) -> f64 {
        self.score.abs()
    }

    pub fn contributed_nonzero(&self, component: ComponentId) -> bool {
        self.breakdown
            .get(&component)
            .map(|c| c.value != 0.0)
            .unwrap_or(false)
    }

    /// Contribution values keyed by component, as stored with a position
    pub fn component_snapshot(&self) -> BTreeMap<ComponentId, f64> {
        self.breakdown.iter().map(|(k, c)| (*k, c.value)).collect()
    }

    /// Mean transform of the flow components, in [-1, 1]
    pub fn flow_bias(&self) -> f64 {
        let flows: Vec<f64> = self
            .breakdown
            .iter()
            .filter(|(k, _)| k.is_flow())
            .map(|(_, c)| c.transform)
            .collect();
        if flows.is_empty() {
            0.0
        } else {
            flows.iter().sum::<f64>() / flows.len() as f64
        }
    }
}

/// Distance from a neutral value, squashed into (-1, 1)
pub fn ratio_to_neutral(value: f64, neutral: f64, scale: f64) -> f64 {
    if !value.is_finite() || scale <= 0.0 {
        return 0.0;
    }
    ((value - neutral) / scale).tanh()
}

/// Signed log-magnitude: ~0.6 at the reference notional, saturating towards 1
pub fn log_magnitude(value: f64, reference: f64) -> f64 {
    if !value.is_finite() || value == 0.0 || reference <= 0.0 {
        return 0.0;
    }
    value.signum() * (1.0 + value.abs() / reference).ln().tanh()
}

/// Two-band step: +-0.5 beyond `mild`, +-1.0 beyond `strong`
pub fn banded(value: f64, mild: f64, strong: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let mag = value.abs();
    let step = if mag >= strong {
        1.0
    } else if mag >= mild {
        0.5
    } else {
        0.0
    };
    value.signum() * step
}

/// Pure, deterministic scorer
#[derive(Debug, Clone)]
pub struct CompositeScorer {
    config: ScoringConfig,
}

impl CompositeScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Transform output for one component, in [-1, 1]
    pub fn transform(&self, component: ComponentId, s: &EnrichedSignal) -> f64 {
        let c = &self.config;
        let t = match component {
            ComponentId::Sentiment => ratio_to_neutral(s.bullish_ratio, 0.5, 0.25),
            ComponentId::Conviction => {
                // Conviction only amplifies an existing lean
                let lean = ratio_to_neutral(s.bullish_ratio, 0.5, 0.25).signum();
                let lean = if s.bullish_ratio == 0.5 { 0.0 } else { lean };
                lean * ratio_to_neutral(s.conviction, 0.5, 0.25).max(0.0)
            }
            ComponentId::PutCallRatio => {
                if s.put_call_ratio > 0.0 {
                    // Below 1.0 is call-heavy (bullish)
                    -ratio_to_neutral(s.put_call_ratio.ln(), 0.0, 0.5)
                } else {
                    0.0
                }
            }
            ComponentId::NetPremium => log_magnitude(s.net_premium, c.premium_reference),
            ComponentId::SweepFlow => log_magnitude(s.sweep_net, c.sweep_reference),
            ComponentId::DarkPool => {
                // Unsigned volume, directed by the prevailing flow
                s.flow_direction() * log_magnitude(s.dark_pool_notional, c.dark_pool_reference)
            }
            ComponentId::VolSkew => -banded(s.vol_skew, c.skew_mild, c.skew_strong),
            ComponentId::Motif => s.motifs.direction(),
            ComponentId::GammaRegime => {
                let momentum_dir = if s.momentum_pct > 0.0 {
                    1.0
                } else if s.momentum_pct < 0.0 {
                    -1.0
                } else {
                    0.0
                };
                // Short gamma amplifies the move, long gamma leans against it
                let band = banded(s.dealer_gamma, c.gamma_band, c.gamma_strong);
                -band * momentum_dir
            }
        };
        if t.is_finite() {
            t.clamp(-1.0, 1.0)
        } else {
            0.0
        }
    }

    pub fn score(
        &self,
        signal: &EnrichedSignal,
        regime: Regime,
        weights: &dyn WeightSource,
        timestamp: DateTime<Utc>,
    ) -> CompositeScore {
        let mut breakdown = BTreeMap::new();
        let mut raw_sum = 0.0;

        for component in ComponentId::ALL {
            let transform = self.transform(component, signal);
            let w = weights.weight(component, regime);
            let mut value = transform * w.effective();
            if !value.is_finite() {
                value = 0.0;
            }
            raw_sum += value;
            breakdown.insert(
                component,
                Contribution {
                    transform,
                    base_weight: w.base,
                    multiplier: w.multiplier,
                    value,
                },
            );
        }

        let freshness = if signal.freshness.is_finite() {
            signal.freshness.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let nonzero: Vec<f64> = breakdown
            .values()
            .map(|c| c.value)
            .filter(|v| *v != 0.0)
            .collect();
        let convergence_bonus = if nonzero.len() >= self.config.convergence_min_components
            && (nonzero.iter().all(|v| *v > 0.0) || nonzero.iter().all(|v| *v < 0.0))
        {
            nonzero[0].signum() * self.config.convergence_bonus
        } else {
            0.0
        };

        let mut score = raw_sum * freshness + convergence_bonus;
        if !score.is_finite() {
            score = 0.0;
        }
        let score = score.clamp(SCORE_MIN, SCORE_MAX);

        CompositeScore {
            symbol: signal.symbol.clone(),
            score,
            raw_sum,
            freshness,
            convergence_bonus,
            breakdown,
            regime,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnrichConfig;
    use crate::enrich::enrich;
    use signal_feed::{Sentiment, SignalSnapshot};

    struct Stacked(f64);

    impl WeightSource for Stacked {
        fn weight(&self, component: ComponentId, _regime: Regime) -> ComponentWeight {
            ComponentWeight {
                base: BaseWeights::default().get(component),
                multiplier: self.0,
            }
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T15:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn bullish_snapshot() -> SignalSnapshot {
        let mut snap = SignalSnapshot::empty("NVDA", now());
        snap.fields.sentiment = Some(Sentiment::Bullish);
        snap.fields.bullish_ratio = Some(0.9);
        snap.fields.conviction = Some(0.95);
        snap.fields.put_call_ratio = Some(0.4);
        snap.fields.call_premium = Some(9_000_000.0);
        snap.fields.put_premium = Some(500_000.0);
        snap.fields.bullish_sweep_notional = Some(4_000_000.0);
        snap.fields.dark_pool_notional = Some(40_000_000.0);
        snap.fields.put_iv = Some(0.30);
        snap.fields.call_iv = Some(0.45);
        snap
    }

    #[test]
    fn test_transforms_are_bounded() {
        for v in [-1e12, -5e6, -1.0, 0.0, 1.0, 5e6, 1e12, f64::NAN] {
            let t = log_magnitude(v, 1e6);
            assert!((-1.0..=1.0).contains(&t));
            let r = ratio_to_neutral(v, 0.5, 0.25);
            assert!((-1.0..=1.0).contains(&r));
            let b = banded(v, 0.05, 0.1);
            assert!((-1.0..=1.0).contains(&b));
        }
    }

    #[test]
    fn test_empty_vector_scores_zero() {
        let scorer = CompositeScorer::new(ScoringConfig::default());
        let e = enrich(&SignalSnapshot::empty("SPY", now()), now(), &EnrichConfig::default());
        let s = scorer.score(&e, Regime::Neutral, &BaseWeights::default(), now());
        assert!(s.score.is_finite());
        assert_eq!(s.score, 0.0);
        assert_eq!(s.direction(), None);
        assert_eq!(s.breakdown.len(), ComponentId::ALL.len());
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let scorer = CompositeScorer::new(ScoringConfig::default());
        let e = enrich(&bullish_snapshot(), now(), &EnrichConfig::default());
        let a = scorer.score(&e, Regime::RiskOn, &BaseWeights::default(), now());
        let b = scorer.score(&e, Regime::RiskOn, &BaseWeights::default(), now());
        assert_eq!(a, b);
        assert!(a.score > 0.0);
        assert_eq!(a.direction(), Some(Side::Long));
    }

    #[test]
    fn test_convergence_bonus_applies_to_aligned_components() {
        let scorer = CompositeScorer::new(ScoringConfig::default());
        let e = enrich(&bullish_snapshot(), now(), &EnrichConfig::default());
        let s = scorer.score(&e, Regime::RiskOn, &BaseWeights::default(), now());
        assert_eq!(s.convergence_bonus, 1.0);
    }

    #[test]
    fn test_stacked_multipliers_clamp_to_score_max() {
        let scorer = CompositeScorer::new(ScoringConfig::default());
        let e = enrich(&bullish_snapshot(), now(), &EnrichConfig::default());
        let s = scorer.score(&e, Regime::RiskOn, &Stacked(2.5), now());
        // Raw sum legitimately exceeds the bound; the clamp holds
        assert!(s.raw_sum > SCORE_MAX);
        assert_eq!(s.score, SCORE_MAX);
    }

    #[test]
    fn test_stale_snapshot_is_scaled_by_freshness_floor() {
        let scorer = CompositeScorer::new(ScoringConfig::default());
        let cfg = EnrichConfig::default();
        let fresh = enrich(&bullish_snapshot(), now(), &cfg);
        let stale = enrich(&bullish_snapshot(), now() + chrono::Duration::hours(6), &cfg);
        let a = scorer.score(&fresh, Regime::RiskOn, &BaseWeights::default(), now());
        let b = scorer.score(&stale, Regime::RiskOn, &BaseWeights::default(), now());
        assert!(b.score < a.score);
        assert!(b.score > 0.0);
        assert_eq!(b.freshness, cfg.freshness_floor);
    }

    #[test]
    fn test_put_heavy_flow_scores_bearish() {
        let scorer = CompositeScorer::new(ScoringConfig::default());
        let mut snap = SignalSnapshot::empty("QQQ", now());
        snap.fields.put_call_ratio = Some(2.5);
        snap.fields.put_premium = Some(6_000_000.0);
        snap.fields.bearish_sweep_notional = Some(2_000_000.0);
        let e = enrich(&snap, now(), &EnrichConfig::default());
        let s = scorer.score(&e, Regime::RiskOff, &BaseWeights::default(), now());
        assert!(s.score < 0.0);
        assert!(s.flow_bias() < 0.0);
        assert!(s.contributed_nonzero(ComponentId::NetPremium));
        assert!(!s.contributed_nonzero(ComponentId::Motif));
    }
}
