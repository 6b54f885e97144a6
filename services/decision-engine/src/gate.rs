//! Entry gate: ELIGIBLE / BLOCKED.
//!
//! Base rule: `|score| >= threshold`, `toxicity < ceiling`, `freshness >= floor`.
//! Eligible candidates then pass the secondary gates in fixed order, strongest
//! first with ties broken by symbol:
//! 1. per-cycle new position cap
//! 2. per-symbol cooldown
//! 3. existing open position
//! 4. max open positions
//! 5. gross exposure cap

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::config::GateConfig;
use crate::enrich::EnrichedSignal;
use crate::scoring::CompositeScore;
use crate::types::Side;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BlockReason {
    BelowThreshold { strength: f64, threshold: f64 },
    Toxic { toxicity: f64, ceiling: f64 },
    Stale { freshness: f64, floor: f64 },
    NoDirection,
    CycleCap { cap: usize },
    Cooldown { remaining_secs: i64 },
    ExistingPosition,
    MaxOpenPositions { max: usize },
    ExposureCap { projected_pct: f64, max_pct: f64 },
    NoReferencePrice,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    Eligible,
    Blocked(BlockReason),
}

impl GateDecision {
    pub fn is_eligible(&self) -> bool {
        matches!(self, GateDecision::Eligible)
    }
}

/// A scored symbol presented to the secondary gates
#[derive(Debug, Clone)]
pub struct EntryCandidate {
    pub symbol: String,
    pub side: Side,
    pub strength: f64,
    pub reference_price: Option<f64>,
}

/// Portfolio facts the secondary gates need
#[derive(Debug, Clone, Default)]
pub struct PortfolioView {
    pub open_symbols: BTreeSet<String>,
    /// Sum of |qty x mark| across open positions
    pub gross_exposure: f64,
    pub equity: f64,
}

/// Approved entry with its planned notional
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedEntry {
    pub symbol: String,
    pub side: Side,
    pub notional: f64,
    pub reference_price: f64,
}

#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub entries: Vec<PlannedEntry>,
    /// Eligible candidates stopped by a secondary gate, in evaluation order
    pub blocked: Vec<(String, BlockReason)>,
}

pub struct EntryGate {
    config: GateConfig,
    /// Last entry or exit per symbol, for the cooldown gate
    last_activity: HashMap<String, DateTime<Utc>>,
}

impl EntryGate {
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            last_activity: HashMap::new(),
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Base rule. Pure: same inputs always give the same decision.
    pub fn evaluate(&self, score: &CompositeScore, signal: &EnrichedSignal, threshold: f64) -> GateDecision {
        let strength = score.strength();
        if !(strength >= threshold) {
            return GateDecision::Blocked(BlockReason::BelowThreshold { strength, threshold });
        }
        if !(signal.toxicity < self.config.toxicity_ceiling) {
            return GateDecision::Blocked(BlockReason::Toxic {
                toxicity: signal.toxicity,
                ceiling: self.config.toxicity_ceiling,
            });
        }
        if !(signal.freshness >= self.config.freshness_floor) {
            return GateDecision::Blocked(BlockReason::Stale {
                freshness: signal.freshness,
                floor: self.config.freshness_floor,
            });
        }
        if score.direction().is_none() {
            return GateDecision::Blocked(BlockReason::NoDirection);
        }
        GateDecision::Eligible
    }

    pub fn record_activity(&mut self, symbol: &str, at: DateTime<Utc>) {
        self.last_activity.insert(symbol.to_string(), at);
    }

    pub fn cooldown_remaining(&self, symbol: &str, now: DateTime<Utc>) -> Option<Duration> {
        let last = self.last_activity.get(symbol)?;
        let until = *last + Duration::seconds(self.config.symbol_cooldown_secs);
        if now < until {
            Some(until - now)
        } else {
            None
        }
    }

    /// Apply the secondary gates to base-eligible candidates
    pub fn select_entries(
        &self,
        mut candidates: Vec<EntryCandidate>,
        portfolio: &PortfolioView,
        now: DateTime<Utc>,
    ) -> Selection {
        candidates.sort_by(|a, b| {
            b.strength
                .total_cmp(&a.strength)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });

        let cfg = &self.config;
        let mut selection = Selection::default();
        let mut open_count = portfolio.open_symbols.len();
        let mut gross = portfolio.gross_exposure;
        let notional = portfolio.equity * cfg.position_size_pct / 100.0;

        for candidate in candidates {
            let blocked = if selection.entries.len() >= cfg.max_new_per_cycle {
                Some(BlockReason::CycleCap {
                    cap: cfg.max_new_per_cycle,
                })
            } else if let Some(remaining) = self.cooldown_remaining(&candidate.symbol, now) {
                Some(BlockReason::Cooldown {
                    remaining_secs: remaining.num_seconds(),
                })
            } else if portfolio.open_symbols.contains(&candidate.symbol) {
                Some(BlockReason::ExistingPosition)
            } else if open_count >= cfg.max_open_positions {
                Some(BlockReason::MaxOpenPositions {
                    max: cfg.max_open_positions,
                })
            } else {
                let projected_pct = if portfolio.equity > 0.0 {
                    (gross + notional) / portfolio.equity * 100.0
                } else {
                    f64::INFINITY
                };
                if !(projected_pct <= cfg.max_gross_exposure_pct) {
                    Some(BlockReason::ExposureCap {
                        projected_pct,
                        max_pct: cfg.max_gross_exposure_pct,
                    })
                } else if candidate.reference_price.map(|p| p > 0.0).unwrap_or(false) {
                    None
                } else {
                    Some(BlockReason::NoReferencePrice)
                }
            };

            match (blocked, candidate.reference_price) {
                (Some(reason), _) => {
                    debug!(symbol = %candidate.symbol, "Entry blocked: {:?}", reason);
                    selection.blocked.push((candidate.symbol, reason));
                }
                (None, Some(price)) => {
                    open_count += 1;
                    gross += notional;
                    selection.entries.push(PlannedEntry {
                        symbol: candidate.symbol,
                        side: candidate.side,
                        notional,
                        reference_price: price,
                    });
                }
                (None, None) => {
                    selection.blocked.push((candidate.symbol, BlockReason::NoReferencePrice));
                }
            }
        }
        selection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnrichConfig, ScoringConfig};
    use crate::enrich::enrich;
    use crate::scoring::CompositeScorer;
    use crate::types::Regime;
    use signal_feed::SignalSnapshot;
    use std::collections::BTreeMap;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T15:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn score_of(value: f64) -> CompositeScore {
        CompositeScore {
            symbol: "AAPL".to_string(),
            score: value,
            raw_sum: value,
            freshness: 1.0,
            convergence_bonus: 0.0,
            breakdown: BTreeMap::new(),
            regime: Regime::Neutral,
            timestamp: now(),
        }
    }

    fn signal() -> EnrichedSignal {
        enrich(&SignalSnapshot::empty("AAPL", now()), now(), &EnrichConfig::default())
    }

    fn candidate(symbol: &str, strength: f64) -> EntryCandidate {
        EntryCandidate {
            symbol: symbol.to_string(),
            side: Side::Long,
            strength,
            reference_price: Some(100.0),
        }
    }

    fn view(equity: f64) -> PortfolioView {
        PortfolioView {
            open_symbols: BTreeSet::new(),
            gross_exposure: 0.0,
            equity,
        }
    }

    #[test]
    fn test_base_rule() {
        let gate = EntryGate::new(GateConfig::default());
        assert_eq!(gate.evaluate(&score_of(3.5), &signal(), 3.0), GateDecision::Eligible);
        assert_eq!(gate.evaluate(&score_of(-3.5), &signal(), 3.0), GateDecision::Eligible);
        assert!(matches!(
            gate.evaluate(&score_of(2.9), &signal(), 3.0),
            GateDecision::Blocked(BlockReason::BelowThreshold { .. })
        ));

        let mut toxic = signal();
        toxic.toxicity = 0.7;
        assert!(matches!(
            gate.evaluate(&score_of(5.0), &toxic, 3.0),
            GateDecision::Blocked(BlockReason::Toxic { .. })
        ));

        let mut stale = signal();
        stale.freshness = 0.35;
        assert!(matches!(
            gate.evaluate(&score_of(5.0), &stale, 3.0),
            GateDecision::Blocked(BlockReason::Stale { .. })
        ));
    }

    #[test]
    fn test_evaluate_is_idempotent() {
        let gate = EntryGate::new(GateConfig::default());
        let scorer = CompositeScorer::new(ScoringConfig::default());
        let mut snap = SignalSnapshot::empty("MSFT", now());
        snap.fields.call_premium = Some(8_000_000.0);
        snap.fields.bullish_ratio = Some(0.85);
        let e = enrich(&snap, now(), &EnrichConfig::default());
        let s = scorer.score(&e, Regime::RiskOn, &crate::config::BaseWeights::default(), now());
        let first = gate.evaluate(&s, &e, 3.0);
        for _ in 0..5 {
            assert_eq!(gate.evaluate(&s, &e, 3.0), first);
        }
    }

    #[test]
    fn test_cycle_cap_takes_strongest_with_symbol_tie_break() {
        let gate = EntryGate::new(GateConfig::default());
        let selection = gate.select_entries(
            vec![
                candidate("MSFT", 4.0),
                candidate("AAPL", 6.0),
                candidate("AMZN", 4.0),
            ],
            &view(100_000.0),
            now(),
        );
        let chosen: Vec<&str> = selection.entries.iter().map(|e| e.symbol.as_str()).collect();
        assert_eq!(chosen, vec!["AAPL", "AMZN"]);
        assert_eq!(
            selection.blocked,
            vec![("MSFT".to_string(), BlockReason::CycleCap { cap: 2 })]
        );
        assert_eq!(selection.entries[0].notional, 10_000.0);
    }

    #[test]
    fn test_cooldown_and_existing_position() {
        let mut gate = EntryGate::new(GateConfig::default());
        gate.record_activity("AAPL", now() - Duration::minutes(10));
        let mut portfolio = view(100_000.0);
        portfolio.open_symbols.insert("MSFT".to_string());

        let selection = gate.select_entries(
            vec![candidate("AAPL", 5.0), candidate("MSFT", 4.0)],
            &portfolio,
            now(),
        );
        assert!(selection.entries.is_empty());
        assert!(matches!(selection.blocked[0].1, BlockReason::Cooldown { remaining_secs: 1200 }));
        assert_eq!(selection.blocked[1].1, BlockReason::ExistingPosition);

        assert!(gate.cooldown_remaining("AAPL", now() + Duration::minutes(20)).is_none());
    }

    #[test]
    fn test_max_open_positions_and_exposure() {
        let gate = EntryGate::new(GateConfig::default());
        let mut portfolio = view(100_000.0);
        for s in ["A", "B", "C", "D", "E"] {
            portfolio.open_symbols.insert(s.to_string());
        }
        let selection = gate.select_entries(vec![candidate("NVDA", 5.0)], &portfolio, now());
        assert_eq!(selection.blocked[0].1, BlockReason::MaxOpenPositions { max: 5 });

        let mut portfolio = view(100_000.0);
        portfolio.gross_exposure = 55_000.0;
        let selection = gate.select_entries(vec![candidate("NVDA", 5.0)], &portfolio, now());
        assert!(matches!(selection.blocked[0].1, BlockReason::ExposureCap { .. }));
    }

    #[test]
    fn test_missing_price_blocks_entry() {
        let gate = EntryGate::new(GateConfig::default());
        let mut c = candidate("TSLA", 5.0);
        c.reference_price = None;
        let selection = gate.select_entries(vec![c], &view(100_000.0), now());
        assert!(selection.entries.is_empty());
        assert_eq!(selection.blocked[0].1, BlockReason::NoReferencePrice);
    }
}
