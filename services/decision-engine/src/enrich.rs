//! Enricher: raw (possibly partial) snapshot to a complete signal vector.
//!
//! Total over any subset of raw fields. Missing or non-finite values resolve to
//! the neutral defaults in [`defaults`] and are listed in
//! [`EnrichedSignal::defaulted`]; nothing here can fail.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use signal_feed::{FlowPrint, PrintSide, RawSignal, Sentiment, SignalSnapshot};

use crate::config::EnrichConfig;

/// Neutral values substituted for absent fields
pub mod defaults {
    pub const BULLISH_RATIO: f64 = 0.5;
    pub const CONVICTION: f64 = 0.5;
    pub const PUT_CALL_RATIO: f64 = 1.0;
    pub const NOTIONAL: f64 = 0.0;
    pub const SKEW: f64 = 0.0;
    pub const DEALER_GAMMA: f64 = 0.0;
    pub const MOMENTUM_PCT: f64 = 0.0;

    /// Bullish ratio implied by a headline sentiment when no ratio was sent
    pub const BULLISH_SENTIMENT_RATIO: f64 = 0.7;
    pub const BEARISH_SENTIMENT_RATIO: f64 = 0.3;
}

/// Temporal patterns detected in the recent print window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MotifFlags {
    /// Consecutive same-side prints with strictly increasing size
    pub staircase: Option<PrintSide>,
    /// Dense cluster of prints; side is the net notional direction
    pub burst: Option<PrintSide>,
}

impl MotifFlags {
    /// Net direction in [-1, 1]: each directional motif counts half
    pub fn direction(&self) -> f64 {
        let s = self.staircase.map(|p| p.sign()).unwrap_or(0.0);
        let b = self.burst.map(|p| p.sign()).unwrap_or(0.0);
        0.5 * s + 0.5 * b
    }
}

/// Fully-populated signal vector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedSignal {
    pub symbol: String,
    pub captured_at: DateTime<Utc>,
    pub age_secs: f64,
    pub sentiment: Sentiment,
    pub bullish_ratio: f64,
    pub conviction: f64,
    pub put_call_ratio: f64,
    /// Call minus put premium
    pub net_premium: f64,
    /// Bullish minus bearish sweep notional
    pub sweep_net: f64,
    pub dark_pool_notional: f64,
    /// Put IV minus call IV; positive means downside protection is bid
    pub vol_skew: f64,
    pub dealer_gamma: f64,
    pub momentum_pct: f64,
    pub last_price: Option<f64>,
    pub motifs: MotifFlags,
    /// Staleness/crowding penalty in [0, 1]
    pub toxicity: f64,
    /// Age decay factor in [floor, 1]
    pub freshness: f64,
    /// Fields that fell back to a neutral default
    pub defaulted: Vec<&'static str>,
}

impl EnrichedSignal {
    /// Direction of the flow bias: sign of (net premium + sweep net), falling back to sentiment
    pub fn flow_direction(&self) -> f64 {
        let flow = self.net_premium + self.sweep_net;
        if flow > 0.0 {
            1.0
        } else if flow < 0.0 {
            -1.0
        } else if self.bullish_ratio > defaults::BULLISH_RATIO {
            1.0
        } else if self.bullish_ratio < defaults::BULLISH_RATIO {
            -1.0
        } else {
            0.0
        }
    }
}

fn finite(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite())
}

/// Fields resolved against the neutral defaults
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFields {
    pub sentiment: Sentiment,
    pub bullish_ratio: f64,
    pub conviction: f64,
    pub put_call_ratio: f64,
    pub call_premium: f64,
    pub put_premium: f64,
    pub bullish_sweep_notional: f64,
    pub bearish_sweep_notional: f64,
    pub dark_pool_notional: f64,
    pub vol_skew: f64,
    pub dealer_gamma: f64,
    pub momentum_pct: f64,
    pub last_price: Option<f64>,
    pub defaulted: Vec<&'static str>,
}

/// Resolve every raw field to a concrete value.
///
/// - sentiment: taken as sent; else derived from bullish ratio (>0.55 bullish,
///   <0.45 bearish); else Neutral
/// - bullish ratio: taken as sent (clamped to [0, 1]); else implied by sentiment
///   (0.7 / 0.3); else 0.5
/// - conviction 0.5, put/call ratio 1.0 (non-positive treated as absent)
/// - premiums, sweeps and dark pool notional 0
/// - skew = put IV - call IV only when both are present, else 0
/// - dealer gamma 0, momentum 0, last price absent (non-positive treated as absent)
pub fn resolve_defaults(raw: &RawSignal) -> ResolvedFields {
    let mut defaulted = Vec::new();

    let ratio_sent = finite(raw.bullish_ratio).map(|r| r.clamp(0.0, 1.0));
    let sentiment = match (raw.sentiment, ratio_sent) {
        (Some(s), _) => s,
        (None, Some(r)) if r > 0.55 => Sentiment::Bullish,
        (None, Some(r)) if r < 0.45 => Sentiment::Bearish,
        (None, Some(_)) => Sentiment::Neutral,
        (None, None) => {
            defaulted.push("sentiment");
            Sentiment::Neutral
        }
    };
    let bullish_ratio = match ratio_sent {
        Some(r) => r,
        None => {
            defaulted.push("bullish_ratio");
            match raw.sentiment {
                Some(Sentiment::Bullish) => defaults::BULLISH_SENTIMENT_RATIO,
                Some(Sentiment::Bearish) => defaults::BEARISH_SENTIMENT_RATIO,
                _ => defaults::BULLISH_RATIO,
            }
        }
    };

    let mut take = |name: &'static str, v: Option<f64>, default: f64| match v {
        Some(x) => x,
        None => {
            defaulted.push(name);
            default
        }
    };

    let conviction = take(
        "conviction",
        finite(raw.conviction).map(|c| c.clamp(0.0, 1.0)),
        defaults::CONVICTION,
    );
    let put_call_ratio = take(
        "put_call_ratio",
        finite(raw.put_call_ratio).filter(|p| *p > 0.0),
        defaults::PUT_CALL_RATIO,
    );
    let call_premium = take("call_premium", finite(raw.call_premium).map(f64::abs), defaults::NOTIONAL);
    let put_premium = take("put_premium", finite(raw.put_premium).map(f64::abs), defaults::NOTIONAL);
    let bullish_sweep_notional = take(
        "bullish_sweep_notional",
        finite(raw.bullish_sweep_notional).map(f64::abs),
        defaults::NOTIONAL,
    );
    let bearish_sweep_notional = take(
        "bearish_sweep_notional",
        finite(raw.bearish_sweep_notional).map(f64::abs),
        defaults::NOTIONAL,
    );
    let dark_pool_notional = take(
        "dark_pool_notional",
        finite(raw.dark_pool_notional).map(f64::abs),
        defaults::NOTIONAL,
    );
    let vol_skew = take(
        "vol_skew",
        match (finite(raw.put_iv), finite(raw.call_iv)) {
            (Some(p), Some(c)) => Some(p - c),
            _ => None,
        },
        defaults::SKEW,
    );
    let dealer_gamma = take("dealer_gamma", finite(raw.dealer_gamma), defaults::DEALER_GAMMA);
    let momentum_pct = take("momentum_pct", finite(raw.momentum_pct), defaults::MOMENTUM_PCT);

    let last_price = finite(raw.last_price).filter(|p| *p > 0.0);
    if last_price.is_none() {
        defaulted.push("last_price");
    }

    ResolvedFields {
        sentiment,
        bullish_ratio,
        conviction,
        put_call_ratio,
        call_premium,
        put_premium,
        bullish_sweep_notional,
        bearish_sweep_notional,
        dark_pool_notional,
        vol_skew,
        dealer_gamma,
        momentum_pct,
        last_price,
        defaulted,
    }
}

/// Freshness decay: half-life exponential, floor-clamped
pub fn freshness(age_secs: f64, config: &EnrichConfig) -> f64 {
    let age = if age_secs.is_finite() { age_secs.max(0.0) } else { f64::MAX };
    let decayed = 0.5_f64.powf(age / config.freshness_half_life_secs);
    decayed.max(config.freshness_floor).min(1.0)
}

/// Valid prints inside the window ending at `until`, oldest first
fn window_prints(prints: &[FlowPrint], until: DateTime<Utc>, window_secs: i64) -> Vec<FlowPrint> {
    let from = until - Duration::seconds(window_secs);
    let mut out: Vec<FlowPrint> = prints
        .iter()
        .filter(|p| p.notional.is_finite() && p.notional > 0.0)
        .filter(|p| p.timestamp >= from && p.timestamp <= until)
        .cloned()
        .collect();
    out.sort_by_key(|p| p.timestamp);
    out
}

fn detect_staircase(prints: &[FlowPrint], min_prints: usize) -> Option<PrintSide> {
    if min_prints == 0 || prints.is_empty() {
        return None;
    }
    let mut found = None;
    let mut run = 1usize;
    for pair in prints.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        if cur.side == prev.side && cur.notional > prev.notional {
            run += 1;
        } else {
            run = 1;
        }
        if run >= min_prints {
            // Latest qualifying run wins
            found = Some(cur.side);
        }
    }
    found
}

fn detect_burst(prints: &[FlowPrint], min_prints: usize, span_secs: i64) -> Option<PrintSide> {
    if min_prints == 0 || prints.len() < min_prints {
        return None;
    }
    let span = Duration::seconds(span_secs);
    let mut best: Option<(usize, f64)> = None;
    for (i, start) in prints.iter().enumerate() {
        let cluster: Vec<&FlowPrint> = prints[i..]
            .iter()
            .take_while(|p| p.timestamp - start.timestamp <= span)
            .collect();
        if cluster.len() >= min_prints {
            let net: f64 = cluster.iter().map(|p| p.side.sign() * p.notional).sum();
            if best.map(|(n, _)| cluster.len() > n).unwrap_or(true) {
                best = Some((cluster.len(), net));
            }
        }
    }
    best.and_then(|(_, net)| {
        if net > 0.0 {
            Some(PrintSide::Bullish)
        } else if net < 0.0 {
            Some(PrintSide::Bearish)
        } else {
            None
        }
    })
}

/// Largest print's share of window notional, 0 when too few prints
fn crowding(prints: &[FlowPrint], min_prints: usize) -> f64 {
    if prints.len() < min_prints.max(1) {
        return 0.0;
    }
    let total: f64 = prints.iter().map(|p| p.notional).sum();
    if total <= 0.0 {
        return 0.0;
    }
    let largest = prints.iter().map(|p| p.notional).fold(0.0_f64, f64::max);
    (largest / total).clamp(0.0, 1.0)
}

/// Enrich a snapshot observed at `now`
pub fn enrich(snapshot: &SignalSnapshot, now: DateTime<Utc>, config: &EnrichConfig) -> EnrichedSignal {
    let resolved = resolve_defaults(&snapshot.fields);

    let age_secs = ((now - snapshot.captured_at).num_milliseconds() as f64 / 1000.0).max(0.0);

    let prints = snapshot
        .fields
        .prints
        .as_deref()
        .map(|p| window_prints(p, snapshot.captured_at, config.motif_window_secs))
        .unwrap_or_default();

    let motifs = MotifFlags {
        staircase: detect_staircase(&prints, config.staircase_min_prints),
        burst: detect_burst(&prints, config.burst_min_prints, config.burst_span_secs),
    };

    let staleness = if config.staleness_horizon_secs > 0.0 {
        (age_secs / config.staleness_horizon_secs).min(1.0)
    } else {
        1.0
    };
    let toxicity = (config.staleness_weight * staleness
        + config.crowding_weight * crowding(&prints, config.crowding_min_prints))
    .clamp(0.0, 1.0);

    let mut defaulted = resolved.defaulted;
    if snapshot.fields.prints.is_none() {
        defaulted.push("prints");
    }

    EnrichedSignal {
        symbol: snapshot.symbol.clone(),
        captured_at: snapshot.captured_at,
        age_secs,
        sentiment: resolved.sentiment,
        bullish_ratio: resolved.bullish_ratio,
        conviction: resolved.conviction,
        put_call_ratio: resolved.put_call_ratio,
        net_premium: resolved.call_premium - resolved.put_premium,
        sweep_net: resolved.bullish_sweep_notional - resolved.bearish_sweep_notional,
        dark_pool_notional: resolved.dark_pool_notional,
        vol_skew: resolved.vol_skew,
        dealer_gamma: resolved.dealer_gamma,
        momentum_pct: resolved.momentum_pct,
        last_price: resolved.last_price,
        motifs,
        toxicity,
        freshness: freshness(age_secs, config),
        defaulted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T15:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn print(offset_secs: i64, side: PrintSide, notional: f64) -> FlowPrint {
        FlowPrint {
            timestamp: t0() + Duration::seconds(offset_secs),
            side,
            notional,
        }
    }

    #[test]
    fn test_empty_snapshot_resolves_to_neutral_defaults() {
        let snap = SignalSnapshot::empty("AAPL", t0());
        let e = enrich(&snap, t0(), &EnrichConfig::default());

        assert_eq!(e.sentiment, Sentiment::Neutral);
        assert_eq!(e.bullish_ratio, defaults::BULLISH_RATIO);
        assert_eq!(e.conviction, defaults::CONVICTION);
        assert_eq!(e.put_call_ratio, defaults::PUT_CALL_RATIO);
        assert_eq!(e.net_premium, 0.0);
        assert_eq!(e.sweep_net, 0.0);
        assert_eq!(e.vol_skew, 0.0);
        assert_eq!(e.momentum_pct, 0.0);
        assert!(e.last_price.is_none());
        assert_eq!(e.motifs, MotifFlags::default());
        assert_eq!(e.toxicity, 0.0);
        assert_eq!(e.freshness, 1.0);
        assert!(e.defaulted.contains(&"sentiment"));
        assert!(e.defaulted.contains(&"prints"));
    }

    #[test]
    fn test_non_finite_fields_fall_back_to_defaults() {
        let mut snap = SignalSnapshot::empty("AAPL", t0());
        snap.fields.conviction = Some(f64::NAN);
        snap.fields.put_call_ratio = Some(-2.0);
        snap.fields.call_premium = Some(f64::INFINITY);
        let e = enrich(&snap, t0(), &EnrichConfig::default());
        assert_eq!(e.conviction, defaults::CONVICTION);
        assert_eq!(e.put_call_ratio, defaults::PUT_CALL_RATIO);
        assert_eq!(e.net_premium, 0.0);
    }

    #[test]
    fn test_sentiment_and_ratio_imply_each_other() {
        let r = resolve_defaults(&RawSignal {
            bullish_ratio: Some(0.8),
            ..Default::default()
        });
        assert_eq!(r.sentiment, Sentiment::Bullish);

        let r = resolve_defaults(&RawSignal {
            sentiment: Some(Sentiment::Bearish),
            ..Default::default()
        });
        assert_eq!(r.bullish_ratio, defaults::BEARISH_SENTIMENT_RATIO);
    }

    #[test]
    fn test_skew_needs_both_ivs() {
        let r = resolve_defaults(&RawSignal {
            put_iv: Some(0.42),
            ..Default::default()
        });
        assert_eq!(r.vol_skew, 0.0);

        let r = resolve_defaults(&RawSignal {
            put_iv: Some(0.42),
            call_iv: Some(0.30),
            ..Default::default()
        });
        assert!((r.vol_skew - 0.12).abs() < 1e-9);
    }

    #[test]
    fn test_freshness_decays_monotonically_to_floor() {
        let cfg = EnrichConfig::default();
        let mut prev = f64::MAX;
        for age in [0.0, 60.0, 300.0, 600.0, 1200.0, 3600.0, 86_400.0] {
            let f = freshness(age, &cfg);
            assert!(f <= prev);
            assert!(f >= cfg.freshness_floor);
            prev = f;
        }
        assert!((freshness(300.0, &cfg) - 0.5).abs() < 1e-9);
        assert_eq!(freshness(86_400.0, &cfg), cfg.freshness_floor);
    }

    #[test]
    fn test_staircase_detection() {
        let prints = vec![
            print(-300, PrintSide::Bullish, 100_000.0),
            print(-200, PrintSide::Bullish, 150_000.0),
            print(-100, PrintSide::Bullish, 250_000.0),
        ];
        assert_eq!(detect_staircase(&prints, 3), Some(PrintSide::Bullish));

        let flat = vec![
            print(-300, PrintSide::Bullish, 100_000.0),
            print(-200, PrintSide::Bullish, 100_000.0),
            print(-100, PrintSide::Bullish, 250_000.0),
        ];
        assert_eq!(detect_staircase(&flat, 3), None);
    }

    #[test]
    fn test_burst_detection_and_direction() {
        let prints = vec![
            print(-50, PrintSide::Bearish, 300_000.0),
            print(-40, PrintSide::Bearish, 200_000.0),
            print(-30, PrintSide::Bullish, 100_000.0),
            print(-10, PrintSide::Bearish, 100_000.0),
        ];
        assert_eq!(detect_burst(&prints, 4, 60), Some(PrintSide::Bearish));

        let spread = vec![
            print(-800, PrintSide::Bearish, 300_000.0),
            print(-600, PrintSide::Bearish, 200_000.0),
            print(-400, PrintSide::Bullish, 100_000.0),
            print(-10, PrintSide::Bearish, 100_000.0),
        ];
        assert_eq!(detect_burst(&spread, 4, 60), None);
    }

    #[test]
    fn test_prints_outside_window_ignored() {
        let mut snap = SignalSnapshot::empty("NVDA", t0());
        snap.fields.prints = Some(vec![
            print(-2000, PrintSide::Bullish, 100_000.0),
            print(-1900, PrintSide::Bullish, 200_000.0),
            print(-1800, PrintSide::Bullish, 300_000.0),
        ]);
        let e = enrich(&snap, t0(), &EnrichConfig::default());
        assert_eq!(e.motifs.staircase, None);
        assert_eq!(e.toxicity, 0.0);
    }

    #[test]
    fn test_toxicity_combines_staleness_and_crowding() {
        let mut snap = SignalSnapshot::empty("TSLA", t0());
        snap.fields.prints = Some(vec![
            print(-120, PrintSide::Bullish, 800_000.0),
            print(-90, PrintSide::Bearish, 100_000.0),
            print(-30, PrintSide::Bullish, 100_000.0),
        ]);
        // Fresh: crowding only, largest print holds 80% of the window
        let e = enrich(&snap, t0(), &EnrichConfig::default());
        assert!((e.toxicity - 0.4 * 0.8).abs() < 1e-9);

        // 15 minutes old: staleness saturates
        let e = enrich(&snap, t0() + Duration::seconds(900), &EnrichConfig::default());
        assert!((e.toxicity - (0.6 + 0.32)).abs() < 1e-9);
    }
}
