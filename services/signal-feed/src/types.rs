use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse market-condition classification used to key learned weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    RiskOn,
    RiskOff,
    Panic,
    Mixed,
    Neutral,
}

impl Regime {
    pub const ALL: [Regime; 5] = [
        Regime::RiskOn,
        Regime::RiskOff,
        Regime::Panic,
        Regime::Mixed,
        Regime::Neutral,
    ];

    /// Regimes during which rate-limited fetches are deferred instead of retried
    pub fn is_high_volatility(&self) -> bool {
        matches!(self, Regime::Panic)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::RiskOn => "risk_on",
            Regime::RiskOff => "risk_off",
            Regime::Panic => "panic",
            Regime::Mixed => "mixed",
            Regime::Neutral => "neutral",
        }
    }
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Regime {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "risk_on" | "risk-on" => Ok(Regime::RiskOn),
            "risk_off" | "risk-off" => Ok(Regime::RiskOff),
            "panic" => Ok(Regime::Panic),
            "mixed" => Ok(Regime::Mixed),
            "neutral" => Ok(Regime::Neutral),
            other => Err(format!("unknown regime: {}", other)),
        }
    }
}

/// Source of the current market regime. Internals are opaque to the engine.
pub trait RegimeClassifier: Send + Sync {
    fn current_regime(&self) -> Regime;
}

/// Headline sentiment reported by the feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Bullish,
    Bearish,
    Neutral,
}

/// Aggressor side of an individual flow print
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrintSide {
    Bullish,
    Bearish,
}

impl PrintSide {
    pub fn sign(&self) -> f64 {
        match self {
            PrintSide::Bullish => 1.0,
            PrintSide::Bearish => -1.0,
        }
    }
}

/// A single options-flow print inside the recent window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowPrint {
    pub timestamp: DateTime<Utc>,
    pub side: PrintSide,
    pub notional: f64,
}

/// Raw signal fields as delivered by the feed. Every field is optional: a feed
/// response may carry any subset, and the cache merges subsets field by field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawSignal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
    /// Share of bullish flow in the window, 0.0 - 1.0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bullish_ratio: Option<f64>,
    /// Feed-reported conviction, 0.0 - 1.0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conviction: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub put_call_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_premium: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub put_premium: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bullish_sweep_notional: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearish_sweep_notional: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dark_pool_notional: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_iv: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub put_iv: Option<f64>,
    /// Signed dealer gamma exposure in notional terms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dealer_gamma: Option<f64>,
    /// Short-horizon price momentum in percent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub momentum_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prints: Option<Vec<FlowPrint>>,
}

impl RawSignal {
    /// Field-level merge: a field present in `newer` replaces the stored one,
    /// an absent field never clobbers what is already known.
    pub fn merge(&self, newer: &RawSignal) -> RawSignal {
        RawSignal {
            sentiment: newer.sentiment.or(self.sentiment),
            bullish_ratio: newer.bullish_ratio.or(self.bullish_ratio),
            conviction: newer.conviction.or(self.conviction),
            put_call_ratio: newer.put_call_ratio.or(self.put_call_ratio),
            call_premium: newer.call_premium.or(self.call_premium),
            put_premium: newer.put_premium.or(self.put_premium),
            bullish_sweep_notional: newer.bullish_sweep_notional.or(self.bullish_sweep_notional),
            bearish_sweep_notional: newer.bearish_sweep_notional.or(self.bearish_sweep_notional),
            dark_pool_notional: newer.dark_pool_notional.or(self.dark_pool_notional),
            call_iv: newer.call_iv.or(self.call_iv),
            put_iv: newer.put_iv.or(self.put_iv),
            dealer_gamma: newer.dealer_gamma.or(self.dealer_gamma),
            momentum_pct: newer.momentum_pct.or(self.momentum_pct),
            last_price: newer.last_price.or(self.last_price),
            prints: newer.prints.clone().or_else(|| self.prints.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == RawSignal::default()
    }
}

/// Partial payload returned by one feed fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialSignal {
    pub symbol: String,
    /// When the feed captured these values
    pub captured_at: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: RawSignal,
}

/// Immutable per-symbol snapshot. Superseded by a new value, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSnapshot {
    pub symbol: String,
    pub captured_at: DateTime<Utc>,
    pub fields: RawSignal,
}

impl SignalSnapshot {
    pub fn empty(symbol: &str, captured_at: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.to_string(),
            captured_at,
            fields: RawSignal::default(),
        }
    }

    /// Produce the successor snapshot after applying a partial update
    pub fn merged_with(&self, partial: &PartialSignal) -> SignalSnapshot {
        SignalSnapshot {
            symbol: self.symbol.clone(),
            captured_at: self.captured_at.max(partial.captured_at),
            fields: self.fields.merge(&partial.fields),
        }
    }
}

/// Classified feed failure
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FeedError {
    #[error("Rate limit exceeded for {source_name}")]
    RateLimited {
        source_name: String,
        retry_after: Option<u64>,
    },

    #[error("Authentication rejected by {source_name}: {message}")]
    Auth { source_name: String, message: String },

    #[error("Transient feed failure: {0}")]
    Transient(String),

    #[error("Unclassified feed failure: {0}")]
    Unknown(String),
}

impl FeedError {
    pub fn kind(&self) -> &'static str {
        match self {
            FeedError::RateLimited { .. } => "rate_limited",
            FeedError::Auth { .. } => "auth",
            FeedError::Transient(_) => "transient",
            FeedError::Unknown(_) => "unknown",
        }
    }
}

/// Result type for feed operations
pub type Result<T> = std::result::Result<T, FeedError>;

/// Feed health snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceHealth {
    pub source: String,
    pub is_healthy: bool,
    pub last_success: Option<DateTime<Utc>>,
    pub success_rate: f64,
    pub avg_latency_ms: u64,
    pub rate_limit_remaining: Option<u32>,
}

/// External market-signal feed
#[async_trait::async_trait]
pub trait MarketDataFeed: Send + Sync {
    /// Fetch the latest (possibly partial) signal values for a symbol
    async fn fetch(&self, symbol: &str) -> Result<PartialSignal>;

    /// Remaining requests in the current rate-limit window, when the feed exposes it
    fn rate_limit_remaining(&self) -> Option<u32> {
        None
    }

    async fn health(&self) -> SourceHealth;

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_never_clobbers_with_absent_fields() {
        let base = RawSignal {
            sentiment: Some(Sentiment::Bullish),
            call_premium: Some(1_500_000.0),
            last_price: Some(101.5),
            ..Default::default()
        };
        let newer = RawSignal {
            call_premium: Some(2_000_000.0),
            put_premium: Some(300_000.0),
            ..Default::default()
        };

        let merged = base.merge(&newer);
        assert_eq!(merged.sentiment, Some(Sentiment::Bullish));
        assert_eq!(merged.call_premium, Some(2_000_000.0));
        assert_eq!(merged.put_premium, Some(300_000.0));
        assert_eq!(merged.last_price, Some(101.5));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let base = RawSignal {
            conviction: Some(0.8),
            ..Default::default()
        };
        let newer = RawSignal {
            momentum_pct: Some(-0.4),
            ..Default::default()
        };
        let once = base.merge(&newer);
        let twice = once.merge(&newer);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_partial_signal_deserializes_sparse_payload() {
        let json = r#"{"symbol":"NVDA","captured_at":"2026-01-05T15:00:00Z","put_call_ratio":0.6}"#;
        let partial: PartialSignal = serde_json::from_str(json).unwrap();
        assert_eq!(partial.symbol, "NVDA");
        assert_eq!(partial.fields.put_call_ratio, Some(0.6));
        assert!(partial.fields.sentiment.is_none());
    }

    #[test]
    fn test_regime_parsing() {
        assert_eq!("panic".parse::<Regime>().unwrap(), Regime::Panic);
        assert_eq!("risk-on".parse::<Regime>().unwrap(), Regime::RiskOn);
        assert!("sideways".parse::<Regime>().is_err());
        assert!(Regime::Panic.is_high_volatility());
        assert!(!Regime::RiskOff.is_high_volatility());
    }
}
