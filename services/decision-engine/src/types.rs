//! Shared decision types

use serde::{Deserialize, Serialize};
use std::fmt;

pub use signal_feed::{Regime, RegimeClassifier};

/// Lower clamp for a composite score
pub const SCORE_MIN: f64 = -10.0;
/// Upper clamp for a composite score
pub const SCORE_MAX: f64 = 10.0;

/// Direction of a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short
    pub fn sign(&self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    /// Side implied by a signed score; `None` for an exactly neutral score
    pub fn from_score(score: f64) -> Option<Side> {
        if score > 0.0 {
            Some(Side::Long)
        } else if score < 0.0 {
            Some(Side::Short)
        } else {
            None
        }
    }

    /// Order side that opens a position on this side
    pub fn entry_order(&self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// Order side that reduces or closes a position on this side
    pub fn exit_order(&self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Sell,
            Side::Short => OrderSide::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => f.write_str("long"),
            Side::Short => f.write_str("short"),
        }
    }
}

/// Broker order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => f.write_str("buy"),
            OrderSide::Sell => f.write_str("sell"),
        }
    }
}

/// How a component's raw value is mapped into [-1, 1]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformKind {
    /// Distance from a neutral ratio
    RatioToNeutral,
    /// Log-scaled notional magnitude, signed by direction
    LogMagnitude,
    /// Threshold-banded step function
    Banded,
}

/// Named score components, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentId {
    Sentiment,
    Conviction,
    PutCallRatio,
    NetPremium,
    SweepFlow,
    DarkPool,
    VolSkew,
    Motif,
    GammaRegime,
}

impl ComponentId {
    pub const ALL: [ComponentId; 9] = [
        ComponentId::Sentiment,
        ComponentId::Conviction,
        ComponentId::PutCallRatio,
        ComponentId::NetPremium,
        ComponentId::SweepFlow,
        ComponentId::DarkPool,
        ComponentId::VolSkew,
        ComponentId::Motif,
        ComponentId::GammaRegime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentId::Sentiment => "sentiment",
            ComponentId::Conviction => "conviction",
            ComponentId::PutCallRatio => "put_call_ratio",
            ComponentId::NetPremium => "net_premium",
            ComponentId::SweepFlow => "sweep_flow",
            ComponentId::DarkPool => "dark_pool",
            ComponentId::VolSkew => "vol_skew",
            ComponentId::Motif => "motif",
            ComponentId::GammaRegime => "gamma_regime",
        }
    }

    pub fn transform_kind(&self) -> TransformKind {
        match self {
            ComponentId::Sentiment | ComponentId::Conviction | ComponentId::PutCallRatio => {
                TransformKind::RatioToNeutral
            }
            ComponentId::NetPremium | ComponentId::SweepFlow | ComponentId::DarkPool => {
                TransformKind::LogMagnitude
            }
            ComponentId::VolSkew | ComponentId::Motif | ComponentId::GammaRegime => {
                TransformKind::Banded
            }
        }
    }

    /// Components that describe order flow direction, used for adverse-flow detection
    pub fn is_flow(&self) -> bool {
        matches!(
            self,
            ComponentId::Sentiment | ComponentId::NetPremium | ComponentId::SweepFlow
        )
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ComponentId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ComponentId::ALL
            .iter()
            .find(|c| c.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown component: {}", s))
    }
}
