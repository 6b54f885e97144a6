//! Exit urgency and hard-rule exits for open positions.
//!
//! Two independent paths, OR-combined:
//! - urgency: weighted severities (each in [0, 1]) plus a fixed hard-loss
//!   addend, clamped to [0, 10] and mapped to HOLD / REDUCE / EXIT
//! - hard rules: stop loss, trailing stop, profit target, max age force EXIT

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::config::ExitConfig;
use crate::portfolio::Position;

pub const URGENCY_MIN: f64 = 0.0;
pub const URGENCY_MAX: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitAction {
    Hold,
    Reduce,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HardRule {
    StopLoss,
    TrailingStop,
    ProfitTarget,
    MaxAge,
}

impl HardRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            HardRule::StopLoss => "stop_loss",
            HardRule::TrailingStop => "trailing_stop",
            HardRule::ProfitTarget => "profit_target",
            HardRule::MaxAge => "max_age",
        }
    }
}

/// Weighted urgency components
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct UrgencyBreakdown {
    pub entry_decay: f64,
    pub adverse_flow: f64,
    pub drawdown_velocity: f64,
    pub time_decay: f64,
    pub momentum_reversal: f64,
    pub hard_loss_override: f64,
}

impl UrgencyBreakdown {
    pub fn total(&self) -> f64 {
        self.entry_decay
            + self.adverse_flow
            + self.drawdown_velocity
            + self.time_decay
            + self.momentum_reversal
            + self.hard_loss_override
    }
}

/// Current market view of a held symbol
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitInputs {
    /// Fresh composite score, when the symbol scored this cycle
    pub current_score: Option<f64>,
    /// Flow direction in [-1, 1]; negative is bearish
    pub flow_bias: f64,
    pub momentum_pct: f64,
    pub mark: Decimal,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExitEvaluation {
    pub urgency: f64,
    pub breakdown: UrgencyBreakdown,
    pub hard_rule: Option<HardRule>,
    pub action: ExitAction,
    pub pnl_pct: f64,
}

pub struct ExitEngine {
    config: ExitConfig,
}

impl ExitEngine {
    pub fn new(config: ExitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExitConfig {
        &self.config
    }

    /// Severity of score decay relative to entry
    fn entry_decay(&self, position: &Position, current_score: Option<f64>) -> f64 {
        let (Some(current), entry) = (current_score, position.entry_score) else {
            return 0.0;
        };
        if entry == 0.0 || !current.is_finite() {
            return 0.0;
        }
        let ratio = current / entry;
        let limit = self.config.decay_ratio;
        if ratio < limit && limit > 0.0 {
            ((limit - ratio) / limit).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Flow pointing against the position
    fn adverse_flow(&self, position: &Position, flow_bias: f64) -> f64 {
        if !flow_bias.is_finite() {
            return 0.0;
        }
        (-flow_bias * position.side.sign()).clamp(0.0, 1.0)
    }

    /// Drawdown beyond the threshold, faster drawdowns weigh more
    fn drawdown_velocity(&self, pnl_pct: f64, held_secs: f64) -> f64 {
        let drawdown = (-pnl_pct).max(0.0);
        let threshold = self.config.drawdown_threshold_pct;
        if drawdown <= threshold || threshold <= 0.0 {
            return 0.0;
        }
        let excess = (drawdown - threshold) / threshold;
        let speed = (self.config.drawdown_reference_secs as f64 / held_secs.max(60.0)).clamp(0.5, 2.0);
        (excess * speed).clamp(0.0, 1.0)
    }

    fn time_decay(&self, held_secs: f64) -> f64 {
        let threshold = self.config.age_threshold_secs as f64;
        if held_secs <= threshold || threshold <= 0.0 {
            return 0.0;
        }
        ((held_secs - threshold) / threshold).clamp(0.0, 1.0)
    }

    /// Short-horizon momentum against the position beyond the magnitude
    fn momentum_reversal(&self, position: &Position, momentum_pct: f64) -> f64 {
        if !momentum_pct.is_finite() {
            return 0.0;
        }
        let adverse = -momentum_pct * position.side.sign();
        let threshold = self.config.momentum_threshold_pct;
        if adverse <= threshold || threshold <= 0.0 {
            return 0.0;
        }
        ((adverse - threshold) / threshold).clamp(0.0, 1.0)
    }

    fn hard_rule(&self, position: &Position, pnl_pct: f64, held_secs: f64, mark: Decimal) -> Option<HardRule> {
        let c = &self.config;
        if pnl_pct <= -c.stop_loss_pct {
            return Some(HardRule::StopLoss);
        }
        // Trailing stop arms once the position has been in profit
        if position.has_been_in_profit() && position.retrace_pct(mark) >= c.trailing_stop_pct {
            return Some(HardRule::TrailingStop);
        }
        if pnl_pct >= c.profit_target_pct {
            return Some(HardRule::ProfitTarget);
        }
        if held_secs >= c.max_age_secs as f64 {
            return Some(HardRule::MaxAge);
        }
        None
    }

    /// Map urgency to an action; a second REDUCE on the same position holds
    pub fn action_for(&self, urgency: f64, already_reduced: bool) -> ExitAction {
        if urgency >= self.config.exit_threshold {
            ExitAction::Exit
        } else if urgency >= self.config.reduce_threshold && !already_reduced {
            ExitAction::Reduce
        } else {
            ExitAction::Hold
        }
    }

    pub fn evaluate(&self, position: &Position, inputs: &ExitInputs) -> ExitEvaluation {
        let c = &self.config;
        let pnl_pct = position.pnl_pct(inputs.mark);
        let held_secs = ((inputs.now - position.entry_time).num_milliseconds() as f64 / 1000.0).max(0.0);

        let breakdown = UrgencyBreakdown {
            entry_decay: c.weight_entry_decay * self.entry_decay(position, inputs.current_score),
            adverse_flow: c.weight_adverse_flow * self.adverse_flow(position, inputs.flow_bias),
            drawdown_velocity: c.weight_drawdown_velocity * self.drawdown_velocity(pnl_pct, held_secs),
            time_decay: c.weight_time_decay * self.time_decay(held_secs),
            momentum_reversal: c.weight_momentum_reversal * self.momentum_reversal(position, inputs.momentum_pct),
            hard_loss_override: if pnl_pct <= c.hard_loss_floor_pct {
                c.hard_loss_addend
            } else {
                0.0
            },
        };

        let total = breakdown.total();
        let urgency = if total.is_finite() {
            total.clamp(URGENCY_MIN, URGENCY_MAX)
        } else {
            URGENCY_MAX
        };

        let hard_rule = self.hard_rule(position, pnl_pct, held_secs, inputs.mark);
        let action = if hard_rule.is_some() {
            ExitAction::Exit
        } else {
            self.action_for(urgency, position.reduced)
        };

        ExitEvaluation {
            urgency,
            breakdown,
            hard_rule,
            action,
            pnl_pct,
        }
    }
}
