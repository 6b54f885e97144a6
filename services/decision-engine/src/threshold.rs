//! Self-healing entry threshold.
//!
//! `delta` rises by one increment after `loss_streak` consecutive losses and
//! falls by one increment either at the first tick after a win or after a
//! loss-free cooldown. Any two adjustments are at least `min_step_interval`
//! apart; a trigger that arrives too early stays armed until the next tick
//! that is allowed to act on it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{LiquidityWindow, ThresholdConfig};

/// Persisted threshold state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdState {
    pub current_delta: f64,
    pub last_adjustment_time: Option<DateTime<Utc>>,
    pub consecutive_loss_count: u32,
    /// A win arrived and one decay step is owed
    #[serde(default)]
    pub decay_armed: bool,
    #[serde(default)]
    pub last_loss_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentCause {
    LosingStreak,
    Win,
    Cooldown,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThresholdChange {
    pub cause: AdjustmentCause,
    pub from: f64,
    pub to: f64,
    pub at: DateTime<Utc>,
}

pub struct SelfHealingThreshold {
    config: ThresholdConfig,
    windows: Vec<LiquidityWindow>,
    state: ThresholdState,
}

impl SelfHealingThreshold {
    pub fn new(config: ThresholdConfig) -> Self {
        Self::from_state(config, ThresholdState::default())
    }

    pub fn from_state(config: ThresholdConfig, mut state: ThresholdState) -> Self {
        let windows = config
            .liquidity_windows
            .iter()
            .filter_map(|w| match LiquidityWindow::parse(w) {
                Ok(window) => Some(window),
                Err(e) => {
                    warn!("Ignoring liquidity window: {}", e);
                    None
                }
            })
            .collect();
        if !state.current_delta.is_finite() {
            state.current_delta = 0.0;
        }
        state.current_delta = state.current_delta.clamp(0.0, config.max_delta);
        Self {
            config,
            windows,
            state,
        }
    }

    pub fn state(&self) -> &ThresholdState {
        &self.state
    }

    pub fn base(&self) -> f64 {
        self.config.base
    }

    pub fn delta(&self) -> f64 {
        self.state.current_delta
    }

    /// Liquidity add-on at `now`
    pub fn liquidity_adjustment(&self, now: DateTime<Utc>) -> f64 {
        let t = now.time();
        if self.windows.iter().any(|w| w.contains(t)) {
            self.config.liquidity_adjustment
        } else {
            0.0
        }
    }

    /// base + delta + liquidity adjustment. Pure.
    pub fn effective_threshold(&self, now: DateTime<Utc>) -> f64 {
        self.config.base + self.state.current_delta + self.liquidity_adjustment(now)
    }

    fn can_step(&self, now: DateTime<Utc>) -> bool {
        match self.state.last_adjustment_time {
            None => true,
            Some(last) => now - last >= Duration::seconds(self.config.min_step_interval_secs),
        }
    }

    fn apply(&mut self, cause: AdjustmentCause, to: f64, now: DateTime<Utc>) -> Option<ThresholdChange> {
        let from = self.state.current_delta;
        let to = to.clamp(0.0, self.config.max_delta);
        if (to - from).abs() <= f64::EPSILON {
            return None;
        }
        self.state.current_delta = to;
        self.state.last_adjustment_time = Some(now);
        info!(cause = ?cause, "Entry threshold delta {:.2} -> {:.2}", from, to);
        Some(ThresholdChange { cause, from, to, at: now })
    }

    fn try_raise(&mut self, now: DateTime<Utc>) -> Option<ThresholdChange> {
        if self.state.consecutive_loss_count < self.config.loss_streak || !self.can_step(now) {
            return None;
        }
        self.state.consecutive_loss_count = 0;
        let to = self.state.current_delta + self.config.increment;
        self.apply(AdjustmentCause::LosingStreak, to, now)
    }

    /// Record a closed trade. A losing streak raises immediately when allowed.
    pub fn record_outcome(&mut self, won: bool, at: DateTime<Utc>) -> Option<ThresholdChange> {
        if won {
            self.state.consecutive_loss_count = 0;
            self.state.decay_armed = self.state.current_delta > 0.0;
            None
        } else {
            self.state.consecutive_loss_count += 1;
            self.state.last_loss_time = Some(at);
            self.state.decay_armed = false;
            self.try_raise(at)
        }
    }

    /// Periodic evaluation: applies an armed raise or decay once allowed
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<ThresholdChange> {
        if let Some(change) = self.try_raise(now) {
            return Some(change);
        }
        if self.state.current_delta <= 0.0 || !self.can_step(now) {
            return None;
        }

        let to = self.state.current_delta - self.config.increment;
        if self.state.decay_armed {
            self.state.decay_armed = false;
            return self.apply(AdjustmentCause::Win, to, now);
        }

        let quiet_since = match (self.state.last_loss_time, self.state.last_adjustment_time) {
            (Some(l), Some(a)) => Some(l.max(a)),
            (l, a) => l.or(a),
        };
        let cooled = quiet_since
            .map(|t| now - t >= Duration::seconds(self.config.cooldown_secs))
            .unwrap_or(true);
        if cooled {
            return self.apply(AdjustmentCause::Cooldown, to, now);
        }
        None
    }
}
