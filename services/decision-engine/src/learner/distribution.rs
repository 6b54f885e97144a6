//! Per-(component, regime) performance distributions.
//!
//! Callers only see `observe(win) -> Distribution` and `verdict(..)`, so the
//! statistical method can change without touching the learner.

use serde::{Deserialize, Serialize};

use crate::config::{LearnerConfig, LearnerMethod};

/// What the significance test says about a component's win rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Consistently profitable
    Promote,
    /// Consistently unprofitable
    Demote,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Distribution {
    /// Beta posterior over the win rate, Beta(1, 1) prior
    Beta { alpha: f64, beta: f64 },
    /// Exponentially weighted mean of the win indicator
    Ewma { mean: f64, alpha: f64 },
}

impl Distribution {
    pub fn prior(config: &LearnerConfig) -> Self {
        match config.method {
            LearnerMethod::Beta => Distribution::Beta {
                alpha: 1.0,
                beta: 1.0,
            },
            LearnerMethod::Ewma => Distribution::Ewma {
                mean: 0.5,
                alpha: config.ewma_alpha,
            },
        }
    }

    /// Updated distribution after one outcome
    pub fn observe(&self, win: bool) -> Distribution {
        match *self {
            Distribution::Beta { alpha, beta } => {
                if win {
                    Distribution::Beta {
                        alpha: alpha + 1.0,
                        beta,
                    }
                } else {
                    Distribution::Beta {
                        alpha,
                        beta: beta + 1.0,
                    }
                }
            }
            Distribution::Ewma { mean, alpha } => {
                let x = if win { 1.0 } else { 0.0 };
                Distribution::Ewma {
                    mean: alpha * x + (1.0 - alpha) * mean,
                    alpha,
                }
            }
        }
    }

    /// Point estimate of the win rate
    pub fn win_rate(&self) -> f64 {
        match *self {
            Distribution::Beta { alpha, beta } => alpha / (alpha + beta),
            Distribution::Ewma { mean, .. } => mean,
        }
    }

    pub fn verdict(&self, config: &LearnerConfig) -> Verdict {
        match *self {
            Distribution::Beta { alpha, beta } => {
                let wins = (alpha - 1.0).max(0.0);
                let n = (alpha + beta - 2.0).max(0.0);
                let (lower, upper) = wilson_interval(wins, n, config.z);
                if lower > 0.5 {
                    Verdict::Promote
                } else if upper < 0.5 {
                    Verdict::Demote
                } else {
                    Verdict::Hold
                }
            }
            Distribution::Ewma { mean, .. } => {
                if mean > 0.5 + config.ewma_margin {
                    Verdict::Promote
                } else if mean < 0.5 - config.ewma_margin {
                    Verdict::Demote
                } else {
                    Verdict::Hold
                }
            }
        }
    }

    pub fn is_valid(&self) -> bool {
        match *self {
            Distribution::Beta { alpha, beta } => {
                alpha.is_finite() && beta.is_finite() && alpha >= 1.0 && beta >= 1.0
            }
            Distribution::Ewma { mean, alpha } => {
                mean.is_finite() && (0.0..=1.0).contains(&mean) && alpha > 0.0 && alpha <= 1.0
            }
        }
    }
}

/// Wilson score interval for `successes` out of `n` trials
pub fn wilson_interval(successes: f64, n: f64, z: f64) -> (f64, f64) {
    if n <= 0.0 {
        return (0.0, 1.0);
    }
    let p = (successes / n).clamp(0.0, 1.0);
    let z2 = z * z;
    let denom = 1.0 + z2 / n;
    let centre = p + z2 / (2.0 * n);
    let adj = z * ((p * (1.0 - p) + z2 / (4.0 * n)) / n).sqrt();
    (
        ((centre - adj) / denom).clamp(0.0, 1.0),
        ((centre + adj) / denom).clamp(0.0, 1.0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wilson_interval_narrows_with_samples() {
        let (lo_small, hi_small) = wilson_interval(7.0, 10.0, 1.96);
        let (lo_big, hi_big) = wilson_interval(70.0, 100.0, 1.96);
        assert!(lo_small < lo_big);
        assert!(hi_small > hi_big);
        assert!(lo_small < 0.7 && hi_small > 0.7);
        assert_eq!(wilson_interval(0.0, 0.0, 1.96), (0.0, 1.0));
    }

    #[test]
    fn test_beta_verdicts() {
        let config = LearnerConfig::default();
        let mut d = Distribution::prior(&config);
        for _ in 0..10 {
            d = d.observe(true);
        }
        assert_eq!(d.verdict(&config), Verdict::Promote);

        let mut d = Distribution::prior(&config);
        for _ in 0..10 {
            d = d.observe(false);
        }
        assert_eq!(d.verdict(&config), Verdict::Demote);

        // 6/10 is not significant
        let mut d = Distribution::prior(&config);
        for i in 0..10 {
            d = d.observe(i < 6);
        }
        assert_eq!(d.verdict(&config), Verdict::Hold);
    }

    #[test]
    fn test_ewma_verdicts() {
        let config = LearnerConfig {
            method: LearnerMethod::Ewma,
            ..Default::default()
        };
        let mut d = Distribution::prior(&config);
        assert_eq!(d.verdict(&config), Verdict::Hold);
        for _ in 0..20 {
            d = d.observe(true);
        }
        assert!(d.win_rate() > 0.8);
        assert_eq!(d.verdict(&config), Verdict::Promote);
    }

    #[test]
    fn test_observe_returns_new_value() {
        let config = LearnerConfig::default();
        let d = Distribution::prior(&config);
        let after = d.observe(true);
        assert_eq!(d, Distribution::Beta { alpha: 1.0, beta: 1.0 });
        assert_eq!(after, Distribution::Beta { alpha: 2.0, beta: 1.0 });
        assert!(after.is_valid());
    }
}
