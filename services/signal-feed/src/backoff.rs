//! Exponential backoff with capped delay, bounded retries and optional jitter

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry schedule shared by the poller and the broker executor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Growth factor per attempt
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Cap on any single delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Retries after the initial attempt before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Jitter fraction (0.0 - 1.0), e.g. 0.2 = +/-20%
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay_ms(),
            max_retries: default_max_retries(),
            jitter: default_jitter(),
        }
    }
}

fn default_base_delay_ms() -> u64 { 500 }
fn default_multiplier() -> f64 { 2.0 }
fn default_max_delay_ms() -> u64 { 30_000 }
fn default_max_retries() -> u32 { 3 }
fn default_jitter() -> f64 { 0.2 }

impl BackoffPolicy {
    /// Policy with no jitter, for deterministic schedules
    pub fn fixed(base_delay_ms: u64, multiplier: f64, max_delay_ms: u64, max_retries: u32) -> Self {
        Self {
            base_delay_ms,
            multiplier,
            max_delay_ms,
            max_retries,
            jitter: 0.0,
        }
    }

    /// Nominal delay before retry number `attempt` (0-based), before jitter
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(32) as i32);
        let millis = (self.base_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(millis.max(0.0) as u64)
    }

    /// Delay with jitter applied, never above the cap
    pub fn delay(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 {
            return nominal;
        }
        let spread = rand::thread_rng().gen_range(-jitter..=jitter);
        let millis = (nominal.as_millis() as f64 * (1.0 + spread)).min(self.max_delay_ms as f64);
        Duration::from_millis(millis.max(0.0) as u64)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth_is_capped() {
        let policy = BackoffPolicy::fixed(100, 2.0, 1_000, 5);
        assert_eq!(policy.nominal_delay(0), Duration::from_millis(100));
        assert_eq!(policy.nominal_delay(1), Duration::from_millis(200));
        assert_eq!(policy.nominal_delay(3), Duration::from_millis(800));
        assert_eq!(policy.nominal_delay(4), Duration::from_millis(1_000));
        assert_eq!(policy.nominal_delay(30), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = BackoffPolicy {
            jitter: 0.5,
            ..BackoffPolicy::fixed(1_000, 2.0, 10_000, 3)
        };
        for _ in 0..100 {
            let d = policy.delay(1).as_millis();
            assert!((1_000..=3_000).contains(&d), "delay {} out of range", d);
        }
    }

    #[test]
    fn test_retry_bound() {
        let policy = BackoffPolicy::fixed(1, 2.0, 10, 2);
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(2));
    }
}
