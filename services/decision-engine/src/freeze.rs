//! Global trading freeze
//!
//! Two origins with different release rules:
//! - `Operator`: auth failures and explicit operator holds. Cleared only by
//!   an operator action.
//! - `Watchdog`: transient conditions (unverified positions, stale data).
//!   Cleared automatically once the health check passes.
//!
//! An operator freeze takes precedence over a watchdog freeze.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreezeOrigin {
    Operator,
    Watchdog,
}

impl FreezeOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            FreezeOrigin::Operator => "operator",
            FreezeOrigin::Watchdog => "watchdog",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreezeState {
    pub origin: FreezeOrigin,
    pub reason: String,
    pub since: DateTime<Utc>,
}

/// Inputs to the watchdog release check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchdogHealth {
    /// Age of the newest cache update, `None` if the cache is empty
    pub newest_data_age: Option<Duration>,
    pub max_data_age: Duration,
    /// Local positions confirmed against the broker since the freeze
    pub positions_verified: bool,
}

impl WatchdogHealth {
    pub fn passes(&self) -> bool {
        let fresh = self
            .newest_data_age
            .map(|age| age <= self.max_data_age)
            .unwrap_or(false);
        fresh && self.positions_verified
    }
}

#[derive(Debug, Default)]
pub struct FreezeSwitch {
    state: Option<FreezeState>,
}

impl FreezeSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_frozen(&self) -> bool {
        self.state.is_some()
    }

    pub fn state(&self) -> Option<&FreezeState> {
        self.state.as_ref()
    }

    pub fn origin(&self) -> Option<FreezeOrigin> {
        self.state.as_ref().map(|s| s.origin)
    }

    /// Engage the freeze. Returns true when the state changed.
    pub fn trip(&mut self, origin: FreezeOrigin, reason: impl Into<String>, now: DateTime<Utc>) -> bool {
        let reason = reason.into();
        match (&self.state, origin) {
            (Some(current), _) if current.origin == origin => false,
            // A watchdog trip never downgrades an operator freeze
            (Some(current), FreezeOrigin::Watchdog) if current.origin == FreezeOrigin::Operator => false,
            _ => {
                match origin {
                    FreezeOrigin::Operator => error!("TRADING FROZEN (operator): {}", reason),
                    FreezeOrigin::Watchdog => warn!("Trading frozen (watchdog): {}", reason),
                }
                self.state = Some(FreezeState {
                    origin,
                    reason,
                    since: now,
                });
                true
            }
        }
    }

    /// Explicit operator release; clears a freeze of either origin
    pub fn clear_by_operator(&mut self) -> bool {
        match self.state.take() {
            Some(previous) => {
                info!("Freeze ({}) cleared by operator", previous.origin.as_str());
                true
            }
            None => false,
        }
    }

    /// Release a watchdog freeze when health passes. Operator freezes stay.
    pub fn try_clear_watchdog(&mut self, health: &WatchdogHealth) -> bool {
        match &self.state {
            Some(s) if s.origin == FreezeOrigin::Watchdog && health.passes() => {
                info!("Watchdog freeze cleared: health check passed");
                self.state = None;
                true
            }
            _ => false,
        }
    }
}

/// Operator control file (`state/operator.json`)
///
/// Applied only when its content changes. Bumping `generation` re-issues the
/// same instruction, e.g. to release a freeze tripped after the last edit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperatorControl {
    #[serde(default)]
    pub frozen: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub generation: u64,
}

impl OperatorControl {
    /// `Ok(None)` when the file does not exist
    pub async fn load(path: &Path) -> anyhow::Result<Option<Self>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// What applying a control file change did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorAction {
    None,
    Froze,
    Released,
}

/// Tracks the last applied control file
#[derive(Debug, Default)]
pub struct OperatorWatch {
    last: Option<OperatorControl>,
}

impl OperatorWatch {
    /// Apply a freshly read control file. The first read only sets the
    /// baseline unless it asks for a freeze.
    pub fn apply(
        &mut self,
        control: OperatorControl,
        switch: &mut FreezeSwitch,
        now: DateTime<Utc>,
    ) -> OperatorAction {
        let first = self.last.is_none();
        if self.last.as_ref() == Some(&control) {
            return OperatorAction::None;
        }
        self.last = Some(control.clone());

        if control.frozen {
            let reason = control.reason.unwrap_or_else(|| "operator hold".to_string());
            if switch.trip(FreezeOrigin::Operator, reason, now) {
                return OperatorAction::Froze;
            }
            OperatorAction::None
        } else if first {
            OperatorAction::None
        } else {
            // A release with nothing frozen still re-arms feed polling
            switch.clear_by_operator();
            OperatorAction::Released
        }
    }
}
