//! Regime sources. Classification itself happens outside the engine; these
//! adapters only hold whatever the external classifier last published.

use serde::Deserialize;
use std::path::Path;
use std::sync::RwLock;
use tracing::{info, warn};

use crate::types::{Regime, RegimeClassifier};

/// Fixed regime from configuration
#[derive(Debug, Clone, Copy)]
pub struct StaticRegime(pub Regime);

impl RegimeClassifier for StaticRegime {
    fn current_regime(&self) -> Regime {
        self.0
    }
}

/// Regime that can be swapped at runtime, shared by the poller and the
/// decision loop
#[derive(Debug)]
pub struct SharedRegime {
    current: RwLock<Regime>,
}

#[derive(Debug, Deserialize)]
struct RegimeFile {
    regime: Regime,
}

impl SharedRegime {
    pub fn new(initial: Regime) -> Self {
        Self {
            current: RwLock::new(initial),
        }
    }

    /// Returns true when the regime changed
    pub fn set(&self, regime: Regime) -> bool {
        let mut guard = match self.current.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *guard == regime {
            return false;
        }
        info!("Regime {} -> {}", *guard, regime);
        *guard = regime;
        true
    }

    /// Pick up `{"regime": "..."}` published by the external classifier.
    /// A missing or unreadable file keeps the current regime.
    pub async fn refresh_from(&self, path: &Path) -> bool {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return false,
            Err(e) => {
                warn!("Cannot read regime file {}: {}", path.display(), e);
                return false;
            }
        };
        match serde_json::from_str::<RegimeFile>(&content) {
            Ok(file) => self.set(file.regime),
            Err(e) => {
                warn!("Ignoring malformed regime file {}: {}", path.display(), e);
                false
            }
        }
    }
}

impl RegimeClassifier for SharedRegime {
    fn current_regime(&self) -> Regime {
        match self.current.read() {
            Ok(g) => *g,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_regime_set() {
        let regime = SharedRegime::new(Regime::Neutral);
        assert!(regime.set(Regime::Panic));
        assert!(!regime.set(Regime::Panic));
        assert_eq!(regime.current_regime(), Regime::Panic);
    }

    #[tokio::test]
    async fn test_refresh_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("regime.json");
        let regime = SharedRegime::new(Regime::Neutral);

        assert!(!regime.refresh_from(&path).await);

        std::fs::write(&path, r#"{"regime": "risk_off"}"#).unwrap();
        assert!(regime.refresh_from(&path).await);
        assert_eq!(regime.current_regime(), Regime::RiskOff);

        std::fs::write(&path, r#"{"regime": "sideways"}"#).unwrap();
        assert!(!regime.refresh_from(&path).await);
        assert_eq!(regime.current_regime(), Regime::RiskOff);
    }
}
