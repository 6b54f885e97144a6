//! State Management - persisted engine state and "chatty" status files
//!
//! All writes go to a temp file in the same directory and are renamed into
//! place, so a crash never leaves a half-written file behind. Loads never
//! fail: unreadable files fall back to defaults and report why.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, warn};

use crate::error::StateError;
use crate::freeze::FreezeState;
use crate::learner::WeightTable;
use crate::portfolio::PositionBook;
use crate::threshold::ThresholdState;
use crate::types::Regime;

pub const WEIGHTS_FILE: &str = "weights.json";
pub const THRESHOLD_FILE: &str = "threshold.json";
pub const POSITIONS_FILE: &str = "positions.json";
pub const NOW_FILE: &str = "now.json";
pub const OPERATOR_FILE: &str = "operator.json";
pub const EVENTS_FILE: &str = "events.jsonl";
/// Published by the external regime classifier
pub const REGIME_FILE: &str = "regime.json";

/// How a load went
#[derive(Debug)]
pub enum LoadStatus {
    Loaded,
    Missing,
    /// Unreadable; defaults were used
    Corrupt(StateError),
}

impl LoadStatus {
    pub fn is_corrupt(&self) -> bool {
        matches!(self, LoadStatus::Corrupt(_))
    }
}

/// Typed JSON file with atomic save
#[derive(Debug, Clone)]
pub struct JsonStore<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file, falling back to `T::default()` when missing or corrupt
    pub async fn load(&self) -> (T, LoadStatus) {
        let content = match fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state at {}, starting fresh", self.path.display());
                return (T::default(), LoadStatus::Missing);
            }
            Err(e) => {
                let err = StateError::Io {
                    path: self.path.clone(),
                    source: e,
                };
                error!("State unreadable, using defaults: {}", err);
                return (T::default(), LoadStatus::Corrupt(err));
            }
        };

        match serde_json::from_str::<T>(&content) {
            Ok(value) => (value, LoadStatus::Loaded),
            Err(e) => {
                let err = StateError::Corrupt {
                    path: self.path.clone(),
                    message: e.to_string(),
                };
                error!("State corrupt, using defaults: {}", err);
                (T::default(), LoadStatus::Corrupt(err))
            }
        }
    }

    pub async fn save(&self, value: &T) -> Result<(), StateError> {
        let json = serde_json::to_string_pretty(value)?;
        let io_err = |source| StateError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, json).await.map_err(io_err)?;
        if let Err(e) = fs::rename(&tmp, &self.path).await {
            warn!("Rename into {} failed: {}", self.path.display(), e);
            let _ = fs::remove_file(&tmp).await;
            return Err(io_err(e));
        }
        debug!("Wrote {}", self.path.display());
        Ok(())
    }
}

pub type WeightStore = JsonStore<WeightTable>;
pub type ThresholdStore = JsonStore<ThresholdState>;
pub type PositionFile = JsonStore<PositionBook>;
pub type NowFile = JsonStore<NowState>;

/// Per-cycle counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub started_at: Option<DateTime<Utc>>,
    pub frozen: bool,
    pub scored: usize,
    pub eligible: usize,
    pub entered: usize,
    pub reduces: usize,
    pub exits: usize,
    pub skipped_symbols: Vec<String>,
    pub blocked_orders: usize,
}

/// Current status (state/now.json)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NowState {
    pub timestamp: Option<DateTime<Utc>>,
    pub mode: String,
    pub status: String,
    pub regime: Option<Regime>,
    pub effective_threshold: f64,
    pub open_positions: usize,
    pub freeze: Option<FreezeState>,
    pub last_cycle: CycleReport,
    pub last_reconciliation: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Sample {
        counts: BTreeMap<String, u32>,
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonStore<Sample> = JsonStore::new(dir.path().join("nested").join("sample.json"));

        let mut sample = Sample::default();
        sample.counts.insert("AAPL".into(), 3);
        store.save(&sample).await.unwrap();

        let (loaded, status) = store.load().await;
        assert!(matches!(status, LoadStatus::Loaded));
        assert_eq!(loaded, sample);
        assert!(!dir.path().join("nested").join("sample.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let store: JsonStore<Sample> = JsonStore::new(dir.path().join("absent.json"));
        let (loaded, status) = store.load().await;
        assert!(matches!(status, LoadStatus::Missing));
        assert_eq!(loaded, Sample::default());
    }

    #[tokio::test]
    async fn test_corrupt_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store: JsonStore<Sample> = JsonStore::new(&path);
        let (loaded, status) = store.load().await;
        assert!(status.is_corrupt());
        assert_eq!(loaded, Sample::default());
    }
}
