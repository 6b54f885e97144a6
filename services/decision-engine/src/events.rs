//! Structured decision events
//!
//! Every gate decision, exit decision, order and realized outcome is emitted
//! with enough context (score, breakdown, regime, threshold, correlation id)
//! for an external tool to reconstruct why it happened.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::exit::{ExitAction, HardRule, UrgencyBreakdown};
use crate::gate::GateDecision;
use crate::learner::{MultiplierChange, TradeOutcome};
use crate::scoring::Contribution;
use crate::threshold::ThresholdChange;
use crate::types::{ComponentId, OrderSide, Regime, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    FeedAuth,
    BrokerAuth,
    StateCorruption,
    ReconciliationRecovery,
    ReconciliationFailed,
    MalformedOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecisionEvent {
    GateDecision {
        symbol: String,
        score: f64,
        breakdown: BTreeMap<ComponentId, Contribution>,
        regime: Regime,
        threshold: f64,
        toxicity: f64,
        freshness: f64,
        decision: GateDecision,
    },
    ExitDecision {
        symbol: String,
        correlation_id: Uuid,
        entry_score: f64,
        current_score: Option<f64>,
        breakdown: Option<BTreeMap<ComponentId, Contribution>>,
        regime: Regime,
        threshold: f64,
        urgency: f64,
        urgency_breakdown: UrgencyBreakdown,
        hard_rule: Option<HardRule>,
        action: ExitAction,
        pnl_pct: f64,
    },
    Order {
        symbol: String,
        correlation_id: Uuid,
        side: OrderSide,
        qty: Decimal,
        purpose: String,
        filled: bool,
        fill_price: Option<Decimal>,
        blocked_reason: Option<String>,
    },
    TradeOutcome(TradeOutcome),
    Recovery {
        symbol: String,
        correlation_id: Uuid,
        side: Side,
        qty: Decimal,
        avg_entry_price: Decimal,
    },
    Flushed {
        symbol: String,
        correlation_id: Uuid,
        side: Side,
        qty: Decimal,
    },
    QuantityCorrected {
        symbol: String,
        from: Decimal,
        to: Decimal,
    },
    ThresholdChanged(ThresholdChange),
    WeightChanged(MultiplierChange),
    Freeze {
        origin: String,
        active: bool,
        reason: String,
    },
    Alert {
        kind: AlertKind,
        message: String,
    },
}

impl DecisionEvent {
    pub fn alert(kind: AlertKind, message: impl Into<String>) -> Self {
        DecisionEvent::Alert {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DecisionEvent::GateDecision { .. } => "gate_decision",
            DecisionEvent::ExitDecision { .. } => "exit_decision",
            DecisionEvent::Order { .. } => "order",
            DecisionEvent::TradeOutcome(_) => "trade_outcome",
            DecisionEvent::Recovery { .. } => "recovery",
            DecisionEvent::Flushed { .. } => "flushed",
            DecisionEvent::QuantityCorrected { .. } => "quantity_corrected",
            DecisionEvent::ThresholdChanged(_) => "threshold_changed",
            DecisionEvent::WeightChanged(_) => "weight_changed",
            DecisionEvent::Freeze { .. } => "freeze",
            DecisionEvent::Alert { .. } => "alert",
        }
    }
}

/// Timestamped envelope as written to the sink
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: DecisionEvent,
}

/// Append-only event destination. Emission is best effort: a failing sink
/// never interrupts the decision loop.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, at: DateTime<Utc>, event: DecisionEvent);
}

/// One JSON object per line
pub struct JsonlEventSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlEventSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, line: &str) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl EventSink for JsonlEventSink {
    async fn emit(&self, at: DateTime<Utc>, event: DecisionEvent) {
        let kind = event.kind();
        let record = EventRecord { at, event };
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize {} event: {}", kind, e);
                return;
            }
        };
        if let Err(e) = self.append(&line).await {
            warn!("Failed to write {} event to {}: {}", kind, self.path.display(), e);
        }
    }
}

/// In-memory sink for tests and dry runs
#[derive(Default)]
pub struct MemoryEventSink {
    records: Mutex<Vec<EventRecord>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<EventRecord> {
        self.records.lock().await.clone()
    }

    pub async fn count(&self, kind: &str) -> usize {
        self.records
            .lock()
            .await
            .iter()
            .filter(|r| r.event.kind() == kind)
            .count()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn emit(&self, at: DateTime<Utc>, event: DecisionEvent) {
        self.records.lock().await.push(EventRecord { at, event });
    }
}
