//! Decision Engine Library
//!
//! Scores cached options-flow signals into a composite conviction score,
//! gates entries, watches open positions for exits and learns per-regime
//! component weights from realized trades.

pub mod broker;
pub mod config;
pub mod enrich;
pub mod error;
pub mod events;
pub mod executor;
pub mod exit;
pub mod freeze;
pub mod gate;
pub mod intent;
pub mod learner;
pub mod portfolio;
pub mod reconciler;
pub mod regime;
pub mod runner;
pub mod scoring;
pub mod state;
pub mod threshold;
pub mod types;


// Re-export main types for convenience
pub use broker::{AccountState, Broker, BrokerPosition, HttpBroker, HttpBrokerConfig, OrderResult, OrderSpec, PaperBroker};
pub use config::{EngineConfig, TradingMode};
pub use error::{BrokerError, ConfigError, LearnError, StateError};
pub use events::{AlertKind, DecisionEvent, EventSink, JsonlEventSink, MemoryEventSink};
pub use executor::{ExecutionOutcome, OrderExecutor};
pub use exit::{ExitAction, ExitEngine, ExitEvaluation};
pub use freeze::{FreezeOrigin, FreezeSwitch};
pub use gate::{EntryGate, GateDecision};
pub use learner::{TradeOutcome, WeightLearner};
pub use portfolio::{Position, PositionBook, PositionStore};
pub use regime::{SharedRegime, StaticRegime};
pub use runner::{EngineStores, Orchestrator};
pub use scoring::{CompositeScore, CompositeScorer};
pub use threshold::SelfHealingThreshold;
pub use types::{ComponentId, OrderSide, Side};
