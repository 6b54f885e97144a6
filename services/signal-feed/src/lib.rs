//! Signal Feed
//!
//! Ingestion side of the engine: feed contract, per-symbol signal cache, and
//! the background poller that keeps the cache warm.

pub mod backoff;
pub mod cache;
pub mod poller;
pub mod sources;
pub mod types;

pub use backoff::BackoffPolicy;
pub use cache::{CachedSignal, SignalCache};
pub use poller::{PollCycleReport, PollOutcome, Poller, PollerConfig, PollerStatus};
pub use sources::{HttpFeedConfig, HttpSignalFeed, ScriptedFeed};
pub use types::*;
