//! In-memory feed that replays queued responses per symbol.
//!
//! Used for paper sessions driven from recorded data and for exercising the
//! poller's error handling without a network.

use crate::types::*;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub struct ScriptedFeed {
    name: String,
    queued: Mutex<HashMap<String, VecDeque<Result<PartialSignal>>>>,
    /// Served when a symbol's queue is empty
    steady: Mutex<HashMap<String, RawSignal>>,
    calls: Mutex<HashMap<String, u64>>,
    remaining: AtomicU64,
}

impl ScriptedFeed {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            queued: Mutex::new(HashMap::new()),
            steady: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            remaining: AtomicU64::new(u64::MAX),
        }
    }

    /// Queue one response for the symbol, served in FIFO order
    pub fn push(&self, symbol: &str, response: Result<PartialSignal>) {
        if let Ok(mut queued) = self.queued.lock() {
            queued
                .entry(symbol.to_uppercase())
                .or_default()
                .push_back(response);
        }
    }

    /// Fields returned once the queue for the symbol is drained
    pub fn set_steady(&self, symbol: &str, fields: RawSignal) {
        if let Ok(mut steady) = self.steady.lock() {
            steady.insert(symbol.to_uppercase(), fields);
        }
    }

    pub fn set_rate_limit_remaining(&self, remaining: Option<u32>) {
        let value = remaining.map(|r| r as u64).unwrap_or(u64::MAX);
        self.remaining.store(value, Ordering::Relaxed);
    }

    pub fn calls(&self, symbol: &str) -> u64 {
        self.calls
            .lock()
            .map(|c| c.get(&symbol.to_uppercase()).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl MarketDataFeed for ScriptedFeed {
    async fn fetch(&self, symbol: &str) -> Result<PartialSignal> {
        let key = symbol.to_uppercase();
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(key.clone()).or_insert(0) += 1;
        }

        let queued = self
            .queued
            .lock()
            .map_err(|e| FeedError::Unknown(e.to_string()))?
            .get_mut(&key)
            .and_then(|q| q.pop_front());
        if let Some(response) = queued {
            return response;
        }

        let steady = self
            .steady
            .lock()
            .map_err(|e| FeedError::Unknown(e.to_string()))?
            .get(&key)
            .cloned();
        match steady {
            Some(fields) => Ok(PartialSignal {
                symbol: key,
                captured_at: Utc::now(),
                fields,
            }),
            None => Err(FeedError::Unknown(format!("no scripted data for {}", key))),
        }
    }

    fn rate_limit_remaining(&self) -> Option<u32> {
        match self.remaining.load(Ordering::Relaxed) {
            u64::MAX => None,
            r => Some(r.min(u32::MAX as u64) as u32),
        }
    }

    async fn health(&self) -> SourceHealth {
        SourceHealth {
            source: self.name.clone(),
            is_healthy: true,
            last_success: None,
            success_rate: 1.0,
            avg_latency_ms: 0,
            rate_limit_remaining: self.rate_limit_remaining(),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
