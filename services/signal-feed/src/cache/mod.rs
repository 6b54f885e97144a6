// In-process signal cache shared by the poller (writer) and the decision loop (reader)
use crate::types::*;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Maximum number of symbols held (prevents unbounded growth from a noisy feed)
const MAX_CACHE_SIZE: usize = 10000;

#[derive(Debug, Clone)]
struct CacheEntry {
    snapshot: Arc<SignalSnapshot>,
    updated_at: DateTime<Utc>,
}

/// Snapshot read from the cache together with its age
#[derive(Debug, Clone)]
pub struct CachedSignal {
    pub snapshot: Arc<SignalSnapshot>,
    /// Wall-clock time of the last merge into this symbol
    pub updated_at: DateTime<Utc>,
    /// Age measured from the feed capture time
    pub age: Duration,
}

/// Latest signal snapshot per symbol.
///
/// Every update builds a complete successor snapshot and swaps it in under the
/// write lock, so a reader only ever sees a whole snapshot.
#[derive(Clone, Default)]
pub struct SignalCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl SignalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a partial update into the symbol's snapshot and stamp the update time
    pub async fn update(&self, symbol: &str, partial: &PartialSignal) -> Arc<SignalSnapshot> {
        self.update_at(symbol, partial, Utc::now()).await
    }

    pub async fn update_at(
        &self,
        symbol: &str,
        partial: &PartialSignal,
        now: DateTime<Utc>,
    ) -> Arc<SignalSnapshot> {
        let key = symbol.to_uppercase();
        let mut entries = self.entries.write().await;

        let next = match entries.get(&key) {
            Some(existing) => existing.snapshot.merged_with(partial),
            None => SignalSnapshot::empty(&key, partial.captured_at).merged_with(partial),
        };
        let next = Arc::new(next);

        if entries.len() >= MAX_CACHE_SIZE && !entries.contains_key(&key) {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.updated_at)
                .map(|(k, _)| k.clone())
            {
                warn!("Signal cache full, evicting {}", oldest);
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key.clone(),
            CacheEntry {
                snapshot: Arc::clone(&next),
                updated_at: now,
            },
        );
        debug!("Signal cache updated for {}", key);
        next
    }

    /// Full snapshot plus its age relative to `now`
    pub async fn read_at(&self, symbol: &str, now: DateTime<Utc>) -> Option<CachedSignal> {
        let entries = self.entries.read().await;
        entries.get(&symbol.to_uppercase()).map(|entry| CachedSignal {
            snapshot: Arc::clone(&entry.snapshot),
            updated_at: entry.updated_at,
            age: (now - entry.snapshot.captured_at).max(Duration::zero()),
        })
    }

    pub async fn read(&self, symbol: &str) -> Option<CachedSignal> {
        self.read_at(symbol, Utc::now()).await
    }

    /// Most recent update time across all symbols
    pub async fn newest_update(&self) -> Option<DateTime<Utc>> {
        let entries = self.entries.read().await;
        entries.values().map(|e| e.updated_at).max()
    }

    pub async fn symbols(&self) -> Vec<String> {
        let entries = self.entries.read().await;
        let mut symbols: Vec<String> = entries.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop a symbol's cached snapshot
    pub async fn invalidate(&self, symbol: &str) {
        self.entries.write().await.remove(&symbol.to_uppercase());
    }
}
