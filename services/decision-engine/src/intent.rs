//! Order intent tracking for idempotency
//!
//! Every order is registered as an intent before submission, keyed by its
//! correlation id (also the broker client order id). A pending intent for the
//! same symbol and order side blocks a second submission.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::types::OrderSide;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentPurpose {
    Entry,
    Reduce,
    Exit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IntentState {
    Pending,
    Filled { order_id: String, qty: Decimal, price: Decimal },
    Blocked { reason: String },
}

impl IntentState {
    pub fn is_final(&self) -> bool {
        !matches!(self, IntentState::Pending)
    }
}

#[derive(Debug, Clone)]
pub struct OrderIntent {
    pub correlation_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Decimal,
    pub purpose: IntentPurpose,
    pub state: IntentState,
    pub created_at: DateTime<Utc>,
}

pub struct IntentRegistry {
    intents: HashMap<Uuid, OrderIntent>,
    max_age: Duration,
    /// Pending intents older than this no longer block new ones
    pending_timeout: Duration,
}

impl Default for IntentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentRegistry {
    pub fn new() -> Self {
        Self {
            intents: HashMap::new(),
            max_age: Duration::hours(1),
            pending_timeout: Duration::minutes(5),
        }
    }

    /// Register an intent. Returns `None` when an equivalent one is in flight.
    pub fn create(
        &mut self,
        correlation_id: Uuid,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
        purpose: IntentPurpose,
        now: DateTime<Utc>,
    ) -> Option<OrderIntent> {
        if let Some(existing) = self.find_pending(symbol, side, now) {
            warn!(
                symbol = %symbol,
                "Pending {} intent {} already in flight, skipping",
                side,
                existing
            );
            return None;
        }

        let intent = OrderIntent {
            correlation_id,
            symbol: symbol.to_string(),
            side,
            qty,
            purpose,
            state: IntentState::Pending,
            created_at: now,
        };
        self.intents.insert(correlation_id, intent.clone());
        debug!(symbol = %symbol, correlation_id = %correlation_id, "Created {:?} intent", purpose);
        Some(intent)
    }

    pub fn get(&self, correlation_id: &Uuid) -> Option<&OrderIntent> {
        self.intents.get(correlation_id)
    }

    pub fn update_state(&mut self, correlation_id: &Uuid, state: IntentState) -> anyhow::Result<()> {
        match self.intents.get_mut(correlation_id) {
            Some(intent) => {
                debug!("Intent {} state: {:?} -> {:?}", correlation_id, intent.state, state);
                intent.state = state;
                Ok(())
            }
            None => Err(anyhow::anyhow!("Intent not found: {}", correlation_id)),
        }
    }

    /// Id of a recent pending intent for the same symbol and side
    pub fn find_pending(&self, symbol: &str, side: OrderSide, now: DateTime<Utc>) -> Option<Uuid> {
        self.intents
            .values()
            .find(|i| {
                i.symbol == symbol
                    && i.side == side
                    && i.state == IntentState::Pending
                    && now - i.created_at < self.pending_timeout
            })
            .map(|i| i.correlation_id)
    }

    pub fn pending_count(&self) -> usize {
        self.intents.values().filter(|i| !i.state.is_final()).count()
    }

    /// Drop intents older than the retention window
    pub fn cleanup(&mut self, now: DateTime<Utc>) {
        let before = self.intents.len();
        let max_age = self.max_age;
        self.intents.retain(|_, intent| now - intent.created_at < max_age);
        let removed = before - self.intents.len();
        if removed > 0 {
            debug!("Cleaned up {} old intents", removed);
        }
    }

    pub fn len(&self) -> usize {
        self.intents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }
}
