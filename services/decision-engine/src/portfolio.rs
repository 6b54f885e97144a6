//! Position tracking
//!
//! The broker is the source of truth; this book is a subordinate record that
//! carries the decision metadata the broker does not know about (entry score,
//! component snapshot, correlation id) and is reconciled periodically.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use crate::types::{ComponentId, Regime, Side};

/// A single open position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    /// Always positive; direction lives in `side`
    pub qty: Decimal,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub entry_score: f64,
    #[serde(default)]
    pub entry_component_snapshot: BTreeMap<ComponentId, f64>,
    pub correlation_id: Uuid,
    #[serde(default)]
    pub entry_regime: Option<Regime>,
    /// Most favourable mark seen since entry, for the trailing stop
    pub best_mark: Decimal,
    #[serde(default)]
    pub last_mark: Option<Decimal>,
    /// Already reduced once
    #[serde(default)]
    pub reduced: bool,
    /// Rebuilt from the broker without decision metadata
    #[serde(default)]
    pub recovered: bool,
}

impl Position {
    /// Unrealized P&L percent at `mark`, signed for the position's side
    pub fn pnl_pct(&self, mark: Decimal) -> f64 {
        if self.entry_price <= Decimal::ZERO {
            return 0.0;
        }
        let change = (mark - self.entry_price) / self.entry_price * Decimal::from(100);
        change.to_f64().unwrap_or(0.0) * self.side.sign()
    }

    /// Percent the mark has given back from the best mark
    pub fn retrace_pct(&self, mark: Decimal) -> f64 {
        if self.best_mark <= Decimal::ZERO {
            return 0.0;
        }
        let change = (mark - self.best_mark) / self.best_mark * Decimal::from(100);
        (-change.to_f64().unwrap_or(0.0) * self.side.sign()).max(0.0)
    }

    /// The best mark has been better than entry at some point
    pub fn has_been_in_profit(&self) -> bool {
        match self.side {
            Side::Long => self.best_mark > self.entry_price,
            Side::Short => self.best_mark < self.entry_price,
        }
    }

    pub fn notional(&self, mark: Decimal) -> Decimal {
        (self.qty * mark).abs()
    }

    /// Record a new mark, tracking the most favourable one
    pub fn mark(&mut self, price: Decimal) {
        if price <= Decimal::ZERO {
            return;
        }
        self.last_mark = Some(price);
        let better = match self.side {
            Side::Long => price > self.best_mark,
            Side::Short => price < self.best_mark,
        };
        if better {
            self.best_mark = price;
        }
    }

    pub fn current_mark(&self) -> Decimal {
        self.last_mark.unwrap_or(self.entry_price)
    }
}

/// Decision metadata captured when an entry order is sent
#[derive(Debug, Clone)]
pub struct EntryContext {
    pub symbol: String,
    pub side: Side,
    pub entry_score: f64,
    pub components: BTreeMap<ComponentId, f64>,
    pub regime: Regime,
    pub correlation_id: Uuid,
}

/// All open positions, keyed by symbol
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionBook {
    pub positions: BTreeMap<String, Position>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn get_mut(&mut self, symbol: &str) -> Option<&mut Position> {
        self.positions.get_mut(symbol)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn symbols(&self) -> BTreeSet<String> {
        self.positions.keys().cloned().collect()
    }

    /// Create a position from a confirmed entry fill
    pub fn open_from_fill(
        &mut self,
        ctx: &EntryContext,
        filled_qty: Decimal,
        fill_price: Decimal,
        at: DateTime<Utc>,
    ) -> &Position {
        info!(
            symbol = %ctx.symbol,
            correlation_id = %ctx.correlation_id,
            "New position: {} {} @ {}",
            ctx.side,
            filled_qty,
            fill_price
        );
        let position = Position {
            symbol: ctx.symbol.clone(),
            side: ctx.side,
            qty: filled_qty.abs(),
            entry_price: fill_price,
            entry_time: at,
            entry_score: ctx.entry_score,
            entry_component_snapshot: ctx.components.clone(),
            correlation_id: ctx.correlation_id,
            entry_regime: Some(ctx.regime),
            best_mark: fill_price,
            last_mark: Some(fill_price),
            reduced: false,
            recovered: false,
        };
        self.positions.insert(ctx.symbol.clone(), position);
        &self.positions[&ctx.symbol]
    }

    /// Apply a partial close; returns the remaining quantity
    pub fn apply_reduce(&mut self, symbol: &str, closed_qty: Decimal) -> Option<Decimal> {
        let pos = self.positions.get_mut(symbol)?;
        pos.qty = (pos.qty - closed_qty.abs()).max(Decimal::ZERO);
        pos.reduced = true;
        debug!(symbol = %symbol, "Position reduced by {} -> {}", closed_qty, pos.qty);
        Some(pos.qty)
    }

    /// Remove a position after a full exit fill
    pub fn close(&mut self, symbol: &str) -> Option<Position> {
        let pos = self.positions.remove(symbol)?;
        info!(
            symbol = %symbol,
            correlation_id = %pos.correlation_id,
            "Position closed"
        );
        Some(pos)
    }

    pub fn mark(&mut self, symbol: &str, price: Decimal) {
        if let Some(pos) = self.positions.get_mut(symbol) {
            pos.mark(price);
        }
    }

    /// Sum of |qty x mark| using each position's latest mark
    pub fn gross_exposure(&self) -> Decimal {
        self.positions
            .values()
            .map(|p| p.notional(p.current_mark()))
            .sum()
    }
}

/// Shared handle: the decision loop and reconciliation both take this lock
/// for their whole read-modify-write.
#[derive(Debug, Clone, Default)]
pub struct PositionStore {
    inner: Arc<Mutex<PositionBook>>,
}

impl PositionStore {
    pub fn new(book: PositionBook) -> Self {
        Self {
            inner: Arc::new(Mutex::new(book)),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, PositionBook> {
        self.inner.lock().await
    }

    pub async fn snapshot(&self) -> PositionBook {
        self.inner.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(symbol: &str, side: Side) -> EntryContext {
        let mut components = BTreeMap::new();
        components.insert(ComponentId::NetPremium, 1.8);
        EntryContext {
            symbol: symbol.to_string(),
            side,
            entry_score: 4.5 * side.sign(),
            components,
            regime: Regime::RiskOn,
            correlation_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_open_mark_and_pnl() {
        let mut book = PositionBook::new();
        book.open_from_fill(&ctx("SOL", Side::Long), Decimal::from(10), Decimal::from(100), Utc::now());

        book.mark("SOL", Decimal::from(110));
        let pos = book.get("SOL").unwrap();
        assert!((pos.pnl_pct(Decimal::from(110)) - 10.0).abs() < 1e-9);
        assert_eq!(pos.best_mark, Decimal::from(110));

        book.mark("SOL", Decimal::from(105));
        let pos = book.get("SOL").unwrap();
        assert_eq!(pos.best_mark, Decimal::from(110));
        assert!(pos.retrace_pct(Decimal::from(105)) > 4.5);
        assert_eq!(book.gross_exposure(), Decimal::from(1050));
    }

    #[test]
    fn test_short_pnl_is_inverted() {
        let mut book = PositionBook::new();
        book.open_from_fill(&ctx("QQQ", Side::Short), Decimal::from(5), Decimal::from(400), Utc::now());
        let pos = book.get("QQQ").unwrap();
        assert!((pos.pnl_pct(Decimal::from(380)) - 5.0).abs() < 1e-9);
        assert!(!pos.has_been_in_profit());

        book.mark("QQQ", Decimal::from(390));
        assert!(book.get("QQQ").unwrap().has_been_in_profit());
    }

    #[test]
    fn test_reduce_then_close() {
        let mut book = PositionBook::new();
        book.open_from_fill(&ctx("AAPL", Side::Long), Decimal::from(10), Decimal::from(200), Utc::now());
        assert_eq!(book.apply_reduce("AAPL", Decimal::from(5)), Some(Decimal::from(5)));
        assert!(book.get("AAPL").unwrap().reduced);

        let closed = book.close("AAPL").unwrap();
        assert_eq!(closed.qty, Decimal::from(5));
        assert!(book.is_empty());
        assert!(book.close("AAPL").is_none());
    }

    #[test]
    fn test_book_json_round_trip() {
        let mut book = PositionBook::new();
        book.open_from_fill(&ctx("NVDA", Side::Long), Decimal::new(25, 1), Decimal::new(87512, 2), Utc::now());
        let json = serde_json::to_string(&book).unwrap();
        let back: PositionBook = serde_json::from_str(&json).unwrap();
        assert_eq!(back, book);
    }
}
