//! Position reconciliation - converge the local book onto the broker's view
//!
//! The broker always wins:
//! - local position missing at the broker: flushed
//! - broker position missing locally: rebuilt with best-effort metadata
//! - side mismatch: rebuilt; quantity or basis mismatch: corrected in place
//!
//! Applying the same broker snapshot twice leaves the book unchanged.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::BrokerPosition;
use crate::error::BrokerError;
use crate::executor::OrderExecutor;
use crate::portfolio::{Position, PositionBook, PositionStore};

#[derive(Debug, Clone, PartialEq)]
pub struct QuantityCorrection {
    pub symbol: String,
    pub from: Decimal,
    pub to: Decimal,
}

/// Result of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub at: Option<DateTime<Utc>>,
    pub matched: usize,
    pub corrected: Vec<QuantityCorrection>,
    /// Positions rebuilt from the broker
    pub recovered: Vec<Position>,
    /// Local positions the broker no longer holds
    pub flushed: Vec<Position>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.corrected.is_empty() && self.recovered.is_empty() && self.flushed.is_empty()
    }
}

/// Rebuild a local record for a position only the broker knows about
fn recover(bp: &BrokerPosition, now: DateTime<Utc>) -> Position {
    let mark = bp.market_price.filter(|p| *p > Decimal::ZERO);
    Position {
        symbol: bp.symbol.to_uppercase(),
        side: bp.side(),
        qty: bp.abs_qty(),
        entry_price: bp.avg_entry_price,
        entry_time: now,
        entry_score: 0.0,
        entry_component_snapshot: BTreeMap::new(),
        correlation_id: Uuid::new_v4(),
        entry_regime: None,
        best_mark: bp.avg_entry_price,
        last_mark: mark,
        reduced: false,
        recovered: true,
    }
}

/// Apply a broker snapshot to the book
pub fn apply(book: &mut PositionBook, broker: &[BrokerPosition], now: DateTime<Utc>) -> ReconcileReport {
    let mut report = ReconcileReport {
        at: Some(now),
        ..Default::default()
    };

    let remote: BTreeMap<String, &BrokerPosition> = broker
        .iter()
        .filter(|bp| !bp.qty.is_zero())
        .map(|bp| (bp.symbol.to_uppercase(), bp))
        .collect();

    let local: BTreeSet<String> = book.symbols();
    for symbol in &local {
        if !remote.contains_key(symbol) {
            if let Some(pos) = book.close(symbol) {
                warn!(
                    symbol = %symbol,
                    correlation_id = %pos.correlation_id,
                    "Position absent at broker, flushing local record"
                );
                report.flushed.push(pos);
            }
        }
    }

    for (symbol, bp) in &remote {
        let Some(pos) = book.get_mut(symbol) else {
            let rebuilt = recover(bp, now);
            warn!(
                symbol = %symbol,
                correlation_id = %rebuilt.correlation_id,
                "Broker position unknown locally, recovered {} {} @ {}",
                rebuilt.side,
                rebuilt.qty,
                rebuilt.entry_price
            );
            book.positions.insert(symbol.clone(), rebuilt.clone());
            report.recovered.push(rebuilt);
            continue;
        };

        if pos.side != bp.side() {
            let rebuilt = recover(bp, now);
            warn!(
                symbol = %symbol,
                "Side mismatch (local {}, broker {}), rebuilding from broker",
                pos.side,
                rebuilt.side
            );
            *pos = rebuilt.clone();
            report.recovered.push(rebuilt);
            continue;
        }

        let mut clean = true;
        if pos.qty != bp.abs_qty() {
            info!(symbol = %symbol, "Quantity corrected {} -> {} (broker)", pos.qty, bp.abs_qty());
            report.corrected.push(QuantityCorrection {
                symbol: symbol.clone(),
                from: pos.qty,
                to: bp.abs_qty(),
            });
            pos.qty = bp.abs_qty();
            clean = false;
        }
        if bp.avg_entry_price > Decimal::ZERO && pos.entry_price != bp.avg_entry_price {
            debug!(symbol = %symbol, "Entry basis {} -> {} (broker)", pos.entry_price, bp.avg_entry_price);
            pos.entry_price = bp.avg_entry_price;
        }
        if let Some(mark) = bp.market_price {
            pos.mark(mark);
        }
        if clean {
            report.matched += 1;
        }
    }

    report
}

/// Fetch the broker's positions and apply them while holding the book lock,
/// so the decision loop cannot interleave with the read-modify-write.
pub async fn reconcile(
    executor: &OrderExecutor,
    store: &PositionStore,
    now: DateTime<Utc>,
) -> Result<ReconcileReport, BrokerError> {
    let mut book = store.lock().await;
    let broker_positions = executor.positions().await?;
    let report = apply(&mut book, &broker_positions, now);
    info!(
        "Reconciliation complete: {} matched, {} corrected, {} recovered, {} flushed",
        report.matched,
        report.corrected.len(),
        report.recovered.len(),
        report.flushed.len()
    );
    Ok(report)
}
