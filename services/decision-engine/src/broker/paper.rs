//! In-memory broker for paper trading
//!
//! Fills market orders at the reference price (or last observed mark) with a
//! small random adverse slippage. Gross exposure may not exceed equity.

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use rust_decimal::prelude::{FromPrimitive, Signed};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::{AccountState, Broker, BrokerPosition, OrderResult, OrderSpec};
use crate::error::BrokerError;
use crate::types::OrderSide;

#[derive(Debug, Clone)]
struct PaperHolding {
    /// Signed quantity
    qty: Decimal,
    avg_price: Decimal,
}

#[derive(Debug, Default)]
struct PaperBook {
    cash: Decimal,
    holdings: BTreeMap<String, PaperHolding>,
    marks: BTreeMap<String, Decimal>,
    order_seq: u64,
}

impl PaperBook {
    fn mark_for(&self, symbol: &str, holding: &PaperHolding) -> Decimal {
        self.marks.get(symbol).copied().unwrap_or(holding.avg_price)
    }

    fn equity(&self) -> Decimal {
        self.cash
            + self
                .holdings
                .iter()
                .map(|(symbol, h)| h.qty * self.mark_for(symbol, h))
                .sum::<Decimal>()
    }

    fn gross(&self) -> Decimal {
        self.holdings
            .iter()
            .map(|(symbol, h)| (h.qty * self.mark_for(symbol, h)).abs())
            .sum()
    }
}

pub struct PaperBroker {
    book: Mutex<PaperBook>,
    slippage_bps: f64,
}

impl PaperBroker {
    pub fn new(starting_cash: Decimal, slippage_bps: f64) -> Self {
        info!("Paper broker starting with {} cash", starting_cash);
        Self {
            book: Mutex::new(PaperBook {
                cash: starting_cash,
                ..Default::default()
            }),
            slippage_bps: slippage_bps.max(0.0),
        }
    }

    /// Seed a position directly, as if it had been opened elsewhere
    pub async fn seed_position(&self, symbol: &str, qty: Decimal, avg_price: Decimal) {
        let mut book = self.book.lock().await;
        book.cash -= qty * avg_price;
        book.holdings.insert(symbol.to_uppercase(), PaperHolding { qty, avg_price });
    }

    fn slipped(&self, price: Decimal, side: OrderSide) -> Decimal {
        if self.slippage_bps <= 0.0 {
            return price;
        }
        let bps = rand::thread_rng().gen_range(0.0..=self.slippage_bps);
        let factor = Decimal::from_f64(bps / 10_000.0).unwrap_or(Decimal::ZERO);
        match side {
            OrderSide::Buy => price * (Decimal::ONE + factor),
            OrderSide::Sell => price * (Decimal::ONE - factor),
        }
    }

    fn fill(&self, book: &mut PaperBook, spec: &OrderSpec) -> Result<OrderResult, BrokerError> {
        if spec.qty <= Decimal::ZERO {
            return Err(BrokerError::Rejected(format!("non-positive quantity {}", spec.qty)));
        }
        let symbol = spec.symbol.to_uppercase();
        let base_price = spec
            .reference_price
            .or_else(|| book.marks.get(&symbol).copied())
            .filter(|p| *p > Decimal::ZERO)
            .ok_or_else(|| BrokerError::Rejected(format!("no price for {}", symbol)))?;

        let signed = match spec.side {
            OrderSide::Buy => spec.qty,
            OrderSide::Sell => -spec.qty,
        };
        let current = book.holdings.get(&symbol).map(|h| h.qty).unwrap_or(Decimal::ZERO);
        let next = current + signed;
        let price = self.slipped(base_price, spec.side);

        // Only orders that grow the position need buying power
        if next.abs() > current.abs() {
            let added = (next.abs() - current.abs()) * price;
            let available = book.equity() - book.gross();
            if added > available {
                return Err(BrokerError::InsufficientFunds {
                    required: added.round_dp(2).to_string(),
                    available: available.round_dp(2).to_string(),
                });
            }
        }

        book.cash -= signed * price;
        if next.is_zero() {
            book.holdings.remove(&symbol);
        } else {
            let avg_price = match book.holdings.get(&symbol) {
                // Same direction and growing: weighted average
                Some(h) if h.qty.signum() == next.signum() && next.abs() > h.qty.abs() => {
                    (h.avg_price * h.qty.abs() + price * spec.qty) / next.abs()
                }
                // Reducing keeps the cost basis
                Some(h) if h.qty.signum() == next.signum() => h.avg_price,
                // New or flipped
                _ => price,
            };
            book.holdings.insert(symbol.clone(), PaperHolding { qty: next, avg_price });
        }
        book.marks.insert(symbol.clone(), base_price);
        book.order_seq += 1;

        debug!(
            symbol = %symbol,
            client_order_id = %spec.client_order_id,
            "Paper fill {} {} @ {}",
            spec.side,
            spec.qty,
            price
        );

        Ok(OrderResult {
            order_id: format!("paper-{}", book.order_seq),
            client_order_id: spec.client_order_id,
            symbol,
            side: spec.side,
            filled_qty: spec.qty,
            avg_fill_price: price,
            filled_at: Utc::now(),
        })
    }
}

#[async_trait]
impl Broker for PaperBroker {
    fn name(&self) -> &str {
        "paper"
    }

    async fn submit_order(&self, spec: &OrderSpec) -> Result<OrderResult, BrokerError> {
        let mut book = self.book.lock().await;
        self.fill(&mut book, spec)
    }

    async fn list_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        let book = self.book.lock().await;
        Ok(book
            .holdings
            .iter()
            .map(|(symbol, h)| BrokerPosition {
                symbol: symbol.clone(),
                qty: h.qty,
                avg_entry_price: h.avg_price,
                market_price: book.marks.get(symbol).copied(),
            })
            .collect())
    }

    async fn get_account(&self) -> Result<AccountState, BrokerError> {
        let book = self.book.lock().await;
        let equity = book.equity();
        Ok(AccountState {
            equity,
            cash: book.cash,
            buying_power: (equity - book.gross()).max(Decimal::ZERO),
        })
    }

    async fn close_position(&self, symbol: &str) -> Result<OrderResult, BrokerError> {
        let mut book = self.book.lock().await;
        let symbol = symbol.to_uppercase();
        let qty = book
            .holdings
            .get(&symbol)
            .map(|h| h.qty)
            .ok_or_else(|| BrokerError::NoPosition(symbol.clone()))?;
        let spec = OrderSpec {
            symbol: symbol.clone(),
            side: if qty > Decimal::ZERO { OrderSide::Sell } else { OrderSide::Buy },
            qty: qty.abs(),
            client_order_id: Uuid::new_v4(),
            reference_price: None,
        };
        self.fill(&mut book, &spec)
    }

    async fn observe_mark(&self, symbol: &str, price: Decimal) {
        if price > Decimal::ZERO {
            self.book.lock().await.marks.insert(symbol.to_uppercase(), price);
        }
    }
}
