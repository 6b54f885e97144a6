//! Broker contract
//!
//! The broker is the source of truth for open positions. Two implementations:
//! `HttpBroker` for a live account and `PaperBroker` for simulated fills.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BrokerError;
use crate::types::{OrderSide, Side};

pub mod http;
pub mod paper;

pub use http::{HttpBroker, HttpBrokerConfig};
pub use paper::PaperBroker;

/// Market order request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSpec {
    pub symbol: String,
    pub side: OrderSide,
    /// Always positive
    pub qty: Decimal,
    /// Correlation id of the decision that produced the order
    pub client_order_id: Uuid,
    /// Price the decision was made against
    #[serde(default)]
    pub reference_price: Option<Decimal>,
}

/// Confirmed fill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub order_id: String,
    pub client_order_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub filled_qty: Decimal,
    pub avg_fill_price: Decimal,
    pub filled_at: DateTime<Utc>,
}

/// Position as the broker reports it. `qty` is signed: negative is short.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub qty: Decimal,
    pub avg_entry_price: Decimal,
    #[serde(default)]
    pub market_price: Option<Decimal>,
}

impl BrokerPosition {
    pub fn side(&self) -> Side {
        if self.qty < Decimal::ZERO {
            Side::Short
        } else {
            Side::Long
        }
    }

    pub fn abs_qty(&self) -> Decimal {
        self.qty.abs()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub equity: Decimal,
    pub cash: Decimal,
    pub buying_power: Decimal,
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    async fn submit_order(&self, spec: &OrderSpec) -> Result<OrderResult, BrokerError>;

    async fn list_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError>;

    async fn get_account(&self) -> Result<AccountState, BrokerError>;

    /// Flatten the whole position in `symbol`
    async fn close_position(&self, symbol: &str) -> Result<OrderResult, BrokerError>;

    /// Latest observed price. Only simulated brokers need it.
    async fn observe_mark(&self, _symbol: &str, _price: Decimal) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_position_side_from_signed_qty() {
        let short = BrokerPosition {
            symbol: "TSLA".to_string(),
            qty: Decimal::from(-4),
            avg_entry_price: Decimal::from(250),
            market_price: None,
        };
        assert_eq!(short.side(), Side::Short);
        assert_eq!(short.abs_qty(), Decimal::from(4));
    }

    #[test]
    fn test_order_spec_wire_shape() {
        let spec = OrderSpec {
            symbol: "AAPL".to_string(),
            side: OrderSide::Buy,
            qty: Decimal::from(3),
            client_order_id: Uuid::nil(),
            reference_price: None,
        };
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["side"], "buy");
        assert_eq!(json["client_order_id"], "00000000-0000-0000-0000-000000000000");
    }
}
