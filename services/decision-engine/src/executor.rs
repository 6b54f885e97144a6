//! Order executor - bounded, retried broker calls with typed outcomes

use rust_decimal::Decimal;
use serde::Serialize;
use signal_feed::BackoffPolicy;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::broker::{AccountState, Broker, BrokerPosition, OrderResult, OrderSpec};
use crate::error::BrokerError;

/// Result of an order attempt. Broker failures never escape as errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Filled(OrderResult),
    Blocked {
        reason: String,
        #[serde(skip)]
        error: BrokerError,
    },
}

impl ExecutionOutcome {
    pub fn fill(&self) -> Option<&OrderResult> {
        match self {
            ExecutionOutcome::Filled(result) => Some(result),
            ExecutionOutcome::Blocked { .. } => None,
        }
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ExecutionOutcome::Blocked { error, .. } if error.is_auth())
    }

    fn blocked(error: BrokerError) -> Self {
        ExecutionOutcome::Blocked {
            reason: error.code().to_string(),
            error,
        }
    }
}

pub struct OrderExecutor {
    broker: Arc<dyn Broker>,
    call_timeout: Duration,
    retry: BackoffPolicy,
}

impl OrderExecutor {
    pub fn new(broker: Arc<dyn Broker>, call_timeout: Duration, retry: BackoffPolicy) -> Self {
        Self {
            broker,
            call_timeout,
            retry,
        }
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Run `call` under the timeout, retrying connectivity-class failures only
    async fn with_retry<T, F, Fut>(&self, what: &str, mut call: F) -> Result<T, BrokerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BrokerError>>,
    {
        let mut attempt = 0u32;
        loop {
            let result = match tokio::time::timeout(self.call_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(BrokerError::Timeout(self.call_timeout.as_millis() as u64)),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        "{} via {} failed ({}), retry {} in {:?}",
                        what,
                        self.broker.name(),
                        e,
                        attempt + 1,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Submit an order. The client order id is reused across retries, so a
    /// broker that deduplicates on it sees one order.
    pub async fn submit(&self, spec: &OrderSpec) -> ExecutionOutcome {
        match self.with_retry("submit_order", || self.broker.submit_order(spec)).await {
            Ok(result) => {
                info!(
                    symbol = %spec.symbol,
                    correlation_id = %spec.client_order_id,
                    "Order filled: {} {} @ {}",
                    result.side,
                    result.filled_qty,
                    result.avg_fill_price
                );
                ExecutionOutcome::Filled(result)
            }
            Err(e) => {
                if e.is_auth() {
                    error!(symbol = %spec.symbol, "Broker auth failure: {}", e);
                } else {
                    warn!(
                        symbol = %spec.symbol,
                        correlation_id = %spec.client_order_id,
                        "Order blocked: {}",
                        e
                    );
                }
                ExecutionOutcome::blocked(e)
            }
        }
    }

    pub async fn close(&self, symbol: &str) -> ExecutionOutcome {
        match self.with_retry("close_position", || self.broker.close_position(symbol)).await {
            Ok(result) => {
                info!(symbol = %symbol, "Position closed at {}", result.avg_fill_price);
                ExecutionOutcome::Filled(result)
            }
            Err(e) => {
                warn!(symbol = %symbol, "Close blocked: {}", e);
                ExecutionOutcome::blocked(e)
            }
        }
    }

    pub async fn positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        self.with_retry("list_positions", || self.broker.list_positions()).await
    }

    pub async fn account(&self) -> Result<AccountState, BrokerError> {
        self.with_retry("get_account", || self.broker.get_account()).await
    }

    pub async fn observe_mark(&self, symbol: &str, price: Decimal) {
        self.broker.observe_mark(symbol, price).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Fails the first `failures` submits with the given error
    struct FlakyBroker {
        failures: u32,
        error: BrokerError,
        calls: AtomicU32,
        delay: Option<Duration>,
    }

    impl FlakyBroker {
        fn new(failures: u32, error: BrokerError) -> Self {
            Self {
                failures,
                error,
                calls: AtomicU32::new(0),
                delay: None,
            }
        }
    }

    #[async_trait]
    impl Broker for FlakyBroker {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn submit_order(&self, spec: &OrderSpec) -> Result<OrderResult, BrokerError> {
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(self.error.clone());
            }
            Ok(OrderResult {
                order_id: format!("o-{}", n),
                client_order_id: spec.client_order_id,
                symbol: spec.symbol.clone(),
                side: spec.side,
                filled_qty: spec.qty,
                avg_fill_price: Decimal::from(100),
                filled_at: chrono::Utc::now(),
            })
        }

        async fn list_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
            Ok(Vec::new())
        }

        async fn get_account(&self) -> Result<AccountState, BrokerError> {
            Err(BrokerError::Connectivity("down".into()))
        }

        async fn close_position(&self, symbol: &str) -> Result<OrderResult, BrokerError> {
            Err(BrokerError::NoPosition(symbol.to_string()))
        }
    }

    fn spec() -> OrderSpec {
        OrderSpec {
            symbol: "MSFT".to_string(),
            side: crate::types::OrderSide::Buy,
            qty: Decimal::from(2),
            client_order_id: uuid::Uuid::new_v4(),
            reference_price: Some(Decimal::from(100)),
        }
    }

    fn executor(broker: Arc<dyn Broker>) -> OrderExecutor {
        OrderExecutor::new(broker, Duration::from_millis(200), BackoffPolicy::fixed(1, 1.0, 1, 2))
    }

    #[tokio::test]
    async fn test_connectivity_errors_are_retried() {
        let broker = Arc::new(FlakyBroker::new(2, BrokerError::Connectivity("reset".into())));
        let outcome = executor(broker.clone()).submit(&spec()).await;
        assert!(outcome.fill().is_some());
        assert_eq!(broker.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let broker = Arc::new(FlakyBroker::new(5, BrokerError::Rejected("halted".into())));
        let outcome = executor(broker.clone()).submit(&spec()).await;
        match outcome {
            ExecutionOutcome::Blocked { reason, .. } => assert_eq!(reason, "rejected"),
            other => panic!("expected blocked, got {:?}", other),
        }
        assert_eq!(broker.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let broker = Arc::new(FlakyBroker::new(10, BrokerError::Connectivity("down".into())));
        let outcome = executor(broker.clone()).submit(&spec()).await;
        assert!(outcome.fill().is_none());
        assert_eq!(broker.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_hung_broker_times_out() {
        let mut flaky = FlakyBroker::new(0, BrokerError::Connectivity("n/a".into()));
        flaky.delay = Some(Duration::from_secs(5));
        let exec = OrderExecutor::new(Arc::new(flaky), Duration::from_millis(20), BackoffPolicy::fixed(1, 1.0, 1, 0));
        match exec.submit(&spec()).await {
            ExecutionOutcome::Blocked { error, .. } => assert_eq!(error, BrokerError::Timeout(20)),
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_auth_failure_flagged() {
        let broker = Arc::new(FlakyBroker::new(1, BrokerError::Auth("expired key".into())));
        let outcome = executor(broker).submit(&spec()).await;
        assert!(outcome.is_auth_failure());
    }

    #[tokio::test]
    async fn test_same_client_order_id_across_retries() {
        struct Recording(Mutex<Vec<uuid::Uuid>>);

        #[async_trait]
        impl Broker for Recording {
            fn name(&self) -> &str {
                "recording"
            }
            async fn submit_order(&self, spec: &OrderSpec) -> Result<OrderResult, BrokerError> {
                let mut seen = self.0.lock().unwrap();
                seen.push(spec.client_order_id);
                if seen.len() < 2 {
                    return Err(BrokerError::Timeout(1));
                }
                Err(BrokerError::Rejected("duplicate".into()))
            }
            async fn list_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
                Ok(Vec::new())
            }
            async fn get_account(&self) -> Result<AccountState, BrokerError> {
                Err(BrokerError::Connectivity("n/a".into()))
            }
            async fn close_position(&self, symbol: &str) -> Result<OrderResult, BrokerError> {
                Err(BrokerError::NoPosition(symbol.to_string()))
            }
        }

        let broker = Arc::new(Recording(Mutex::new(Vec::new())));
        let order = spec();
        executor(broker.clone()).submit(&order).await;
        let seen = broker.0.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|id| *id == order.client_order_id));
    }
}
