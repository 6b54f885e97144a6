//! REST broker client

use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{AccountState, Broker, BrokerPosition, OrderResult, OrderSpec};
use crate::error::BrokerError;

#[derive(Debug, Clone)]
pub struct HttpBrokerConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub request_timeout: Duration,
}

impl Default for HttpBrokerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9090".to_string(),
            api_key: None,
            request_timeout: Duration::from_secs(15),
        }
    }
}

/// Broker API client
///
/// Endpoints:
/// - `POST   /v1/orders`
/// - `GET    /v1/positions`
/// - `DELETE /v1/positions/{symbol}`
/// - `GET    /v1/account`
pub struct HttpBroker {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct FundsBody {
    #[serde(default)]
    required: Option<String>,
    #[serde(default)]
    available: Option<String>,
}

impl HttpBroker {
    pub fn new(config: HttpBrokerConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
            request_timeout: config.request_timeout,
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> BrokerError {
        if e.is_timeout() {
            BrokerError::Timeout(self.request_timeout.as_millis() as u64)
        } else if e.is_connect() || e.is_request() {
            BrokerError::Connectivity(e.to_string())
        } else {
            BrokerError::Protocol(e.to_string())
        }
    }

    async fn send(&self, method: Method, path: &str, body: Option<&OrderSpec>) -> Result<Response, BrokerError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("{} {}", method, url);

        let mut req = self.client.request(method, &url);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let response = req.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        Err(Self::classify(status, text, path))
    }

    fn classify(status: StatusCode, text: String, path: &str) -> BrokerError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => BrokerError::Auth(format!("{} - {}", status, text)),
            StatusCode::PAYMENT_REQUIRED => {
                let body: Option<FundsBody> = serde_json::from_str(&text).ok();
                let (required, available) = body
                    .map(|b| (b.required.unwrap_or_default(), b.available.unwrap_or_default()))
                    .unwrap_or_default();
                BrokerError::InsufficientFunds { required, available }
            }
            StatusCode::NOT_FOUND => BrokerError::NoPosition(path.rsplit('/').next().unwrap_or(path).to_string()),
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                BrokerError::Connectivity(format!("{} - {}", status, text))
            }
            s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
                BrokerError::Connectivity(format!("{} - {}", status, text))
            }
            _ => {
                warn!("Broker rejected request to {}: {} - {}", path, status, text);
                BrokerError::Rejected(format!("{} - {}", status, text))
            }
        }
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, BrokerError> {
        response
            .json::<T>()
            .await
            .map_err(|e| BrokerError::Protocol(e.to_string()))
    }
}

#[async_trait]
impl Broker for HttpBroker {
    fn name(&self) -> &str {
        "http"
    }

    async fn submit_order(&self, spec: &OrderSpec) -> Result<OrderResult, BrokerError> {
        let response = self.send(Method::POST, "/v1/orders", Some(spec)).await?;
        Self::decode(response).await
    }

    async fn list_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        let response = self.send(Method::GET, "/v1/positions", None).await?;
        Self::decode(response).await
    }

    async fn get_account(&self) -> Result<AccountState, BrokerError> {
        let response = self.send(Method::GET, "/v1/account", None).await?;
        Self::decode(response).await
    }

    async fn close_position(&self, symbol: &str) -> Result<OrderResult, BrokerError> {
        let path = format!("/v1/positions/{}", symbol.to_uppercase());
        let response = self.send(Method::DELETE, &path, None).await?;
        Self::decode(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            HttpBroker::classify(StatusCode::UNAUTHORIZED, String::new(), "/v1/orders"),
            BrokerError::Auth(_)
        ));
        assert!(HttpBroker::classify(StatusCode::BAD_GATEWAY, String::new(), "/v1/orders").is_retryable());
        assert!(!HttpBroker::classify(StatusCode::UNPROCESSABLE_ENTITY, "halted".into(), "/v1/orders").is_retryable());
        assert_eq!(
            HttpBroker::classify(StatusCode::NOT_FOUND, String::new(), "/v1/positions/AAPL"),
            BrokerError::NoPosition("AAPL".to_string())
        );
        assert_eq!(
            HttpBroker::classify(
                StatusCode::PAYMENT_REQUIRED,
                r#"{"required":"5000","available":"120"}"#.into(),
                "/v1/orders"
            ),
            BrokerError::InsufficientFunds {
                required: "5000".to_string(),
                available: "120".to_string()
            }
        );
    }
}
