//! Coinbase REST client
//!
//! Signed account and order endpoints used by the rebalancing loop.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Deserialize;

use crate::adapters::errors::{ExchangeError, ExchangeResult};
use crate::adapters::shared::create_http_client;
use crate::adapters::traits::ExchangeAccount;
use crate::adapters::types::{AccountBalance, MarketOrderRequest, OrderAck};

use super::config::CoinbaseConfig;
use super::signing::{current_timestamp, sign_request};

#[derive(Debug, Deserialize)]
struct TimeResponse {
    iso: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Coinbase Exchange REST client implementing ExchangeAccount
pub struct CoinbaseRestClient {
    config: CoinbaseConfig,
    http_client: reqwest::Client,
}

impl CoinbaseRestClient {
    /// Create a new client for the configured environment
    pub fn new(config: CoinbaseConfig) -> Self {
        Self {
            config,
            http_client: create_http_client("coinbase"),
        }
    }

    /// Send a request carrying the CB-ACCESS-* authentication headers
    async fn signed_request(
        &self,
        method: Method,
        path: &str,
        body: Option<String>,
    ) -> ExchangeResult<reqwest::Response> {
        let timestamp = current_timestamp();
        let body_text = body.unwrap_or_default();
        let signature = sign_request(
            &self.config.credentials.api_secret,
            &timestamp,
            method.as_str(),
            path,
            &body_text,
        )?;

        let url = format!("{}{}", self.config.rest_base_url(), path);
        let mut request = self
            .http_client
            .request(method, &url)
            .header("CB-ACCESS-KEY", &self.config.credentials.api_key)
            .header("CB-ACCESS-SIGN", signature)
            .header("CB-ACCESS-TIMESTAMP", &timestamp)
            .header("CB-ACCESS-PASSPHRASE", &self.config.credentials.passphrase)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if !body_text.is_empty() {
            request = request.body(body_text);
        }

        Ok(request.send().await?)
    }

    /// Extract the exchange's error message from a failed response
    async fn error_message(response: reqwest::Response) -> String {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&body) {
            Ok(ErrorBody { message: Some(msg) }) => format!("{}: {}", status, msg),
            _ => format!("{}: {}", status, body),
        }
    }
}

#[async_trait]
impl ExchangeAccount for CoinbaseRestClient {
    async fn accounts(&self) -> ExchangeResult<Vec<AccountBalance>> {
        let response = self.signed_request(Method::GET, "/accounts", None).await?;
        if !response.status().is_success() {
            return Err(ExchangeError::InvalidResponse(
                Self::error_message(response).await,
            ));
        }
        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| ExchangeError::InvalidResponse(format!("accounts: {}", e)))
    }

    async fn place_market_order(&self, order: &MarketOrderRequest) -> ExchangeResult<OrderAck> {
        let body = serde_json::json!({
            "type": "market",
            "product_id": order.product_id,
            "side": order.side,
            "funds": format_funds(order.funds),
        })
        .to_string();

        let response = self
            .signed_request(Method::POST, "/orders", Some(body))
            .await?;
        if !response.status().is_success() {
            return Err(ExchangeError::OrderRejected(
                Self::error_message(response).await,
            ));
        }
        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| ExchangeError::InvalidResponse(format!("order ack: {}", e)))
    }

    async fn server_time(&self) -> ExchangeResult<DateTime<Utc>> {
        let url = format!("{}/time", self.config.rest_base_url());
        let response = self.http_client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ExchangeError::InvalidResponse(
                Self::error_message(response).await,
            ));
        }
        let time: TimeResponse = response
            .json()
            .await
            .map_err(|e| ExchangeError::InvalidResponse(format!("time: {}", e)))?;
        DateTime::parse_from_rfc3339(&time.iso)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| ExchangeError::InvalidResponse(format!("time '{}': {}", time.iso, e)))
    }

    fn exchange_name(&self) -> &'static str {
        "coinbase"
    }
}

/// Quote amounts are sent as decimal strings with at most 8 places
fn format_funds(funds: f64) -> String {
    let text = format!("{:.8}", funds);
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::coinbase::config::CoinbaseCredentials;
    use crate::adapters::types::OrderSide;
    use mockito::Matcher;

    fn client_for(server: &mockito::ServerGuard) -> CoinbaseRestClient {
        let credentials = CoinbaseCredentials {
            api_key: "test-key".into(),
            api_secret: "c2VjcmV0LWtleS1ieXRlcw==".into(),
            passphrase: "test-pass".into(),
        };
        let config = CoinbaseConfig::new(credentials, false).with_urls("ws://unused", server.url());
        CoinbaseRestClient::new(config)
    }

    #[tokio::test]
    async fn test_accounts_signed_and_parsed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/accounts")
            .match_header("CB-ACCESS-KEY", "test-key")
            .match_header("CB-ACCESS-PASSPHRASE", "test-pass")
            .match_header("CB-ACCESS-SIGN", Matcher::Regex("^[A-Za-z0-9+/]{43}=$".into()))
            .match_header("CB-ACCESS-TIMESTAMP", Matcher::Any)
            .with_status(200)
            .with_body(
                r#"[{"id":"1","currency":"BTC","balance":"0.5","available":"0.5","hold":"0"},
                    {"id":"2","currency":"EUR","balance":"1000.00","available":"1000","hold":"0"}]"#,
            )
            .create_async()
            .await;

        let accounts = client_for(&server).accounts().await.unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].currency, "BTC");
        assert_eq!(accounts[1].balance, 1000.0);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_place_market_order_pending() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/orders")
            .match_body(Matcher::Json(serde_json::json!({
                "type": "market",
                "product_id": "BTC-EUR",
                "side": "buy",
                "funds": "25.5"
            })))
            .with_status(200)
            .with_body(
                r#"{"id":"d0c5340b","product_id":"BTC-EUR","side":"buy","funds":"25.5",
                    "type":"market","status":"pending","created_at":"2021-03-01T10:00:00.000Z"}"#,
            )
            .create_async()
            .await;

        let order = MarketOrderRequest {
            product_id: "BTC-EUR".into(),
            side: OrderSide::Buy,
            funds: 25.5,
        };
        let ack = client_for(&server).place_market_order(&order).await.unwrap();
        assert!(ack.is_pending());
        assert_eq!(ack.id.as_deref(), Some("d0c5340b"));
        assert_eq!(ack.funds, Some(25.5));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_place_market_order_rejected() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/orders")
            .with_status(400)
            .with_body(r#"{"message":"Insufficient funds"}"#)
            .create_async()
            .await;

        let order = MarketOrderRequest {
            product_id: "ETH-EUR".into(),
            side: OrderSide::Sell,
            funds: 10.0,
        };
        let err = client_for(&server)
            .place_market_order(&order)
            .await
            .unwrap_err();
        match err {
            ExchangeError::OrderRejected(msg) => assert!(msg.contains("Insufficient funds")),
            other => panic!("Expected OrderRejected, got {:?}", other),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_time_parsed() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/time")
            .with_status(200)
            .with_body(r#"{"iso":"2021-03-01T10:00:00.123Z","epoch":1614592800.123}"#)
            .create_async()
            .await;

        let time = client_for(&server).server_time().await.unwrap();
        assert_eq!(time.timestamp(), 1_614_592_800);
        mock.assert_async().await;
    }

    #[test]
    fn test_format_funds() {
        assert_eq!(format_funds(25.5), "25.5");
        assert_eq!(format_funds(100.0), "100");
        assert_eq!(format_funds(0.123456789), "0.12345679");
    }
}
