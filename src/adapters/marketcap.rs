//! CoinMarketCap ranking adapter
//!
//! Fetches the latest listings and maps `symbol -> {rank, circulating_supply}`.

use async_trait::async_trait;
use serde::Deserialize;

use crate::adapters::errors::{ExchangeError, ExchangeResult};
use crate::adapters::shared::create_http_client;
use crate::adapters::traits::RankingSource;
use crate::adapters::types::{de_opt_f64, RankEntry, RankingSnapshot};
use crate::core::logging::sanitize;

const DEFAULT_LISTINGS_URL: &str =
    "https://pro-api.coinmarketcap.com/v1/cryptocurrency/listings/latest";
const LISTING_START: &str = "1";
const LISTING_LIMIT: &str = "400";

#[derive(Debug, Deserialize)]
struct ListingsResponse {
    #[serde(default)]
    data: Vec<Listing>,
}

#[derive(Debug, Deserialize)]
struct Listing {
    symbol: Option<String>,
    cmc_rank: Option<u32>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    circulating_supply: Option<f64>,
}

/// Ranking feed backed by the CoinMarketCap listings endpoint
pub struct MarketCapClient {
    api_key: String,
    url: String,
    convert: String,
    http_client: reqwest::Client,
}

impl MarketCapClient {
    /// Client for the public endpoint, prices converted to `convert`
    pub fn new(api_key: impl Into<String>, convert: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            url: DEFAULT_LISTINGS_URL.to_string(),
            convert: convert.into(),
            http_client: create_http_client("coinmarketcap"),
        }
    }

    /// Point the client at another listings URL
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Create from `CMC_API_KEY` and optional `CMC_API_URL`
    pub fn from_env(convert: &str) -> ExchangeResult<Self> {
        let api_key = std::env::var("CMC_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ExchangeError::AuthenticationFailed("CMC_API_KEY not set".into()))?;
        let client = Self::new(api_key, convert);
        Ok(match std::env::var("CMC_API_URL").ok().filter(|v| !v.is_empty()) {
            Some(url) => client.with_url(url),
            None => client,
        })
    }

    fn parse_listings(body: &str) -> ExchangeResult<RankingSnapshot> {
        let listings: ListingsResponse = serde_json::from_str(body)
            .map_err(|e| ExchangeError::InvalidResponse(format!("listings: {}", e)))?;

        Ok(listings
            .data
            .into_iter()
            .filter_map(|listing| {
                let symbol = listing.symbol?;
                let rank = listing.cmc_rank?;
                Some((
                    symbol,
                    RankEntry {
                        rank,
                        circulating_supply: listing.circulating_supply,
                    },
                ))
            })
            .collect())
    }
}

#[async_trait]
impl RankingSource for MarketCapClient {
    async fn fetch_rankings(&self) -> ExchangeResult<RankingSnapshot> {
        tracing::debug!(key = %sanitize(&self.api_key), "Requesting market caps");

        let response = self
            .http_client
            .get(&self.url)
            .header("Accepts", "application/json")
            .header("X-CMC_PRO_API_KEY", &self.api_key)
            .query(&[
                ("start", LISTING_START),
                ("limit", LISTING_LIMIT),
                ("convert", self.convert.as_str()),
            ])
            .send()
            .await;

        let response = match response {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                tracing::error!(status = %r.status(), "Could not retrieve market caps");
                return Ok(RankingSnapshot::new());
            }
            Err(e) => {
                tracing::error!(error = %e, "Could not retrieve market caps");
                return Ok(RankingSnapshot::new());
            }
        };

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(error = %e, "Could not read market cap response");
                return Ok(RankingSnapshot::new());
            }
        };

        let snapshot = Self::parse_listings(&body)?;
        tracing::debug!(symbols = snapshot.len(), "Market caps received");
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const LISTINGS: &str = r#"{
        "status": {"error_code": 0},
        "data": [
            {"id": 1, "symbol": "BTC", "cmc_rank": 1, "circulating_supply": 18600000},
            {"id": 1027, "symbol": "ETH", "cmc_rank": 2, "circulating_supply": 114000000.5},
            {"id": 52, "symbol": "XRP", "cmc_rank": 3, "circulating_supply": null},
            {"id": 99, "cmc_rank": 4}
        ]
    }"#;

    #[tokio::test]
    async fn test_fetch_rankings_maps_symbols() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/listings")
            .match_header("X-CMC_PRO_API_KEY", "cmc-key")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("start".into(), "1".into()),
                Matcher::UrlEncoded("limit".into(), "400".into()),
                Matcher::UrlEncoded("convert".into(), "EUR".into()),
            ]))
            .with_status(200)
            .with_body(LISTINGS)
            .create_async()
            .await;

        let client =
            MarketCapClient::new("cmc-key", "EUR").with_url(format!("{}/listings", server.url()));
        let snapshot = client.fetch_rankings().await.unwrap();

        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot["BTC"].rank, 1);
        assert_eq!(snapshot["ETH"].circulating_supply, Some(114000000.5));
        assert_eq!(snapshot["XRP"].circulating_supply, None);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_yields_empty_snapshot() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/listings")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let client =
            MarketCapClient::new("cmc-key", "EUR").with_url(format!("{}/listings", server.url()));
        let snapshot = client.fetch_rankings().await.unwrap();
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_host_yields_empty_snapshot() {
        let client = MarketCapClient::new("cmc-key", "EUR").with_url("http://127.0.0.1:9/listings");
        let snapshot = client.fetch_rankings().await.unwrap();
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_body_is_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/listings")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("<html>not json</html>")
            .create_async()
            .await;

        let client =
            MarketCapClient::new("cmc-key", "EUR").with_url(format!("{}/listings", server.url()));
        let result = client.fetch_rankings().await;
        assert!(matches!(result, Err(ExchangeError::InvalidResponse(_))));
    }
}
