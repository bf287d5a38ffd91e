//! Last-trade prices from the public ticker channel

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Notify;

use crate::adapters::errors::ExchangeResult;
use crate::adapters::types::TickerMessage;
use crate::config::FeedSettings;
use crate::core::subscription::{
    ConnectionState, StreamHandler, SubscriptionClient, SubscriptionConfig,
};

/// Channel carrying last-trade prices
pub const TICKER_CHANNEL: &str = "ticker";

/// product -> last price
pub type PriceSnapshot = HashMap<String, f64>;

/// Price map written by the stream task and read by the engine
#[derive(Debug, Default)]
pub struct PriceBook {
    prices: RwLock<PriceSnapshot>,
    updated: Notify,
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a price, replacing any prior value for the product
    pub fn update(&self, product: &str, price: f64) {
        self.prices.write().insert(product.to_string(), price);
        self.updated.notify_waiters();
    }

    pub fn price(&self, product: &str) -> Option<f64> {
        self.prices.read().get(product).copied()
    }

    /// Copy of the full mapping
    pub fn snapshot(&self) -> PriceSnapshot {
        self.prices.read().clone()
    }

    /// Products of `universe` without a recorded price
    pub fn missing(&self, universe: &[String]) -> Vec<String> {
        let prices = self.prices.read();
        universe
            .iter()
            .filter(|p| !prices.contains_key(p.as_str()))
            .cloned()
            .collect()
    }

    /// Wait until every product in `universe` has a price
    ///
    /// Returns `true` as soon as coverage is complete, `false` if `timeout`
    /// elapses first.
    pub async fn wait_until_ready(&self, universe: &[String], timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.updated.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.missing(universe).is_empty() {
                return true;
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let missing = self.missing(universe);
                if missing.is_empty() {
                    return true;
                }
                tracing::warn!(missing = ?missing, "Timed out waiting for prices");
                return false;
            }
        }
    }
}

struct TickerHandler {
    book: Arc<PriceBook>,
}

#[async_trait]
impl StreamHandler for TickerHandler {
    async fn on_open(&self) -> anyhow::Result<()> {
        tracing::info!("Price stream open");
        Ok(())
    }

    async fn on_message(&self, raw: &str) -> anyhow::Result<()> {
        // Subscription acks and heartbeats carry no price
        let Ok(ticker) = serde_json::from_str::<TickerMessage>(raw) else {
            return Ok(());
        };
        let Some(product) = ticker.product_id.as_deref() else {
            return Ok(());
        };
        match ticker.price() {
            Some(price) => {
                self.book.update(product, price);
                tracing::trace!(product = %product, price, "Price updated");
            }
            None => {
                tracing::debug!(product = %product, raw_price = %ticker.price, "Unparseable ticker price");
            }
        }
        Ok(())
    }

    async fn on_close(&self) -> anyhow::Result<()> {
        tracing::info!("Price stream closed");
        Ok(())
    }
}

/// Ticker subscription plus the price book it maintains
pub struct PriceFeed {
    client: SubscriptionClient,
    book: Arc<PriceBook>,
}

impl PriceFeed {
    /// Feed over the ticker channel for `products`
    pub fn new(url: &str, products: Vec<String>, feed: &FeedSettings) -> Self {
        Self::with_config(SubscriptionConfig::new(url, products, TICKER_CHANNEL, feed))
    }

    pub fn with_config(config: SubscriptionConfig) -> Self {
        Self {
            client: SubscriptionClient::new(config),
            book: Arc::new(PriceBook::new()),
        }
    }

    pub fn start(&self) -> ExchangeResult<()> {
        self.client.start(Arc::new(TickerHandler {
            book: Arc::clone(&self.book),
        }))
    }

    pub fn close(&self) {
        self.client.close();
    }

    pub async fn shutdown(&self) {
        self.client.shutdown().await;
    }

    pub fn book(&self) -> Arc<PriceBook> {
        Arc::clone(&self.book)
    }

    pub fn snapshot(&self) -> PriceSnapshot {
        self.book.snapshot()
    }

    pub async fn wait_until_ready(&self, universe: &[String], timeout: Duration) -> bool {
        self.book.wait_until_ready(universe, timeout).await
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.client.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn products(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_ticker_message_updates_book() {
        let book = Arc::new(PriceBook::new());
        let handler = TickerHandler {
            book: Arc::clone(&book),
        };

        handler
            .on_message(r#"{"type":"ticker","product_id":"BTC-EUR","price":"40000.5"}"#)
            .await
            .unwrap();
        handler
            .on_message(r#"{"type":"ticker","product_id":"BTC-EUR","price":"40100"}"#)
            .await
            .unwrap();

        assert_eq!(book.price("BTC-EUR"), Some(40100.0));
    }

    #[tokio::test]
    async fn test_messages_without_price_are_ignored() {
        let book = Arc::new(PriceBook::new());
        let handler = TickerHandler {
            book: Arc::clone(&book),
        };

        handler
            .on_message(r#"{"type":"subscriptions","channels":[{"name":"ticker"}]}"#)
            .await
            .unwrap();
        handler
            .on_message(r#"{"type":"ticker","product_id":"ETH-EUR","price":"n/a"}"#)
            .await
            .unwrap();
        handler.on_message("not json").await.unwrap();

        assert!(book.snapshot().is_empty());
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let book = PriceBook::new();
        book.update("BTC-EUR", 1.0);
        let snapshot = book.snapshot();
        book.update("BTC-EUR", 2.0);
        assert_eq!(snapshot["BTC-EUR"], 1.0);
        assert_eq!(book.price("BTC-EUR"), Some(2.0));
    }

    #[tokio::test]
    async fn test_wait_until_ready_returns_when_covered() {
        let book = Arc::new(PriceBook::new());
        let writer = Arc::clone(&book);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.update("BTC-EUR", 1.0);
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.update("ETH-EUR", 2.0);
        });

        let started = std::time::Instant::now();
        let ready = book
            .wait_until_ready(&products(&["BTC-EUR", "ETH-EUR"]), Duration::from_secs(5))
            .await;
        assert!(ready);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_wait_until_ready_times_out_with_missing_product() {
        let book = PriceBook::new();
        book.update("BTC-EUR", 1.0);
        let ready = book
            .wait_until_ready(&products(&["BTC-EUR", "LTC-EUR"]), Duration::from_millis(50))
            .await;
        assert!(!ready);
        assert_eq!(book.missing(&products(&["BTC-EUR", "LTC-EUR"])), vec!["LTC-EUR"]);
    }

    #[tokio::test]
    async fn test_empty_universe_is_ready_immediately() {
        let book = PriceBook::new();
        assert!(book.wait_until_ready(&[], Duration::from_millis(1)).await);
    }
}
