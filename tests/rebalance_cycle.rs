//! End-to-end rebalancing cycle
//!
//! Prices and order events stream from local websocket servers, the ranking
//! comes from a mocked HTTP endpoint, the exchange account is an in-process
//! mock and every record lands in the in-memory ledger.
//!
//! # Running the tests
//! ```bash
//! cargo test --test rebalance_cycle
//! ```

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use common::{spawn_feed_server, wait_for, AfterScript};
use rebalance_bot::adapters::errors::{ExchangeError, ExchangeResult};
use rebalance_bot::adapters::types::{AccountBalance, MarketOrderRequest, OrderAck, OrderSide};
use rebalance_bot::adapters::{CoinbaseCredentials, ExchangeAccount, MarketCapClient};
use rebalance_bot::config::{load_config_from_str, AppConfig};
use rebalance_bot::core::{EngineParts, EngineState, OrderEventFeed, PriceFeed, RebalanceEngine};
use rebalance_bot::ledger::MemoryLedger;
use rebalance_bot::AppError;

// =============================================================================
// Mock exchange account
// =============================================================================

/// Fixed balances; every order is acknowledged as pending
#[derive(Default)]
struct MockAccount {
    balances: Vec<AccountBalance>,
    orders: Mutex<Vec<MarketOrderRequest>>,
}

impl MockAccount {
    fn new(balances: &[(&str, f64)]) -> Self {
        Self {
            balances: balances
                .iter()
                .map(|(currency, balance)| AccountBalance {
                    currency: currency.to_string(),
                    balance: *balance,
                })
                .collect(),
            orders: Mutex::new(Vec::new()),
        }
    }

    fn placed(&self) -> Vec<(String, OrderSide, f64)> {
        self.orders
            .lock()
            .iter()
            .map(|o| (o.product_id.clone(), o.side, o.funds))
            .collect()
    }
}

#[async_trait]
impl ExchangeAccount for MockAccount {
    async fn accounts(&self) -> ExchangeResult<Vec<AccountBalance>> {
        Ok(self.balances.clone())
    }

    async fn place_market_order(&self, order: &MarketOrderRequest) -> ExchangeResult<OrderAck> {
        let mut orders = self.orders.lock();
        orders.push(order.clone());
        if order.funds <= 0.0 {
            return Err(ExchangeError::OrderRejected("funds must be positive".into()));
        }
        Ok(OrderAck {
            id: Some(format!("ord-{}", orders.len())),
            product_id: Some(order.product_id.clone()),
            side: Some(order.side),
            size: None,
            funds: Some(order.funds),
            status: Some("pending".into()),
            created_at: Some(Utc::now().to_rfc3339()),
        })
    }

    async fn server_time(&self) -> ExchangeResult<DateTime<Utc>> {
        Ok(Utc::now())
    }

    fn exchange_name(&self) -> &'static str {
        "mock"
    }
}

// =============================================================================
// Fixtures
// =============================================================================

const CONFIG: &str = r#"
strategy:
  universe: [BTC, ETH, LTC]
  base_currency: EUR
  base_weight: 0.1
  portfolio_size: 2
  timestep_secs: 60
  execution_name: cycle-test
feed:
  reconnect_interval_secs: 1
  ping_interval_secs: 30
  ping_timeout_secs: 10
  price_wait_secs: 5
"#;

const RANKING_BODY: &str = r#"{
  "status": {"error_code": 0},
  "data": [
    {"symbol": "BTC", "cmc_rank": 1, "circulating_supply": 19000000},
    {"symbol": "ETH", "cmc_rank": 2, "circulating_supply": 120000000},
    {"symbol": "DOGE", "cmc_rank": 3, "circulating_supply": 1},
    {"symbol": "LTC", "cmc_rank": 5, "circulating_supply": 70000000}
  ]
}"#;

fn ticker_script() -> Vec<String> {
    [("BTC-EUR", "10000"), ("ETH-EUR", "1000"), ("LTC-EUR", "100")]
        .iter()
        .map(|(product, price)| {
            format!(
                r#"{{"type":"ticker","product_id":"{}","price":"{}"}}"#,
                product, price
            )
        })
        .collect()
}

fn order_script() -> Vec<String> {
    vec![
        r#"{"type":"subscriptions","channels":[{"name":"user"}]}"#.to_string(),
        r#"{"type":"received","product_id":"BTC-EUR","order_id":"ord-2","side":"buy","funds":"35","time":"2021-03-01T10:00:00.000000Z"}"#.to_string(),
        r#"{"type":"match","product_id":"BTC-EUR","maker_order_id":"M9","taker_order_id":"ord-9","side":"buy","size":"0.001","price":"10000","time":"2021-03-01T10:00:01.000000Z"}"#.to_string(),
    ]
}

fn credentials() -> CoinbaseCredentials {
    CoinbaseCredentials {
        api_key: "key".to_string(),
        api_secret: "c2VjcmV0LWtleS1ieXRlcw==".to_string(),
        passphrase: "pass".to_string(),
    }
}

fn config() -> AppConfig {
    load_config_from_str(CONFIG).unwrap()
}

struct Harness {
    engine: RebalanceEngine,
    account: Arc<MockAccount>,
    ledger: MemoryLedger,
}

fn harness(
    config: AppConfig,
    price_url: &str,
    order_url: &str,
    ranking_url: &str,
    balances: &[(&str, f64)],
) -> Harness {
    let ledger = MemoryLedger::new();
    let account = Arc::new(MockAccount::new(balances));
    let products = config.strategy.products();
    let rankings = MarketCapClient::new("test-key", config.strategy.base_currency.clone())
        .with_url(ranking_url);

    let parts = EngineParts {
        price_feed: PriceFeed::new(price_url, products.clone(), &config.feed),
        order_feed: OrderEventFeed::new(
            order_url,
            products,
            credentials(),
            &config.feed,
            Arc::new(ledger.session()),
        ),
        exchange: account.clone(),
        rankings: Arc::new(rankings),
        ledger: Arc::new(ledger.session()),
    };

    Harness {
        engine: RebalanceEngine::new(config.strategy, config.feed, parts),
        account,
        ledger,
    }
}

fn cancel_after(ms: u64) -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(ms)).await;
        trigger.cancel();
    });
    cancel
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_full_cycle_rebalances_toward_ranked_weights() {
    let prices = spawn_feed_server(ticker_script(), AfterScript::Hold).await;
    let orders = spawn_feed_server(order_script(), AfterScript::Hold).await;
    let mut ranking_server = mockito::Server::new_async().await;
    let ranking = ranking_server
        .mock("GET", "/")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(RANKING_BODY)
        .create_async()
        .await;

    let mut h = harness(
        config(),
        &prices.url,
        &orders.url,
        &format!("{}/", ranking_server.url()),
        &[("EUR", 100.0), ("BTC", 0.01), ("ETH", 0.0), ("LTC", 1.0)],
    );

    let result = h.engine.run(cancel_after(1500)).await;

    assert!(result.is_ok());
    assert_eq!(h.engine.state(), EngineState::ErrorStop);
    ranking.assert_async().await;

    // Weights BTC 0.45, ETH 0.45, LTC 0 on a 300 EUR portfolio; sells first
    assert_eq!(
        h.account.placed(),
        vec![
            ("LTC-EUR".to_string(), OrderSide::Sell, 100.0),
            ("BTC-EUR".to_string(), OrderSide::Buy, 35.0),
            ("ETH-EUR".to_string(), OrderSide::Buy, 135.0),
        ]
    );

    let values = h.ledger.portfolio_values();
    assert_eq!(values.len(), 1);
    assert_eq!(values[0].value, 300.0);
    assert_eq!(h.ledger.positions().len(), 4);
    assert_eq!(h.ledger.execution_count(), 1);
    assert_eq!(h.ledger.pair_symbols(), vec!["BTC-EUR", "ETH-EUR", "LTC-EUR"]);

    let statuses: Vec<(Option<String>, String)> = h
        .ledger
        .transactions()
        .into_iter()
        .map(|t| (t.order_id, t.status))
        .collect();
    assert!(statuses.contains(&(Some("ord-2".to_string()), "received".to_string())));
    // Fills are attributed to the taker id
    assert!(statuses.contains(&(Some("ord-9".to_string()), "matched".to_string())));
    assert_eq!(statuses.iter().filter(|(_, s)| s == "pending").count(), 3);

    // The BTC order was received and never done
    assert_eq!(h.engine.order_feed().open_orders()["BTC-EUR"], vec!["ord-2"]);
    assert_eq!(h.engine.pending_funds()["BTC-EUR"], 35.0);
}

#[tokio::test]
async fn test_ranking_outage_leaves_positions_untouched() {
    let prices = spawn_feed_server(ticker_script(), AfterScript::Hold).await;
    let orders = spawn_feed_server(Vec::new(), AfterScript::Hold).await;
    let mut ranking_server = mockito::Server::new_async().await;
    ranking_server
        .mock("GET", "/")
        .match_query(mockito::Matcher::Any)
        .with_status(503)
        .create_async()
        .await;

    let mut h = harness(
        config(),
        &prices.url,
        &orders.url,
        &format!("{}/", ranking_server.url()),
        &[("EUR", 100.0), ("BTC", 0.01), ("ETH", 0.0), ("LTC", 1.0)],
    );

    let result = h.engine.run(cancel_after(1000)).await;

    assert!(result.is_ok());
    assert!(h.account.placed().is_empty());
    assert_eq!(h.ledger.portfolio_values().len(), 1);
    assert_eq!(h.ledger.positions().len(), 4);
}

#[tokio::test]
async fn test_undecodable_ranking_stops_engine() {
    let prices = spawn_feed_server(ticker_script(), AfterScript::Hold).await;
    let orders = spawn_feed_server(Vec::new(), AfterScript::Hold).await;
    let mut ranking_server = mockito::Server::new_async().await;
    ranking_server
        .mock("GET", "/")
        .match_query(mockito::Matcher::Any)
        .with_status(200)
        .with_body("<html>maintenance</html>")
        .create_async()
        .await;

    let mut h = harness(
        config(),
        &prices.url,
        &orders.url,
        &format!("{}/", ranking_server.url()),
        &[("EUR", 100.0)],
    );

    let result = h.engine.run(CancellationToken::new()).await;

    assert!(matches!(result, Err(AppError::Exchange(_))));
    assert_eq!(h.engine.state(), EngineState::ErrorStop);
    assert!(h.account.placed().is_empty());
}

#[tokio::test]
async fn test_price_timeout_stops_before_first_tick() {
    // Only BTC is ever priced
    let prices = spawn_feed_server(
        vec![r#"{"type":"ticker","product_id":"BTC-EUR","price":"10000"}"#.to_string()],
        AfterScript::Hold,
    )
    .await;
    let orders = spawn_feed_server(Vec::new(), AfterScript::Hold).await;
    let mut config = config();
    config.feed.price_wait_secs = 1;

    let mut h = harness(
        config,
        &prices.url,
        &orders.url,
        "http://127.0.0.1:9/",
        &[("EUR", 100.0)],
    );

    let result = h.engine.run(CancellationToken::new()).await;

    assert!(matches!(result, Err(AppError::Engine(_))));
    assert!(h.ledger.portfolio_values().is_empty());
    assert!(h.engine.price_feed().book().price("BTC-EUR").is_some());
}

#[tokio::test]
async fn test_price_feed_streams_into_book() {
    let prices = spawn_feed_server(ticker_script(), AfterScript::Hold).await;
    let config = config();
    let feed = PriceFeed::new(&prices.url, config.strategy.products(), &config.feed);

    feed.start().unwrap();

    assert!(
        feed.wait_until_ready(&config.strategy.products(), Duration::from_secs(5))
            .await
    );
    let snapshot = feed.snapshot();
    assert_eq!(snapshot["ETH-EUR"], 1000.0);
    assert_eq!(snapshot["LTC-EUR"], 100.0);

    feed.shutdown().await;
}

#[tokio::test]
async fn test_order_feed_tracks_and_persists_events() {
    let orders = spawn_feed_server(order_script(), AfterScript::Hold).await;
    let ledger = MemoryLedger::new();
    let session = ledger.session();
    let config = config();
    let feed = OrderEventFeed::new(
        &orders.url,
        config.strategy.products(),
        credentials(),
        &config.feed,
        Arc::new(session.clone()),
    );

    feed.start(uuid::Uuid::new_v4()).unwrap();

    assert!(wait_for(|| ledger.transactions().len() == 2).await);
    assert_eq!(feed.open_orders()["BTC-EUR"], vec!["ord-2"]);

    feed.shutdown().await;
    assert!(session.is_closed());
    assert!(!ledger.is_closed());
}
