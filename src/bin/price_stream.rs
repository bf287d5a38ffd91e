//! Stream ticker prices and log the price book periodically
//!
//! Only opens the public ticker feed; no credentials or ledger needed.
//!
//! Run with: cargo run --bin price_stream
//!
//! Environment:
//! - `CONFIG_PATH` (default `config.yaml`)
//! - `COINBASE_WS_URL`, else `COINBASE_PRODUCTION` picks the production or sandbox feed
//! - `PRICE_LOG_INTERVAL_SECS` (default 10)

use std::path::PathBuf;
use std::time::Duration;

use tracing::{error, info};

use rebalance_bot::adapters::CoinbaseConfig;
use rebalance_bot::config;
use rebalance_bot::core::PriceFeed;

const DEFAULT_LOG_INTERVAL_SECS: u64 = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    config::init_logging();

    let config_path =
        PathBuf::from(std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string()));
    let config = config::load_config(&config_path)?;
    let ws_url = CoinbaseConfig::public_ws_url_from_env();
    let log_interval = std::env::var("PRICE_LOG_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_LOG_INTERVAL_SECS);

    let products = config.strategy.products();
    info!(url = %ws_url, products = ?products, "Starting price stream");

    let feed = PriceFeed::new(&ws_url, products.clone(), &config.feed);
    if let Err(e) = feed.start() {
        error!("Price stream failed to start: {}", e);
        std::process::exit(1);
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(log_interval));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("[SHUTDOWN] Ctrl+C received");
                break;
            }
            _ = ticker.tick() => {
                let book = feed.book();
                info!(
                    state = ?feed.connection_state(),
                    prices = ?feed.snapshot(),
                    missing = ?book.missing(&products),
                    "Price book"
                );
            }
        }
    }

    feed.shutdown().await;
    info!("[SHUTDOWN] Clean exit");
    Ok(())
}
