//! Rebalancing agent entry point
//!
//! 1. Loads configuration
//! 2. Opens the ledger (database or in-memory fallback)
//! 3. Builds the exchange, ranking and feed clients
//! 4. Runs the rebalancing engine until Ctrl+C or a fatal error

use std::path::PathBuf;
use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use rebalance_bot::adapters::{CoinbaseConfig, CoinbaseRestClient, MarketCapClient};
use rebalance_bot::config::{self, LedgerConfig};
use rebalance_bot::core::{EngineParts, OrderEventFeed, PriceFeed, RebalanceEngine};
use rebalance_bot::ledger::{Ledger, MemoryLedger, RestLedger};

/// One ledger session for the engine, another for the order feed
fn open_ledger_sessions() -> anyhow::Result<(Arc<dyn Ledger>, Arc<dyn Ledger>)> {
    match LedgerConfig::from_env()? {
        Some(cfg) => {
            info!(url = %cfg.url, schema = %cfg.schema, "[CONFIG] Ledger database configured");
            Ok((Arc::new(RestLedger::new(&cfg)?), Arc::new(RestLedger::new(&cfg)?)))
        }
        None => {
            warn!("[CONFIG] SUPABASE_URL not set, records are kept in memory only");
            let ledger = MemoryLedger::new();
            Ok((Arc::new(ledger.session()), Arc::new(ledger.session())))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenvy::dotenv().ok();

    config::init_logging();

    info!("Rebalancing agent starting...");

    let config_path =
        PathBuf::from(std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string()));
    info!(path = %config_path.display(), "Loading configuration");
    let config = match config::load_config(&config_path) {
        Ok(cfg) => {
            info!(
                universe = ?cfg.strategy.universe,
                base = %cfg.strategy.base_currency,
                portfolio_size = cfg.strategy.portfolio_size,
                base_weight = cfg.strategy.base_weight,
                timestep_s = cfg.strategy.timestep_secs,
                "[CONFIG] Strategy loaded"
            );
            cfg
        }
        Err(e) => {
            error!("[ERROR] Configuration failed: {}", e);
            std::process::exit(1);
        }
    };

    let coinbase = CoinbaseConfig::from_env()?;
    info!(
        production = coinbase.production,
        ws_url = %coinbase.ws_url(),
        rest_url = %coinbase.rest_base_url(),
        "[CONFIG] Exchange endpoints"
    );
    let rankings = MarketCapClient::from_env(&config.strategy.base_currency)?;
    let (engine_ledger, feed_ledger) = open_ledger_sessions()?;

    let products = config.strategy.products();
    let price_feed = PriceFeed::new(coinbase.ws_url(), products.clone(), &config.feed);
    let order_feed = OrderEventFeed::new(
        coinbase.ws_url(),
        products,
        coinbase.credentials.clone(),
        &config.feed,
        feed_ledger,
    );

    let parts = EngineParts {
        price_feed,
        order_feed,
        exchange: Arc::new(CoinbaseRestClient::new(coinbase)),
        rankings: Arc::new(rankings),
        ledger: engine_ledger,
    };
    let mut engine = RebalanceEngine::new(config.strategy, config.feed, parts);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("[SHUTDOWN] Graceful shutdown initiated");
                shutdown.cancel();
            }
            Err(err) => {
                eprintln!("Failed to listen for Ctrl+C signal: {}", err);
            }
        }
    });

    match engine.run(cancel).await {
        Ok(()) => {
            info!("[SHUTDOWN] Clean exit");
            Ok(())
        }
        Err(e) => {
            error!("[ERROR] Rebalancing stopped: {}", e);
            std::process::exit(1);
        }
    }
}
