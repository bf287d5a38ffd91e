//! Exchange adapters for Coinbase and CoinMarketCap
//!
//! This module provides the REST clients, wire types and traits through
//! which the feeds and the rebalancing engine reach external services.

pub mod coinbase;
pub mod errors;
pub mod marketcap;
pub mod shared;
pub mod traits;
pub mod types;

// Re-export commonly used types for convenience
pub use coinbase::{CoinbaseConfig, CoinbaseCredentials, CoinbaseRestClient};
pub use errors::{ExchangeError, ExchangeResult};
pub use marketcap::MarketCapClient;
pub use traits::{ExchangeAccount, RankingSource};
pub use types::{
    AccountBalance, MarketOrderRequest, OrderAck, OrderEvent, OrderSide, RankEntry,
    RankingSnapshot, SubscribeRequest, TickerMessage,
};
