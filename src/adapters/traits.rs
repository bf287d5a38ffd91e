//! Adapter trait definitions
//!
//! The rebalancing engine only talks to the exchange and to the ranking feed
//! through these traits, so tests can drive it with in-process mocks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::adapters::errors::ExchangeResult;
use crate::adapters::types::{AccountBalance, MarketOrderRequest, OrderAck, RankingSnapshot};

/// Authenticated account/trading REST surface of the exchange
#[async_trait]
pub trait ExchangeAccount: Send + Sync {
    /// Balances of every currency held by the account
    async fn accounts(&self) -> ExchangeResult<Vec<AccountBalance>>;

    /// Submit a market order sized in quote currency
    ///
    /// # Returns
    /// The exchange acknowledgment; a "pending" status means the order was queued.
    async fn place_market_order(&self, order: &MarketOrderRequest) -> ExchangeResult<OrderAck>;

    /// Exchange clock, used to timestamp ledger records
    async fn server_time(&self) -> ExchangeResult<DateTime<Utc>>;

    /// Exchange name for logging
    fn exchange_name(&self) -> &'static str;
}

/// External capitalization-ranking feed
#[async_trait]
pub trait RankingSource: Send + Sync {
    /// Fetch the current ranking snapshot
    ///
    /// Transport failures yield `Ok` with an empty snapshot; only a response
    /// that cannot be decoded is an error.
    async fn fetch_rankings(&self) -> ExchangeResult<RankingSnapshot>;
}
