//! Durable ledger of executions, pairs, transactions and snapshots
//!
//! Every component (engine, order feed) owns its own ledger session, passed in
//! at construction. Two backends are provided: an in-memory store and a
//! Supabase/PostgREST store.

pub mod memory;
pub mod rest;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::adapters::types::{OrderEvent, OrderSide};

pub use memory::MemoryLedger;
pub use rest::RestLedger;

/// Errors for ledger operations
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The store refused or failed the operation
    #[error("Database error: {0}")]
    Database(String),

    /// Network error during API call
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Invalid data provided or returned
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Session already closed
    #[error("Ledger session closed")]
    Closed,
}

/// Result type alias for ledger operations
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Immutable order record: one per order-feed message or submitted order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub timestamp: Option<DateTime<Utc>>,
    pub order_id: Option<String>,
    pub pair_id: Option<Uuid>,
    pub size: Option<f64>,
    pub funds: Option<f64>,
    pub price: Option<f64>,
    pub side: Option<OrderSide>,
    pub status: String,
    pub execution_id: Option<Uuid>,
}

impl TransactionRecord {
    /// Record for one order-feed message, stored under `order_id` with `status`
    pub fn from_event(
        event: &OrderEvent,
        order_id: Option<String>,
        status: impl Into<String>,
        pair_id: Option<Uuid>,
        execution_id: Option<Uuid>,
    ) -> Self {
        let timestamp = event
            .time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc));
        Self {
            timestamp,
            order_id,
            pair_id,
            size: event.size,
            funds: event.funds,
            price: event.price,
            side: event.side,
            status: status.into(),
            execution_id,
        }
    }
}

/// Holding of one symbol at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub value: f64,
    pub execution_id: Uuid,
}

/// Total portfolio value in base currency at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioValueRecord {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub execution_id: Uuid,
}

/// One ledger session
///
/// Sessions are not shared between tasks; each component opens its own.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Look up an execution by name, creating it with `parameters` if absent
    async fn get_or_create_execution(
        &self,
        name: &str,
        parameters: &serde_json::Value,
    ) -> LedgerResult<Uuid>;

    /// Look up a trading pair, creating it if absent
    async fn get_or_create_pair(&self, symbol: &str) -> LedgerResult<Uuid>;

    /// Look up a trading pair without creating it
    async fn find_pair(&self, symbol: &str) -> LedgerResult<Option<Uuid>>;

    async fn append_transaction(&self, record: &TransactionRecord) -> LedgerResult<()>;

    async fn append_positions(&self, records: &[PositionRecord]) -> LedgerResult<()>;

    async fn append_portfolio_value(&self, record: &PortfolioValueRecord) -> LedgerResult<()>;

    /// Close the session; further writes fail with `LedgerError::Closed`
    async fn close(&self) -> LedgerResult<()>;
}
