//! Rebalance Bot
//!
//! Keeps a basket of crypto assets close to a market-cap ranked target allocation:
//! - Resilient websocket subscriptions (ticker + authenticated order events)
//! - Order lifecycle tracking with a persistent trade ledger
//! - Periodic rebalancing loop driven by an external ranking feed

pub mod adapters;
pub mod config;
pub mod core;
pub mod error;
pub mod ledger;

pub use error::AppError;
