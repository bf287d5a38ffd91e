//! Application-wide error types using thiserror
//!
//! Errors from the exchange adapters and the ledger are wrapped in AppError
//! so the binaries can report every failure path the same way.

use crate::adapters::errors::ExchangeError;
use crate::ledger::LedgerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Engine error: {0}")]
    Engine(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
