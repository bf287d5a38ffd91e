//! Configuration module for strategy settings, YAML loading and logging
//!
//! This module provides:
//! - Configuration types (`AppConfig`, `StrategyConfig`, `FeedSettings`)
//! - YAML loading functionality (`load_config`)
//! - Ledger database settings from the environment (`LedgerConfig`)
//! - Tracing subscriber setup (`init_logging`)

pub mod ledger;
mod loader;
pub mod logging;
mod types;

// Re-export types
pub use types::{AppConfig, FeedSettings, StrategyConfig};

pub use ledger::{LedgerConfig, LedgerConfigError};

// Re-export loader functions
pub use loader::{load_config, load_config_from_str};

pub use logging::init_logging;
