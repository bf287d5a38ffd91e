//! Configuration types for the rebalancing bot
//!
//! Loaded from YAML; the strategy section also becomes the persisted
//! parameters of the execution.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

// ============================================================================
// Defaults
// ============================================================================

fn default_reconnect_interval_secs() -> u64 {
    30
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_ping_timeout_secs() -> u64 {
    15
}

fn default_price_wait_secs() -> u64 {
    300
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// What to hold and how often to rebalance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategyConfig {
    /// Symbols managed by the engine (e.g., BTC, ETH)
    pub universe: Vec<String>,
    /// Currency all values are normalized to (e.g., EUR)
    pub base_currency: String,
    /// Fraction of value left unallocated, in [0, 1]
    pub base_weight: f64,
    /// Number of lowest-rank symbols held
    pub portfolio_size: usize,
    /// Seconds between two rebalancing ticks
    pub timestep_secs: u64,
    /// Name of the persisted run lineage
    pub execution_name: String,
}

impl StrategyConfig {
    /// Exchange product of one symbol, `SYMBOL-BASE`
    pub fn product_for(&self, symbol: &str) -> String {
        format!("{}-{}", symbol, self.base_currency)
    }

    /// Products of the whole universe, in universe order
    pub fn products(&self) -> Vec<String> {
        self.universe.iter().map(|s| self.product_for(s)).collect()
    }

    pub fn timestep(&self) -> Duration {
        Duration::from_secs(self.timestep_secs)
    }

    /// Parameters stored with the execution record
    pub fn execution_parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "universe": self.universe,
            "base_currency": self.base_currency,
            "base_weight": self.base_weight,
            "portfolio_size": self.portfolio_size,
            "timestep_secs": self.timestep_secs,
            "products": self.products(),
        })
    }

    /// Validate strategy rules
    pub fn validate(&self) -> Result<(), AppError> {
        if self.universe.is_empty() {
            return Err(AppError::Config("universe cannot be empty".to_string()));
        }

        let mut seen = HashSet::new();
        for symbol in &self.universe {
            if symbol.trim().is_empty() {
                return Err(AppError::Config(
                    "universe cannot contain an empty symbol".to_string(),
                ));
            }
            if !seen.insert(symbol.as_str()) {
                return Err(AppError::Config(format!(
                    "universe contains '{}' more than once",
                    symbol
                )));
            }
        }

        if self.base_currency.trim().is_empty() {
            return Err(AppError::Config("base_currency cannot be empty".to_string()));
        }
        if seen.contains(self.base_currency.as_str()) {
            return Err(AppError::Config(format!(
                "base_currency '{}' cannot be part of the universe",
                self.base_currency
            )));
        }

        if !(0.0..=1.0).contains(&self.base_weight) {
            return Err(AppError::Config(format!(
                "base_weight must be within [0, 1], got {}",
                self.base_weight
            )));
        }

        if self.timestep_secs == 0 {
            return Err(AppError::Config("timestep_secs must be > 0".to_string()));
        }

        if self.execution_name.trim().is_empty() {
            return Err(AppError::Config("execution_name cannot be empty".to_string()));
        }

        Ok(())
    }
}

/// Stream connection timing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedSettings {
    #[serde(default = "default_reconnect_interval_secs")]
    pub reconnect_interval_secs: u64,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_ping_timeout_secs")]
    pub ping_timeout_secs: u64,
    /// Upper bound on the initial wait for prices
    #[serde(default = "default_price_wait_secs")]
    pub price_wait_secs: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            reconnect_interval_secs: default_reconnect_interval_secs(),
            ping_interval_secs: default_ping_interval_secs(),
            ping_timeout_secs: default_ping_timeout_secs(),
            price_wait_secs: default_price_wait_secs(),
        }
    }
}

impl FeedSettings {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.reconnect_interval_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }

    pub fn price_wait(&self) -> Duration {
        Duration::from_secs(self.price_wait_secs)
    }

    /// Validate timing rules
    pub fn validate(&self) -> Result<(), AppError> {
        if self.reconnect_interval_secs == 0 {
            return Err(AppError::Config(
                "reconnect_interval_secs must be > 0".to_string(),
            ));
        }
        if self.ping_interval_secs == 0 {
            return Err(AppError::Config("ping_interval_secs must be > 0".to_string()));
        }
        if self.ping_timeout_secs == 0 || self.ping_timeout_secs >= self.ping_interval_secs {
            return Err(AppError::Config(format!(
                "ping_timeout_secs ({}) must be > 0 and < ping_interval_secs ({})",
                self.ping_timeout_secs, self.ping_interval_secs
            )));
        }
        Ok(())
    }
}

/// Root application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub feed: FeedSettings,
}

impl AppConfig {
    /// Validate all configuration rules
    pub fn validate(&self) -> Result<(), AppError> {
        self.strategy.validate()?;
        self.feed.validate()?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
