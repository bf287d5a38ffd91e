//! Core module - subscriptions, feeds, portfolio arithmetic, rebalancing engine
//!
//! This module uses **explicit re-exports** instead of glob exports (`pub use module::*`)
//! so the public API only changes on purpose.
//!
//! ## Usage
//! Prefer importing from `crate::core`:
//! ```ignore
//! use crate::core::{PriceFeed, OrderEventFeed, RebalanceEngine};
//! ```

pub mod engine;
pub mod logging;
pub mod order_feed;
pub mod portfolio;
pub mod price_feed;
pub mod subscription;

// Explicit re-exports for subscription module
pub use subscription::{ConnectionState, StreamHandler, SubscriptionClient, SubscriptionConfig};

// Explicit re-exports for feed modules
pub use order_feed::{OpenOrders, OrderEventFeed, OrderTracker, Transition, USER_CHANNEL};
pub use price_feed::{PriceBook, PriceFeed, PriceSnapshot, TICKER_CHANNEL};

// Explicit re-exports for portfolio module
pub use portfolio::{
    create_orders, current_weights, target_positions, target_weights, PlannedOrder, Positions,
    Weights, DELTA_DECIMALS,
};

// Explicit re-exports for engine module
pub use engine::{EngineParts, EngineState, RebalanceEngine, TickReport};

// Explicit re-exports for logging module
pub use logging::{sanitize, sanitize_signature, SanitizedValue};
