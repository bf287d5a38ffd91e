//! Core data types for the exchange adapters
//!
//! Wire messages of the channel feed (subscribe request, ticker, order events),
//! REST payloads (accounts, market orders) and the ranking snapshot.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// Numeric helpers
// =============================================================================

/// The feed encodes decimals as JSON strings ("12345.67"), some payloads as numbers.
fn value_to_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::String(s) => s.parse::<f64>().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Deserialize an optional decimal given either as a string or a number
pub(crate) fn de_opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_to_f64))
}

/// Deserialize a required decimal given either as a string or a number
fn de_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    value_to_f64(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("not a decimal: {}", value)))
}

// =============================================================================
// Order side
// =============================================================================

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Side that moves a position by a signed base-currency delta
    pub fn from_delta(delta: f64) -> Self {
        if delta > 0.0 {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

// =============================================================================
// Channel feed messages
// =============================================================================

/// Subscribe handshake sent right after the websocket opens
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscribeRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub product_ids: Vec<String>,
    pub channels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl SubscribeRequest {
    /// Unauthenticated subscription for `channel` on `products`
    pub fn new(products: &[String], channel: &str) -> Self {
        Self {
            kind: "subscribe".to_string(),
            product_ids: products.to_vec(),
            channels: vec![channel.to_string()],
            signature: None,
            key: None,
            passphrase: None,
            timestamp: None,
        }
    }
}

/// Ticker channel message (only the consumed fields)
#[derive(Debug, Clone, Deserialize)]
pub struct TickerMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub product_id: Option<String>,
    pub price: serde_json::Value,
}

impl TickerMessage {
    /// Last trade price, if the field parses as a decimal
    pub fn price(&self) -> Option<f64> {
        value_to_f64(&self.price)
    }
}

/// Order lifecycle message from the authenticated user channel
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub taker_order_id: Option<String>,
    #[serde(default)]
    pub side: Option<OrderSide>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub size: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub funds: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub price: Option<f64>,
    #[serde(default)]
    pub reason: Option<String>,
}

// =============================================================================
// REST payloads
// =============================================================================

/// One currency balance of the trading account
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AccountBalance {
    pub currency: String,
    #[serde(deserialize_with = "de_f64")]
    pub balance: f64,
}

/// Market order sized by quote-currency amount
#[derive(Debug, Clone, PartialEq)]
pub struct MarketOrderRequest {
    pub product_id: String,
    pub side: OrderSide,
    pub funds: f64,
}

/// Acknowledgment returned by the exchange for a submitted order
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderAck {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub side: Option<OrderSide>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub size: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub funds: Option<f64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl OrderAck {
    /// Accepted and queued: status "pending" with an id and product
    pub fn is_pending(&self) -> bool {
        self.status.as_deref() == Some("pending") && self.id.is_some() && self.product_id.is_some()
    }
}

// =============================================================================
// Ranking feed
// =============================================================================

/// Capitalization rank of one symbol
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankEntry {
    pub rank: u32,
    pub circulating_supply: Option<f64>,
}

/// symbol -> rank entry
pub type RankingSnapshot = HashMap<String, RankEntry>;
