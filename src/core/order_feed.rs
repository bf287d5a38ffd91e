//! Order lifecycle tracking from the authenticated user channel
//!
//! | type     | open orders                 | persisted status |
//! |----------|-----------------------------|------------------|
//! | received | append `order_id`           | `received`       |
//! | match    | unchanged                   | `matched`, under `taker_order_id` |
//! | done     | remove `order_id`           | the `reason` field |
//! | other    | unchanged                   | `other`          |
//!
//! Every message is appended to the ledger; a failed write is logged and the
//! next message is processed normally.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::adapters::coinbase::CoinbaseCredentials;
use crate::adapters::errors::{ExchangeError, ExchangeResult};
use crate::adapters::types::OrderEvent;
use crate::config::FeedSettings;
use crate::core::subscription::{
    ConnectionState, StreamHandler, SubscriptionClient, SubscriptionConfig,
};
use crate::ledger::{Ledger, TransactionRecord};

/// Authenticated channel carrying the account's own order events
pub const USER_CHANNEL: &str = "user";

pub const STATUS_RECEIVED: &str = "received";
pub const STATUS_MATCHED: &str = "matched";
pub const STATUS_OTHER: &str = "other";
/// Used for a `done` message that carries no reason
pub const STATUS_DONE: &str = "done";

/// product -> ids of orders received and not yet done, in arrival order
pub type OpenOrders = HashMap<String, Vec<String>>;

/// What one message did to the open-order set and how it is persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub order_id: Option<String>,
    pub status: String,
}

/// Open-order state machine
#[derive(Debug, Default)]
pub struct OrderTracker {
    open: RwLock<OpenOrders>,
    /// Ids whose completion someone asked to hear about
    watched: RwLock<HashSet<String>>,
    /// Watched ids seen done and not yet collected
    finished: RwLock<HashSet<String>>,
}

impl OrderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event and return the record identity to persist
    pub fn apply(&self, event: &OrderEvent) -> Transition {
        match event.kind.as_str() {
            "received" => {
                if let (Some(product), Some(order_id)) = (&event.product_id, &event.order_id) {
                    let mut open = self.open.write();
                    let orders = open.entry(product.clone()).or_default();
                    if !orders.contains(order_id) {
                        orders.push(order_id.clone());
                    }
                    tracing::debug!(product = %product, order_id = %order_id, "Order received");
                } else {
                    tracing::warn!(event = ?event, "Received message without product or order id");
                }
                Transition {
                    order_id: event.order_id.clone(),
                    status: STATUS_RECEIVED.to_string(),
                }
            }
            "match" => Transition {
                order_id: event.taker_order_id.clone(),
                status: STATUS_MATCHED.to_string(),
            },
            "done" => {
                if let (Some(product), Some(order_id)) = (&event.product_id, &event.order_id) {
                    if !self.remove(product, order_id) {
                        tracing::warn!(
                            product = %product,
                            order_id = %order_id,
                            "Done message for an order that is not open"
                        );
                    }
                } else {
                    tracing::warn!(event = ?event, "Done message without product or order id");
                }
                if let Some(order_id) = &event.order_id {
                    if self.watched.write().remove(order_id) {
                        self.finished.write().insert(order_id.clone());
                    }
                }
                Transition {
                    order_id: event.order_id.clone(),
                    status: event.reason.clone().unwrap_or_else(|| STATUS_DONE.to_string()),
                }
            }
            _ => Transition {
                order_id: event.order_id.clone(),
                status: STATUS_OTHER.to_string(),
            },
        }
    }

    fn remove(&self, product: &str, order_id: &str) -> bool {
        let mut open = self.open.write();
        let Some(orders) = open.get_mut(product) else {
            return false;
        };
        let Some(pos) = orders.iter().position(|id| id == order_id) else {
            return false;
        };
        orders.remove(pos);
        if orders.is_empty() {
            open.remove(product);
        }
        true
    }

    pub fn is_open(&self, product: &str, order_id: &str) -> bool {
        self.open
            .read()
            .get(product)
            .is_some_and(|orders| orders.iter().any(|id| id == order_id))
    }

    /// Copy of the open-order map
    pub fn snapshot(&self) -> OpenOrders {
        self.open.read().clone()
    }

    /// Report `order_id` from `take_finished` once its done message arrives
    pub fn watch(&self, order_id: &str) {
        self.watched.write().insert(order_id.to_string());
    }

    /// Drain the watched ids seen done since the last call
    pub fn take_finished(&self) -> HashSet<String> {
        std::mem::take(&mut *self.finished.write())
    }
}

struct OrderEventHandler {
    tracker: Arc<OrderTracker>,
    ledger: Arc<dyn Ledger>,
    execution_id: Uuid,
}

impl OrderEventHandler {
    async fn persist(&self, event: &OrderEvent, transition: Transition) {
        let pair_id = match event.product_id.as_deref() {
            Some(product) => match self.ledger.find_pair(product).await {
                Ok(pair_id) => pair_id,
                Err(e) => {
                    tracing::warn!(product = %product, error = %e, "Pair lookup failed");
                    None
                }
            },
            None => None,
        };

        let record = TransactionRecord::from_event(
            event,
            transition.order_id,
            transition.status,
            pair_id,
            Some(self.execution_id),
        );
        if let Err(e) = self.ledger.append_transaction(&record).await {
            tracing::error!(
                order_id = ?record.order_id,
                status = %record.status,
                error = %e,
                "Failed to persist order event"
            );
        }
    }
}

#[async_trait]
impl StreamHandler for OrderEventHandler {
    async fn on_open(&self) -> anyhow::Result<()> {
        tracing::info!("Order event stream open");
        Ok(())
    }

    async fn on_message(&self, raw: &str) -> anyhow::Result<()> {
        let event: OrderEvent =
            serde_json::from_str(raw).context("order event is not a typed JSON message")?;

        // Channel bookkeeping, not order lifecycle
        if event.kind == "subscriptions" || event.kind == "heartbeat" {
            tracing::debug!(kind = %event.kind, "Order channel control message");
            return Ok(());
        }
        if event.kind == "error" {
            tracing::error!(raw = %raw, "Order channel reported an error");
        }
        if event.product_id.is_none() {
            tracing::debug!(kind = %event.kind, "Order channel message without product, ignored");
            return Ok(());
        }

        let transition = self.tracker.apply(&event);
        tracing::info!(
            kind = %event.kind,
            product = ?event.product_id,
            order_id = ?transition.order_id,
            status = %transition.status,
            "Order event"
        );
        self.persist(&event, transition).await;
        Ok(())
    }

    async fn on_error(&self, error: &ExchangeError) -> anyhow::Result<()> {
        tracing::warn!(error = %error, "Order event stream error");
        Ok(())
    }

    async fn on_close(&self) -> anyhow::Result<()> {
        tracing::info!("Order event stream closed");
        Ok(())
    }
}

/// User-channel subscription, open-order state and its ledger session
pub struct OrderEventFeed {
    client: SubscriptionClient,
    tracker: Arc<OrderTracker>,
    ledger: Arc<dyn Ledger>,
}

impl OrderEventFeed {
    pub fn new(
        url: &str,
        products: Vec<String>,
        credentials: CoinbaseCredentials,
        feed: &FeedSettings,
        ledger: Arc<dyn Ledger>,
    ) -> Self {
        let config = SubscriptionConfig::new(url, products, USER_CHANNEL, feed)
            .with_credentials(credentials);
        Self::with_config(config, ledger)
    }

    pub fn with_config(config: SubscriptionConfig, ledger: Arc<dyn Ledger>) -> Self {
        Self {
            client: SubscriptionClient::new(config),
            tracker: Arc::new(OrderTracker::new()),
            ledger,
        }
    }

    /// Start streaming; records are attributed to `execution_id`
    pub fn start(&self, execution_id: Uuid) -> ExchangeResult<()> {
        self.client.start(Arc::new(OrderEventHandler {
            tracker: Arc::clone(&self.tracker),
            ledger: Arc::clone(&self.ledger),
            execution_id,
        }))
    }

    pub fn close(&self) {
        self.client.close();
    }

    /// Close the stream and this feed's ledger session
    pub async fn shutdown(&self) {
        self.client.shutdown().await;
        if let Err(e) = self.ledger.close().await {
            tracing::warn!(error = %e, "Failed to close order feed ledger session");
        }
    }

    pub fn tracker(&self) -> Arc<OrderTracker> {
        Arc::clone(&self.tracker)
    }

    pub fn open_orders(&self) -> OpenOrders {
        self.tracker.snapshot()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.client.state()
    }
}
