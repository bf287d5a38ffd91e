//! Rebalancing control loop
//!
//! `Initializing -> WaitingForPrices -> Running -> ErrorStop`
//!
//! Each tick ranks the universe, values the account at the last streamed
//! prices and submits market orders toward the target weights. A failure
//! while computing the orders stops the engine; a failure while sending them
//! or recording the resulting positions is logged and the loop goes on.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::adapters::traits::{ExchangeAccount, RankingSource};
use crate::adapters::types::{MarketOrderRequest, OrderAck};
use crate::config::{FeedSettings, StrategyConfig};
use crate::core::order_feed::OrderEventFeed;
use crate::core::portfolio::{self, PlannedOrder, Weights};
use crate::core::price_feed::PriceFeed;
use crate::error::{AppError, Result};
use crate::ledger::{Ledger, PortfolioValueRecord, PositionRecord, TransactionRecord};

/// Lifecycle state of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    #[default]
    Initializing,
    WaitingForPrices,
    Running,
    /// Terminal: feeds and ledger closed
    ErrorStop,
}

/// What one tick observed and did
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub ranking_empty: bool,
    pub target_weights: Weights,
    pub current_weights: Weights,
    /// `None` when some held currency had no price
    pub portfolio_value: Option<f64>,
    pub planned_orders: Vec<PlannedOrder>,
    /// Ids of orders acknowledged as pending
    pub submitted: Vec<String>,
    /// One message per order or snapshot step that failed
    pub failures: Vec<String>,
}

/// Collaborators of the engine, each owned by it
pub struct EngineParts {
    pub price_feed: PriceFeed,
    pub order_feed: OrderEventFeed,
    pub exchange: Arc<dyn ExchangeAccount>,
    pub rankings: Arc<dyn RankingSource>,
    /// The engine's own ledger session
    pub ledger: Arc<dyn Ledger>,
}

pub struct RebalanceEngine {
    strategy: StrategyConfig,
    feed: FeedSettings,
    parts: EngineParts,
    state: EngineState,
    execution_id: Option<Uuid>,
    /// product -> order id -> submitted funds; entries leave once the order is done
    submitted_orders: HashMap<String, HashMap<String, f64>>,
}

impl RebalanceEngine {
    pub fn new(strategy: StrategyConfig, feed: FeedSettings, parts: EngineParts) -> Self {
        Self {
            strategy,
            feed,
            parts,
            state: EngineState::Initializing,
            execution_id: None,
            submitted_orders: HashMap::new(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn execution_id(&self) -> Option<Uuid> {
        self.execution_id
    }

    pub fn price_feed(&self) -> &PriceFeed {
        &self.parts.price_feed
    }

    pub fn order_feed(&self) -> &OrderEventFeed {
        &self.parts.order_feed
    }

    pub fn submitted_orders(&self) -> &HashMap<String, HashMap<String, f64>> {
        &self.submitted_orders
    }

    /// Run until a fatal error or cancellation, then tear down
    ///
    /// # Returns
    /// * `Ok(())` - cancelled by the caller
    /// * `Err(AppError)` - initialization, price wait or order computation failed
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<()> {
        let result = self.run_until_stopped(&cancel).await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "Rebalance engine stopping");
        }
        self.teardown().await;
        result
    }

    async fn run_until_stopped(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.initialize().await?;

        let ready = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            ready = self.wait_for_prices() => ready,
        };
        if !ready {
            return Err(AppError::Engine(
                "price coverage not reached before timeout".to_string(),
            ));
        }

        self.state = EngineState::Running;
        tracing::info!(
            execution = %self.strategy.execution_name,
            timestep_s = self.strategy.timestep_secs,
            "Rebalance engine running"
        );

        loop {
            let report = self.tick().await?;
            tracing::info!(
                portfolio_value = ?report.portfolio_value,
                orders = report.planned_orders.len(),
                submitted = report.submitted.len(),
                failures = report.failures.len(),
                "Tick complete"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Shutdown requested");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.strategy.timestep()) => {}
            }
        }
    }

    /// Register the execution and pairs, then start both feeds
    pub async fn initialize(&mut self) -> Result<()> {
        self.state = EngineState::Initializing;

        let execution_id = self
            .parts
            .ledger
            .get_or_create_execution(
                &self.strategy.execution_name,
                &self.strategy.execution_parameters(),
            )
            .await?;
        self.execution_id = Some(execution_id);

        for product in self.strategy.products() {
            self.parts.ledger.get_or_create_pair(&product).await?;
        }

        self.parts.price_feed.start()?;
        self.parts.order_feed.start(execution_id)?;

        tracing::info!(
            execution = %self.strategy.execution_name,
            execution_id = %execution_id,
            products = ?self.strategy.products(),
            "Rebalance engine initialized"
        );
        Ok(())
    }

    /// Wait up to the configured window for a price on every product
    pub async fn wait_for_prices(&mut self) -> bool {
        self.state = EngineState::WaitingForPrices;
        let products = self.strategy.products();
        tracing::info!(timeout_s = self.feed.price_wait_secs, "Waiting for prices");
        self.parts
            .price_feed
            .wait_until_ready(&products, self.feed.price_wait())
            .await
    }

    /// One rebalancing pass
    ///
    /// # Errors
    /// Any failure up to order generation. Order submission and the position
    /// snapshot only add entries to `TickReport::failures`.
    pub async fn tick(&mut self) -> Result<TickReport> {
        let execution_id = self
            .execution_id
            .ok_or_else(|| AppError::Engine("tick before initialization".to_string()))?;
        let mut report = TickReport::default();

        let rankings = self.parts.rankings.fetch_rankings().await?;
        report.ranking_empty = rankings.is_empty();
        report.target_weights = portfolio::target_weights(
            &self.strategy.universe,
            &rankings,
            self.strategy.base_weight,
            self.strategy.portfolio_size,
        );

        let accounts = self.parts.exchange.accounts().await?;
        self.prune_finished_orders();
        self.log_pending_orders();
        let prices = self.parts.price_feed.snapshot();
        tracing::debug!(prices = ?prices, "Current prices");

        let balances = portfolio::held_balances(&accounts, &self.strategy);
        let positions = portfolio::value_positions(&balances, &prices, &self.strategy);
        let total = portfolio::total_value(&positions);
        report.portfolio_value = total;
        tracing::debug!(positions = ?positions, total = ?total, "Current positions");

        let now = self.parts.exchange.server_time().await?;
        match total {
            Some(value) => {
                let record = PortfolioValueRecord {
                    timestamp: now,
                    value,
                    execution_id,
                };
                if let Err(e) = self.parts.ledger.append_portfolio_value(&record).await {
                    tracing::error!(error = %e, "Failed to persist portfolio value");
                }
            }
            None => tracing::warn!("Portfolio value undefined, a held currency has no price"),
        }

        report.current_weights =
            portfolio::current_weights(&positions, total, &self.strategy.universe);
        tracing::debug!(
            current = ?report.current_weights,
            target = ?report.target_weights,
            "Weights"
        );

        let targets =
            portfolio::target_positions(total, &report.target_weights, &self.strategy.universe);

        if report.current_weights.is_empty() {
            tracing::warn!(total = ?total, "Portfolio value zero or undefined, skipping rebalance");
        } else if report.ranking_empty {
            tracing::warn!("No ranking received, keeping current allocation");
        } else {
            report.planned_orders =
                portfolio::create_orders(&targets, &positions, &self.strategy.universe);
        }

        for order in report.planned_orders.clone() {
            match self.submit(&order, execution_id).await {
                Ok(Some(id)) => report.submitted.push(id),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(symbol = %order.symbol, error = %e, "Error sending order");
                    report.failures.push(format!("{}: {}", order.symbol, e));
                }
            }
        }

        if let Err(e) = self.snapshot_positions(execution_id).await {
            tracing::error!(error = %e, "Error recording positions");
            report.failures.push(format!("positions: {}", e));
        }

        Ok(report)
    }

    /// Place one market order; returns the id when it was accepted as pending
    async fn submit(&mut self, order: &PlannedOrder, execution_id: Uuid) -> Result<Option<String>> {
        let request = MarketOrderRequest {
            product_id: self.strategy.product_for(&order.symbol),
            side: order.side(),
            funds: order.funds(),
        };
        tracing::info!(
            product = %request.product_id,
            side = %request.side,
            funds = request.funds,
            base = %self.strategy.base_currency,
            "Placing market order"
        );

        let ack = self.parts.exchange.place_market_order(&request).await?;
        tracing::debug!(ack = ?ack, "Order response");
        if !ack.is_pending() {
            tracing::warn!(product = %request.product_id, status = ?ack.status, "Order not accepted");
            return Ok(None);
        }

        let (Some(id), Some(product)) = (ack.id.clone(), ack.product_id.clone()) else {
            return Ok(None);
        };
        self.submitted_orders
            .entry(product.clone())
            .or_default()
            .insert(id.clone(), ack.funds.unwrap_or(request.funds));
        self.parts.order_feed.tracker().watch(&id);

        self.record_submission(&ack, &product, execution_id).await;
        Ok(Some(id))
    }

    async fn record_submission(&self, ack: &OrderAck, product: &str, execution_id: Uuid) {
        let pair_id = match self.parts.ledger.find_pair(product).await {
            Ok(pair_id) => pair_id,
            Err(e) => {
                tracing::warn!(product = %product, error = %e, "Pair lookup failed");
                None
            }
        };
        let record = TransactionRecord {
            timestamp: ack
                .created_at
                .as_deref()
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                .map(|t| t.with_timezone(&Utc)),
            order_id: ack.id.clone(),
            pair_id,
            size: ack.size,
            funds: ack.funds,
            price: None,
            side: ack.side,
            status: ack.status.clone().unwrap_or_default(),
            execution_id: Some(execution_id),
        };
        if let Err(e) = self.parts.ledger.append_transaction(&record).await {
            tracing::error!(order_id = ?record.order_id, error = %e, "Failed to persist submitted order");
        }
    }

    /// Re-read balances and persist them as this tick's positions
    async fn snapshot_positions(&self, execution_id: Uuid) -> Result<()> {
        let accounts = self.parts.exchange.accounts().await?;
        let timestamp = self.parts.exchange.server_time().await?;
        let mut records: Vec<PositionRecord> = portfolio::held_balances(&accounts, &self.strategy)
            .into_iter()
            .map(|(symbol, value)| PositionRecord {
                timestamp,
                symbol,
                value,
                execution_id,
            })
            .collect();
        records.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        self.parts.ledger.append_positions(&records).await?;
        Ok(())
    }

    /// Funds of submitted orders the order feed still reports open
    pub fn pending_funds(&self) -> HashMap<String, f64> {
        let tracker = self.parts.order_feed.tracker();
        self.submitted_orders
            .iter()
            .map(|(product, orders)| {
                let pending = orders
                    .iter()
                    .filter(|(id, _)| tracker.is_open(product, id))
                    .map(|(_, funds)| funds)
                    .sum::<f64>();
                (product.clone(), pending)
            })
            .collect()
    }

    /// Forget submitted orders the order feed has seen done
    fn prune_finished_orders(&mut self) {
        let finished = self.parts.order_feed.tracker().take_finished();
        if finished.is_empty() {
            return;
        }
        for orders in self.submitted_orders.values_mut() {
            orders.retain(|id, _| !finished.contains(id));
        }
        self.submitted_orders.retain(|_, orders| !orders.is_empty());
        tracing::debug!(finished = finished.len(), "Pruned finished orders");
    }

    fn log_pending_orders(&self) {
        let pending = self.pending_funds();
        if !pending.is_empty() {
            tracing::debug!(pending = ?pending, "Current orders");
        }
    }

    async fn teardown(&mut self) {
        self.parts.price_feed.shutdown().await;
        self.parts.order_feed.shutdown().await;
        if let Err(e) = self.parts.ledger.close().await {
            tracing::warn!(error = %e, "Failed to close ledger session");
        }
        self.state = EngineState::ErrorStop;
        tracing::info!("Rebalance engine stopped");
    }
}
