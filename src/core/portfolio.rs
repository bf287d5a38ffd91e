//! Weight and order arithmetic of one rebalancing tick
//!
//! Values are in base currency. A position whose price is unknown is `None`
//! and poisons every sum it takes part in, so a tick with incomplete data
//! produces no orders instead of wrong ones.

use std::collections::HashMap;

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use crate::adapters::types::{AccountBalance, OrderSide, RankingSnapshot};
use crate::config::StrategyConfig;
use crate::core::price_feed::PriceSnapshot;

/// Decimal places kept on order deltas
pub const DELTA_DECIMALS: u32 = 5;

/// symbol -> weight
pub type Weights = HashMap<String, f64>;

/// symbol -> value in base currency, `None` when it cannot be valued
pub type Positions = HashMap<String, Option<f64>>;

/// Equal weights on the `portfolio_size` best-ranked symbols of the universe
///
/// Symbols missing from the ranking, and those past the cut, get 0. With a
/// portfolio size of 0 every weight is 0.
pub fn target_weights(
    universe: &[String],
    rankings: &RankingSnapshot,
    base_weight: f64,
    portfolio_size: usize,
) -> Weights {
    let mut ranked: Vec<(u32, &str)> = universe
        .iter()
        .filter_map(|s| rankings.get(s).map(|entry| (entry.rank, s.as_str())))
        .collect();
    ranked.sort();

    let selected: Vec<&str> = ranked
        .iter()
        .take(portfolio_size)
        .map(|(_, symbol)| *symbol)
        .collect();
    let weight = if portfolio_size == 0 {
        0.0
    } else {
        (1.0 - base_weight) / portfolio_size as f64
    };

    universe
        .iter()
        .map(|s| {
            let w = if selected.contains(&s.as_str()) { weight } else { 0.0 };
            (s.clone(), w)
        })
        .collect()
}

/// Raw balances of the universe and the base currency
pub fn held_balances(accounts: &[AccountBalance], strategy: &StrategyConfig) -> HashMap<String, f64> {
    accounts
        .iter()
        .filter(|a| a.currency == strategy.base_currency || strategy.universe.contains(&a.currency))
        .map(|a| (a.currency.clone(), a.balance))
        .collect()
}

/// Convert balances to base-currency values using the last traded prices
pub fn value_positions(
    balances: &HashMap<String, f64>,
    prices: &PriceSnapshot,
    strategy: &StrategyConfig,
) -> Positions {
    balances
        .iter()
        .map(|(currency, balance)| {
            let value = if *currency == strategy.base_currency {
                Some(*balance)
            } else {
                prices
                    .get(&strategy.product_for(currency))
                    .map(|price| price * balance)
            };
            (currency.clone(), value)
        })
        .collect()
}

/// Sum of all position values, `None` if any position is undefined
pub fn total_value(positions: &Positions) -> Option<f64> {
    positions
        .values()
        .try_fold(0.0, |acc, value| value.map(|v| acc + v))
        .filter(|total| total.is_finite())
}

/// Value share of each universe symbol; empty when the total is zero or undefined
pub fn current_weights(positions: &Positions, total: Option<f64>, universe: &[String]) -> Weights {
    match total {
        Some(total) if total != 0.0 => positions
            .iter()
            .filter(|(symbol, _)| universe.contains(*symbol))
            .filter_map(|(symbol, value)| value.map(|v| (symbol.clone(), v / total)))
            .collect(),
        _ => Weights::new(),
    }
}

/// Target value of each universe symbol
pub fn target_positions(total: Option<f64>, weights: &Weights, universe: &[String]) -> Positions {
    universe
        .iter()
        .map(|s| {
            let target = match (total, weights.get(s)) {
                (Some(total), Some(weight)) => Some(total * weight),
                _ => None,
            };
            (s.clone(), target)
        })
        .collect()
}

/// One net order of a tick
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedOrder {
    pub symbol: String,
    /// Signed base-currency amount, rounded to `DELTA_DECIMALS`
    pub delta: f64,
}

impl PlannedOrder {
    pub fn side(&self) -> OrderSide {
        OrderSide::from_delta(self.delta)
    }

    /// Quote-currency amount to spend or receive
    pub fn funds(&self) -> f64 {
        self.delta.abs()
    }
}

fn round_delta(delta: f64) -> Option<f64> {
    Decimal::from_f64(delta)?
        .round_dp(DELTA_DECIMALS)
        .to_f64()
}

/// Orders that move current positions to their targets
///
/// At most one per universe symbol; undefined and zero deltas are dropped;
/// sorted ascending so sells come first and free base currency for the buys.
pub fn create_orders(
    targets: &Positions,
    current: &Positions,
    universe: &[String],
) -> Vec<PlannedOrder> {
    let mut orders: Vec<PlannedOrder> = universe
        .iter()
        .filter_map(|symbol| {
            let target = (*targets.get(symbol)?)?;
            let held = (*current.get(symbol)?)?;
            let delta = round_delta(target - held)?;
            tracing::debug!(symbol = %symbol, delta, "Order delta");
            (delta != 0.0).then(|| PlannedOrder {
                symbol: symbol.clone(),
                delta,
            })
        })
        .collect();

    orders.sort_by(|a, b| {
        a.delta
            .total_cmp(&b.delta)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    orders
}
