//! In-memory paper venue
//!
//! Fills every market order in full at the current mark price and keeps a
//! signed position per symbol the way a perpetual venue would report it.
//! Useful for dry runs and for driving the engine in tests.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;

use super::traits::{MarketDataSource, OrderGateway};
use crate::domain::{Candle, ExchangePosition, MarketOrder, OrderFill, OrderSide};
use crate::error::{LadderError, Result};

#[derive(Debug, Clone)]
struct PaperPosition {
    signed_quantity: Decimal,
    entry_price: Decimal,
    margin: Decimal,
}

#[derive(Debug, Default)]
struct PaperState {
    prices: HashMap<String, Decimal>,
    candles: HashMap<String, Vec<Candle>>,
    positions: HashMap<String, PaperPosition>,
    leverage: HashMap<String, u32>,
    rejected: HashSet<String>,
    orders: Vec<MarketOrder>,
}

pub struct PaperExchange {
    state: RwLock<PaperState>,
    lot_size: Decimal,
    default_leverage: u32,
}

impl PaperExchange {
    pub fn new(lot_size: Decimal, default_leverage: u32) -> Self {
        Self {
            state: RwLock::new(PaperState::default()),
            lot_size,
            default_leverage: default_leverage.max(1),
        }
    }

    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.state.write().await.prices.insert(symbol.to_string(), price);
    }

    pub async fn clear_price(&self, symbol: &str) {
        self.state.write().await.prices.remove(symbol);
    }

    pub async fn set_candles(&self, symbol: &str, candles: Vec<Candle>) {
        self.state.write().await.candles.insert(symbol.to_string(), candles);
    }

    /// Orders for `symbol` are rejected until `accept_orders` is called
    pub async fn reject_orders(&self, symbol: &str) {
        self.state.write().await.rejected.insert(symbol.to_string());
    }

    pub async fn accept_orders(&self, symbol: &str) {
        self.state.write().await.rejected.remove(symbol);
    }

    /// Place a position directly, as if opened outside this engine
    pub async fn seed_position(&self, position: ExchangePosition) {
        let margin = position.margin_or_estimate(self.default_leverage);
        self.state.write().await.positions.insert(
            position.symbol.clone(),
            PaperPosition {
                signed_quantity: position.signed_quantity,
                entry_price: position.entry_price,
                margin,
            },
        );
    }

    /// Drop a position, as if closed manually or liquidated
    pub async fn close_externally(&self, symbol: &str) {
        self.state.write().await.positions.remove(symbol);
    }

    /// Every order accepted so far, oldest first
    pub async fn orders(&self) -> Vec<MarketOrder> {
        self.state.read().await.orders.clone()
    }

    pub async fn leverage_for(&self, symbol: &str) -> Option<u32> {
        self.state.read().await.leverage.get(symbol).copied()
    }
}

#[async_trait]
impl MarketDataSource for PaperExchange {
    fn venue(&self) -> &str {
        "paper"
    }

    async fn mark_price(&self, symbol: &str) -> Result<Option<Decimal>> {
        Ok(self.state.read().await.prices.get(symbol).copied())
    }

    async fn positions(&self) -> Result<Vec<ExchangePosition>> {
        let state = self.state.read().await;
        let positions = state
            .positions
            .iter()
            .map(|(symbol, pos)| {
                let mark = state.prices.get(symbol).copied().unwrap_or(pos.entry_price);
                ExchangePosition {
                    symbol: symbol.clone(),
                    signed_quantity: pos.signed_quantity,
                    entry_price: pos.entry_price,
                    unrealized_pnl: (mark - pos.entry_price) * pos.signed_quantity,
                    margin: Some(pos.margin),
                }
            })
            .collect();
        Ok(positions)
    }

    async fn recent_candles(&self, symbol: &str, _interval: &str, limit: usize) -> Result<Vec<Candle>> {
        let state = self.state.read().await;
        let candles = state.candles.get(symbol).cloned().unwrap_or_default();
        let skip = candles.len().saturating_sub(limit);
        Ok(candles.into_iter().skip(skip).collect())
    }
}

#[async_trait]
impl OrderGateway for PaperExchange {
    async fn place_market_order(&self, order: &MarketOrder) -> Result<OrderFill> {
        let mut state = self.state.write().await;

        if state.rejected.contains(&order.symbol) {
            return Err(LadderError::OrderRejected(format!(
                "{} {} {} rejected by venue",
                order.side, order.quantity, order.symbol
            )));
        }
        let price = state.prices.get(&order.symbol).copied().ok_or_else(|| {
            LadderError::MarketDataUnavailable(format!("no mark price for {}", order.symbol))
        })?;
        if order.quantity <= Decimal::ZERO {
            return Err(LadderError::OrderRejected(format!(
                "quantity {} below lot size",
                order.quantity
            )));
        }

        let leverage = Decimal::from(
            state
                .leverage
                .get(&order.symbol)
                .copied()
                .unwrap_or(self.default_leverage),
        );

        let filled = match order.side {
            OrderSide::Sell => {
                let pos = state
                    .positions
                    .entry(order.symbol.clone())
                    .or_insert(PaperPosition {
                        signed_quantity: Decimal::ZERO,
                        entry_price: price,
                        margin: Decimal::ZERO,
                    });
                let held = pos.signed_quantity.abs();
                let total = held + order.quantity;
                pos.entry_price = (pos.entry_price * held + price * order.quantity) / total;
                pos.signed_quantity -= order.quantity;
                pos.margin += order.quantity * price / leverage;
                order.quantity
            }
            OrderSide::Buy => {
                let Some(pos) = state.positions.get_mut(&order.symbol) else {
                    return Err(LadderError::OrderRejected(format!(
                        "reduce-only buy with no position in {}",
                        order.symbol
                    )));
                };
                let held = pos.signed_quantity.abs();
                let filled = if order.reduce_only {
                    order.quantity.min(held)
                } else {
                    order.quantity
                };
                let remaining = held - filled;
                if remaining <= Decimal::ZERO {
                    state.positions.remove(&order.symbol);
                } else {
                    pos.margin = pos.margin * remaining / held;
                    pos.signed_quantity = -remaining;
                }
                filled
            }
        };

        state.orders.push(order.clone());
        debug!(
            "paper fill: {} {} {} @ {}",
            order.side, filled, order.symbol, price
        );
        Ok(OrderFill::new(filled, price))
    }

    fn round_quantity(&self, _symbol: &str, quantity: Decimal) -> Decimal {
        if self.lot_size <= Decimal::ZERO {
            return quantity;
        }
        (quantity / self.lot_size).floor() * self.lot_size
    }

    async fn prepare_symbol(&self, symbol: &str, leverage: u32) -> Result<()> {
        self.state
            .write()
            .await
            .leverage
            .insert(symbol.to_string(), leverage.max(1));
        Ok(())
    }
}
