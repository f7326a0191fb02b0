//! Position ledger
//!
//! Owns every averaging position, keyed by symbol. The tick owner holds the
//! ledger by value, so all mutation is serialized; other tasks read the
//! published [`LedgerSnapshot`] instead.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::config::CapacityConfig;
use crate::domain::{AveragingPosition, EntrySource, PositionEntry, TrailState};
use crate::error::LedgerError;

type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Unrounded contract quantity for `margin` at `leverage` and `price`
pub fn raw_quantity(margin: Decimal, leverage: u32, price: Decimal) -> Decimal {
    if price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    margin * Decimal::from(leverage) / price
}

#[derive(Debug, Clone)]
pub struct PositionLedger {
    positions: BTreeMap<String, AveragingPosition>,
    capacity: CapacityConfig,
    ladder_len: u32,
}

impl PositionLedger {
    pub fn new(capacity: CapacityConfig, ladder_len: u32) -> Self {
        Self {
            positions: BTreeMap::new(),
            capacity,
            ladder_len,
        }
    }

    // ==================== Queries ====================

    pub fn get(&self, symbol: &str) -> Option<&AveragingPosition> {
        self.positions.get(symbol)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AveragingPosition> {
        self.positions.values()
    }

    pub fn total_margin(&self) -> Decimal {
        self.positions.values().map(|p| p.total_margin()).sum()
    }

    /// Current position limit given aggregate margin
    pub fn max_positions(&self) -> usize {
        self.capacity.max_positions(self.total_margin())
    }

    pub fn can_open(&self) -> bool {
        self.len() < self.max_positions()
    }

    // ==================== Mutations ====================

    /// Start a new position at step 1
    pub fn open(
        &mut self,
        symbol: &str,
        price: Decimal,
        quantity: Decimal,
        margin: Decimal,
        now: DateTime<Utc>,
    ) -> LedgerResult<&AveragingPosition> {
        if self.contains(symbol) {
            return Err(LedgerError::PositionExists {
                symbol: symbol.to_string(),
            });
        }
        let limit = self.max_positions();
        if self.len() >= limit {
            return Err(LedgerError::CapacityExceeded {
                open: self.len(),
                limit,
            });
        }
        ensure_positive(symbol, quantity)?;

        let position = AveragingPosition::from_entry(
            symbol,
            PositionEntry {
                step: 1,
                price,
                quantity,
                margin,
                timestamp: now,
                source: EntrySource::Fill,
            },
        );
        Ok(&*self.positions.entry(symbol.to_string()).or_insert(position))
    }

    /// Append the next step, recomputing the weighted average
    pub fn add_entry(
        &mut self,
        symbol: &str,
        price: Decimal,
        quantity: Decimal,
        margin: Decimal,
        now: DateTime<Utc>,
    ) -> LedgerResult<&AveragingPosition> {
        ensure_positive(symbol, quantity)?;
        let ladder_len = self.ladder_len;
        let position = self.get_mut(symbol)?;
        if position.step() >= ladder_len {
            return Err(LedgerError::LadderExhausted {
                symbol: symbol.to_string(),
                step: position.step(),
                limit: ladder_len,
            });
        }

        let next_step = position.step() + 1;
        position.push_entry(PositionEntry {
            step: next_step,
            price,
            quantity,
            margin,
            timestamp: now,
            source: EntrySource::Fill,
        });
        Ok(&*position)
    }

    /// Shrink a position; it is removed once nothing is left. Returns the
    /// remaining quantity.
    pub fn reduce_quantity(&mut self, symbol: &str, quantity: Decimal) -> LedgerResult<Decimal> {
        let remaining = self.get_mut(symbol)?.reduce(quantity)?;
        if remaining.is_zero() {
            self.positions.remove(symbol);
        }
        Ok(remaining)
    }

    pub fn remove(&mut self, symbol: &str) -> Option<AveragingPosition> {
        self.positions.remove(symbol)
    }

    pub fn mark_half_closed(&mut self, symbol: &str) -> LedgerResult<()> {
        self.get_mut(symbol)?.mark_half_closed();
        Ok(())
    }

    pub fn record_recycle(&mut self, symbol: &str, freed_margin: Decimal) -> LedgerResult<()> {
        self.get_mut(symbol)?.record_recycle(freed_margin);
        Ok(())
    }

    pub fn set_trail_state(&mut self, symbol: &str, state: TrailState) -> LedgerResult<()> {
        self.get_mut(symbol)?.set_trail(state);
        Ok(())
    }

    /// Track a position reconstructed from the exchange. Capacity is not
    /// checked: the exchange already holds it.
    pub fn insert_recovered(&mut self, position: AveragingPosition) -> LedgerResult<()> {
        if self.contains(position.symbol()) {
            return Err(LedgerError::PositionExists {
                symbol: position.symbol().to_string(),
            });
        }
        ensure_positive(position.symbol(), position.total_quantity())?;
        self.positions.insert(position.symbol().to_string(), position);
        Ok(())
    }

    /// Overwrite aggregate fields with exchange-reported truth
    pub fn overwrite_from_exchange(
        &mut self,
        symbol: &str,
        quantity: Decimal,
        entry_price: Decimal,
        margin: Decimal,
        now: DateTime<Utc>,
    ) -> LedgerResult<()> {
        ensure_positive(symbol, quantity)?;
        self.get_mut(symbol)?.overwrite(quantity, entry_price, margin, now);
        Ok(())
    }

    fn get_mut(&mut self, symbol: &str) -> LedgerResult<&mut AveragingPosition> {
        self.positions
            .get_mut(symbol)
            .ok_or_else(|| LedgerError::PositionNotFound {
                symbol: symbol.to_string(),
            })
    }

    // ==================== Snapshot ====================

    /// Read-only view for status reporting, valued at the last seen prices
    pub fn snapshot(&self, prices: &HashMap<String, Decimal>, now: DateTime<Utc>) -> LedgerSnapshot {
        let positions: Vec<PositionStatus> = self
            .positions
            .values()
            .map(|p| {
                let mark_price = prices.get(p.symbol()).copied();
                PositionStatus {
                    symbol: p.symbol().to_string(),
                    step: p.step(),
                    quantity: p.total_quantity(),
                    margin: p.total_margin(),
                    average_entry: p.average_entry(),
                    mark_price,
                    unrealized_pnl: mark_price.map(|price| p.unrealized_pnl(price)),
                    half_closed: p.half_closed(),
                    recycle_count: p.recycle_count(),
                    trailing_active: p.trailing_tp_active(),
                    peak_profit_usd: p.max_profit_usd(),
                    age_minutes: (now - p.created_at()).num_minutes(),
                }
            })
            .collect();

        LedgerSnapshot {
            taken_at: now,
            total_margin: self.total_margin(),
            total_unrealized_pnl: positions.iter().filter_map(|p| p.unrealized_pnl).sum(),
            open_positions: positions.len(),
            max_positions: self.max_positions(),
            positions,
        }
    }
}

fn ensure_positive(symbol: &str, quantity: Decimal) -> LedgerResult<()> {
    if quantity <= Decimal::ZERO {
        return Err(LedgerError::NonPositiveQuantity {
            symbol: symbol.to_string(),
            quantity,
        });
    }
    Ok(())
}

/// Status line for one position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionStatus {
    pub symbol: String,
    pub step: u32,
    pub quantity: Decimal,
    pub margin: Decimal,
    pub average_entry: Decimal,
    pub mark_price: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
    pub half_closed: bool,
    pub recycle_count: u32,
    pub trailing_active: bool,
    pub peak_profit_usd: Decimal,
    pub age_minutes: i64,
}

/// Point-in-time copy of the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub taken_at: DateTime<Utc>,
    pub positions: Vec<PositionStatus>,
    pub total_margin: Decimal,
    pub total_unrealized_pnl: Decimal,
    pub open_positions: usize,
    pub max_positions: usize,
}

impl LedgerSnapshot {
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            taken_at: now,
            positions: Vec::new(),
            total_margin: Decimal::ZERO,
            total_unrealized_pnl: Decimal::ZERO,
            open_positions: 0,
            max_positions: 0,
        }
    }
}
