//! Averaging short position
//!
//! One position per symbol. Fields are private: the ledger mutates them
//! through the crate-visible methods below, each of which keeps
//! `average_entry` equal to the quantity-weighted mean of `entries` and
//! `total_quantity` equal to their summed quantity.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;

/// Decimal places kept when entry quantities are rescaled
const QUANTITY_DP: u32 = 12;

/// Positions are always short
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Short,
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SHORT")
    }
}

/// Where an entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    /// Filled by this engine
    Fill,
    /// Reconstructed from the exchange at startup
    Recovered,
    /// Collapsed from exchange truth during a sync
    Synced,
}

/// A single fill contributing to the position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionEntry {
    pub step: u32,
    pub price: Decimal,
    pub quantity: Decimal,
    pub margin: Decimal,
    pub timestamp: DateTime<Utc>,
    pub source: EntrySource,
}

/// Trailing take-profit state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TrailState {
    #[default]
    Inactive,
    Trailing { peak_usd: Decimal },
}

impl TrailState {
    pub fn is_active(&self) -> bool {
        matches!(self, TrailState::Trailing { .. })
    }

    pub fn peak_usd(&self) -> Decimal {
        match self {
            TrailState::Inactive => Decimal::ZERO,
            TrailState::Trailing { peak_usd } => *peak_usd,
        }
    }
}

/// Quantity-weighted mean entry price; zero for an empty slice
pub fn weighted_average(entries: &[PositionEntry]) -> Decimal {
    let quantity: Decimal = entries.iter().map(|e| e.quantity).sum();
    if quantity.is_zero() {
        return Decimal::ZERO;
    }
    let cost: Decimal = entries.iter().map(|e| e.price * e.quantity).sum();
    cost / quantity
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AveragingPosition {
    symbol: String,
    side: PositionSide,
    entries: Vec<PositionEntry>,
    step: u32,
    total_quantity: Decimal,
    total_margin: Decimal,
    average_entry: Decimal,
    created_at: DateTime<Utc>,
    last_step_time: DateTime<Utc>,
    half_closed: bool,
    recycle_count: u32,
    recycled_margin: Decimal,
    trail: TrailState,
}

impl AveragingPosition {
    pub(crate) fn from_entry(symbol: &str, entry: PositionEntry) -> Self {
        let timestamp = entry.timestamp;
        Self {
            symbol: symbol.to_string(),
            side: PositionSide::Short,
            step: entry.step,
            total_quantity: entry.quantity,
            total_margin: entry.margin,
            average_entry: entry.price,
            entries: vec![entry],
            created_at: timestamp,
            last_step_time: timestamp,
            half_closed: false,
            recycle_count: 0,
            recycled_margin: Decimal::ZERO,
            trail: TrailState::Inactive,
        }
    }

    // ---- accessors ----

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn side(&self) -> PositionSide {
        self.side
    }

    pub fn entries(&self) -> &[PositionEntry] {
        &self.entries
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn total_quantity(&self) -> Decimal {
        self.total_quantity
    }

    pub fn total_margin(&self) -> Decimal {
        self.total_margin
    }

    pub fn average_entry(&self) -> Decimal {
        self.average_entry
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_step_time(&self) -> DateTime<Utc> {
        self.last_step_time
    }

    pub fn half_closed(&self) -> bool {
        self.half_closed
    }

    pub fn recycle_count(&self) -> u32 {
        self.recycle_count
    }

    pub fn recycled_margin(&self) -> Decimal {
        self.recycled_margin
    }

    pub fn trail_state(&self) -> TrailState {
        self.trail
    }

    pub fn trailing_tp_active(&self) -> bool {
        self.trail.is_active()
    }

    pub fn max_profit_usd(&self) -> Decimal {
        self.trail.peak_usd()
    }

    // ---- valuation ----

    /// USD P&L of the short at `price` (positive when price is below average)
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        (self.average_entry - price) * self.total_quantity
    }

    /// Move of `price` above the average entry, in percent
    pub fn adverse_move_pct(&self, price: Decimal) -> Decimal {
        if self.average_entry.is_zero() {
            return Decimal::ZERO;
        }
        (price - self.average_entry) / self.average_entry * Decimal::ONE_HUNDRED
    }

    /// Unrealized loss as a percentage of committed margin (negative in profit)
    pub fn margin_loss_pct(&self, price: Decimal) -> Decimal {
        if self.total_margin.is_zero() {
            return Decimal::ZERO;
        }
        -self.unrealized_pnl(price) / self.total_margin * Decimal::ONE_HUNDRED
    }

    pub fn minutes_since_last_step(&self, now: DateTime<Utc>) -> Decimal {
        Decimal::from((now - self.last_step_time).num_seconds()) / Decimal::from(60)
    }

    // ---- mutation (ledger only) ----

    pub(crate) fn push_entry(&mut self, entry: PositionEntry) {
        self.step = entry.step;
        self.last_step_time = entry.timestamp;
        self.total_quantity += entry.quantity;
        self.total_margin += entry.margin;
        self.entries.push(entry);
        self.average_entry = weighted_average(&self.entries);
    }

    /// Remove `quantity` pro rata from every entry. Returns what is left.
    pub(crate) fn reduce(&mut self, quantity: Decimal) -> Result<Decimal, LedgerError> {
        if quantity <= Decimal::ZERO {
            return Err(LedgerError::NonPositiveQuantity {
                symbol: self.symbol.clone(),
                quantity,
            });
        }
        if quantity > self.total_quantity {
            return Err(LedgerError::QuantityExceedsPosition {
                symbol: self.symbol.clone(),
                requested: quantity,
                available: self.total_quantity,
            });
        }

        let remaining = self.total_quantity - quantity;
        if remaining.is_zero() {
            self.entries.clear();
            self.total_quantity = Decimal::ZERO;
            return Ok(remaining);
        }

        let ratio = remaining / self.total_quantity;
        let last = self.entries.len() - 1;
        let mut assigned = Decimal::ZERO;
        for (i, entry) in self.entries.iter_mut().enumerate() {
            if i == last {
                // absorbs rounding so the entries sum exactly to `remaining`
                entry.quantity = remaining - assigned;
            } else {
                entry.quantity = (entry.quantity * ratio).round_dp(QUANTITY_DP);
                assigned += entry.quantity;
            }
        }
        self.total_quantity = remaining;
        self.average_entry = weighted_average(&self.entries);
        Ok(remaining)
    }

    pub(crate) fn mark_half_closed(&mut self) {
        self.half_closed = true;
    }

    pub(crate) fn record_recycle(&mut self, freed_margin: Decimal) {
        let freed = freed_margin.min(self.total_margin).max(Decimal::ZERO);
        self.total_margin -= freed;
        self.recycled_margin += freed;
        self.recycle_count += 1;
    }

    pub(crate) fn set_trail(&mut self, state: TrailState) {
        self.trail = state;
    }

    /// Replace aggregate state with exchange-reported truth, collapsing the
    /// entry history into one synthetic entry at the current step
    pub(crate) fn overwrite(
        &mut self,
        quantity: Decimal,
        entry_price: Decimal,
        margin: Decimal,
        now: DateTime<Utc>,
    ) {
        self.entries = vec![PositionEntry {
            step: self.step,
            price: entry_price,
            quantity,
            margin,
            timestamp: now,
            source: EntrySource::Synced,
        }];
        self.total_quantity = quantity;
        self.total_margin = margin;
        self.average_entry = entry_price;
    }
}
