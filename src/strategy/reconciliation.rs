//! Position reconciliation
//!
//! Rebuilds or corrects the ledger from the exchange's position report:
//! - Startup recovery of shorts opened before the process started
//! - Periodic sync: exchange quantities win, external closes are dropped
//! - Structured diff of every correction

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::ledger::PositionLedger;
use crate::config::{AppConfig, ReconciliationConfig, StepLadder};
use crate::domain::{AveragingPosition, EntrySource, ExchangePosition, PositionEntry};

/// Ledger fields overwritten from exchange truth
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncUpdate {
    pub symbol: String,
    pub old_quantity: Decimal,
    pub new_quantity: Decimal,
    pub old_margin: Decimal,
    pub new_margin: Decimal,
}

/// Sync result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub timestamp: DateTime<Utc>,
    pub updated: Vec<SyncUpdate>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Exchange rows that could not be tracked (invalid entry price, ...)
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.updated.is_empty() && self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    ladder: StepLadder,
    leverage: u32,
    config: ReconciliationConfig,
}

impl ReconciliationEngine {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            ladder: config.ladder.clone(),
            leverage: config.trading.leverage,
            config: config.reconciliation.clone(),
        }
    }

    /// First step whose cumulative ladder margin (plus tolerance) covers
    /// `margin`; the full ladder length when none does
    pub fn estimate_step(&self, margin: Decimal) -> u32 {
        let slack = Decimal::ONE + self.config.step_fit_tolerance;
        let mut cumulative = Decimal::ZERO;
        for (i, rung) in self.ladder.rungs.iter().enumerate() {
            cumulative += rung.margin;
            if margin <= cumulative * slack {
                return i as u32 + 1;
            }
        }
        self.ladder.len().max(1)
    }

    /// Synthesize a tracked position from one exchange short. Longs, flat
    /// rows and rows without an entry price yield `None`.
    pub fn position_from_exchange(
        &self,
        reported: &ExchangePosition,
        now: DateTime<Utc>,
    ) -> Option<AveragingPosition> {
        if !reported.is_short() || reported.entry_price <= Decimal::ZERO {
            return None;
        }
        let margin = reported.margin_or_estimate(self.leverage);
        let step = self.estimate_step(margin);

        Some(AveragingPosition::from_entry(
            &reported.symbol,
            PositionEntry {
                step,
                price: reported.entry_price,
                quantity: reported.quantity(),
                margin,
                timestamp: now,
                source: EntrySource::Recovered,
            },
        ))
    }

    /// Startup recovery: track every exchange short not yet in the ledger
    pub fn recover(
        &self,
        ledger: &mut PositionLedger,
        snapshot: &[ExchangePosition],
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let mut recovered = Vec::new();
        for reported in snapshot {
            if ledger.contains(&reported.symbol) {
                continue;
            }
            let Some(position) = self.position_from_exchange(reported, now) else {
                debug!("Skipping non-short exchange position {}", reported.symbol);
                continue;
            };
            let step = position.step();
            match ledger.insert_recovered(position) {
                Ok(()) => {
                    info!(
                        "Recovered {}: {} @ {} (est. step {})",
                        reported.symbol,
                        reported.quantity(),
                        reported.entry_price,
                        step
                    );
                    recovered.push(reported.symbol.clone());
                }
                Err(e) => warn!("Could not recover {}: {}", reported.symbol, e),
            }
        }
        recovered
    }

    /// Diff the ledger against a fresh snapshot; the exchange is authoritative
    pub fn sync(
        &self,
        ledger: &mut PositionLedger,
        snapshot: &[ExchangePosition],
        now: DateTime<Utc>,
    ) -> SyncReport {
        let started = Instant::now();
        let mut report = SyncReport {
            timestamp: now,
            updated: Vec::new(),
            added: Vec::new(),
            removed: Vec::new(),
            errors: Vec::new(),
            duration_ms: 0,
        };

        let shorts: HashMap<&str, &ExchangePosition> = snapshot
            .iter()
            .filter(|p| p.is_short())
            .map(|p| (p.symbol.as_str(), p))
            .collect();

        for (symbol, reported) in &shorts {
            let remote_qty = reported.quantity();
            let Some(local) = ledger.get(symbol) else {
                match self.position_from_exchange(reported, now) {
                    Some(position) => match ledger.insert_recovered(position) {
                        Ok(()) => report.added.push(symbol.to_string()),
                        Err(e) => report.errors.push(format!("{}: {}", symbol, e)),
                    },
                    None => report
                        .errors
                        .push(format!("{}: invalid entry price {}", symbol, reported.entry_price)),
                }
                continue;
            };

            if (local.total_quantity() - remote_qty).abs() <= remote_qty * self.config.quantity_tolerance {
                continue;
            }

            let update = SyncUpdate {
                symbol: symbol.to_string(),
                old_quantity: local.total_quantity(),
                new_quantity: remote_qty,
                old_margin: local.total_margin(),
                new_margin: reported.margin_or_estimate(self.leverage),
            };
            let entry_price = if reported.entry_price > Decimal::ZERO {
                reported.entry_price
            } else {
                local.average_entry()
            };
            match ledger.overwrite_from_exchange(symbol, remote_qty, entry_price, update.new_margin, now) {
                Ok(()) => report.updated.push(update),
                Err(e) => report.errors.push(format!("{}: {}", symbol, e)),
            }
        }

        for symbol in ledger.symbols() {
            if !shorts.contains_key(symbol.as_str()) {
                ledger.remove(&symbol);
                report.removed.push(symbol);
            }
        }

        report.added.sort();
        report.updated.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        report.duration_ms = started.elapsed().as_millis() as u64;

        if !report.is_clean() {
            info!(
                "Sync: {} updated, {} added, {} removed ({}ms)",
                report.updated.len(),
                report.added.len(),
                report.removed.len(),
                report.duration_ms
            );
            for u in &report.updated {
                info!(
                    "Sync {}: qty {} -> {}, margin {} -> {}",
                    u.symbol, u.old_quantity, u.new_quantity, u.old_margin, u.new_margin
                );
            }
        }
        for e in &report.errors {
            warn!("Sync error: {}", e);
        }
        report
    }
}
