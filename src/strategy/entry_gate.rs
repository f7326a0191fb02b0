//! Entry gate
//!
//! Owns the ledger and drives one control-loop tick:
//! 1. Every tracked symbol runs emergency, take-profit, half-close,
//!    early-close, recycle and step-add checks in that order; the first
//!    closing action ends the symbol's turn.
//! 2. Approved step adds that need confirmation are checked by the
//!    readiness oracle on a bounded worker pool. Workers only report back
//!    over a channel; the tick owner applies every mutation.
//! 3. New entries are opened from scanner candidates while capacity allows.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, error, info, warn};

use super::admission::{
    AdmissionController, EarlyCloseKind, EmergencyTrigger, StepDecision, StepGate,
};
use super::blacklist::{BanStatus, DynamicBlacklist, StopLossRecord};
use super::journal::LossJournal;
use super::ledger::{raw_quantity, LedgerSnapshot, PositionLedger};
use super::oracles::{EntryReadinessOracle, Oracles};
use super::reconciliation::{ReconciliationEngine, SyncReport};
use super::trailing::{TakeProfitTrailer, TrailDecision};
use crate::config::{AppConfig, EmergencyAction};
use crate::domain::{MarketOrder, OrderFill, PumpCandidate, ReadinessVerdict};
use crate::error::{LadderError, LedgerError, Result};
use crate::exchange::{with_timeout, MarketDataSource, OrderGateway};

// ==================== Tick report ====================

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    TakeProfit,
    EarlyAutoClose(EarlyCloseKind),
    EmergencyStop(EmergencyTrigger),
}

impl CloseReason {
    /// Stop-type closes feed the dynamic blacklist when they lose money
    pub fn is_stop(&self) -> bool {
        matches!(self, CloseReason::EmergencyStop(_))
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::TakeProfit => write!(f, "Take Profit"),
            CloseReason::EarlyAutoClose(kind) => write!(f, "Auto-close ({})", kind),
            CloseReason::EmergencyStop(trigger) => write!(f, "Emergency stop ({})", trigger),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub symbol: String,
    pub reason: CloseReason,
    pub quantity: Decimal,
    pub exit_price: Decimal,
    pub realized_pnl: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepAdded {
    pub symbol: String,
    pub step: u32,
    pub price: Decimal,
    pub margin: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedAction {
    pub symbol: String,
    pub reason: String,
}

/// Everything one tick did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub started_at: DateTime<Utc>,
    pub steps_added: Vec<StepAdded>,
    pub half_closed: Vec<String>,
    pub closed: Vec<ClosedPosition>,
    pub emergency_warnings: Vec<String>,
    pub emergency_closed: Vec<ClosedPosition>,
    pub auto_closed: Vec<ClosedPosition>,
    pub recycled: Vec<String>,
    pub opened: Vec<String>,
    pub skipped: Vec<SkippedAction>,
}

impl TickReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            steps_added: Vec::new(),
            half_closed: Vec::new(),
            closed: Vec::new(),
            emergency_warnings: Vec::new(),
            emergency_closed: Vec::new(),
            auto_closed: Vec::new(),
            recycled: Vec::new(),
            opened: Vec::new(),
            skipped: Vec::new(),
        }
    }

    fn skip(&mut self, symbol: &str, reason: impl Into<String>) {
        self.skipped.push(SkippedAction {
            symbol: symbol.to_string(),
            reason: reason.into(),
        });
    }

    /// Ledger-changing actions taken this tick
    pub fn action_count(&self) -> usize {
        self.steps_added.len()
            + self.half_closed.len()
            + self.closed.len()
            + self.emergency_closed.len()
            + self.auto_closed.len()
            + self.recycled.len()
            + self.opened.len()
    }
}

/// Step add approved by admission control, pending confirmation
#[derive(Debug, Clone)]
struct StepRequest {
    symbol: String,
    next_step: u32,
    margin: Decimal,
    price: Decimal,
    gate: StepGate,
}

/// Self-contained readiness lookup, runnable on a worker task
struct ReadinessLookup {
    market: Arc<dyn MarketDataSource>,
    oracle: Arc<dyn EntryReadinessOracle>,
    interval: String,
    limit: usize,
    timeout: Duration,
}

impl ReadinessLookup {
    async fn run(&self, symbol: &str) -> Result<ReadinessVerdict> {
        let candles = with_timeout(
            "candles",
            self.timeout,
            self.market.recent_candles(symbol, &self.interval, self.limit),
        )
        .await?;
        with_timeout(
            "entry readiness",
            self.timeout,
            self.oracle.is_entry_ready(symbol, &candles),
        )
        .await
    }
}

/// Margin for a partially filled order
fn prorated(amount: Decimal, filled: Decimal, requested: Decimal) -> Decimal {
    if requested <= Decimal::ZERO || filled >= requested {
        amount
    } else {
        amount * filled / requested
    }
}

// ==================== Gate ====================

pub struct EntryGate {
    ledger: PositionLedger,
    admission: AdmissionController,
    trailer: TakeProfitTrailer,
    blacklist: DynamicBlacklist,
    reconciler: ReconciliationEngine,
    journal: Option<LossJournal>,
    market: Arc<dyn MarketDataSource>,
    gateway: Arc<dyn OrderGateway>,
    oracles: Oracles,
    last_prices: HashMap<String, Decimal>,
    last_entry_scan: Option<DateTime<Utc>>,
    status_tx: watch::Sender<LedgerSnapshot>,
    config: AppConfig,
}

impl EntryGate {
    pub fn new(
        config: AppConfig,
        market: Arc<dyn MarketDataSource>,
        gateway: Arc<dyn OrderGateway>,
        oracles: Oracles,
    ) -> Result<Self> {
        config.validate()?;

        let journal = config
            .blacklist
            .journal_path
            .clone()
            .map(|path| LossJournal::new(path, config.blacklist.retention_hours));
        let (status_tx, _) = watch::channel(LedgerSnapshot::empty(Utc::now()));

        Ok(Self {
            ledger: PositionLedger::new(config.capacity.clone(), config.ladder.len()),
            admission: AdmissionController::new(&config),
            trailer: TakeProfitTrailer::new(&config.take_profit),
            blacklist: DynamicBlacklist::new(config.blacklist.clone()),
            reconciler: ReconciliationEngine::new(&config),
            journal,
            market,
            gateway,
            oracles,
            last_prices: HashMap::new(),
            last_entry_scan: None,
            status_tx,
            config,
        })
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    pub fn blacklist(&self) -> &DynamicBlacklist {
        &self.blacklist
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Active dynamic bans; expired ones are dropped on the way
    pub fn bans(&mut self, now: DateTime<Utc>) -> Vec<BanStatus> {
        self.blacklist.status(now)
    }

    /// Status feed; a fresh snapshot is published after every tick and sync
    pub fn subscribe(&self) -> watch::Receiver<LedgerSnapshot> {
        self.status_tx.subscribe()
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> LedgerSnapshot {
        self.ledger.snapshot(&self.last_prices, now)
    }

    fn call_timeout(&self) -> Duration {
        self.config.runtime.call_timeout()
    }

    // ==================== Startup / sync ====================

    /// Replay the loss journal so bans survive restarts
    pub async fn restore_loss_history(&mut self, now: DateTime<Utc>) -> Result<usize> {
        let Some(journal) = &self.journal else {
            return Ok(0);
        };
        let records = journal.load(now).await?;
        let count = self.blacklist.replay(records, now);
        for ban in self.blacklist.status(now) {
            info!(
                "Restored ban on {} ({}h remaining)",
                ban.symbol, ban.remaining_hours
            );
        }
        Ok(count)
    }

    /// Track every short already open on the exchange
    pub async fn recover(&mut self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let snapshot = with_timeout("positions", self.call_timeout(), self.market.positions()).await?;
        let recovered = self.reconciler.recover(&mut self.ledger, &snapshot, now);
        info!(
            "Recovery complete: {} positions tracked ({} recovered)",
            self.ledger.len(),
            recovered.len()
        );
        self.publish_status(now);
        Ok(recovered)
    }

    /// Correct the ledger against the exchange's current positions
    pub async fn sync(&mut self, now: DateTime<Utc>) -> Result<SyncReport> {
        let snapshot = with_timeout("positions", self.call_timeout(), self.market.positions()).await?;
        let report = self.reconciler.sync(&mut self.ledger, &snapshot, now);
        self.publish_status(now);
        Ok(report)
    }

    // ==================== Tick ====================

    pub async fn tick(&mut self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::new(now);
        let mut step_requests = Vec::new();

        for symbol in self.ledger.symbols() {
            match self.manage_position(&symbol, now, &mut report).await {
                Ok(Some(request)) => step_requests.push(request),
                Ok(None) => {}
                Err(e) => {
                    if e.is_transient() {
                        warn!("{}: {} (retrying next tick)", symbol, e);
                    } else {
                        warn!("{}: {}", symbol, e);
                    }
                    report.skip(&symbol, e.to_string());
                }
            }
        }

        self.apply_step_adds(step_requests, now, &mut report).await;

        if self.entry_scan_due(now) {
            self.last_entry_scan = Some(now);
            if let Err(e) = self.scan_entries(now, &mut report).await {
                warn!("Entry scan failed: {}", e);
            }
        }

        self.publish_status(now);
        report
    }

    async fn manage_position(
        &mut self,
        symbol: &str,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<Option<StepRequest>> {
        if self.blacklist.is_blocked(symbol, now) {
            debug!("{} is blacklisted, not managed this tick", symbol);
            return Ok(None);
        }

        let quoted = with_timeout("mark price", self.call_timeout(), self.market.mark_price(symbol)).await?;
        let price = match quoted {
            Some(price) if price > Decimal::ZERO => price,
            _ => {
                debug!("No price for {}, skipping", symbol);
                report.skip(symbol, "no mark price");
                return Ok(None);
            }
        };
        self.last_prices.insert(symbol.to_string(), price);

        let Some(position) = self.ledger.get(symbol).cloned() else {
            return Ok(None);
        };

        // Emergency
        if let Some(signal) = self.admission.evaluate_emergency(&position, price) {
            warn!(
                "EMERGENCY {} ({}): loss ${:.2}, drawdown {:.1}% at step {}, avg {}",
                symbol,
                signal.trigger,
                signal.loss_usd,
                signal.drawdown_pct,
                position.step(),
                position.average_entry()
            );
            report.emergency_warnings.push(symbol.to_string());

            if self.config.emergency.action == EmergencyAction::Close {
                let closed = self
                    .close_position(symbol, price, CloseReason::EmergencyStop(signal.trigger), now)
                    .await?;
                report.emergency_closed.push(closed);
                return Ok(None);
            }
        }

        // Take profit
        let profit = position.unrealized_pnl(price);
        let outcome = self.trailer.evaluate(position.trail_state(), position.step(), profit);
        self.ledger.set_trail_state(symbol, outcome.next)?;
        match outcome.decision {
            TrailDecision::Harvest {
                peak_usd,
                profit_usd,
                retrace,
            } => {
                info!(
                    "{} trailing TP: ${:.2} is {:.0}% off peak ${:.2}, closing",
                    symbol,
                    profit_usd,
                    retrace * Decimal::ONE_HUNDRED,
                    peak_usd
                );
                let closed = self
                    .close_position(symbol, price, CloseReason::TakeProfit, now)
                    .await?;
                report.closed.push(closed);
                return Ok(None);
            }
            TrailDecision::Activated { target_usd } => {
                info!(
                    "{} trailing TP armed at ${:.2} (target ${})",
                    symbol, profit, target_usd
                );
            }
            TrailDecision::Reset { peak_usd } => {
                info!(
                    "{} trailing TP reset: ${:.2} under floor, peak was ${:.2}",
                    symbol, profit, peak_usd
                );
            }
            TrailDecision::Raised { peak_usd } => {
                debug!("{} trailing peak ${:.2}", symbol, peak_usd);
            }
            TrailDecision::Hold => {}
        }

        // Half close
        if let Some(plan) = self.admission.evaluate_half_close(&position, price) {
            info!(
                "{} half-close at step {}: ${:.2} >= ${}",
                symbol,
                position.step(),
                plan.profit_usd,
                plan.target_usd
            );
            self.half_close(symbol, price).await?;
            report.half_closed.push(symbol.to_string());
            return Ok(None);
        }

        // Early auto-close
        if let Some(plan) = self.admission.evaluate_early_close(
            &position,
            price,
            self.ledger.total_margin(),
            self.ledger.len(),
        ) {
            info!(
                "{} auto-close to free capacity ({}): P&L ${:.2}",
                symbol, plan.kind, plan.pnl_usd
            );
            let closed = self
                .close_position(symbol, price, CloseReason::EarlyAutoClose(plan.kind), now)
                .await?;
            report.auto_closed.push(closed);
            return Ok(None);
        }

        // Recycle; not terminal
        if let Some(plan) = self.admission.evaluate_recycle(&position, price) {
            info!(
                "{} recycling {}%: P&L ${:.2}, {:.2}% from avg",
                symbol,
                plan.fraction * Decimal::ONE_HUNDRED,
                plan.pnl_usd,
                plan.distance_pct
            );
            self.recycle(symbol, price, plan.fraction).await?;
            report.recycled.push(symbol.to_string());
        }

        // Step add
        let Some(position) = self.ledger.get(symbol) else {
            return Ok(None);
        };
        match self.admission.evaluate_step_add(position, price, now) {
            StepDecision::Add {
                next_step,
                margin,
                gate,
            } => Ok(Some(StepRequest {
                symbol: symbol.to_string(),
                next_step,
                margin,
                price,
                gate,
            })),
            StepDecision::Hold(reason) => {
                debug!("{} holding at step {}: {}", symbol, position.step(), reason);
                Ok(None)
            }
        }
    }

    async fn apply_step_adds(
        &mut self,
        requests: Vec<StepRequest>,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        if requests.is_empty() {
            return;
        }

        let to_confirm: Vec<String> = requests
            .iter()
            .filter(|r| self.admission.needs_confirmation(r.next_step))
            .map(|r| r.symbol.clone())
            .collect();
        let mut verdicts = self.check_readiness(to_confirm).await;

        for request in requests {
            if self.admission.needs_confirmation(request.next_step) {
                match verdicts.remove(&request.symbol) {
                    Some(Ok(verdict)) if self.admission.confirms_step(request.next_step, &verdict) => {
                        debug!(
                            "{} step {} confirmed: {}",
                            request.symbol, request.next_step, verdict.reason
                        );
                    }
                    Some(Ok(verdict)) => {
                        info!(
                            "{} step {} not confirmed ({:?}): {}",
                            request.symbol, request.next_step, verdict.strength, verdict.reason
                        );
                        continue;
                    }
                    Some(Err(e)) => {
                        warn!("{} readiness check failed: {}", request.symbol, e);
                        report.skip(&request.symbol, e.to_string());
                        continue;
                    }
                    None => continue,
                }
            }

            match self.add_step(&request, now).await {
                Ok(added) => report.steps_added.push(added),
                Err(e) => {
                    warn!(
                        "{} step {} failed: {}",
                        request.symbol, request.next_step, e
                    );
                    report.skip(&request.symbol, e.to_string());
                }
            }
        }
    }

    /// Fan readiness lookups out over the worker pool and collect the
    /// answers from the result channel. Every requested symbol gets an
    /// answer; a lookup task that dies without reporting yields an error.
    async fn check_readiness(&self, symbols: Vec<String>) -> HashMap<String, Result<ReadinessVerdict>> {
        let mut verdicts = HashMap::new();
        if symbols.is_empty() {
            return verdicts;
        }

        let (tx, mut rx) = mpsc::channel(symbols.len());
        let permits = Arc::new(Semaphore::new(self.config.readiness.workers));

        for symbol in symbols.iter().cloned() {
            let lookup = ReadinessLookup {
                market: Arc::clone(&self.market),
                oracle: Arc::clone(&self.oracles.readiness),
                interval: self.config.readiness.candle_interval.clone(),
                limit: self.config.readiness.candle_limit,
                timeout: self.call_timeout(),
            };
            let permits = Arc::clone(&permits);
            let tx = tx.clone();

            tokio::spawn(async move {
                let verdict = match permits.acquire_owned().await {
                    Ok(_permit) => lookup.run(&symbol).await,
                    Err(_) => Err(LadderError::Internal("readiness pool closed".to_string())),
                };
                let _ = tx.send((symbol, verdict)).await;
            });
        }
        drop(tx);

        while let Some((symbol, verdict)) = rx.recv().await {
            verdicts.insert(symbol, verdict);
        }
        for symbol in symbols {
            verdicts.entry(symbol).or_insert_with_key(|symbol| {
                Err(LadderError::Oracle(format!("no readiness verdict for {}", symbol)))
            });
        }
        verdicts
    }

    // ==================== New entries ====================

    fn entry_scan_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_entry_scan {
            None => true,
            Some(last) => {
                (now - last).num_seconds() >= self.config.runtime.entry_scan_interval_secs as i64
            }
        }
    }

    async fn scan_entries(&mut self, now: DateTime<Utc>, report: &mut TickReport) -> Result<()> {
        if !self.ledger.can_open() {
            debug!(
                "At capacity ({}/{}), not scanning",
                self.ledger.len(),
                self.ledger.max_positions()
            );
            return Ok(());
        }

        let candidates = with_timeout(
            "pump scan",
            self.call_timeout(),
            self.oracles.scanner.find_pumped_coins(),
        )
        .await?;

        let mut shortlist: Vec<PumpCandidate> = Vec::new();
        for candidate in candidates.into_iter().take(self.config.entry.scan_limit) {
            if self.ledger.contains(&candidate.symbol)
                || candidate.price <= Decimal::ZERO
                || self.blacklist.is_blocked(&candidate.symbol, now)
            {
                continue;
            }
            shortlist.push(candidate);
        }
        if shortlist.is_empty() {
            return Ok(());
        }

        let verdicts = self
            .check_readiness(shortlist.iter().map(|c| c.symbol.clone()).collect())
            .await;
        let ready: Vec<PumpCandidate> = shortlist
            .into_iter()
            .filter(|c| match verdicts.get(&c.symbol) {
                Some(Ok(verdict)) => verdict.ready,
                Some(Err(e)) => {
                    debug!("{} readiness unavailable: {}", c.symbol, e);
                    false
                }
                None => false,
            })
            .collect();

        for candidate in ready.into_iter().take(self.config.entry.max_new_per_tick) {
            if !self.ledger.can_open() {
                break;
            }
            match self.try_open(&candidate, now).await {
                Ok(true) => report.opened.push(candidate.symbol.clone()),
                Ok(false) => {}
                Err(e) => {
                    warn!("Could not open {}: {}", candidate.symbol, e);
                    report.skip(&candidate.symbol, e.to_string());
                }
            }
        }
        Ok(())
    }

    async fn try_open(&mut self, candidate: &PumpCandidate, now: DateTime<Utc>) -> Result<bool> {
        let symbol = candidate.symbol.as_str();

        let trend = with_timeout("trend check", self.call_timeout(), self.oracles.trend.check_1h_trend(symbol)).await?;
        if !trend.ok_to_short {
            info!("{} skipped, 1h trend: {}", symbol, trend.reason);
            return Ok(false);
        }

        if candidate.pump_percent >= self.config.entry.sentiment_pump_threshold {
            if let Some(sentiment) = &self.oracles.sentiment {
                let verdict = with_timeout(
                    "sentiment check",
                    self.call_timeout(),
                    sentiment.is_good_short_entry(symbol, candidate.pump_percent),
                )
                .await?;
                if !verdict.is_good {
                    info!("{} skipped, sentiment: {}", symbol, verdict.reason);
                    return Ok(false);
                }
            }
        }

        let price = with_timeout("mark price", self.call_timeout(), self.market.mark_price(symbol))
            .await?
            .filter(|p| *p > Decimal::ZERO)
            .unwrap_or(candidate.price);
        let margin = self.config.ladder.entry_margin();
        let quantity = self.sized_quantity(symbol, margin, price)?;

        let leverage = self.config.trading.leverage;
        if let Err(e) = with_timeout("prepare symbol", self.call_timeout(), self.gateway.prepare_symbol(symbol, leverage)).await {
            warn!("{} leverage setup failed: {}", symbol, e);
        }

        let fill = self.submit(MarketOrder::open_short(symbol, quantity)).await?;
        let fill_price = fill.price_or(price);
        let margin = prorated(margin, fill.filled_quantity, quantity);
        self.ledger
            .open(symbol, fill_price, fill.filled_quantity, margin, now)?;
        self.last_prices.insert(symbol.to_string(), price);

        info!(
            "OPENED {} short: {} @ {} (${} margin, pump {:.1}%)",
            symbol, fill.filled_quantity, fill_price, margin, candidate.pump_percent
        );
        Ok(true)
    }

    // ==================== Order actions ====================

    fn sized_quantity(&self, symbol: &str, margin: Decimal, price: Decimal) -> Result<Decimal> {
        let raw = raw_quantity(margin, self.config.trading.leverage, price);
        let quantity = self.gateway.round_quantity(symbol, raw);
        if quantity <= Decimal::ZERO {
            return Err(LadderError::QuantityTooSmall {
                symbol: symbol.to_string(),
                raw,
            });
        }
        Ok(quantity)
    }

    async fn submit(&self, order: MarketOrder) -> Result<OrderFill> {
        let fill = with_timeout(
            "market order",
            self.call_timeout(),
            self.gateway.place_market_order(&order),
        )
        .await?;
        if fill.is_empty() {
            return Err(LadderError::OrderRejected(format!(
                "{} {} {} was not filled",
                order.side, order.quantity, order.symbol
            )));
        }
        Ok(fill)
    }

    async fn add_step(&mut self, request: &StepRequest, now: DateTime<Utc>) -> Result<StepAdded> {
        let quantity = self.sized_quantity(&request.symbol, request.margin, request.price)?;
        let fill = self
            .submit(MarketOrder::open_short(&request.symbol, quantity))
            .await?;
        let price = fill.price_or(request.price);
        let margin = prorated(request.margin, fill.filled_quantity, quantity);

        let position = self
            .ledger
            .add_entry(&request.symbol, price, fill.filled_quantity, margin, now)?;
        info!(
            "{} step {} added: {} @ {} (${} margin, {}), avg {:.6}",
            request.symbol,
            position.step(),
            fill.filled_quantity,
            price,
            margin,
            request.gate,
            position.average_entry()
        );

        Ok(StepAdded {
            symbol: request.symbol.clone(),
            step: position.step(),
            price,
            margin,
        })
    }

    async fn close_position(
        &mut self,
        symbol: &str,
        price: Decimal,
        reason: CloseReason,
        now: DateTime<Utc>,
    ) -> Result<ClosedPosition> {
        let position = self
            .ledger
            .get(symbol)
            .cloned()
            .ok_or_else(|| LedgerError::PositionNotFound {
                symbol: symbol.to_string(),
            })?;

        let quantity = self.gateway.round_quantity(symbol, position.total_quantity());
        if quantity <= Decimal::ZERO {
            return Err(LadderError::QuantityTooSmall {
                symbol: symbol.to_string(),
                raw: position.total_quantity(),
            });
        }

        let fill = self.submit(MarketOrder::close_short(symbol, quantity)).await?;
        let exit_price = fill.price_or(price);
        let closed_qty = fill.filled_quantity.min(position.total_quantity());
        let realized_pnl = (position.average_entry() - exit_price) * closed_qty;

        // Lot rounding or a partial fill can leave a residual on the exchange
        if closed_qty >= position.total_quantity() {
            self.ledger.remove(symbol);
        } else {
            let remaining = self.ledger.reduce_quantity(symbol, closed_qty)?;
            warn!(
                "{} close filled {} of {} ordered, {} still open",
                symbol, fill.filled_quantity, quantity, remaining
            );
        }

        info!(
            "CLOSED {} ({}): {} @ {}, P&L ${:.2}",
            symbol, reason, closed_qty, exit_price, realized_pnl
        );

        if reason.is_stop() && realized_pnl < Decimal::ZERO {
            self.record_loss(StopLossRecord {
                symbol: symbol.to_string(),
                timestamp: now,
                reason: reason.to_string(),
                loss_usd: -realized_pnl,
            })
            .await;
        }

        Ok(ClosedPosition {
            symbol: symbol.to_string(),
            reason,
            quantity: closed_qty,
            exit_price,
            realized_pnl,
        })
    }

    async fn half_close(&mut self, symbol: &str, price: Decimal) -> Result<()> {
        let position = self
            .ledger
            .get(symbol)
            .cloned()
            .ok_or_else(|| LedgerError::PositionNotFound {
                symbol: symbol.to_string(),
            })?;

        let quantity = self
            .gateway
            .round_quantity(symbol, position.total_quantity() / Decimal::TWO);
        if quantity <= Decimal::ZERO {
            return Err(LadderError::QuantityTooSmall {
                symbol: symbol.to_string(),
                raw: position.total_quantity() / Decimal::TWO,
            });
        }

        let fill = self.submit(MarketOrder::close_short(symbol, quantity)).await?;
        let closed = fill.filled_quantity.min(position.total_quantity());
        let exit_price = fill.price_or(price);
        let remaining = self.ledger.reduce_quantity(symbol, closed)?;
        if remaining > Decimal::ZERO {
            self.ledger.mark_half_closed(symbol)?;
        }

        info!(
            "HALF-CLOSED {}: {} @ {}, locked ${:.2}, {} remaining",
            symbol,
            closed,
            exit_price,
            (position.average_entry() - exit_price) * closed,
            remaining
        );
        Ok(())
    }

    async fn recycle(&mut self, symbol: &str, price: Decimal, fraction: Decimal) -> Result<()> {
        let position = self
            .ledger
            .get(symbol)
            .cloned()
            .ok_or_else(|| LedgerError::PositionNotFound {
                symbol: symbol.to_string(),
            })?;

        let raw = position.total_quantity() * fraction;
        let quantity = self.gateway.round_quantity(symbol, raw);
        if quantity <= Decimal::ZERO {
            return Err(LadderError::QuantityTooSmall {
                symbol: symbol.to_string(),
                raw,
            });
        }

        let fill = self.submit(MarketOrder::close_short(symbol, quantity)).await?;
        let closed = fill.filled_quantity.min(position.total_quantity());
        let freed = prorated(position.total_margin() * fraction, closed, quantity);
        let remaining = self.ledger.reduce_quantity(symbol, closed)?;
        if remaining > Decimal::ZERO {
            self.ledger.record_recycle(symbol, freed)?;
        }

        info!(
            "RECYCLED {}: closed {} @ {}, freed ${:.2} margin",
            symbol,
            closed,
            fill.price_or(price),
            freed
        );
        Ok(())
    }

    async fn record_loss(&mut self, record: StopLossRecord) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(&record).await {
                error!("Failed to journal loss for {}: {}", record.symbol, e);
            }
        }
        self.blacklist.record_loss(record);
    }

    fn publish_status(&mut self, now: DateTime<Utc>) {
        let ledger = &self.ledger;
        self.last_prices.retain(|symbol, _| ledger.contains(symbol));
        self.status_tx.send_replace(self.ledger.snapshot(&self.last_prices, now));
    }
}
