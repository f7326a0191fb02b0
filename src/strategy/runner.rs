//! Engine runner
//!
//! Startup recovery, then the tick and sync loops until shutdown.

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use super::entry_gate::{EntryGate, TickReport};
use crate::error::Result;

pub struct EngineRunner {
    gate: EntryGate,
    ticks: u64,
}

impl EngineRunner {
    pub fn new(gate: EntryGate) -> Self {
        Self { gate, ticks: 0 }
    }

    pub fn gate(&self) -> &EntryGate {
        &self.gate
    }

    pub fn into_gate(self) -> EntryGate {
        self.gate
    }

    /// Ticks completed so far
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Restore the loss history, then adopt positions already open on the
    /// exchange. Neither failure is fatal.
    pub async fn startup(&mut self) {
        let now = Utc::now();
        match self.gate.restore_loss_history(now).await {
            Ok(0) => {}
            Ok(count) => info!("Replayed {} loss records", count),
            Err(e) => error!("Failed to restore loss history: {}", e),
        }
        if let Err(e) = self.gate.recover(now).await {
            warn!("Position recovery failed, starting with an empty ledger: {}", e);
        }
    }

    /// Run until the shutdown flag flips to `true` or its sender is dropped
    pub async fn run_until(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.startup().await;

        let runtime = self.gate.config().runtime.clone();
        let mut tick = tokio::time::interval(runtime.tick_interval());
        let mut sync = tokio::time::interval_at(
            Instant::now() + runtime.sync_interval(),
            runtime.sync_interval(),
        );
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        sync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Engine running: tick every {}s, sync every {}s",
            runtime.tick_interval_secs, runtime.sync_interval_secs
        );

        if *shutdown.borrow() {
            return Ok(());
        }

        loop {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown signal received");
                        break;
                    }
                }

                _ = tick.tick() => {
                    let report = self.gate.tick(Utc::now()).await;
                    self.ticks += 1;
                    self.log_tick(&report);
                }

                _ = sync.tick() => {
                    if let Err(e) = self.gate.sync(Utc::now()).await {
                        warn!("Sync failed: {}", e);
                    }
                }
            }
        }

        let snapshot = self.gate.snapshot(Utc::now());
        info!(
            "Engine stopped after {} ticks with {} open positions (${} margin)",
            self.ticks, snapshot.open_positions, snapshot.total_margin
        );
        Ok(())
    }

    fn log_tick(&self, report: &TickReport) {
        let snapshot = self.gate.snapshot(report.started_at);
        let pnl = snapshot.total_unrealized_pnl.round_dp(2);

        info!(
            "Tick {}: {}/{} positions, margin ${}, uPnL ${}, {} actions",
            self.ticks,
            snapshot.open_positions,
            snapshot.max_positions,
            snapshot.total_margin,
            pnl,
            report.action_count()
        );
        if !report.emergency_warnings.is_empty() {
            warn!("Emergency warnings: {}", report.emergency_warnings.join(", "));
        }
    }
}
