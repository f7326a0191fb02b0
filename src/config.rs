use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{LadderError, Result};

/// Main configuration structure.
///
/// Every section falls back to its `Default`, so an empty file (or no file
/// at all) yields the reference configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ladder: StepLadder,
    pub trading: TradingConfig,
    pub capacity: CapacityConfig,
    pub emergency: EmergencyConfig,
    pub half_close: HalfCloseConfig,
    pub take_profit: TakeProfitConfig,
    pub early_close: EarlyCloseConfig,
    pub recycle: RecycleConfig,
    pub blacklist: BlacklistConfig,
    pub readiness: ReadinessConfig,
    pub entry: EntryConfig,
    pub reconciliation: ReconciliationConfig,
    pub runtime: RuntimeConfig,
    pub logging: LoggingConfig,
}

// ==================== Step ladder ====================

/// One rung of the margin ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRung {
    /// Margin committed by this step (USD)
    pub margin: Decimal,
    /// Required adverse move from the average entry, in percent
    pub distance_pct: Decimal,
    /// Minimum minutes since the previous step
    pub wait_minutes: u32,
}

/// Ordered per-step schedule of margin, distance and wait gates
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StepLadder {
    pub rungs: Vec<StepRung>,
    /// Nominal ladder length; positions that recycled margin may go past it
    /// up to `rungs.len()`
    pub max_steps: u32,
    /// Margin-loss percent required to add step 2, 3, 4 (indexed by current step)
    pub early_loss_pct: Vec<Decimal>,
    /// Distance multiple at which the wait gate is waived
    pub time_waiver_multiple: Decimal,
}

impl Default for StepLadder {
    fn default() -> Self {
        const RUNGS: [(i64, i64, u32); 9] = [
            (4, 0, 0),
            (4, 3, 2),
            (6, 5, 2),
            (6, 8, 3),
            (8, 12, 3),
            (11, 16, 5),
            (16, 20, 5),
            (21, 25, 10),
            (26, 30, 10),
        ];

        Self {
            rungs: RUNGS
                .iter()
                .map(|&(margin, distance, wait)| StepRung {
                    margin: Decimal::from(margin),
                    distance_pct: Decimal::from(distance),
                    wait_minutes: wait,
                })
                .collect(),
            max_steps: 9,
            early_loss_pct: vec![dec!(70), dec!(80), dec!(90)],
            time_waiver_multiple: dec!(1.5),
        }
    }
}

impl StepLadder {
    /// Number of rungs; the hard upper bound on a position's step
    pub fn len(&self) -> u32 {
        self.rungs.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.rungs.is_empty()
    }

    /// Rung for a 1-based step number
    pub fn rung(&self, step: u32) -> Option<&StepRung> {
        let index = step.checked_sub(1)?;
        self.rungs.get(index as usize)
    }

    /// Margin of the opening entry
    pub fn entry_margin(&self) -> Decimal {
        self.rungs.first().map(|r| r.margin).unwrap_or(Decimal::ZERO)
    }

    /// Sum of rung margins for steps `1..=step`
    pub fn cumulative_margin(&self, step: u32) -> Decimal {
        self.rungs.iter().take(step as usize).map(|r| r.margin).sum()
    }

    pub fn nominal_steps(&self) -> u32 {
        self.max_steps.min(self.len())
    }

    /// Margin-loss threshold while the position sits at `step`, if that step
    /// is still gated on margin loss rather than distance
    pub fn early_loss_threshold(&self, step: u32) -> Option<Decimal> {
        let index = step.checked_sub(1)?;
        self.early_loss_pct.get(index as usize).copied()
    }
}

// ==================== Step-indexed targets ====================

/// A USD target that applies from `from_step` upward until a later tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepTarget {
    pub from_step: u32,
    pub usd: Decimal,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepTargets(pub Vec<StepTarget>);

impl StepTargets {
    pub fn from_pairs(pairs: &[(u32, Decimal)]) -> Self {
        Self(
            pairs
                .iter()
                .map(|&(from_step, usd)| StepTarget { from_step, usd })
                .collect(),
        )
    }

    /// Target of the highest tier whose `from_step` is at or below `step`
    pub fn for_step(&self, step: u32) -> Option<Decimal> {
        self.0
            .iter()
            .filter(|t| t.from_step <= step)
            .max_by_key(|t| t.from_step)
            .map(|t| t.usd)
    }

    fn is_ascending(&self) -> bool {
        self.0.windows(2).all(|w| w[0].from_step < w[1].from_step)
    }
}

// ==================== Sections ====================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub leverage: u32,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self { leverage: 10 }
    }
}

/// Concurrent-position limits keyed on aggregate margin
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
    pub margin_threshold: Decimal,
    pub max_positions_below: usize,
    pub max_positions_above: usize,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            margin_threshold: dec!(200),
            max_positions_below: 8,
            max_positions_above: 4,
        }
    }
}

impl CapacityConfig {
    /// Dynamic capacity: the small limit once aggregate margin has reached
    /// the threshold, the larger one otherwise
    pub fn max_positions(&self, total_margin: Decimal) -> usize {
        if total_margin >= self.margin_threshold {
            self.max_positions_above
        } else {
            self.max_positions_below
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyAction {
    /// Surface the condition and leave the position to the operator
    #[default]
    Warn,
    /// Close the position at market and count the loss
    Close,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmergencyConfig {
    /// Drawdown from the average entry, in percent
    pub stop_percent: Decimal,
    /// Absolute unrealized loss in USD
    pub hard_stop_usd: Decimal,
    pub action: EmergencyAction,
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            stop_percent: dec!(35),
            hard_stop_usd: dec!(100),
            action: EmergencyAction::Warn,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HalfCloseConfig {
    pub min_step: u32,
    pub targets: StepTargets,
}

impl Default for HalfCloseConfig {
    fn default() -> Self {
        Self {
            min_step: 3,
            targets: StepTargets::from_pairs(&[
                (3, dec!(3)),
                (4, dec!(4)),
                (5, dec!(5)),
                (6, dec!(6)),
                (8, dec!(10)),
            ]),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TakeProfitConfig {
    /// Profit that arms the trailing exit, per step
    pub targets: StepTargets,
    /// Fraction of the peak that may be given back before harvesting
    pub callback: Decimal,
    /// Trailing is cancelled when profit falls under this amount
    pub reset_floor_usd: Decimal,
}

impl Default for TakeProfitConfig {
    fn default() -> Self {
        Self {
            targets: StepTargets::from_pairs(&[
                (1, dec!(3.5)),
                (2, dec!(4)),
                (3, dec!(6)),
                (4, dec!(8)),
                (5, dec!(10)),
                (6, dec!(12)),
                (8, dec!(20)),
            ]),
            callback: dec!(0.30),
            reset_floor_usd: dec!(0.50),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EarlyCloseConfig {
    pub max_step: u32,
    pub min_profit_usd: Decimal,
    pub max_loss_usd: Decimal,
}

impl Default for EarlyCloseConfig {
    fn default() -> Self {
        Self {
            max_step: 3,
            min_profit_usd: dec!(0.5),
            max_loss_usd: dec!(1.0),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecycleConfig {
    pub enabled: bool,
    pub after_step: u32,
    pub max_recycles: u32,
    /// Fraction of quantity and margin released per recycle
    pub fraction: Decimal,
    /// Price must be within `(min_distance_pct, max_distance_pct]` of the average
    pub max_distance_pct: Decimal,
    pub min_distance_pct: Decimal,
    pub min_profit_usd: Decimal,
}

impl Default for RecycleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            after_step: 5,
            max_recycles: 10,
            fraction: dec!(0.4),
            max_distance_pct: dec!(1),
            min_distance_pct: dec!(-3),
            min_profit_usd: dec!(1),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BlacklistConfig {
    pub enabled: bool,
    /// Symbols never traded or managed
    pub static_symbols: Vec<String>,
    /// Losses inside the window that trigger a ban
    pub max_losses: usize,
    pub window_hours: u32,
    pub ban_hours: u32,
    /// Loss records older than this are dropped
    pub retention_hours: u32,
    /// Append-only loss history; bans survive restarts when set
    pub journal_path: Option<PathBuf>,
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            static_symbols: Vec::new(),
            max_losses: 2,
            window_hours: 2,
            ban_hours: 6,
            retention_hours: 24,
            journal_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Steps up to and including this one need no confirmation
    pub lenient_until_step: u32,
    pub medium_from_step: u32,
    pub strong_from_step: u32,
    pub candle_interval: String,
    pub candle_limit: usize,
    /// Concurrent readiness lookups
    pub workers: usize,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            lenient_until_step: 3,
            medium_from_step: 5,
            strong_from_step: 6,
            candle_interval: "5m".to_string(),
            candle_limit: 50,
            workers: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EntryConfig {
    pub max_new_per_tick: usize,
    /// Scanner candidates considered per scan
    pub scan_limit: usize,
    /// Pump size above which the sentiment oracle is consulted
    pub sentiment_pump_threshold: Decimal,
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            max_new_per_tick: 5,
            scan_limit: 10,
            sentiment_pump_threshold: dec!(40),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    /// Relative quantity difference tolerated before the ledger is overwritten
    pub quantity_tolerance: Decimal,
    /// Slack over cumulative ladder margin when estimating a recovered step
    pub step_fit_tolerance: Decimal,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            quantity_tolerance: dec!(0.001),
            step_fit_tolerance: dec!(0.20),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub tick_interval_secs: u64,
    pub entry_scan_interval_secs: u64,
    pub sync_interval_secs: u64,
    /// Upper bound on every external call
    pub call_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 20,
            entry_scan_interval_secs: 90,
            sync_interval_secs: 300,
            call_timeout_secs: 5,
        }
    }
}

impl RuntimeConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,ladderbot=debug".to_string(),
            json: false,
        }
    }
}

// ==================== Loading ====================

impl AppConfig {
    /// Load configuration from the default `config` directory
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> std::result::Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info,ladderbot=debug")?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Environment-specific overrides (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("LADDER_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // LADDER_RUNTIME__TICK_INTERVAL_SECS, LADDER_EMERGENCY__ACTION, ...
            .add_source(
                Environment::with_prefix("LADDER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let ladder = &self.ladder;
        ensure(!ladder.is_empty(), "ladder.rungs must not be empty")?;
        ensure(ladder.max_steps > 0, "ladder.max_steps must be at least 1")?;
        for (i, rung) in ladder.rungs.iter().enumerate() {
            ensure(
                rung.margin > Decimal::ZERO,
                format!("ladder rung {} has non-positive margin", i + 1),
            )?;
            ensure(
                rung.distance_pct >= Decimal::ZERO,
                format!("ladder rung {} has negative distance", i + 1),
            )?;
        }
        ensure(
            ladder.time_waiver_multiple >= Decimal::ONE,
            "ladder.time_waiver_multiple must be >= 1",
        )?;

        ensure(self.trading.leverage > 0, "trading.leverage must be positive")?;

        ensure(
            self.capacity.max_positions_above <= self.capacity.max_positions_below,
            "capacity.max_positions_above must not exceed max_positions_below",
        )?;

        ensure(
            self.emergency.stop_percent > Decimal::ZERO && self.emergency.hard_stop_usd > Decimal::ZERO,
            "emergency thresholds must be positive",
        )?;

        let tp = &self.take_profit;
        ensure(
            tp.callback > Decimal::ZERO && tp.callback < Decimal::ONE,
            "take_profit.callback must be within (0, 1)",
        )?;
        ensure(tp.targets.is_ascending(), "take_profit.targets must ascend by step")?;
        ensure(
            self.half_close.targets.is_ascending(),
            "half_close.targets must ascend by step",
        )?;

        let recycle = &self.recycle;
        ensure(
            recycle.fraction > Decimal::ZERO && recycle.fraction < Decimal::ONE,
            "recycle.fraction must be within (0, 1)",
        )?;
        ensure(
            recycle.min_distance_pct < recycle.max_distance_pct,
            "recycle distance band is empty",
        )?;

        ensure(self.blacklist.max_losses > 0, "blacklist.max_losses must be positive")?;
        ensure(self.readiness.workers > 0, "readiness.workers must be positive")?;

        let rt = &self.runtime;
        ensure(
            rt.tick_interval_secs > 0
                && rt.entry_scan_interval_secs > 0
                && rt.sync_interval_secs > 0
                && rt.call_timeout_secs > 0,
            "runtime intervals and timeouts must be positive",
        )?;

        Ok(())
    }
}

fn ensure(condition: bool, message: impl Into<String>) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(LadderError::InvalidConfig(message.into()))
    }
}
