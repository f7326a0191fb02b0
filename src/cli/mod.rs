//! `ladderbot` command line

mod output;

pub use output::{print_items, print_kv, OutputMode};

use chrono::Utc;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::PathBuf;
use tabled::Tabled;

use crate::config::AppConfig;
use crate::strategy::{raw_quantity, BanStatus, DynamicBlacklist, LossJournal};

#[derive(Parser, Debug)]
#[command(name = "ladderbot")]
#[command(version)]
#[command(about = "Counter-trend martingale short-averaging engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration directory (default.toml plus the LADDER_ENV overlay)
    #[arg(short, long, env = "LADDER_CONFIG_DIR", default_value = "config", global = true)]
    pub config: PathBuf,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Validate the configuration and print the step ladder
    Plan {
        /// Also size each step's quantity at this price
        #[arg(long)]
        price: Option<Decimal>,
    },
    /// Print active symbol bans from the loss journal
    Bans {
        /// Journal to read instead of blacklist.journal_path
        #[arg(long)]
        journal: Option<PathBuf>,
    },
}

#[derive(Debug, Serialize, Tabled)]
pub struct LadderRow {
    pub step: u32,
    pub margin: Decimal,
    pub cumulative: Decimal,
    pub notional: Decimal,
    #[tabled(rename = "distance %")]
    pub distance_pct: Decimal,
    #[tabled(rename = "wait min")]
    pub wait_minutes: u32,
    #[tabled(rename = "loss gate")]
    pub loss_gate: String,
    pub quantity: String,
}

/// One row per ladder rung, sized at `price` when given
pub fn ladder_rows(config: &AppConfig, price: Option<Decimal>) -> Vec<LadderRow> {
    let ladder = &config.ladder;
    let leverage = config.trading.leverage;

    (1..=ladder.len())
        .filter_map(|step| {
            let rung = ladder.rung(step)?;
            Some(LadderRow {
                step,
                margin: rung.margin,
                cumulative: ladder.cumulative_margin(step),
                notional: rung.margin * Decimal::from(leverage),
                distance_pct: rung.distance_pct,
                wait_minutes: rung.wait_minutes,
                loss_gate: ladder
                    .early_loss_threshold(step)
                    .map(|pct| format!("{}%", pct))
                    .unwrap_or_else(|| "-".to_string()),
                quantity: price
                    .map(|p| raw_quantity(rung.margin, leverage, p).round_dp(6).normalize().to_string())
                    .unwrap_or_else(|| "-".to_string()),
            })
        })
        .collect()
}

pub fn show_plan(config: &AppConfig, price: Option<Decimal>, mode: OutputMode) -> anyhow::Result<()> {
    config.validate()?;

    let ladder = &config.ladder;
    let capacity = &config.capacity;
    print_kv("Leverage", format!("{}x", config.trading.leverage), mode);
    print_kv(
        "Steps",
        format!("{} nominal, {} with recycling", ladder.nominal_steps(), ladder.len()),
        mode,
    );
    print_kv(
        "Capacity",
        format!(
            "{} positions below ${} total margin, {} at or above",
            capacity.max_positions_below, capacity.margin_threshold, capacity.max_positions_above
        ),
        mode,
    );
    print_kv(
        "Emergency",
        format!(
            "{}% drawdown or ${} loss ({:?})",
            config.emergency.stop_percent, config.emergency.hard_stop_usd, config.emergency.action
        ),
        mode,
    );

    print_items(&ladder_rows(config, price), mode)
}

#[derive(Debug, Serialize, Tabled)]
pub struct BanRow {
    pub symbol: String,
    pub expires: String,
    #[tabled(rename = "hours left")]
    pub remaining_hours: Decimal,
    #[tabled(rename = "recent losses")]
    pub recent_losses: usize,
}

impl From<BanStatus> for BanRow {
    fn from(status: BanStatus) -> Self {
        Self {
            symbol: status.symbol,
            expires: status.expires_at.format("%Y-%m-%d %H:%M UTC").to_string(),
            remaining_hours: status.remaining_hours,
            recent_losses: status.recent_losses,
        }
    }
}

pub async fn show_bans(
    config: &AppConfig,
    journal: Option<PathBuf>,
    mode: OutputMode,
) -> anyhow::Result<()> {
    let Some(path) = journal.or_else(|| config.blacklist.journal_path.clone()) else {
        anyhow::bail!("no loss journal: pass --journal or set blacklist.journal_path");
    };

    let now = Utc::now();
    let records = LossJournal::new(path.clone(), config.blacklist.retention_hours)
        .load(now)
        .await?;
    let mut blacklist = DynamicBlacklist::new(config.blacklist.clone());
    let count = blacklist.replay(records, now);

    print_kv("Journal", path.display(), mode);
    print_kv("Loss records in retention", count, mode);
    if !config.blacklist.static_symbols.is_empty() {
        print_kv("Static", config.blacklist.static_symbols.join(", "), mode);
    }

    let rows: Vec<BanRow> = blacklist.status(now).into_iter().map(BanRow::from).collect();
    print_items(&rows, mode)
}
