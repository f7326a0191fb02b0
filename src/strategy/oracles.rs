//! External signal sources
//!
//! Indicator math, chart reading and pair scanning live outside the engine;
//! it only sees these narrow answers.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::domain::{Candle, PumpCandidate, ReadinessVerdict, SentimentVerdict, TrendVerdict};
use crate::error::Result;

/// Confirms that an entry (new or additional step) has a fading setup
#[async_trait]
pub trait EntryReadinessOracle: Send + Sync {
    async fn is_entry_ready(&self, symbol: &str, candles: &[Candle]) -> Result<ReadinessVerdict>;
}

/// Higher-timeframe trend filter for new shorts
#[async_trait]
pub trait TrendOracle: Send + Sync {
    async fn check_1h_trend(&self, symbol: &str) -> Result<TrendVerdict>;
}

/// Optional second opinion on large pumps
#[async_trait]
pub trait SentimentOracle: Send + Sync {
    async fn is_good_short_entry(&self, symbol: &str, pump_percent: Decimal) -> Result<SentimentVerdict>;
}

/// Source of freshly pumped symbols, best candidates first
#[async_trait]
pub trait OpportunityScanner: Send + Sync {
    async fn find_pumped_coins(&self) -> Result<Vec<PumpCandidate>>;
}

/// Bundle of signal sources consumed by the entry gate
#[derive(Clone)]
pub struct Oracles {
    pub readiness: Arc<dyn EntryReadinessOracle>,
    pub trend: Arc<dyn TrendOracle>,
    pub sentiment: Option<Arc<dyn SentimentOracle>>,
    pub scanner: Arc<dyn OpportunityScanner>,
}
