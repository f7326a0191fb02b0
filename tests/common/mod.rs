#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ladderbot::config::AppConfig;
use ladderbot::domain::{
    Candle, ExchangePosition, PumpCandidate, ReadinessVerdict, SentimentVerdict, SignalStrength,
    TrendVerdict,
};
use ladderbot::error::{LadderError, Result};
use ladderbot::strategy::{
    EntryReadinessOracle, OpportunityScanner, Oracles, SentimentOracle, TrendOracle,
};
use ladderbot::{EntryGate, PaperExchange};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Oracle answers set by the test; readiness defaults to a strong "ready"
#[derive(Default)]
pub struct Script {
    readiness: Mutex<HashMap<String, ReadinessVerdict>>,
    trend_blocked: Mutex<HashSet<String>>,
    sentiment_blocked: Mutex<HashSet<String>>,
    candidates: Mutex<Vec<PumpCandidate>>,
    readiness_calls: Mutex<Vec<String>>,
    readiness_failing: Mutex<HashSet<String>>,
    readiness_crashing: Mutex<HashSet<String>>,
}

impl Script {
    pub fn set_readiness(&self, symbol: &str, verdict: ReadinessVerdict) {
        self.readiness
            .lock()
            .unwrap()
            .insert(symbol.to_string(), verdict);
    }

    /// Readiness answers with an oracle error for `symbol`
    pub fn fail_readiness(&self, symbol: &str) {
        self.readiness_failing
            .lock()
            .unwrap()
            .insert(symbol.to_string());
    }

    /// Readiness lookups for `symbol` panic instead of answering
    pub fn crash_readiness(&self, symbol: &str) {
        self.readiness_crashing
            .lock()
            .unwrap()
            .insert(symbol.to_string());
    }

    pub fn heal_readiness(&self, symbol: &str) {
        self.readiness_failing.lock().unwrap().remove(symbol);
        self.readiness_crashing.lock().unwrap().remove(symbol);
    }

    pub fn block_trend(&self, symbol: &str) {
        self.trend_blocked.lock().unwrap().insert(symbol.to_string());
    }

    pub fn block_sentiment(&self, symbol: &str) {
        self.sentiment_blocked
            .lock()
            .unwrap()
            .insert(symbol.to_string());
    }

    pub fn set_candidates(&self, candidates: Vec<PumpCandidate>) {
        *self.candidates.lock().unwrap() = candidates;
    }

    pub fn readiness_calls(&self) -> Vec<String> {
        self.readiness_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl EntryReadinessOracle for Script {
    async fn is_entry_ready(&self, symbol: &str, _candles: &[Candle]) -> Result<ReadinessVerdict> {
        self.readiness_calls.lock().unwrap().push(symbol.to_string());
        if self.readiness_crashing.lock().unwrap().contains(symbol) {
            panic!("readiness lookup for {} crashed", symbol);
        }
        if self.readiness_failing.lock().unwrap().contains(symbol) {
            return Err(LadderError::Oracle(format!("{} readiness unavailable", symbol)));
        }
        Ok(self
            .readiness
            .lock()
            .unwrap()
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| ReadinessVerdict::ready(SignalStrength::Strong, "scripted")))
    }
}

#[async_trait]
impl TrendOracle for Script {
    async fn check_1h_trend(&self, symbol: &str) -> Result<TrendVerdict> {
        let blocked = self.trend_blocked.lock().unwrap().contains(symbol);
        Ok(TrendVerdict {
            ok_to_short: !blocked,
            reason: if blocked { "1h uptrend" } else { "flat" }.to_string(),
        })
    }
}

#[async_trait]
impl SentimentOracle for Script {
    async fn is_good_short_entry(&self, symbol: &str, _pump_percent: Decimal) -> Result<SentimentVerdict> {
        let blocked = self.sentiment_blocked.lock().unwrap().contains(symbol);
        Ok(SentimentVerdict {
            is_good: !blocked,
            reason: if blocked { "news-driven pump" } else { "no catalyst" }.to_string(),
        })
    }
}

#[async_trait]
impl OpportunityScanner for Script {
    async fn find_pumped_coins(&self) -> Result<Vec<PumpCandidate>> {
        Ok(self.candidates.lock().unwrap().clone())
    }
}

pub fn oracles(script: &Arc<Script>) -> Oracles {
    Oracles {
        readiness: script.clone(),
        trend: script.clone(),
        sentiment: Some(script.clone() as Arc<dyn SentimentOracle>),
        scanner: script.clone(),
    }
}

pub struct Harness {
    pub venue: Arc<PaperExchange>,
    pub script: Arc<Script>,
    pub gate: EntryGate,
}

/// Gate wired to a paper venue with a 0.1 lot size and 10x leverage
pub fn harness(config: AppConfig) -> Harness {
    let venue = Arc::new(PaperExchange::new(dec!(0.1), 10));
    let script = Arc::new(Script::default());
    let gate = EntryGate::new(config, venue.clone(), venue.clone(), oracles(&script))
        .expect("config should validate");
    Harness {
        venue,
        script,
        gate,
    }
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
}

pub fn short(symbol: &str, quantity: Decimal, entry_price: Decimal, margin: Decimal) -> ExchangePosition {
    ExchangePosition {
        symbol: symbol.to_string(),
        signed_quantity: -quantity,
        entry_price,
        unrealized_pnl: Decimal::ZERO,
        margin: Some(margin),
    }
}

pub fn candidate(symbol: &str, pump_percent: Decimal, price: Decimal) -> PumpCandidate {
    PumpCandidate {
        symbol: symbol.to_string(),
        pump_percent,
        price,
    }
}
