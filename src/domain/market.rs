use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// OHLCV candle handed to the readiness oracle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// One row of the exchange's position report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol: String,
    /// Negative for shorts
    pub signed_quantity: Decimal,
    pub entry_price: Decimal,
    pub unrealized_pnl: Decimal,
    /// Initial or isolated margin, when the venue reports one
    pub margin: Option<Decimal>,
}

impl ExchangePosition {
    pub fn is_short(&self) -> bool {
        self.signed_quantity < Decimal::ZERO
    }

    pub fn quantity(&self) -> Decimal {
        self.signed_quantity.abs()
    }

    /// Reported margin, or notional divided by leverage when absent
    pub fn margin_or_estimate(&self, leverage: u32) -> Decimal {
        match self.margin {
            Some(margin) if margin > Decimal::ZERO => margin,
            _ => self.quantity() * self.entry_price / Decimal::from(leverage.max(1)),
        }
    }
}

/// A symbol flagged by the opportunity scanner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpCandidate {
    pub symbol: String,
    /// Recent rise, in percent
    pub pump_percent: Decimal,
    pub price: Decimal,
}
