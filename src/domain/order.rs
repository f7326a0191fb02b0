use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Market order request sent to the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOrder {
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    /// Closing orders must never flip the position long
    pub reduce_only: bool,
    pub created_at: DateTime<Utc>,
}

impl MarketOrder {
    /// Sell to open or extend a short
    pub fn open_short(symbol: &str, quantity: Decimal) -> Self {
        Self::new(symbol, OrderSide::Sell, quantity, false)
    }

    /// Buy back part or all of a short
    pub fn close_short(symbol: &str, quantity: Decimal) -> Self {
        Self::new(symbol, OrderSide::Buy, quantity, true)
    }

    fn new(symbol: &str, side: OrderSide, quantity: Decimal, reduce_only: bool) -> Self {
        Self {
            client_order_id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side,
            quantity,
            reduce_only,
            created_at: Utc::now(),
        }
    }
}

/// Execution report for a market order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderFill {
    pub filled_quantity: Decimal,
    /// Volume-weighted fill price; zero when the venue does not report it
    pub avg_price: Decimal,
}

impl OrderFill {
    pub fn new(filled_quantity: Decimal, avg_price: Decimal) -> Self {
        Self {
            filled_quantity,
            avg_price,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.filled_quantity <= Decimal::ZERO
    }

    /// Fill price, or `quoted` when the venue left it blank
    pub fn price_or(&self, quoted: Decimal) -> Decimal {
        if self.avg_price > Decimal::ZERO {
            self.avg_price
        } else {
            quoted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_constructors() {
        let open = MarketOrder::open_short("XUSDT", dec!(3));
        assert_eq!(open.side, OrderSide::Sell);
        assert!(!open.reduce_only);

        let close = MarketOrder::close_short("XUSDT", dec!(3));
        assert_eq!(close.side, OrderSide::Buy);
        assert!(close.reduce_only);
        assert_ne!(open.client_order_id, close.client_order_id);
    }

    #[test]
    fn test_fill_price_fallback() {
        assert_eq!(OrderFill::new(dec!(1), dec!(0)).price_or(dec!(2.5)), dec!(2.5));
        assert_eq!(OrderFill::new(dec!(1), dec!(2.4)).price_or(dec!(2.5)), dec!(2.4));
    }
}
