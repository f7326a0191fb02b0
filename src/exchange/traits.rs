use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::{Candle, ExchangePosition, MarketOrder, OrderFill};
use crate::error::{LadderError, Result};

fn unsupported(feature: &str, venue: &str) -> LadderError {
    LadderError::Validation(format!("{} is not implemented for venue '{}'", feature, venue))
}

/// Read side of the exchange
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    fn venue(&self) -> &str;

    /// Current mark price; `None` when the venue has no price for the symbol
    async fn mark_price(&self, symbol: &str) -> Result<Option<Decimal>>;

    /// Every open position on the account, long or short
    async fn positions(&self) -> Result<Vec<ExchangePosition>>;

    async fn recent_candles(&self, _symbol: &str, _interval: &str, _limit: usize) -> Result<Vec<Candle>> {
        Err(unsupported("recent_candles", self.venue()))
    }
}

/// Write side of the exchange
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Submit a market order and wait for its execution report
    async fn place_market_order(&self, order: &MarketOrder) -> Result<OrderFill>;

    /// Round a raw quantity down to the symbol's lot size
    fn round_quantity(&self, symbol: &str, quantity: Decimal) -> Decimal;

    /// Apply leverage and margin mode before the first order on a symbol
    async fn prepare_symbol(&self, _symbol: &str, _leverage: u32) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn mocked_source_reports_positions() {
        let mut source = MockMarketDataSource::new();
        source.expect_positions().returning(|| {
            Ok(vec![ExchangePosition {
                symbol: "AUSDT".to_string(),
                signed_quantity: dec!(-10),
                entry_price: dec!(1.5),
                unrealized_pnl: dec!(0),
                margin: None,
            }])
        });

        let positions = source.positions().await.expect("positions should load");
        assert_eq!(positions.len(), 1);
        assert!(positions[0].is_short());
    }

    #[tokio::test]
    async fn mocked_gateway_rounds_quantity() {
        let mut gateway = MockOrderGateway::new();
        gateway
            .expect_round_quantity()
            .returning(|_, qty| qty.round_dp(1));

        assert_eq!(gateway.round_quantity("AUSDT", dec!(12.345)), dec!(12.3));
    }
}
