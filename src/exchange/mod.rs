mod paper;
mod traits;

pub use paper::PaperExchange;
pub use traits::{MarketDataSource, OrderGateway};

#[cfg(test)]
pub use traits::{MockMarketDataSource, MockOrderGateway};

use std::future::Future;
use std::time::Duration;

use crate::error::{LadderError, Result};

/// Run an external call under a deadline; an elapsed deadline becomes
/// `LadderError::Timeout` so the caller can skip and retry next tick.
pub async fn with_timeout<T, F>(call: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(LadderError::Timeout {
            call: call.to_string(),
            secs: limit.as_secs(),
        }),
    }
}
