use rust_decimal::Decimal;
use thiserror::Error;

/// Main error type for the averaging engine
#[derive(Error, Debug)]
pub enum LadderError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Market data errors
    #[error("Market data unavailable: {0}")]
    MarketDataUnavailable(String),

    #[error("Timed out after {secs}s waiting for {call}")]
    Timeout { call: String, secs: u64 },

    // Order execution errors
    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("Quantity too small for {symbol}: {raw} rounds to zero")]
    QuantityTooSmall { symbol: String, raw: Decimal },

    // External signal errors
    #[error("Oracle error: {0}")]
    Oracle(String),

    // Ledger errors
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl LadderError {
    /// Failures that are expected to clear on their own; the affected
    /// symbol is retried on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LadderError::Timeout { .. }
                | LadderError::MarketDataUnavailable(_)
                | LadderError::Oracle(_)
                | LadderError::Io(_)
        )
    }
}

/// Result type alias for LadderError
pub type Result<T> = std::result::Result<T, LadderError>;

/// Rejected mutations of the position ledger
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Position already open for {symbol}")]
    PositionExists { symbol: String },

    #[error("No tracked position for {symbol}")]
    PositionNotFound { symbol: String },

    #[error("Capacity exceeded: {open} positions open, limit {limit}")]
    CapacityExceeded { open: usize, limit: usize },

    #[error("Step ladder exhausted for {symbol}: step {step} of {limit}")]
    LadderExhausted {
        symbol: String,
        step: u32,
        limit: u32,
    },

    #[error("Cannot reduce {symbol} by {requested}: only {available} held")]
    QuantityExceedsPosition {
        symbol: String,
        requested: Decimal,
        available: Decimal,
    },

    #[error("Quantity for {symbol} must be positive, got {quantity}")]
    NonPositiveQuantity { symbol: String, quantity: Decimal },
}
