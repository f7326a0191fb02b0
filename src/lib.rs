pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod strategy;

pub use config::AppConfig;
pub use error::{LadderError, LedgerError, Result};
pub use exchange::{MarketDataSource, OrderGateway, PaperExchange};
pub use strategy::{EngineRunner, EntryGate, Oracles, TickReport};
