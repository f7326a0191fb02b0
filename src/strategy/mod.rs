//! Strategy module
//!
//! Martingale short averaging. The [`EntryGate`] owns the position ledger
//! and runs every check each tick; the rest are pure evaluators it calls.
//!
//! - `admission` - step adds, half-close, early-close, recycle, emergency
//! - `trailing` - trailing take-profit state machine
//! - `blacklist` / `journal` - loss-driven symbol bans and their persistence
//! - `reconciliation` - startup recovery and periodic sync with the exchange

pub mod admission;
pub mod blacklist;
pub mod entry_gate;
pub mod journal;
pub mod ledger;
pub mod oracles;
pub mod reconciliation;
pub mod runner;
pub mod trailing;

pub use admission::{
    AdmissionController, EarlyCloseKind, EarlyClosePlan, EmergencySignal, EmergencyTrigger,
    HalfClosePlan, HoldReason, RecyclePlan, StepDecision, StepGate,
};
pub use blacklist::{BanStatus, DynamicBlacklist, StopLossRecord};
pub use entry_gate::{ClosedPosition, CloseReason, EntryGate, SkippedAction, StepAdded, TickReport};
pub use journal::LossJournal;
pub use ledger::{raw_quantity, LedgerSnapshot, PositionLedger, PositionStatus};
pub use oracles::{EntryReadinessOracle, OpportunityScanner, Oracles, SentimentOracle, TrendOracle};
pub use reconciliation::{ReconciliationEngine, SyncReport, SyncUpdate};
pub use runner::EngineRunner;
pub use trailing::{TakeProfitTrailer, TrailDecision, TrailOutcome};
