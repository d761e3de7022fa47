//! Session bookkeeping: trade ledger, statistics, and the final report.
//!
//! ```text
//! TradeLedger      flat id -> record map, pairings by lookup
//! TradingStats     realized / unrealized / naked aggregation
//! SessionReporter  per-session accumulation + JSON report
//! ```

pub mod ledger;
pub mod report;
pub mod stats;

pub use ledger::{TradeLedger, TradeRecord, TradeStatus};
pub use report::{SessionReport, SessionReporter};
pub use stats::TradingStats;
