//! Automated scalping engine for Polymarket 15-minute up/down markets.
//!
//! For each market window the engine ingests a live spot price, both outcome
//! token books and the window metadata, then runs the v2.1 simplified
//! scalping policy: band-gated entries, a paired profit-taking SELL, a
//! high-frequency stop-loss monitor with breakeven trailing, hold-to-maturity
//! for deep winners, a post-crash circuit breaker and per-session P&L locks.
//! Windows rotate cleanly with a structured JSON report per session.
//!
//! ## Modules
//!
//! - `config`: environment-driven configuration and validation
//! - `spot`: RTDS WebSocket spot feed with cached reads
//! - `quant`: rolling volatility and normal-CDF fair value
//! - `executor`: the gateway contract with paper and live backends
//! - `strategy`: entry gates, stop monitor, circuit breaker
//! - `session`: trade ledger, statistics, session reports
//! - `engine`: the tick scheduler tying it all together

pub mod config;
pub mod engine;
pub mod executor;
pub mod quant;
pub mod session;
pub mod spot;
pub mod strategy;

pub use config::{BotConfig, StrategyParams};
pub use engine::Engine;
pub use executor::live::{
    ApiCredentials, CredentialProvider, EnvCredentialProvider, LiveExecutor, LiveExecutorConfig,
};
pub use executor::paper::{PaperExecutor, PaperExecutorConfig};
pub use executor::{Executor, ExecutorError, OpenOrder, Position};
pub use quant::{normal_cdf, PriceHistory, QuantEngine};
pub use session::{SessionReport, SessionReporter, TradeLedger, TradeRecord, TradeStatus, TradingStats};
pub use spot::{SpotFeed, SpotFeedConfig};
pub use strategy::{
    ActivePosition, CrashBreaker, EntryRejection, LockReason, SessionState, StrategyCore,
};
