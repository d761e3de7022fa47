//! Polymarket integration: market discovery, strike oracle, order book access.
//!
//! Three narrow clients over the venue's public HTTP surface:
//!
//! - `discovery`: finds the currently-active 15-minute up/down window
//! - `strike`: resolves the window's official opening (strike) price
//! - `clob`: top-of-book snapshots for a single outcome token

pub mod clob;
pub mod discovery;
pub mod strike;
pub mod types;

pub use clob::{BookError, BookSnapshot, ClobBookClient};
pub use discovery::{DiscoveryConfig, DiscoveryError, Market, MarketDiscovery};
pub use strike::{StrikeConfig, StrikeOracle};
pub use types::{BookResponse, CryptoPriceResponse, GammaMarket};
