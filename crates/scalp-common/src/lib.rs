//! Shared types for the Polymarket up/down scalping bot.
//!
//! CRITICAL: All prices and quantities use `rust_decimal::Decimal`.
//! NEVER use f64 for financial math. The quant engine converts at its
//! boundary and keeps f64 strictly internal.

pub mod types;

pub use types::{BookLevel, CryptoAsset, Direction, ExitKind, Side, TimeInForce};
