//! Order execution abstraction for paper and live trading.
//!
//! The `Executor` trait is the single contract the strategy talks to. Two
//! implementations exist and are selected once at process start:
//!
//! - `PaperExecutor`: simulated cash/positions, fills against observed books
//! - `LiveExecutor`: signed orders posted to the venue's CLOB endpoint
//!
//! The paper engine assumes single-threaded mutation of cash and positions;
//! the strategy mutex in the engine provides that serialization.

pub mod live;
pub mod paper;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use scalp_common::{Side, TimeInForce};

/// Errors that can occur during order execution.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Order rejected: {0}")]
    Rejected(String),

    #[error("Insufficient funds: available={available}, required={required}")]
    InsufficientFunds {
        available: Decimal,
        required: Decimal,
    },

    #[error("No position in token {0}")]
    NoPosition(String),

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Aggregate holding per token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub token_id: String,
    pub shares: Decimal,
    /// Volume-weighted average entry price.
    pub entry_price: Decimal,
    /// Instant of the latest fill that built this position.
    pub entry_at: DateTime<Utc>,
}

impl Position {
    /// P&L of the whole position at a given exit price.
    pub fn pnl_at(&self, exit_price: Decimal) -> Decimal {
        (exit_price - self.entry_price) * self.shares
    }
}

/// A resting order known to the gateway.
#[derive(Debug, Clone)]
pub struct OpenOrder {
    pub order_id: String,
    pub token_id: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub tif: TimeInForce,
    pub created_at: DateTime<Utc>,
}

/// Execution gateway contract shared by paper and live modes.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Place a resting limit order. Returns the gateway-assigned order id.
    async fn place_limit(
        &mut self,
        token_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
        tif: TimeInForce,
    ) -> Result<String, ExecutorError>;

    /// Fill-or-kill at the caller-supplied reference price.
    ///
    /// For BUY the `amount` is monetary (USDC); the share count is derived
    /// from the price. Fails without any state change when it cannot fill
    /// entirely.
    async fn place_fok(
        &mut self,
        token_id: &str,
        side: Side,
        amount: Decimal,
        price: Decimal,
    ) -> Result<String, ExecutorError>;

    /// Cancel a resting order. Returns whether anything was cancelled.
    async fn cancel(&mut self, order_id: &str) -> Result<bool, ExecutorError>;

    /// Immediate best-effort (fill-and-kill) execution.
    ///
    /// Returns `Ok(false)` when the venue refuses (insufficient balance or
    /// position) - the caller records nothing and continues.
    async fn execute_fak(
        &mut self,
        token_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> Result<bool, ExecutorError>;

    /// True iff the order reached the filled state.
    async fn is_filled(&self, order_id: &str) -> bool;

    /// Current holding for a token, if any.
    async fn position(&self, token_id: &str) -> Option<Position>;

    /// All holdings.
    async fn all_positions(&self) -> Vec<Position>;

    /// Available cash.
    async fn cash(&self) -> Decimal;

    /// All resting orders.
    async fn open_orders(&self) -> Vec<OpenOrder>;

    /// Cancel all open orders (live) or wipe all local order/position state
    /// (paper). Used at market rotation.
    async fn clear_all(&mut self) -> Result<(), ExecutorError>;

    /// Run the simulated fill pass for one token against the book observed
    /// this tick. Live gateways fill on the venue; the default is a no-op.
    ///
    /// Returns the order ids that filled during this pass.
    async fn apply_fills(
        &mut self,
        _token_id: &str,
        _best_bid: Decimal,
        _best_ask: Decimal,
    ) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_position_pnl() {
        let pos = Position {
            token_id: "tok".to_string(),
            shares: dec!(2.9412),
            entry_price: dec!(0.68),
            entry_at: Utc::now(),
        };
        assert_eq!(pos.pnl_at(dec!(0.70)), dec!(0.058824));
        assert_eq!(pos.pnl_at(dec!(0.63)), dec!(-0.147060));
    }

    #[test]
    fn test_executor_error_display() {
        let err = ExecutorError::InsufficientFunds {
            available: dec!(1.50),
            required: dec!(2.00),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("1.50"));
        assert!(rendered.contains("2.00"));
    }
}
