//! Paper gateway: simulated cash, positions and fills.
//!
//! Fills are simulated against the book prices observed on the current tick:
//! a resting BUY fills at `min(best_ask, limit)` only while the ask side is
//! live and at-or-below the limit; a resting SELL mirrors that against the
//! bid. A side reported as zero never fills - this is the guard against fake
//! fills on empty books.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, error, info, warn};

use scalp_common::{Side, TimeInForce};

use super::{Executor, ExecutorError, OpenOrder, Position};

/// Positions below this share count are destroyed.
const POSITION_EPSILON: Decimal = dec!(0.000000001);

/// Configuration for the paper gateway.
#[derive(Debug, Clone)]
pub struct PaperExecutorConfig {
    /// Initial simulated cash.
    pub initial_cash: Decimal,
    /// Venue minimum order value; FOK amounts below this are rejected.
    pub min_order_size: Decimal,
}

impl Default for PaperExecutorConfig {
    fn default() -> Self {
        Self {
            initial_cash: dec!(20.00),
            min_order_size: dec!(1.00),
        }
    }
}

/// Paper trading gateway.
pub struct PaperExecutor {
    config: PaperExecutorConfig,
    cash: Decimal,
    positions: HashMap<String, Position>,
    open_orders: HashMap<String, OpenOrder>,
    /// Index of every order id that has reached the filled state.
    filled: HashSet<String>,
    next_order_id: u64,
}

impl PaperExecutor {
    pub fn new(config: PaperExecutorConfig) -> Self {
        Self {
            cash: config.initial_cash,
            config,
            positions: HashMap::new(),
            open_orders: HashMap::new(),
            filled: HashSet::new(),
            next_order_id: 1,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(PaperExecutorConfig::default())
    }

    fn generate_order_id(&mut self) -> String {
        let id = format!("paper-{}", self.next_order_id);
        self.next_order_id += 1;
        id
    }

    /// Apply a BUY fill: cash out, position in (share-weighted merge).
    fn apply_buy(&mut self, token_id: &str, price: Decimal, size: Decimal) {
        self.cash -= price * size;

        match self.positions.get_mut(token_id) {
            Some(pos) => {
                let total = pos.shares + size;
                pos.entry_price = (pos.shares * pos.entry_price + size * price) / total;
                pos.shares = total;
                pos.entry_at = Utc::now();
            }
            None => {
                self.positions.insert(
                    token_id.to_string(),
                    Position {
                        token_id: token_id.to_string(),
                        shares: size,
                        entry_price: price,
                        entry_at: Utc::now(),
                    },
                );
            }
        }
    }

    /// Apply a SELL fill: cash in, position reduced (removed at epsilon).
    fn apply_sell(&mut self, token_id: &str, price: Decimal, size: Decimal) {
        self.cash += price * size;

        if let Some(pos) = self.positions.get_mut(token_id) {
            pos.shares -= size;
            if pos.shares <= POSITION_EPSILON {
                self.positions.remove(token_id);
            }
        }
    }

    /// Run the fill check for one token against the book seen this tick.
    ///
    /// Returns the ids of orders that filled during this pass. Calling this
    /// twice with the same book is a no-op the second time: filled orders
    /// leave the open set, and any id found in both sets is purged silently
    /// so a fill is never emitted twice.
    pub fn check_fills(
        &mut self,
        token_id: &str,
        best_bid: Decimal,
        best_ask: Decimal,
    ) -> Vec<String> {
        let mut fills = Vec::new();
        let candidates: Vec<OpenOrder> = self
            .open_orders
            .values()
            .filter(|o| o.token_id == token_id)
            .cloned()
            .collect();

        for order in candidates {
            if self.filled.contains(&order.order_id) {
                // Repeat-safe guard: already filled, still resting - purge.
                warn!(order_id = %order.order_id, "purging filled order from open set");
                self.open_orders.remove(&order.order_id);
                continue;
            }

            match order.side {
                Side::Buy => {
                    if best_ask > Decimal::ZERO && best_ask <= order.price {
                        let fill_price = best_ask.min(order.price);
                        self.apply_buy(token_id, fill_price, order.size);
                        self.open_orders.remove(&order.order_id);
                        self.filled.insert(order.order_id.clone());
                        info!(
                            order_id = %order.order_id,
                            price = %fill_price,
                            size = %order.size,
                            cash = %self.cash,
                            "[PAPER] BUY filled"
                        );
                        fills.push(order.order_id);
                    }
                }
                Side::Sell => {
                    if best_bid > Decimal::ZERO && best_bid >= order.price {
                        let holding = self.positions.get(token_id).map(|p| p.shares);
                        if holding.map(|s| s < order.size).unwrap_or(true) {
                            error!(
                                order_id = %order.order_id,
                                "resting SELL without backing position; skipping fill"
                            );
                            continue;
                        }
                        let fill_price = best_bid.max(order.price);
                        self.apply_sell(token_id, fill_price, order.size);
                        self.open_orders.remove(&order.order_id);
                        self.filled.insert(order.order_id.clone());
                        info!(
                            order_id = %order.order_id,
                            price = %fill_price,
                            size = %order.size,
                            cash = %self.cash,
                            "[PAPER] SELL filled"
                        );
                        fills.push(order.order_id);
                    }
                }
            }
        }

        fills
    }
}

#[async_trait]
impl Executor for PaperExecutor {
    async fn place_limit(
        &mut self,
        token_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
        tif: TimeInForce,
    ) -> Result<String, ExecutorError> {
        if size <= Decimal::ZERO {
            return Err(ExecutorError::InvalidOrder("size must be positive".to_string()));
        }
        if price <= Decimal::ZERO {
            return Err(ExecutorError::InvalidOrder("price must be positive".to_string()));
        }

        let order_id = self.generate_order_id();
        self.open_orders.insert(
            order_id.clone(),
            OpenOrder {
                order_id: order_id.clone(),
                token_id: token_id.to_string(),
                side,
                price,
                size,
                tif,
                created_at: Utc::now(),
            },
        );

        info!(
            order_id = %order_id,
            %side,
            %price,
            %size,
            %tif,
            "[PAPER] limit order resting"
        );
        Ok(order_id)
    }

    async fn place_fok(
        &mut self,
        token_id: &str,
        side: Side,
        amount: Decimal,
        price: Decimal,
    ) -> Result<String, ExecutorError> {
        if price <= Decimal::ZERO {
            return Err(ExecutorError::InvalidOrder("price must be positive".to_string()));
        }
        if amount < self.config.min_order_size {
            return Err(ExecutorError::Rejected(format!(
                "FOK amount {} below minimum {}",
                amount, self.config.min_order_size
            )));
        }

        match side {
            Side::Buy => {
                if amount > self.cash {
                    return Err(ExecutorError::InsufficientFunds {
                        available: self.cash,
                        required: amount,
                    });
                }
                let size = amount / price;
                self.apply_buy(token_id, price, size);
            }
            Side::Sell => {
                // For SELL the amount is a share count.
                let holding = self
                    .positions
                    .get(token_id)
                    .map(|p| p.shares)
                    .unwrap_or(Decimal::ZERO);
                if holding < amount {
                    return Err(ExecutorError::NoPosition(token_id.to_string()));
                }
                self.apply_sell(token_id, price, amount);
            }
        }

        // FOK orders never rest: straight into the filled index so the fill
        // check can never double-count them.
        let order_id = self.generate_order_id();
        self.filled.insert(order_id.clone());

        info!(
            order_id = %order_id,
            %side,
            %price,
            %amount,
            cash = %self.cash,
            "[PAPER] FOK executed"
        );
        Ok(order_id)
    }

    async fn cancel(&mut self, order_id: &str) -> Result<bool, ExecutorError> {
        if self.open_orders.remove(order_id).is_some() {
            info!(order_id, "[PAPER] order cancelled");
            Ok(true)
        } else {
            debug!(order_id, "[PAPER] cancel miss: order not open");
            Ok(false)
        }
    }

    async fn execute_fak(
        &mut self,
        token_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> Result<bool, ExecutorError> {
        if price <= Decimal::ZERO || size <= Decimal::ZERO {
            return Err(ExecutorError::InvalidOrder(
                "price and size must be positive".to_string(),
            ));
        }

        match side {
            Side::Buy => {
                let cost = price * size;
                if cost > self.cash {
                    warn!(
                        required = %cost,
                        available = %self.cash,
                        "[PAPER] FAK BUY refused: insufficient cash"
                    );
                    return Ok(false);
                }
                self.apply_buy(token_id, price, size);
            }
            Side::Sell => {
                let holding = self
                    .positions
                    .get(token_id)
                    .map(|p| p.shares)
                    .unwrap_or(Decimal::ZERO);
                if holding < size {
                    warn!(
                        %size,
                        %holding,
                        "[PAPER] FAK SELL refused: insufficient position"
                    );
                    return Ok(false);
                }
                self.apply_sell(token_id, price, size);
            }
        }

        info!(%side, %price, %size, cash = %self.cash, "[PAPER] FAK executed");
        Ok(true)
    }

    async fn is_filled(&self, order_id: &str) -> bool {
        self.filled.contains(order_id)
    }

    async fn position(&self, token_id: &str) -> Option<Position> {
        self.positions.get(token_id).cloned()
    }

    async fn all_positions(&self) -> Vec<Position> {
        self.positions.values().cloned().collect()
    }

    async fn cash(&self) -> Decimal {
        self.cash
    }

    async fn open_orders(&self) -> Vec<OpenOrder> {
        self.open_orders.values().cloned().collect()
    }

    async fn clear_all(&mut self) -> Result<(), ExecutorError> {
        let open = self.open_orders.len();
        let positions = self.positions.len();
        self.open_orders.clear();
        self.filled.clear();
        self.positions.clear();
        info!(open, positions, "[PAPER] state cleared for rotation");
        Ok(())
    }

    async fn apply_fills(
        &mut self,
        token_id: &str,
        best_bid: Decimal,
        best_ask: Decimal,
    ) -> Vec<String> {
        self.check_fills(token_id, best_bid, best_ask)
    }
}
