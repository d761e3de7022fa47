//! Entry gating and execution for the v2.1 policy.
//!
//! `should_enter` walks the gate chain in a fixed order and reports the
//! first failing gate; `execute_entry` owns the trading lock for the whole
//! placement sequence (re-check, book refresh, spread gate, sizing, FOK,
//! paired profit-taker).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

use scalp_common::{Direction, ExitKind, Side, TimeInForce};
use scalp_market::BookSnapshot;

use crate::executor::Executor;

use super::{ActivePosition, LockReason, PendingSell, StrategyCore};

/// Resting SELL prices are capped just under certain settlement.
const SELL_PRICE_CEILING: Decimal = dec!(0.99);

/// Why an entry was not taken. The first failing gate wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryRejection {
    /// Session P&L limit already hit.
    SessionLocked(LockReason),
    /// Candidate ask is outside the hard entry band.
    OutsideEntryBand { ask: Decimal },
    /// Circuit breaker cooling down.
    Cooldown { remaining_ms: i64 },
    /// Too soon after the previous entry.
    RateLimited { elapsed_ms: i64 },
    /// The ledger still holds an unclosed BUY.
    PendingTrade,
    /// The gateway reports live positions.
    PositionOpen,
    /// Cash below the venue minimum.
    InsufficientCash { cash: Decimal },
    /// Too close to expiry.
    TimeGate { remaining_s: i64 },
    /// No ask liquidity on the refreshed book.
    NoAsk,
    /// Ask - bid wider than tolerated.
    SpreadTooWide { spread: Decimal },
    /// Another entry execution holds the trading lock.
    TradeInProgress,
    /// The gateway refused the order (FOK killed, balance, venue error).
    Gateway(String),
}

impl std::fmt::Display for EntryRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SessionLocked(reason) => write!(f, "SESSION LOCKED ({})", reason),
            Self::OutsideEntryBand { ask } => write!(f, "REJECTED: floor/ceiling (ask {})", ask),
            Self::Cooldown { remaining_ms } => write!(f, "COOLDOWN ({} ms remaining)", remaining_ms),
            Self::RateLimited { elapsed_ms } => {
                write!(f, "RATE LIMIT ({} ms since last entry)", elapsed_ms)
            }
            Self::PendingTrade => write!(f, "pending trade still open"),
            Self::PositionOpen => write!(f, "active position open"),
            Self::InsufficientCash { cash } => write!(f, "insufficient cash ({})", cash),
            Self::TimeGate { remaining_s } => write!(f, "time gate ({}s remaining)", remaining_s),
            Self::NoAsk => write!(f, "no ask liquidity"),
            Self::SpreadTooWide { spread } => write!(f, "REJECTED: spread ({})", spread),
            Self::TradeInProgress => write!(f, "trade already in progress"),
            Self::Gateway(reason) => write!(f, "gateway refused: {}", reason),
        }
    }
}

impl StrategyCore {
    /// Candidate direction: UP when spot is above strike, DOWN otherwise.
    pub fn candidate_direction(spot: Decimal, strike: Decimal) -> Direction {
        if spot > strike {
            Direction::Up
        } else {
            Direction::Down
        }
    }

    /// Evaluate every entry gate in order; the first failure wins.
    #[allow(clippy::too_many_arguments)]
    pub fn should_enter(
        &self,
        spot: Decimal,
        strike: Decimal,
        up: &BookSnapshot,
        down: &BookSnapshot,
        remaining_s: i64,
        cash: Decimal,
        gateway_position_count: usize,
        now: DateTime<Utc>,
    ) -> Result<Direction, EntryRejection> {
        // 1. Session lock.
        if let Some(reason) = self.session.locked {
            return Err(EntryRejection::SessionLocked(reason));
        }

        // 2. Hard floor/ceiling on the candidate's ask, before everything else.
        let direction = Self::candidate_direction(spot, strike);
        let ask = match direction {
            Direction::Up => up.best_ask,
            Direction::Down => down.best_ask,
        };
        if ask < self.config.min_entry_price || ask > self.config.max_entry_price {
            return Err(EntryRejection::OutsideEntryBand { ask });
        }

        // 3. Circuit breaker.
        if self.breaker.is_engaged() {
            return Err(EntryRejection::Cooldown {
                remaining_ms: self.breaker.remaining_cooldown_ms(now),
            });
        }

        // 4. Rate limit between entries.
        if let Some(last) = self.last_trade_at {
            let elapsed_ms = (now - last).num_milliseconds();
            if elapsed_ms < self.config.min_trade_interval_ms {
                return Err(EntryRejection::RateLimited { elapsed_ms });
            }
        }

        // 5. No pending trade, no live position, enough cash.
        if self.ledger.has_naked_buy() {
            return Err(EntryRejection::PendingTrade);
        }
        if gateway_position_count > 0 || !self.positions.is_empty() {
            return Err(EntryRejection::PositionOpen);
        }
        if cash < self.config.min_order_size {
            return Err(EntryRejection::InsufficientCash { cash });
        }

        // 6. Time gate.
        if remaining_s <= self.config.min_time_remaining_s {
            return Err(EntryRejection::TimeGate {
                remaining_s,
            });
        }

        Ok(direction)
    }

    /// Execute an accepted entry against a freshly-refreshed book.
    ///
    /// Holds the trading lock for the full placement sequence; any rejection
    /// or gateway failure leaves no record behind.
    pub async fn execute_entry<E: Executor>(
        &mut self,
        gateway: &mut E,
        token_id: &str,
        direction: Direction,
        book: BookSnapshot,
        now: DateTime<Utc>,
    ) -> Result<u64, EntryRejection> {
        if !self.try_lock_trading() {
            return Err(EntryRejection::TradeInProgress);
        }

        let result = self
            .execute_entry_locked(gateway, token_id, direction, book, now)
            .await;
        self.unlock_trading();
        result
    }

    async fn execute_entry_locked<E: Executor>(
        &mut self,
        gateway: &mut E,
        token_id: &str,
        direction: Direction,
        book: BookSnapshot,
        now: DateTime<Utc>,
    ) -> Result<u64, EntryRejection> {
        // Re-check under the lock: no unclosed BUY, no live position.
        if self.ledger.has_naked_buy() || !self.positions.is_empty() {
            return Err(EntryRejection::PendingTrade);
        }

        let ask = book.best_ask;
        if ask <= Decimal::ZERO {
            return Err(EntryRejection::NoAsk);
        }

        let spread = ask - book.best_bid;
        if spread > self.config.max_allowed_spread {
            return Err(EntryRejection::SpreadTooWide { spread });
        }

        let cash = gateway.cash().await;
        if cash < self.config.min_order_size {
            return Err(EntryRejection::InsufficientCash { cash });
        }

        let amount = (cash * self.config.trade_size_pct)
            .max(self.config.min_order_size)
            .min(cash);

        let price = ask.round_dp(4);
        let size = (amount / price).round_dp(4);
        let final_amount = price * size;

        let order_id = match gateway
            .place_fok(token_id, Side::Buy, final_amount, price)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(%direction, %price, amount = %final_amount, "entry FOK killed: {}", e);
                return Err(EntryRejection::Gateway(e.to_string()));
            }
        };

        let slug = self.slug().to_string();
        let buy_id = self.ledger.record_filled_buy(
            order_id,
            slug.clone(),
            token_id.to_string(),
            direction,
            price,
            size,
        );
        self.last_trade_at = Some(now);

        let mut position = ActivePosition {
            token_id: token_id.to_string(),
            direction,
            entry_price: price,
            size,
            opened_at: now,
            stop_distance: self.config.fixed_stop_loss,
            breakeven_triggered: false,
            buy_trade_id: buy_id,
            pending_sell: None,
        };

        info!(
            %direction,
            %price,
            %size,
            amount = %final_amount,
            "entered position"
        );

        // Paired profit-taker, unless the price is already at the ceiling.
        if price < SELL_PRICE_CEILING {
            let sell_price = (price + self.config.fixed_profit_target).min(SELL_PRICE_CEILING);
            match gateway
                .place_limit(token_id, Side::Sell, sell_price, size, TimeInForce::Gtc)
                .await
            {
                Ok(sell_order_id) => {
                    let sell_id = self.ledger.record_pending_sell(
                        sell_order_id.clone(),
                        slug,
                        token_id.to_string(),
                        direction,
                        sell_price,
                        size,
                        buy_id,
                        ExitKind::Limit,
                    );
                    position.pending_sell = Some(PendingSell {
                        trade_id: sell_id,
                        order_id: sell_order_id,
                        price: sell_price,
                    });
                    info!(%sell_price, %size, "profit-taking SELL resting");
                }
                Err(e) => {
                    warn!("resting SELL placement failed, monitor manages the exit: {}", e);
                }
            }
        } else {
            info!(%price, "entry at ceiling: no resting SELL, stop monitor manages the exit");
        }

        self.positions.insert(token_id.to_string(), position);
        Ok(buy_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyParams;
    use crate::executor::paper::{PaperExecutor, PaperExecutorConfig};
    use crate::executor::Executor;

    fn core() -> StrategyCore {
        StrategyCore::new(StrategyParams::default(), "btc-updown-15m-1766223000")
    }

    fn paper(cash: Decimal) -> PaperExecutor {
        PaperExecutor::new(PaperExecutorConfig {
            initial_cash: cash,
            min_order_size: dec!(1.00),
        })
    }

    fn book(bid: Decimal, ask: Decimal) -> BookSnapshot {
        BookSnapshot {
            best_bid: bid,
            best_ask: ask,
            bid_size: dec!(100),
            ask_size: dec!(100),
        }
    }

    fn accept_args() -> (Decimal, Decimal, BookSnapshot, BookSnapshot, i64, Decimal) {
        (
            dec!(89800),             // spot
            dec!(89750),             // strike -> candidate UP
            book(dec!(0.66), dec!(0.68)),
            book(dec!(0.30), dec!(0.32)),
            400,
            dec!(20.00),
        )
    }

    #[test]
    fn test_candidate_direction() {
        assert_eq!(
            StrategyCore::candidate_direction(dec!(89800), dec!(89750)),
            Direction::Up
        );
        assert_eq!(
            StrategyCore::candidate_direction(dec!(89700), dec!(89750)),
            Direction::Down
        );
        // Exactly at strike: not above, so DOWN.
        assert_eq!(
            StrategyCore::candidate_direction(dec!(89750), dec!(89750)),
            Direction::Down
        );
    }

    #[test]
    fn test_accepts_with_all_gates_clear() {
        let core = core();
        let (spot, strike, up, down, remaining, cash) = accept_args();
        let result = core.should_enter(spot, strike, &up, &down, remaining, cash, 0, Utc::now());
        assert_eq!(result, Ok(Direction::Up));
    }

    #[test]
    fn test_session_lock_gate_first() {
        let mut core = core();
        core.session.locked = Some(LockReason::ProfitTarget);
        // Even with an out-of-band ask, the session lock reports first.
        let (spot, strike, _, down, remaining, cash) = accept_args();
        let up = book(dec!(0.94), dec!(0.96));
        let result = core.should_enter(spot, strike, &up, &down, remaining, cash, 0, Utc::now());
        assert_eq!(
            result,
            Err(EntryRejection::SessionLocked(LockReason::ProfitTarget))
        );
    }

    #[test]
    fn test_entry_band_boundaries() {
        let core = core();
        let (spot, strike, _, down, remaining, cash) = accept_args();

        // Exactly at the floor: accepted.
        let up = book(dec!(0.63), dec!(0.65));
        assert!(core
            .should_enter(spot, strike, &up, &down, remaining, cash, 0, Utc::now())
            .is_ok());

        // A hair below the floor: rejected.
        let up = book(dec!(0.63), dec!(0.649999999));
        assert!(matches!(
            core.should_enter(spot, strike, &up, &down, remaining, cash, 0, Utc::now()),
            Err(EntryRejection::OutsideEntryBand { .. })
        ));

        // Exactly at the ceiling: accepted.
        let up = book(dec!(0.83), dec!(0.85));
        assert!(core
            .should_enter(spot, strike, &up, &down, remaining, cash, 0, Utc::now())
            .is_ok());

        // A hair above the ceiling: rejected.
        let up = book(dec!(0.83), dec!(0.850000001));
        assert!(matches!(
            core.should_enter(spot, strike, &up, &down, remaining, cash, 0, Utc::now()),
            Err(EntryRejection::OutsideEntryBand { .. })
        ));
    }

    #[test]
    fn test_band_checked_on_candidate_token() {
        let core = core();
        // Spot below strike: DOWN is the candidate, its ask (0.32) is out of
        // band even though the UP ask would pass.
        let up = book(dec!(0.66), dec!(0.68));
        let down = book(dec!(0.30), dec!(0.32));
        let result = core.should_enter(
            dec!(89700),
            dec!(89750),
            &up,
            &down,
            400,
            dec!(20),
            0,
            Utc::now(),
        );
        assert!(matches!(
            result,
            Err(EntryRejection::OutsideEntryBand { ask }) if ask == dec!(0.32)
        ));
    }

    #[test]
    fn test_cooldown_gate() {
        let mut core = core();
        let now = Utc::now();
        core.breaker.arm("tok-up", dec!(0.60), now);
        let (spot, strike, up, down, remaining, cash) = accept_args();
        let result = core.should_enter(spot, strike, &up, &down, remaining, cash, 0, now);
        assert!(matches!(result, Err(EntryRejection::Cooldown { .. })));
    }

    #[test]
    fn test_rate_limit_gate() {
        let mut core = core();
        let now = Utc::now();
        core.last_trade_at = Some(now - chrono::Duration::milliseconds(3000));
        let (spot, strike, up, down, remaining, cash) = accept_args();
        let result = core.should_enter(spot, strike, &up, &down, remaining, cash, 0, now);
        assert!(matches!(result, Err(EntryRejection::RateLimited { .. })));

        // Past the interval: clear.
        core.last_trade_at = Some(now - chrono::Duration::milliseconds(5001));
        assert!(core
            .should_enter(spot, strike, &up, &down, remaining, cash, 0, now)
            .is_ok());
    }

    #[test]
    fn test_pending_trade_gate() {
        let mut core = core();
        core.ledger.record_filled_buy(
            "b".to_string(),
            "slug".to_string(),
            "tok-up".to_string(),
            Direction::Up,
            dec!(0.68),
            dec!(2),
        );
        let (spot, strike, up, down, remaining, cash) = accept_args();
        let result = core.should_enter(spot, strike, &up, &down, remaining, cash, 0, Utc::now());
        assert_eq!(result, Err(EntryRejection::PendingTrade));
    }

    #[test]
    fn test_gateway_position_gate() {
        let core = core();
        let (spot, strike, up, down, remaining, cash) = accept_args();
        let result = core.should_enter(spot, strike, &up, &down, remaining, cash, 1, Utc::now());
        assert_eq!(result, Err(EntryRejection::PositionOpen));
    }

    #[test]
    fn test_cash_gate() {
        let core = core();
        let (spot, strike, up, down, remaining, _) = accept_args();
        let result = core.should_enter(
            spot,
            strike,
            &up,
            &down,
            remaining,
            dec!(0.99),
            0,
            Utc::now(),
        );
        assert!(matches!(result, Err(EntryRejection::InsufficientCash { .. })));
    }

    #[test]
    fn test_time_gate() {
        let core = core();
        let (spot, strike, up, down, _, cash) = accept_args();
        let result = core.should_enter(spot, strike, &up, &down, 150, cash, 0, Utc::now());
        assert!(matches!(result, Err(EntryRejection::TimeGate { .. })));

        assert!(core
            .should_enter(spot, strike, &up, &down, 151, cash, 0, Utc::now())
            .is_ok());
    }

    #[tokio::test]
    async fn test_execute_entry_happy_path() {
        let mut core = core();
        let mut gw = paper(dec!(20.00));
        let book = book(dec!(0.66), dec!(0.68));

        let buy_id = core
            .execute_entry(&mut gw, "tok-up", Direction::Up, book, Utc::now())
            .await
            .unwrap();

        // amount = clamp(20 * 0.10, 1..20) = 2.00; size = 2/0.68 -> 2.9412
        let position = core.position("tok-up").unwrap();
        assert_eq!(position.entry_price, dec!(0.68));
        assert_eq!(position.size, dec!(2.9412));
        assert_eq!(position.stop_distance, dec!(0.04));
        assert!(!position.breakeven_triggered);
        assert_eq!(position.buy_trade_id, buy_id);

        // Paired SELL resting at entry + 0.02.
        let pending = position.pending_sell.as_ref().unwrap();
        assert_eq!(pending.price, dec!(0.70));
        let sell_record = core.ledger().get(pending.trade_id).unwrap();
        assert_eq!(sell_record.paired_with, Some(buy_id));
        assert_eq!(sell_record.exit_kind, Some(ExitKind::Limit));

        // Cash debited by price * size.
        assert_eq!(gw.cash().await, dec!(20.00) - dec!(0.68) * dec!(2.9412));
        // Lock released after execution.
        assert!(!core.trading_locked());
    }

    #[tokio::test]
    async fn test_execute_entry_spread_gate() {
        let mut core = core();
        let mut gw = paper(dec!(20.00));
        // Spread 0.04 > 0.03.
        let wide = book(dec!(0.64), dec!(0.68));

        let result = core
            .execute_entry(&mut gw, "tok-up", Direction::Up, wide, Utc::now())
            .await;
        assert!(matches!(result, Err(EntryRejection::SpreadTooWide { .. })));
        assert!(core.ledger().is_empty());
        assert!(!core.trading_locked());
        assert_eq!(gw.cash().await, dec!(20.00));
    }

    #[tokio::test]
    async fn test_execute_entry_spread_boundary() {
        let mut core = core();
        let mut gw = paper(dec!(20.00));
        // Spread exactly 0.03: allowed.
        let edge = book(dec!(0.65), dec!(0.68));
        assert!(core
            .execute_entry(&mut gw, "tok-up", Direction::Up, edge, Utc::now())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_execute_entry_no_resting_sell_at_ceiling() {
        let mut core = StrategyCore::new(
            StrategyParams {
                max_entry_price: dec!(0.995),
                ..Default::default()
            },
            "slug",
        );
        let mut gw = paper(dec!(20.00));
        let high = book(dec!(0.985), dec!(0.99));

        core.execute_entry(&mut gw, "tok-up", Direction::Up, high, Utc::now())
            .await
            .unwrap();

        let position = core.position("tok-up").unwrap();
        assert!(position.pending_sell.is_none());
        assert!(gw.open_orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_execute_entry_sell_capped_at_099() {
        let mut core = StrategyCore::new(
            StrategyParams {
                max_entry_price: dec!(0.99),
                ..Default::default()
            },
            "slug",
        );
        let mut gw = paper(dec!(20.00));
        let high = book(dec!(0.97), dec!(0.98));

        core.execute_entry(&mut gw, "tok-up", Direction::Up, high, Utc::now())
            .await
            .unwrap();

        // 0.98 + 0.02 = 1.00, capped to 0.99.
        let pending = core.position("tok-up").unwrap().pending_sell.clone().unwrap();
        assert_eq!(pending.price, dec!(0.99));
    }

    #[tokio::test]
    async fn test_execute_entry_fok_kill_leaves_no_record() {
        let mut core = core();
        // Not enough cash for the minimum order.
        let mut gw = paper(dec!(0.50));
        let result = core
            .execute_entry(&mut gw, "tok-up", Direction::Up, book(dec!(0.66), dec!(0.68)), Utc::now())
            .await;
        assert!(matches!(result, Err(EntryRejection::InsufficientCash { .. })));
        assert!(core.ledger().is_empty());
        assert!(core.position("tok-up").is_none());
        assert!(!core.trading_locked());
    }

    #[tokio::test]
    async fn test_execute_entry_rejects_while_locked() {
        let mut core = core();
        let mut gw = paper(dec!(20.00));
        assert!(core.try_lock_trading());
        let result = core
            .execute_entry(&mut gw, "tok-up", Direction::Up, book(dec!(0.66), dec!(0.68)), Utc::now())
            .await;
        assert_eq!(result, Err(EntryRejection::TradeInProgress));
    }

    #[test]
    fn test_rejection_log_vocabulary() {
        assert!(EntryRejection::SpreadTooWide { spread: dec!(0.05) }
            .to_string()
            .starts_with("REJECTED: spread"));
        assert!(EntryRejection::OutsideEntryBand { ask: dec!(0.90) }
            .to_string()
            .starts_with("REJECTED: floor/ceiling"));
        assert!(EntryRejection::Cooldown { remaining_ms: 1000 }
            .to_string()
            .starts_with("COOLDOWN"));
        assert!(EntryRejection::RateLimited { elapsed_ms: 100 }
            .to_string()
            .starts_with("RATE LIMIT"));
        assert!(EntryRejection::SessionLocked(LockReason::LossLimit)
            .to_string()
            .starts_with("SESSION LOCKED"));
    }
}
