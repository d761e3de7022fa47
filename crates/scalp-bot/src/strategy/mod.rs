//! Strategy core: the v2.1 simplified scalping policy.
//!
//! The state machine is implicit in the ledger and the active-position
//! index: IDLE (nothing open), PENDING_ENTRY (trading lock held, FOK in
//! flight), IN_POSITION (filled BUY + resting SELL), EXITING (stop or
//! hold-to-maturity path), LOCKED (session P&L limit hit), COOLDOWN
//! (circuit breaker engaged).
//!
//! The core owns the trade ledger, the active-position index, the session
//! state, the circuit breaker and the trading lock; the engine serializes
//! every mutation behind one mutex.

pub mod breaker;
pub mod entry;
pub mod monitor;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use scalp_common::Direction;
use scalp_market::BookSnapshot;

use crate::config::StrategyParams;
use crate::quant::PriceHistory;
use crate::session::{TradeLedger, TradingStats};

pub use breaker::{BreakerConfig, CrashBreaker};
pub use entry::EntryRejection;

/// Why a session got locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockReason {
    ProfitTarget,
    LossLimit,
}

impl std::fmt::Display for LockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockReason::ProfitTarget => write!(f, "PROFIT_TARGET"),
            LockReason::LossLimit => write!(f, "LOSS_LIMIT"),
        }
    }
}

/// Per-market runtime aggregate.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Running realized P&L for this session.
    pub pnl: Decimal,
    /// Completed SELL fills this session.
    pub trades: u64,
    /// Lock flag with reason; a locked session rejects all entries.
    pub locked: Option<LockReason>,
    pub started_at: DateTime<Utc>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            pnl: Decimal::ZERO,
            trades: 0,
            locked: None,
            started_at: Utc::now(),
        }
    }
}

/// A resting paired SELL attached to a position.
#[derive(Debug, Clone)]
pub struct PendingSell {
    pub trade_id: u64,
    pub order_id: String,
    pub price: Decimal,
}

/// One open long tracked by the strategy.
#[derive(Debug, Clone)]
pub struct ActivePosition {
    pub token_id: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub size: Decimal,
    pub opened_at: DateTime<Utc>,
    /// Distance of the stop below entry; zero once breakeven triggers.
    pub stop_distance: Decimal,
    pub breakeven_triggered: bool,
    pub buy_trade_id: u64,
    pub pending_sell: Option<PendingSell>,
}

impl ActivePosition {
    pub fn stop_price(&self) -> Decimal {
        self.entry_price - self.stop_distance
    }
}

/// The strategy core. All mutation happens under the engine's mutex.
pub struct StrategyCore {
    pub(crate) config: StrategyParams,
    slug: String,
    pub(crate) ledger: TradeLedger,
    pub(crate) positions: HashMap<String, ActivePosition>,
    pub(crate) session: SessionState,
    pub(crate) breaker: CrashBreaker,
    /// Single mutual-exclusion flag over entry execution.
    trading_lock: AtomicBool,
    pub(crate) last_trade_at: Option<DateTime<Utc>>,
    /// Token bid history, refreshed every tick. Not consulted by the
    /// simplified entry policy; kept current for future features.
    up_bids: PriceHistory,
    down_bids: PriceHistory,
}

impl StrategyCore {
    pub fn new(config: StrategyParams, slug: impl Into<String>) -> Self {
        let breaker = CrashBreaker::new(BreakerConfig {
            min_cooldown_ms: config.min_cooldown_ms,
            stability_ticks_required: config.stability_ticks_required,
        });

        Self {
            config,
            slug: slug.into(),
            ledger: TradeLedger::new(),
            positions: HashMap::new(),
            session: SessionState::new(),
            breaker,
            trading_lock: AtomicBool::new(false),
            last_trade_at: None,
            up_bids: PriceHistory::new(),
            down_bids: PriceHistory::new(),
        }
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn ledger(&self) -> &TradeLedger {
        &self.ledger
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn breaker(&self) -> &CrashBreaker {
        &self.breaker
    }

    pub fn active_positions(&self) -> impl Iterator<Item = &ActivePosition> {
        self.positions.values()
    }

    pub fn position(&self, token_id: &str) -> Option<&ActivePosition> {
        self.positions.get(token_id)
    }

    pub fn has_open_position(&self) -> bool {
        !self.positions.is_empty()
    }

    /// Record this tick's token bids into the history rings.
    pub fn observe_books(&mut self, up: &BookSnapshot, down: &BookSnapshot, now: DateTime<Utc>) {
        if up.best_bid > Decimal::ZERO {
            self.up_bids.push(up.best_bid, now);
        }
        if down.best_bid > Decimal::ZERO {
            self.down_bids.push(down.best_bid, now);
        }
    }

    /// Scheduler-level pre-filter: skip the tick when neither token's mid
    /// sits inside the entry band (the whole book is in the kill zone).
    pub fn in_safe_zone(&self, up_mid: Option<Decimal>, down_mid: Option<Decimal>) -> bool {
        let band = |mid: Option<Decimal>| {
            mid.map(|m| m >= self.config.min_entry_price && m <= self.config.max_entry_price)
                .unwrap_or(false)
        };
        band(up_mid) || band(down_mid)
    }

    /// Acquire the entry-execution lock.
    pub(crate) fn try_lock_trading(&self) -> bool {
        self.trading_lock
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the entry-execution lock (idempotent).
    pub(crate) fn unlock_trading(&self) {
        self.trading_lock.store(false, Ordering::Release);
    }

    pub fn trading_locked(&self) -> bool {
        self.trading_lock.load(Ordering::Acquire)
    }

    /// Book a SELL fill into the session P&L and evaluate the session lock.
    pub(crate) fn apply_sell_fill(&mut self, entry: Decimal, exit: Decimal, size: Decimal) {
        let pnl = (exit - entry) * size;
        self.session.pnl += pnl;
        self.session.trades += 1;

        info!(
            trade_pnl = %pnl,
            session_pnl = %self.session.pnl,
            trades = self.session.trades,
            "sell fill booked"
        );

        if self.session.locked.is_some() {
            return;
        }

        if self.session.pnl >= self.config.session_profit_target {
            warn!(
                session_pnl = %self.session.pnl,
                target = %self.config.session_profit_target,
                "SESSION LOCKED: profit target reached"
            );
            self.session.locked = Some(LockReason::ProfitTarget);
        } else if self.session.pnl <= -self.config.session_loss_limit {
            warn!(
                session_pnl = %self.session.pnl,
                limit = %self.config.session_loss_limit,
                "SESSION LOCKED: loss limit reached"
            );
            self.session.locked = Some(LockReason::LossLimit);
        }
    }

    /// Current statistics, marking naked positions at the given best bids.
    pub fn stats(&self, marks: &HashMap<String, Decimal>) -> TradingStats {
        TradingStats::compute(&self.ledger, marks)
    }

    /// Full reset for market rotation: ledger, positions, trading lock,
    /// circuit breaker, session state and bid history all return to default.
    /// The session lock intentionally resets with them - every window is a
    /// fresh session.
    pub fn reset(&mut self, new_slug: impl Into<String>) {
        let new_slug = new_slug.into();
        if self.session.locked.is_some() {
            info!(
                old_slug = %self.slug,
                new_slug = %new_slug,
                "session lock cleared by rotation"
            );
        }
        self.slug = new_slug;
        self.ledger.clear();
        self.positions.clear();
        self.session = SessionState::new();
        self.breaker.reset();
        self.trading_lock.store(false, Ordering::Release);
        self.last_trade_at = None;
        self.up_bids.clear();
        self.down_bids.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyParams;
    use rust_decimal_macros::dec;

    fn core() -> StrategyCore {
        StrategyCore::new(StrategyParams::default(), "btc-updown-15m-1766223000")
    }

    fn book(bid: Decimal, ask: Decimal) -> BookSnapshot {
        BookSnapshot {
            best_bid: bid,
            best_ask: ask,
            bid_size: dec!(100),
            ask_size: dec!(100),
        }
    }

    #[test]
    fn test_trading_lock_mutual_exclusion() {
        let core = core();
        assert!(core.try_lock_trading());
        assert!(!core.try_lock_trading());
        core.unlock_trading();
        assert!(core.try_lock_trading());
    }

    #[test]
    fn test_session_profit_lock() {
        let mut core = core();
        core.apply_sell_fill(dec!(0.68), dec!(0.70), dec!(10));
        assert!(core.session.locked.is_none());

        core.apply_sell_fill(dec!(0.68), dec!(0.75), dec!(5));
        // 0.20 + 0.35 = 0.55 >= 0.50
        assert_eq!(core.session.locked, Some(LockReason::ProfitTarget));
    }

    #[test]
    fn test_session_loss_lock() {
        let mut core = core();
        core.apply_sell_fill(dec!(0.70), dec!(0.63), dec!(6));
        // -0.42 <= -0.40
        assert_eq!(core.session.locked, Some(LockReason::LossLimit));
    }

    #[test]
    fn test_lock_reason_sticks() {
        let mut core = core();
        core.apply_sell_fill(dec!(0.68), dec!(0.80), dec!(5)); // +0.60 -> profit lock
        assert_eq!(core.session.locked, Some(LockReason::ProfitTarget));
        core.apply_sell_fill(dec!(0.70), dec!(0.40), dec!(5)); // big loss afterwards
        assert_eq!(core.session.locked, Some(LockReason::ProfitTarget));
    }

    #[test]
    fn test_safe_zone_filter() {
        let core = core();
        // UP mid 0.67 inside the band.
        assert!(core.in_safe_zone(Some(dec!(0.67)), Some(dec!(0.33))));
        // DOWN mid inside the band.
        assert!(core.in_safe_zone(Some(dec!(0.20)), Some(dec!(0.80))));
        // Both outside: kill zone.
        assert!(!core.in_safe_zone(Some(dec!(0.95)), Some(dec!(0.05))));
        // No mids at all.
        assert!(!core.in_safe_zone(None, None));
        // Band edges are inclusive.
        assert!(core.in_safe_zone(Some(dec!(0.65)), None));
        assert!(core.in_safe_zone(None, Some(dec!(0.85))));
    }

    #[test]
    fn test_observe_books_skips_empty_sides() {
        let mut core = core();
        core.observe_books(
            &book(dec!(0.66), dec!(0.68)),
            &book(Decimal::ZERO, dec!(0.35)),
            Utc::now(),
        );
        assert_eq!(core.up_bids.len(), 1);
        assert_eq!(core.down_bids.len(), 0);
    }

    #[test]
    fn test_rotation_reset_purity() {
        let mut core = core();
        core.apply_sell_fill(dec!(0.70), dec!(0.40), dec!(5));
        core.last_trade_at = Some(Utc::now());
        core.breaker.arm("tok-up", dec!(0.60), Utc::now());
        assert!(core.try_lock_trading());
        core.ledger.record_filled_buy(
            "b".to_string(),
            "old".to_string(),
            "tok-up".to_string(),
            Direction::Up,
            dec!(0.68),
            dec!(2),
        );
        core.observe_books(&book(dec!(0.66), dec!(0.68)), &book(dec!(0.32), dec!(0.34)), Utc::now());

        core.reset("btc-updown-15m-1766223900");

        assert_eq!(core.slug(), "btc-updown-15m-1766223900");
        assert!(core.ledger.is_empty());
        assert!(!core.has_open_position());
        assert!(core.session.locked.is_none());
        assert_eq!(core.session.pnl, Decimal::ZERO);
        assert!(!core.breaker.is_engaged());
        assert!(!core.trading_locked());
        assert!(core.last_trade_at.is_none());
        assert_eq!(core.up_bids.len(), 0);
    }

    #[test]
    fn test_stop_price() {
        let pos = ActivePosition {
            token_id: "tok".to_string(),
            direction: Direction::Up,
            entry_price: dec!(0.70),
            size: dec!(2),
            opened_at: Utc::now(),
            stop_distance: dec!(0.04),
            breakeven_triggered: false,
            buy_trade_id: 1,
            pending_sell: None,
        };
        assert_eq!(pos.stop_price(), dec!(0.66));
    }
}
