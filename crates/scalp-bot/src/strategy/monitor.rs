//! Position monitoring: stop-loss, breakeven trailing, hold-to-maturity,
//! paired-order reconciliation and the rotation emergency exit.
//!
//! `check_stops` runs at the fast monitor cadence; `update_order_status`
//! runs once per main tick. Both are called under the strategy mutex, so a
//! cancel and the stop SELL that replaces it land in one critical section.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{error, info, warn};

use scalp_common::{ExitKind, Side};

use crate::executor::Executor;

use super::StrategyCore;

/// Slippage allowance under the observed bid for urgent FAK exits.
const STOP_SLIPPAGE: Decimal = dec!(0.02);

/// Absolute floor for any exit price.
const MIN_EXIT_PRICE: Decimal = dec!(0.01);

/// Fallback exit price when no bid is available at rotation.
const EMERGENCY_FALLBACK_PRICE: Decimal = dec!(0.50);

impl StrategyCore {
    /// High-frequency stop pass over every active position.
    ///
    /// `bids` carries the freshly-observed best bid per token (positions and,
    /// while the breaker is engaged, the crashed token).
    pub async fn check_stops<E: Executor>(
        &mut self,
        gateway: &mut E,
        bids: &HashMap<String, Decimal>,
        now: DateTime<Utc>,
    ) {
        // Feed the stability gate and release the breaker when both gates pass.
        if self.breaker.is_engaged() {
            let crash_token = self.breaker.crash_token().map(str::to_string);
            if let Some(token) = crash_token {
                if let Some(bid) = bids.get(&token) {
                    self.breaker.observe(*bid);
                }
            }
            self.breaker.try_release(now);
        }

        let tokens: Vec<String> = self.positions.keys().cloned().collect();
        for token in tokens {
            let bid = match bids.get(&token) {
                Some(b) => *b,
                None => continue,
            };

            let (entry, size, buy_id, breakeven, pending, stop_price) = {
                let pos = match self.positions.get_mut(&token) {
                    Some(p) => p,
                    None => continue,
                };

                let profit = bid - pos.entry_price;
                if !pos.breakeven_triggered && profit >= self.config.breakeven_trigger {
                    pos.breakeven_triggered = true;
                    pos.stop_distance = Decimal::ZERO;
                    info!(
                        token = %token,
                        entry = %pos.entry_price,
                        bid = %bid,
                        "BREAKEVEN TRIGGERED: stop moved to entry, position is risk-free"
                    );
                }

                (
                    pos.entry_price,
                    pos.size,
                    pos.buy_trade_id,
                    pos.breakeven_triggered,
                    pos.pending_sell.clone(),
                    pos.stop_price(),
                )
            };

            if !(bid > Decimal::ZERO && bid < stop_price) {
                continue;
            }

            // Stop breached. Cancel the profit-taker and fire the exit in the
            // same critical section.
            if let Some(pending) = pending {
                match gateway.cancel(&pending.order_id).await {
                    Ok(_) => {}
                    Err(e) => warn!(order_id = %pending.order_id, "cancel failed: {}", e),
                }
                self.ledger.mark_cancelled(pending.trade_id, None);
                if let Some(pos) = self.positions.get_mut(&token) {
                    pos.pending_sell = None;
                }
            }

            let exit_price = (bid - STOP_SLIPPAGE).max(MIN_EXIT_PRICE);
            match gateway
                .execute_fak(&token, Side::Sell, exit_price, size)
                .await
            {
                Ok(true) => {
                    let kind = if breakeven {
                        ExitKind::Breakeven
                    } else {
                        ExitKind::StopLoss
                    };
                    let (slug, direction) = {
                        let record = self.ledger.get(buy_id).expect("buy record for position");
                        (record.slug.clone(), record.direction)
                    };
                    warn!(
                        token = %token,
                        bid = %bid,
                        stop = %stop_price,
                        exit = %exit_price,
                        pnl = %((exit_price - entry) * size),
                        "STOP LOSS TRIGGERED ({})",
                        kind
                    );
                    self.ledger.record_filled_sell(
                        format!("fak-{}", buy_id),
                        slug,
                        token.clone(),
                        direction,
                        exit_price,
                        size,
                        buy_id,
                        kind,
                    );
                    self.positions.remove(&token);
                    self.apply_sell_fill(entry, exit_price, size);
                    if !breakeven {
                        self.breaker.arm(&token, bid, now);
                    }
                    self.unlock_trading();
                }
                Ok(false) => {
                    error!(token = %token, "stop-loss FAK refused by gateway; retrying next pass");
                }
                Err(e) => {
                    error!(token = %token, "stop-loss FAK failed: {}", e);
                }
            }
        }
    }

    /// Per-tick reconciliation of resting paired SELLs.
    ///
    /// Fills close the pair and free the position; near expiry a deep
    /// in-the-money position has its profit-taker pulled so the naked long
    /// rides to settlement.
    pub async fn update_order_status<E: Executor>(
        &mut self,
        gateway: &mut E,
        remaining_s: i64,
        bids: &HashMap<String, Decimal>,
    ) {
        let tokens: Vec<String> = self
            .positions
            .iter()
            .filter(|(_, p)| p.pending_sell.is_some())
            .map(|(t, _)| t.clone())
            .collect();

        for token in tokens {
            let pending = match self.positions.get(&token).and_then(|p| p.pending_sell.clone()) {
                Some(p) => p,
                None => continue,
            };

            if gateway.is_filled(&pending.order_id).await {
                let (entry, size) = {
                    let pos = self.positions.get(&token).expect("position with pending sell");
                    (pos.entry_price, pos.size)
                };
                self.ledger.mark_filled(pending.trade_id);
                self.positions.remove(&token);
                info!(
                    token = %token,
                    price = %pending.price,
                    pnl = %((pending.price - entry) * size),
                    "profit-taking SELL filled"
                );
                self.apply_sell_fill(entry, pending.price, size);
                self.unlock_trading();
                continue;
            }

            if remaining_s < self.config.hold_to_maturity_s {
                let bid = bids.get(&token).copied().unwrap_or(Decimal::ZERO);
                if bid > self.config.hold_to_maturity_bid {
                    match gateway.cancel(&pending.order_id).await {
                        Ok(_) => {}
                        Err(e) => {
                            warn!(order_id = %pending.order_id, "cancel failed: {}", e);
                            continue;
                        }
                    }
                    self.ledger
                        .mark_cancelled(pending.trade_id, Some(ExitKind::HoldToMaturity));
                    if let Some(pos) = self.positions.get_mut(&token) {
                        pos.pending_sell = None;
                    }
                    info!(
                        token = %token,
                        bid = %bid,
                        remaining_s,
                        "HOLD TO MATURITY: profit order pulled, riding to settlement"
                    );
                }
            }
        }
    }

    /// Close every open position at the observed bid before rotating away.
    pub async fn emergency_exit_all<E: Executor>(
        &mut self,
        gateway: &mut E,
        bids: &HashMap<String, Decimal>,
    ) {
        let tokens: Vec<String> = self.positions.keys().cloned().collect();
        for token in tokens {
            let (entry, size, buy_id, pending) = {
                let pos = match self.positions.get(&token) {
                    Some(p) => p,
                    None => continue,
                };
                (
                    pos.entry_price,
                    pos.size,
                    pos.buy_trade_id,
                    pos.pending_sell.clone(),
                )
            };

            if let Some(pending) = pending {
                let _ = gateway.cancel(&pending.order_id).await;
                self.ledger.mark_cancelled(pending.trade_id, None);
            }

            let bid = bids.get(&token).copied().unwrap_or(Decimal::ZERO);
            let exit_price = if bid > Decimal::ZERO {
                bid
            } else {
                warn!(token = %token, fallback = %EMERGENCY_FALLBACK_PRICE,
                    "EMERGENCY EXIT: no bid available, using fallback price");
                EMERGENCY_FALLBACK_PRICE
            };

            match gateway
                .execute_fak(&token, Side::Sell, exit_price, size)
                .await
            {
                Ok(true) => {
                    let (slug, direction) = {
                        let record = self.ledger.get(buy_id).expect("buy record for position");
                        (record.slug.clone(), record.direction)
                    };
                    warn!(
                        token = %token,
                        exit = %exit_price,
                        pnl = %((exit_price - entry) * size),
                        "EMERGENCY EXIT before rotation"
                    );
                    self.ledger.record_filled_sell(
                        format!("fak-{}", buy_id),
                        slug,
                        token.clone(),
                        direction,
                        exit_price,
                        size,
                        buy_id,
                        ExitKind::StopLoss,
                    );
                    self.positions.remove(&token);
                    self.apply_sell_fill(entry, exit_price, size);
                }
                Ok(false) => error!(token = %token, "EMERGENCY EXIT refused by gateway"),
                Err(e) => error!(token = %token, "EMERGENCY EXIT failed: {}", e),
            }
        }
        self.unlock_trading();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyParams;
    use crate::executor::paper::{PaperExecutor, PaperExecutorConfig};
    use crate::session::TradeStatus;
    use crate::strategy::StrategyCore;
    use scalp_common::Direction;
    use scalp_market::BookSnapshot;

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

    fn bids(token: &str, bid: Decimal) -> HashMap<String, Decimal> {
        let mut map = HashMap::new();
        map.insert(token.to_string(), bid);
        map
    }

    async fn enter(
        core: &mut StrategyCore,
        gw: &mut PaperExecutor,
        token: &str,
        bid: Decimal,
        ask: Decimal,
    ) -> u64 {
        core.execute_entry(gw, token, Direction::Up, book(bid, ask), Utc::now())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_stop_loss_fires_below_stop() {
        let mut core = core();
        let mut gw = paper(dec!(20.00));
        // Entry at 0.70, size = 2/0.70 rounded = 2.8571. Stop = 0.66.
        let buy_id = enter(&mut core, &mut gw, "tok-up", dec!(0.69), dec!(0.70)).await;

        // 0.68: above stop, nothing happens.
        core.check_stops(&mut gw, &bids("tok-up", dec!(0.68)), Utc::now())
            .await;
        assert!(core.position("tok-up").is_some());

        // 0.65 < 0.66: stop fires, FAK at 0.63.
        core.check_stops(&mut gw, &bids("tok-up", dec!(0.65)), Utc::now())
            .await;

        assert!(core.position("tok-up").is_none());
        let sell = core.ledger().filled_sell_for(buy_id).unwrap();
        assert_eq!(sell.price, dec!(0.63));
        assert_eq!(sell.exit_kind, Some(ExitKind::StopLoss));
        // Paired limit SELL was cancelled first.
        let cancelled = core
            .ledger()
            .all()
            .iter()
            .any(|r| r.side == Side::Sell && r.status == TradeStatus::Cancelled);
        assert!(cancelled);
        // Breaker armed at the crash bid.
        assert!(core.breaker().is_engaged());
        assert_eq!(core.breaker().crash_token(), Some("tok-up"));
        // Session P&L took the loss.
        let size = dec!(2.8571);
        assert_eq!(core.session().pnl, (dec!(0.63) - dec!(0.70)) * size);
    }

    #[tokio::test]
    async fn test_breakeven_trigger_then_breakeven_exit() {
        let mut core = core();
        let mut gw = paper(dec!(20.00));
        // Entry at 0.75.
        enter(&mut core, &mut gw, "tok-up", dec!(0.74), dec!(0.75)).await;

        // Bid 0.77: profit 0.02 >= 0.015 -> stop moves to entry.
        core.check_stops(&mut gw, &bids("tok-up", dec!(0.77)), Utc::now())
            .await;
        {
            let pos = core.position("tok-up").unwrap();
            assert!(pos.breakeven_triggered);
            assert_eq!(pos.stop_distance, Decimal::ZERO);
            assert_eq!(pos.stop_price(), dec!(0.75));
        }

        // Bid retraces to 0.745 < 0.75: exit at 0.725, classified BREAKEVEN.
        core.check_stops(&mut gw, &bids("tok-up", dec!(0.745)), Utc::now())
            .await;

        assert!(core.position("tok-up").is_none());
        let sells: Vec<_> = core
            .ledger()
            .all()
            .into_iter()
            .filter(|r| r.side == Side::Sell && r.status == TradeStatus::Filled)
            .cloned()
            .collect();
        assert_eq!(sells.len(), 1);
        assert_eq!(sells[0].price, dec!(0.725));
        assert_eq!(sells[0].exit_kind, Some(ExitKind::Breakeven));
        // Breakeven exits never arm the breaker.
        assert!(!core.breaker().is_engaged());
    }

    #[tokio::test]
    async fn test_breakeven_boundary_is_inclusive() {
        let mut core = core();
        let mut gw = paper(dec!(20.00));
        enter(&mut core, &mut gw, "tok-up", dec!(0.74), dec!(0.75)).await;

        // Profit exactly 0.015 triggers.
        core.check_stops(&mut gw, &bids("tok-up", dec!(0.765)), Utc::now())
            .await;
        assert!(core.position("tok-up").unwrap().breakeven_triggered);
    }

    #[tokio::test]
    async fn test_zero_bid_never_triggers_stop() {
        let mut core = core();
        let mut gw = paper(dec!(20.00));
        enter(&mut core, &mut gw, "tok-up", dec!(0.69), dec!(0.70)).await;

        core.check_stops(&mut gw, &bids("tok-up", Decimal::ZERO), Utc::now())
            .await;
        assert!(core.position("tok-up").is_some());
    }

    #[tokio::test]
    async fn test_exit_price_floored_at_min() {
        let mut core = StrategyCore::new(
            StrategyParams {
                min_entry_price: dec!(0.01),
                ..Default::default()
            },
            "slug",
        );
        let mut gw = paper(dec!(20.00));
        // Entry at 0.70; bid collapses to 0.02 -> exit = max(0.01, 0.00) = 0.01.
        enter(&mut core, &mut gw, "tok-up", dec!(0.69), dec!(0.70)).await;
        core.check_stops(&mut gw, &bids("tok-up", dec!(0.02)), Utc::now())
            .await;

        let sell = core
            .ledger()
            .all()
            .into_iter()
            .find(|r| r.side == Side::Sell && r.status == TradeStatus::Filled)
            .cloned()
            .unwrap();
        assert_eq!(sell.price, dec!(0.01));
    }

    #[tokio::test]
    async fn test_limit_sell_fill_reconciliation() {
        let mut core = core();
        let mut gw = paper(dec!(20.00));
        let buy_id = enter(&mut core, &mut gw, "tok-up", dec!(0.66), dec!(0.68)).await;
        let size = dec!(2.9412);

        // Market moves up; the resting 0.70 SELL fills in the paper engine.
        gw.check_fills("tok-up", dec!(0.70), dec!(0.72));

        core.update_order_status(&mut gw, 300, &bids("tok-up", dec!(0.70)))
            .await;

        assert!(core.position("tok-up").is_none());
        let sell = core.ledger().filled_sell_for(buy_id).unwrap();
        assert_eq!(sell.status, TradeStatus::Filled);
        assert_eq!(sell.exit_kind, Some(ExitKind::Limit));
        assert_eq!(core.session().pnl, (dec!(0.70) - dec!(0.68)) * size);
    }

    #[tokio::test]
    async fn test_hold_to_maturity_pulls_profit_order() {
        let mut core = core();
        let mut gw = paper(dec!(20.00));
        enter(&mut core, &mut gw, "tok-up", dec!(0.82), dec!(0.84)).await;

        // 40s remaining, bid deep in the money at 0.96.
        core.update_order_status(&mut gw, 40, &bids("tok-up", dec!(0.96)))
            .await;

        let pos = core.position("tok-up").unwrap();
        assert!(pos.pending_sell.is_none());
        // Still naked: the BUY rides to settlement.
        assert!(core.ledger().has_naked_buy());
        let cancelled = core
            .ledger()
            .all()
            .into_iter()
            .find(|r| r.side == Side::Sell)
            .cloned()
            .unwrap();
        assert_eq!(cancelled.status, TradeStatus::Cancelled);
        assert_eq!(cancelled.exit_kind, Some(ExitKind::HoldToMaturity));
        // The gateway no longer holds the resting order.
        assert!(gw.open_orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_hold_to_maturity_needs_deep_bid() {
        let mut core = core();
        let mut gw = paper(dec!(20.00));
        enter(&mut core, &mut gw, "tok-up", dec!(0.82), dec!(0.84)).await;

        // 40s remaining but bid only 0.90: keep the profit order.
        core.update_order_status(&mut gw, 40, &bids("tok-up", dec!(0.90)))
            .await;
        assert!(core.position("tok-up").unwrap().pending_sell.is_some());

        // Deep bid but 60s remaining: also keep it.
        core.update_order_status(&mut gw, 60, &bids("tok-up", dec!(0.96)))
            .await;
        assert!(core.position("tok-up").unwrap().pending_sell.is_some());
    }

    #[tokio::test]
    async fn test_breaker_stability_feeds_from_monitor() {
        let mut params = StrategyParams::default();
        params.stability_ticks_required = 2;
        params.min_cooldown_ms = 0;
        let mut core = StrategyCore::new(params, "slug");
        let mut gw = paper(dec!(20.00));
        enter(&mut core, &mut gw, "tok-up", dec!(0.69), dec!(0.70)).await;

        // Crash to 0.65 fires the stop and arms the breaker.
        core.check_stops(&mut gw, &bids("tok-up", dec!(0.65)), Utc::now())
            .await;
        assert!(core.breaker().is_engaged());

        // Two stable observations above the crash low release it (time gate 0).
        core.check_stops(&mut gw, &bids("tok-up", dec!(0.67)), Utc::now())
            .await;
        assert!(core.breaker().is_engaged());
        // Second stable observation satisfies the gate within the same pass.
        core.check_stops(&mut gw, &bids("tok-up", dec!(0.68)), Utc::now())
            .await;
        assert!(!core.breaker().is_engaged());
    }

    #[tokio::test]
    async fn test_emergency_exit_with_bid() {
        let mut core = core();
        let mut gw = paper(dec!(20.00));
        let buy_id = enter(&mut core, &mut gw, "tok-up", dec!(0.66), dec!(0.68)).await;

        core.emergency_exit_all(&mut gw, &bids("tok-up", dec!(0.67)))
            .await;

        assert!(!core.has_open_position());
        let sell = core.ledger().filled_sell_for(buy_id).unwrap();
        assert_eq!(sell.price, dec!(0.67));
        // Resting SELL cancelled, gateway flat.
        assert!(gw.open_orders().await.is_empty());
        assert!(gw.all_positions().await.is_empty());
    }

    #[tokio::test]
    async fn test_emergency_exit_fallback_price() {
        let mut core = core();
        let mut gw = paper(dec!(20.00));
        let buy_id = enter(&mut core, &mut gw, "tok-up", dec!(0.66), dec!(0.68)).await;

        core.emergency_exit_all(&mut gw, &HashMap::new()).await;

        let sell = core.ledger().filled_sell_for(buy_id).unwrap();
        assert_eq!(sell.price, EMERGENCY_FALLBACK_PRICE);
    }
}
