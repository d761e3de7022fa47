//! Session trading statistics derived from the ledger.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use scalp_common::{ExitKind, Side};

use super::ledger::{TradeLedger, TradeStatus};

/// Aggregated trading statistics at a point in time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradingStats {
    /// BUY orders recorded.
    pub total_buys: u64,
    /// BUY orders that filled.
    pub executed_buys: u64,
    /// SELL orders recorded.
    pub total_sells: u64,
    /// SELL orders that filled.
    pub executed_sells: u64,
    /// Filled SELLs that were resting profit-takers.
    pub limit_sells: u64,
    /// Filled SELLs from the stop path (including breakeven exits).
    pub stop_losses: u64,
    /// SELL orders cancelled (including hold-to-maturity).
    pub cancelled_sells: u64,
    /// Filled BUYs with no filled SELL closing them.
    pub naked_positions: u64,
    /// Total invested across filled BUYs.
    pub invested: Decimal,
    /// Total proceeds across filled SELLs.
    pub proceeds: Decimal,
    /// Sum over matched pairs.
    pub realized_pnl: Decimal,
    /// Mark-to-market of naked positions at current best bid (0 when no
    /// mark is available).
    pub unrealized_pnl: Decimal,
    /// realized + unrealized.
    pub net_pnl: Decimal,
}

impl TradingStats {
    /// Compute statistics from the ledger and current best bids per token.
    pub fn compute(ledger: &TradeLedger, marks: &HashMap<String, Decimal>) -> Self {
        let mut stats = TradingStats::default();

        for record in ledger.all() {
            match record.side {
                Side::Buy => {
                    stats.total_buys += 1;
                    if record.status == TradeStatus::Filled {
                        stats.executed_buys += 1;
                        stats.invested += record.amount();
                    }
                }
                Side::Sell => {
                    stats.total_sells += 1;
                    match record.status {
                        TradeStatus::Filled => {
                            stats.executed_sells += 1;
                            stats.proceeds += record.amount();
                            match record.exit_kind {
                                Some(ExitKind::Limit) => stats.limit_sells += 1,
                                Some(ExitKind::StopLoss) | Some(ExitKind::Breakeven) => {
                                    stats.stop_losses += 1
                                }
                                _ => {}
                            }
                        }
                        TradeStatus::Cancelled => stats.cancelled_sells += 1,
                        TradeStatus::Pending => {}
                    }
                }
            }
        }

        stats.realized_pnl = ledger.realized_pnl();

        for naked in ledger.naked_buys() {
            stats.naked_positions += 1;
            let mark = marks
                .get(&naked.token_id)
                .copied()
                .filter(|m| *m > Decimal::ZERO);
            if let Some(mark) = mark {
                stats.unrealized_pnl += (mark - naked.price) * naked.size;
            }
        }

        stats.net_pnl = stats.realized_pnl + stats.unrealized_pnl;
        stats
    }

    /// Return on invested capital, as a fraction. Zero with no investment.
    pub fn roi(&self) -> Decimal {
        if self.invested > Decimal::ZERO {
            self.net_pnl / self.invested
        } else {
            Decimal::ZERO
        }
    }
}
