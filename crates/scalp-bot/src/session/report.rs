//! Session reporter: accumulates per-tick and per-trade events and emits the
//! final structured session summary as a JSON document.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use scalp_common::Side;

use super::ledger::TradeLedger;
use super::stats::TradingStats;

/// `session` block of the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionBlock {
    pub start: String,
    pub end: String,
    /// Seconds.
    pub duration: i64,
    pub slug: String,
}

/// `wallet` block of the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletBlock {
    pub starting: Decimal,
    pub ending: Decimal,
    pub net_change: Decimal,
    pub net_change_pct: Decimal,
    pub profitable: bool,
}

/// `statistics.exits` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitsBlock {
    pub limit_sells: u64,
    pub stop_losses: u64,
    pub cancelled: u64,
    pub total: u64,
}

/// `statistics` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsBlock {
    pub total_buys: u64,
    pub executed_buys: u64,
    pub exits: ExitsBlock,
    pub naked_positions: u64,
    pub total_trades: u64,
}

/// `financial` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialBlock {
    pub invested: Decimal,
    pub proceeds: Decimal,
    pub realized: Decimal,
    pub unrealized: Decimal,
    pub net: Decimal,
    pub roi: Decimal,
}

/// One trade entry in the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEntry {
    pub id: u64,
    pub timestamp: String,
    pub slug: String,
    pub side: String,
    pub token_type: String,
    pub price: Decimal,
    pub size: Decimal,
    pub amount: Decimal,
    pub order_id: String,
    pub status: String,
    pub paired_with: Option<u64>,
    pub exit_type: Option<String>,
}

/// One completed BUY/SELL pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedTradeEntry {
    pub buy_id: u64,
    pub sell_id: u64,
    pub token_type: String,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub size: Decimal,
    pub pnl: Decimal,
    pub exit_type: Option<String>,
}

/// The full session report document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session: SessionBlock,
    pub wallet: WalletBlock,
    pub statistics: StatisticsBlock,
    pub financial: FinancialBlock,
    pub trades: Vec<TradeEntry>,
    pub completed_trades: Vec<CompletedTradeEntry>,
    pub naked_positions: Vec<TradeEntry>,
}

/// Accumulates one market session and renders the final report.
#[derive(Debug)]
pub struct SessionReporter {
    slug: String,
    started_at: DateTime<Utc>,
    starting_cash: Decimal,
    tick_count: u64,
}

impl SessionReporter {
    pub fn new(slug: impl Into<String>, starting_cash: Decimal) -> Self {
        let slug = slug.into();
        info!(%slug, %starting_cash, "session reporting started");
        Self {
            slug,
            started_at: Utc::now(),
            starting_cash,
            tick_count: 0,
        }
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn starting_cash(&self) -> Decimal {
        self.starting_cash
    }

    /// Count a main-loop tick.
    pub fn record_tick(&mut self) {
        self.tick_count += 1;
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Build the final report from the session's ledger and statistics.
    pub fn finalize(&self, ledger: &TradeLedger, stats: &TradingStats, ending_cash: Decimal) -> SessionReport {
        let now = Utc::now();
        let net_change = ending_cash - self.starting_cash;
        let net_change_pct = if self.starting_cash > Decimal::ZERO {
            net_change / self.starting_cash * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };

        let trades: Vec<TradeEntry> = ledger.all().iter().map(|r| trade_entry(r)).collect();

        let completed_trades: Vec<CompletedTradeEntry> = ledger
            .completed_pairs()
            .iter()
            .map(|(buy, sell)| CompletedTradeEntry {
                buy_id: buy.id,
                sell_id: sell.id,
                token_type: buy.direction.to_string(),
                entry_price: buy.price,
                exit_price: sell.price,
                size: sell.size,
                pnl: (sell.price - buy.price) * sell.size,
                exit_type: sell.exit_kind.map(|k| k.to_string()),
            })
            .collect();

        let naked_positions: Vec<TradeEntry> =
            ledger.naked_buys().iter().map(|r| trade_entry(r)).collect();

        SessionReport {
            session: SessionBlock {
                start: self.started_at.to_rfc3339(),
                end: now.to_rfc3339(),
                duration: (now - self.started_at).num_seconds(),
                slug: self.slug.clone(),
            },
            wallet: WalletBlock {
                starting: self.starting_cash,
                ending: ending_cash,
                net_change,
                net_change_pct,
                profitable: net_change > Decimal::ZERO,
            },
            statistics: StatisticsBlock {
                total_buys: stats.total_buys,
                executed_buys: stats.executed_buys,
                exits: ExitsBlock {
                    limit_sells: stats.limit_sells,
                    stop_losses: stats.stop_losses,
                    cancelled: stats.cancelled_sells,
                    total: stats.limit_sells + stats.stop_losses + stats.cancelled_sells,
                },
                naked_positions: stats.naked_positions,
                total_trades: stats.total_buys + stats.total_sells,
            },
            financial: FinancialBlock {
                invested: stats.invested,
                proceeds: stats.proceeds,
                realized: stats.realized_pnl,
                unrealized: stats.unrealized_pnl,
                net: stats.net_pnl,
                roi: stats.roi(),
            },
            trades,
            completed_trades,
            naked_positions,
        }
    }

    /// Write a report to `<dir>/session_<slug>_<ts>.json`.
    pub async fn write(report: &SessionReport, dir: &str) -> anyhow::Result<PathBuf> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let path = PathBuf::from(dir).join(format!("session_{}_{}.json", report.session.slug, stamp));

        tokio::fs::create_dir_all(dir).await?;
        let json = serde_json::to_string_pretty(report)?;
        tokio::fs::write(&path, json).await?;

        info!(path = %path.display(), "session report written");
        Ok(path)
    }
}

fn trade_entry(record: &super::ledger::TradeRecord) -> TradeEntry {
    TradeEntry {
        id: record.id,
        timestamp: record.created_at.to_rfc3339(),
        slug: record.slug.clone(),
        side: match record.side {
            Side::Buy => "BUY".to_string(),
            Side::Sell => "SELL".to_string(),
        },
        token_type: record.direction.to_string(),
        price: record.price,
        size: record.size,
        amount: record.amount(),
        order_id: record.order_id.clone(),
        status: record.status.to_string(),
        paired_with: record.paired_with,
        exit_type: record.exit_kind.map(|k| k.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use scalp_common::{Direction, ExitKind};
    use std::collections::HashMap;

    fn reporter_with_pair() -> (SessionReporter, TradeLedger) {
        let mut ledger = TradeLedger::new();
        let buy_id = ledger.record_filled_buy(
            "b1".to_string(),
            "btc-updown-15m-1766223000".to_string(),
            "tok-up".to_string(),
            Direction::Up,
            dec!(0.68),
            dec!(2.9412),
        );
        ledger.record_filled_sell(
            "s1".to_string(),
            "btc-updown-15m-1766223000".to_string(),
            "tok-up".to_string(),
            Direction::Up,
            dec!(0.70),
            dec!(2.9412),
            buy_id,
            ExitKind::Limit,
        );
        (
            SessionReporter::new("btc-updown-15m-1766223000", dec!(20.00)),
            ledger,
        )
    }

    #[test]
    fn test_report_document_shape() {
        let (mut reporter, ledger) = reporter_with_pair();
        reporter.record_tick();
        reporter.record_tick();
        assert_eq!(reporter.tick_count(), 2);

        let stats = TradingStats::compute(&ledger, &HashMap::new());
        let report = reporter.finalize(&ledger, &stats, dec!(20.058824));

        assert_eq!(report.session.slug, "btc-updown-15m-1766223000");
        assert_eq!(report.wallet.starting, dec!(20.00));
        assert_eq!(report.wallet.net_change, dec!(0.058824));
        assert!(report.wallet.profitable);
        assert_eq!(report.statistics.executed_buys, 1);
        assert_eq!(report.statistics.exits.limit_sells, 1);
        assert_eq!(report.statistics.exits.total, 1);
        assert_eq!(report.statistics.total_trades, 2);
        assert_eq!(report.trades.len(), 2);
        assert_eq!(report.completed_trades.len(), 1);
        assert!(report.naked_positions.is_empty());

        let pair = &report.completed_trades[0];
        assert_eq!(pair.pnl, dec!(0.058824));
        assert_eq!(pair.exit_type.as_deref(), Some("LIMIT"));
    }

    #[test]
    fn test_report_serializes() {
        let (reporter, ledger) = reporter_with_pair();
        let stats = TradingStats::compute(&ledger, &HashMap::new());
        let report = reporter.finalize(&ledger, &stats, dec!(20.058824));

        let json = serde_json::to_string_pretty(&report).unwrap();
        assert!(json.contains("\"session\""));
        assert!(json.contains("\"wallet\""));
        assert!(json.contains("\"statistics\""));
        assert!(json.contains("\"financial\""));
        assert!(json.contains("\"completed_trades\""));
        assert!(json.contains("\"token_type\": \"UP\""));
    }

    #[test]
    fn test_trade_entry_fields() {
        let (reporter, ledger) = reporter_with_pair();
        let stats = TradingStats::compute(&ledger, &HashMap::new());
        let report = reporter.finalize(&ledger, &stats, dec!(20.06));

        let sell = report.trades.iter().find(|t| t.side == "SELL").unwrap();
        assert_eq!(sell.status, "FILLED");
        assert_eq!(sell.paired_with, Some(1));
        assert_eq!(sell.exit_type.as_deref(), Some("LIMIT"));
        assert_eq!(sell.amount, dec!(0.70) * dec!(2.9412));
    }

    #[tokio::test]
    async fn test_write_report_to_disk() {
        let (reporter, ledger) = reporter_with_pair();
        let stats = TradingStats::compute(&ledger, &HashMap::new());
        let report = reporter.finalize(&ledger, &stats, dec!(20.06));

        let dir = std::env::temp_dir().join("scalp-bot-report-test");
        let path = SessionReporter::write(&report, dir.to_str().unwrap())
            .await
            .unwrap();
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: SessionReport = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed.session.slug, report.session.slug);
        let _ = tokio::fs::remove_file(path).await;
    }
}
