//! Trade ledger: every submitted order outcome, one flat record per order.
//!
//! SELL records point back at their originating BUY through `paired_with`;
//! pairings are resolved by id lookup, never by object graph. A BUY is
//! "naked" iff no FILLED SELL points at it - a CANCELLED SELL alone does
//! not close the pair.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use scalp_common::{Direction, ExitKind, Side};

/// Trade record lifecycle state. Terminal states are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    Pending,
    Filled,
    Cancelled,
}

impl TradeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TradeStatus::Filled | TradeStatus::Cancelled)
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeStatus::Pending => write!(f, "PENDING"),
            TradeStatus::Filled => write!(f, "FILLED"),
            TradeStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Ledger entry for one submitted order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Session-scoped monotonic id.
    pub id: u64,
    /// Gateway-assigned order id.
    pub order_id: String,
    /// Session slug this trade belongs to.
    pub slug: String,
    pub side: Side,
    pub token_id: String,
    /// UP or DOWN outcome token.
    pub direction: Direction,
    pub price: Decimal,
    pub size: Decimal,
    pub status: TradeStatus,
    /// For SELL records: id of the BUY this closes.
    pub paired_with: Option<u64>,
    /// Exit classification, SELL records only.
    pub exit_kind: Option<ExitKind>,
    pub created_at: DateTime<Utc>,
}

impl TradeRecord {
    /// Monetary value of the record.
    pub fn amount(&self) -> Decimal {
        self.price * self.size
    }
}

/// Flat `id -> record` trade ledger with a session-monotonic id counter.
#[derive(Debug, Default)]
pub struct TradeLedger {
    records: HashMap<u64, TradeRecord>,
    next_id: u64,
}

impl TradeLedger {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            next_id: 1,
        }
    }

    fn insert(&mut self, mut record: TradeRecord) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        record.id = id;
        self.records.insert(id, record);
        id
    }

    /// Record a BUY that already filled (FOK entries fill or die).
    #[allow(clippy::too_many_arguments)]
    pub fn record_filled_buy(
        &mut self,
        order_id: String,
        slug: String,
        token_id: String,
        direction: Direction,
        price: Decimal,
        size: Decimal,
    ) -> u64 {
        self.insert(TradeRecord {
            id: 0,
            order_id,
            slug,
            side: Side::Buy,
            token_id,
            direction,
            price,
            size,
            status: TradeStatus::Filled,
            paired_with: None,
            exit_kind: None,
            created_at: Utc::now(),
        })
    }

    /// Record a resting SELL paired with a BUY.
    #[allow(clippy::too_many_arguments)]
    pub fn record_pending_sell(
        &mut self,
        order_id: String,
        slug: String,
        token_id: String,
        direction: Direction,
        price: Decimal,
        size: Decimal,
        paired_with: u64,
        exit_kind: ExitKind,
    ) -> u64 {
        self.insert(TradeRecord {
            id: 0,
            order_id,
            slug,
            side: Side::Sell,
            token_id,
            direction,
            price,
            size,
            status: TradeStatus::Pending,
            paired_with: Some(paired_with),
            exit_kind: Some(exit_kind),
            created_at: Utc::now(),
        })
    }

    /// Record a SELL that executed immediately (stop-loss / emergency FAK).
    #[allow(clippy::too_many_arguments)]
    pub fn record_filled_sell(
        &mut self,
        order_id: String,
        slug: String,
        token_id: String,
        direction: Direction,
        price: Decimal,
        size: Decimal,
        paired_with: u64,
        exit_kind: ExitKind,
    ) -> u64 {
        self.insert(TradeRecord {
            id: 0,
            order_id,
            slug,
            side: Side::Sell,
            token_id,
            direction,
            price,
            size,
            status: TradeStatus::Filled,
            paired_with: Some(paired_with),
            exit_kind: Some(exit_kind),
            created_at: Utc::now(),
        })
    }

    /// Move a pending record to FILLED. No-op on terminal records.
    pub fn mark_filled(&mut self, id: u64) {
        if let Some(record) = self.records.get_mut(&id) {
            if !record.status.is_terminal() {
                record.status = TradeStatus::Filled;
            }
        }
    }

    /// Move a pending record to CANCELLED, optionally reclassifying the exit
    /// (hold-to-maturity cancellations carry their own kind).
    pub fn mark_cancelled(&mut self, id: u64, exit_kind: Option<ExitKind>) {
        if let Some(record) = self.records.get_mut(&id) {
            if !record.status.is_terminal() {
                record.status = TradeStatus::Cancelled;
                if let Some(kind) = exit_kind {
                    record.exit_kind = Some(kind);
                }
            }
        }
    }

    pub fn get(&self, id: u64) -> Option<&TradeRecord> {
        self.records.get(&id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records ordered by id.
    pub fn all(&self) -> Vec<&TradeRecord> {
        let mut records: Vec<&TradeRecord> = self.records.values().collect();
        records.sort_by_key(|r| r.id);
        records
    }

    /// The FILLED SELL closing a given BUY, if one exists.
    pub fn filled_sell_for(&self, buy_id: u64) -> Option<&TradeRecord> {
        self.records.values().find(|r| {
            r.side == Side::Sell
                && r.status == TradeStatus::Filled
                && r.paired_with == Some(buy_id)
        })
    }

    /// FILLED BUYs with no FILLED SELL pointing at them.
    pub fn naked_buys(&self) -> Vec<&TradeRecord> {
        let mut naked: Vec<&TradeRecord> = self
            .records
            .values()
            .filter(|r| {
                r.side == Side::Buy
                    && r.status == TradeStatus::Filled
                    && self.filled_sell_for(r.id).is_none()
            })
            .collect();
        naked.sort_by_key(|r| r.id);
        naked
    }

    /// True iff any filled BUY is still unclosed.
    pub fn has_naked_buy(&self) -> bool {
        self.records.values().any(|r| {
            r.side == Side::Buy
                && r.status == TradeStatus::Filled
                && self.filled_sell_for(r.id).is_none()
        })
    }

    /// Matched (BUY, SELL) pairs, ordered by BUY id.
    pub fn completed_pairs(&self) -> Vec<(&TradeRecord, &TradeRecord)> {
        let mut pairs: Vec<(&TradeRecord, &TradeRecord)> = self
            .records
            .values()
            .filter(|r| r.side == Side::Buy && r.status == TradeStatus::Filled)
            .filter_map(|buy| self.filled_sell_for(buy.id).map(|sell| (buy, sell)))
            .collect();
        pairs.sort_by_key(|(buy, _)| buy.id);
        pairs
    }

    /// Realized P&L: the signed sum over matched pairs.
    pub fn realized_pnl(&self) -> Decimal {
        self.completed_pairs()
            .iter()
            .map(|(buy, sell)| (sell.price - buy.price) * sell.size)
            .sum()
    }

    /// Wipe everything for a new session. The id counter restarts: ids are
    /// unique within a market session, not across them.
    pub fn clear(&mut self) {
        self.records.clear();
        self.next_id = 1;
    }
}
