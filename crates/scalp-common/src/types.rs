//! Core vocabulary shared by every crate in the workspace.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Supported underlying assets for 15-minute up/down markets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CryptoAsset {
    Btc,
    Eth,
    Sol,
    Xrp,
}

impl CryptoAsset {
    /// Slug prefix used by the venue's market slugs (e.g. `btc-updown-15m-<ts>`).
    pub fn slug_prefix(&self) -> &'static str {
        match self {
            CryptoAsset::Btc => "btc",
            CryptoAsset::Eth => "eth",
            CryptoAsset::Sol => "sol",
            CryptoAsset::Xrp => "xrp",
        }
    }

    /// Symbol carried by the real-time data service price payloads.
    pub fn rtds_symbol(&self) -> &'static str {
        match self {
            CryptoAsset::Btc => "BTCUSDT",
            CryptoAsset::Eth => "ETHUSDT",
            CryptoAsset::Sol => "SOLUSDT",
            CryptoAsset::Xrp => "XRPUSDT",
        }
    }

    /// Symbol expected by the venue's crypto-price (strike) endpoint.
    pub fn strike_symbol(&self) -> &'static str {
        match self {
            CryptoAsset::Btc => "BTC",
            CryptoAsset::Eth => "ETH",
            CryptoAsset::Sol => "SOL",
            CryptoAsset::Xrp => "XRP",
        }
    }

    /// Returns the display name.
    pub fn as_str(&self) -> &'static str {
        self.strike_symbol()
    }
}

impl std::fmt::Display for CryptoAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CryptoAsset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BTC" | "BITCOIN" => Ok(CryptoAsset::Btc),
            "ETH" | "ETHEREUM" => Ok(CryptoAsset::Eth),
            "SOL" | "SOLANA" => Ok(CryptoAsset::Sol),
            "XRP" | "RIPPLE" => Ok(CryptoAsset::Xrp),
            _ => Err(format!("Unknown asset: {}", s)),
        }
    }
}

/// Order side for trading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Outcome-token direction for binary up/down markets.
///
/// The UP token settles at 1.00 iff the underlying closes above strike;
/// the DOWN token is its complement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Up => write!(f, "UP"),
            Direction::Down => write!(f, "DOWN"),
        }
    }
}

/// Time-in-force for orders.
///
/// Closed taxonomy: both the paper and the live gateway implement the
/// same variants uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good-till-cancelled.
    Gtc,
    /// Good-till-date with an explicit expiry instant.
    Gtd(DateTime<Utc>),
    /// Fill-or-kill: fills entirely or fails.
    Fok,
    /// Fill-and-kill: immediate best-effort, remainder cancelled.
    Fak,
}

impl TimeInForce {
    /// Wire name used by the venue's order model.
    pub fn venue_code(&self) -> &'static str {
        match self {
            TimeInForce::Gtc => "GTC",
            TimeInForce::Gtd(_) => "GTD",
            TimeInForce::Fok => "FOK",
            TimeInForce::Fak => "FAK",
        }
    }
}

impl std::fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.venue_code())
    }
}

/// Exit classification for SELL trade records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitKind {
    /// Resting profit-taking limit SELL.
    Limit,
    /// Urgent FAK exit after a price crash.
    StopLoss,
    /// Profit order cancelled near expiry to capture full settlement.
    HoldToMaturity,
    /// Stop moved to entry after the breakeven trigger, then hit.
    Breakeven,
}

impl std::fmt::Display for ExitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitKind::Limit => write!(f, "LIMIT"),
            ExitKind::StopLoss => write!(f, "STOP_LOSS"),
            ExitKind::HoldToMaturity => write!(f, "HOLD_TO_MATURITY"),
            ExitKind::Breakeven => write!(f, "BREAKEVEN"),
        }
    }
}

/// A single level in an order book (price + quantity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    /// Price in USDC (0.00 to 1.00 for outcome tokens).
    pub price: Decimal,
    /// Quantity available at this price.
    pub size: Decimal,
}

impl BookLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}
