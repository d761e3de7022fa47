//! Top-of-book access over the CLOB REST endpoint.

use std::str::FromStr;
use std::time::Duration;

use reqwest::Client;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::types::BookResponse;

/// CLOB REST base URL.
const CLOB_API_URL: &str = "https://clob.polymarket.com";

/// Errors from order book fetches.
#[derive(Debug, Error)]
pub enum BookError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("book endpoint returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("order book for {0} is empty on both sides")]
    EmptyBook(String),
}

/// Per-token quote at an instant.
///
/// A side reported as zero means that side of the book is empty; both sides
/// empty is a hard error at fetch time, partial snapshots are tolerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BookSnapshot {
    pub best_bid: Decimal,
    pub best_ask: Decimal,
    pub bid_size: Decimal,
    pub ask_size: Decimal,
}

impl BookSnapshot {
    /// Spread when both sides are present.
    pub fn spread(&self) -> Option<Decimal> {
        if self.best_bid > Decimal::ZERO && self.best_ask > Decimal::ZERO {
            Some(self.best_ask - self.best_bid)
        } else {
            None
        }
    }

    /// Mid price when both sides are present.
    pub fn mid(&self) -> Option<Decimal> {
        if self.best_bid > Decimal::ZERO && self.best_ask > Decimal::ZERO {
            Some((self.best_ask + self.best_bid) / Decimal::TWO)
        } else {
            None
        }
    }

    pub fn has_ask(&self) -> bool {
        self.best_ask > Decimal::ZERO
    }

    pub fn has_bid(&self) -> bool {
        self.best_bid > Decimal::ZERO
    }
}

/// Client for top-of-book snapshots.
#[derive(Clone)]
pub struct ClobBookClient {
    http: Client,
    base_url: String,
}

impl ClobBookClient {
    pub fn new(request_timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            base_url: CLOB_API_URL.to_string(),
        }
    }

    /// Point the client at a different base URL (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Fetch best bid/ask and top-of-book sizes for a token.
    pub async fn book(&self, token_id: &str) -> Result<BookSnapshot, BookError> {
        let url = format!("{}/book?token_id={}", self.base_url, token_id);
        let response = self.http.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(BookError::Status(response.status()));
        }

        let body: BookResponse = response.json().await?;
        let snapshot = snapshot_from_response(&body);

        if !snapshot.has_bid() && !snapshot.has_ask() {
            return Err(BookError::EmptyBook(token_id.to_string()));
        }

        Ok(snapshot)
    }
}

/// Best levels from the raw payload; unparseable levels read as empty side.
fn snapshot_from_response(body: &BookResponse) -> BookSnapshot {
    let (best_bid, bid_size) = body
        .bids
        .first()
        .and_then(|l| {
            Some((
                Decimal::from_str(&l.price).ok()?,
                Decimal::from_str(&l.size).unwrap_or_default(),
            ))
        })
        .unwrap_or((Decimal::ZERO, Decimal::ZERO));

    let (best_ask, ask_size) = body
        .asks
        .first()
        .and_then(|l| {
            Some((
                Decimal::from_str(&l.price).ok()?,
                Decimal::from_str(&l.size).unwrap_or_default(),
            ))
        })
        .unwrap_or((Decimal::ZERO, Decimal::ZERO));

    BookSnapshot {
        best_bid,
        best_ask,
        bid_size,
        ask_size,
    }
}
