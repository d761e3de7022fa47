//! Wire types for the venue's public APIs.

use serde::{Deserialize, Deserializer, Serialize};

/// Market data from the Gamma API (`GET /markets?slug=...`).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GammaMarket {
    pub slug: Option<String>,
    pub condition_id: Option<String>,
    pub question: Option<String>,
    /// Window open; some payloads carry `startDate` instead.
    pub event_start_time: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub active: Option<bool>,
    pub accepting_orders: Option<bool>,
    pub closed: Option<bool>,
    /// Token IDs: element 0 is UP, element 1 is DOWN.
    /// The API serves either a JSON array or a JSON-encoded string array.
    #[serde(default, deserialize_with = "clob_token_ids")]
    pub clob_token_ids: Vec<String>,
}

impl GammaMarket {
    /// Window open instant, preferring `eventStartTime` over `startDate`.
    pub fn start_raw(&self) -> Option<&str> {
        self.event_start_time
            .as_deref()
            .or(self.start_date.as_deref())
    }

    /// Venue-reported tradability: active, accepting orders, not closed.
    pub fn is_tradable(&self) -> bool {
        self.active.unwrap_or(false)
            && self.accepting_orders.unwrap_or(false)
            && !self.closed.unwrap_or(true)
    }
}

/// `clobTokenIds` arrives as `["a","b"]` or as the string `"[\"a\",\"b\"]"`.
fn clob_token_ids<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_json::Value;

    match Value::deserialize(deserializer)? {
        Value::Array(arr) => arr
            .into_iter()
            .map(|v| {
                v.as_str()
                    .map(String::from)
                    .ok_or_else(|| Error::custom("expected string token id"))
            })
            .collect(),
        Value::String(s) => serde_json::from_str(&s).map_err(Error::custom),
        Value::Null => Ok(Vec::new()),
        _ => Err(Error::custom("expected array or string for clobTokenIds")),
    }
}

/// Crypto-price API response (`GET /crypto-price?...`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CryptoPriceResponse {
    pub open_price: Option<f64>,
    pub close_price: Option<f64>,
    pub timestamp: Option<i64>,
    pub completed: Option<bool>,
}

/// One price level from the CLOB book endpoint (string-typed).
#[derive(Debug, Clone, Deserialize)]
pub struct BookResponseLevel {
    pub price: String,
    pub size: String,
}

/// Order book from the CLOB REST endpoint (`GET /book?token_id=...`).
///
/// Best bid is the first bid entry, best ask the first ask entry.
#[derive(Debug, Clone, Deserialize)]
pub struct BookResponse {
    #[serde(default)]
    pub bids: Vec<BookResponseLevel>,
    #[serde(default)]
    pub asks: Vec<BookResponseLevel>,
}
