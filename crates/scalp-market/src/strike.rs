//! Strike oracle: resolves the official opening price for a market window.
//!
//! The strike comes from the venue's crypto-price endpoint and is cached by
//! slug. Failures never terminate the retry cycle; they only push out the
//! next attempt. Until a strike is known the engine must not trade, so the
//! oracle is deliberately non-blocking: callers get `None` and skip the tick.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info, warn};

use scalp_common::CryptoAsset;

/// Crypto-price API endpoint.
const CRYPTO_PRICE_API_URL: &str = "https://polymarket.com/api/crypto/crypto-price";

/// Errors from a single strike fetch attempt.
#[derive(Debug, Error)]
pub enum StrikeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rate limited by crypto-price endpoint")]
    RateLimited,

    #[error("endpoint returned status {0}")]
    Status(StatusCode),

    #[error("openPrice missing - window may not have started")]
    NotAvailable,

    #[error("unparseable openPrice: {0}")]
    BadPrice(String),
}

impl StrikeError {
    fn is_rate_limit(&self) -> bool {
        matches!(self, StrikeError::RateLimited)
    }
}

/// Configuration for the strike oracle.
#[derive(Debug, Clone)]
pub struct StrikeConfig {
    pub asset: CryptoAsset,
    /// Request timeout. Generous relative to book probes; retried anyway.
    pub request_timeout: Duration,
    /// Backoff base / cap for generic failures.
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Backoff base / cap when the endpoint rate-limits us (HTTP 429).
    pub rate_limit_base: Duration,
    pub rate_limit_cap: Duration,
    /// Operator-supplied strike used when the endpoint cannot provide one.
    pub override_price: Option<Decimal>,
}

impl Default for StrikeConfig {
    fn default() -> Self {
        Self {
            asset: CryptoAsset::Btc,
            request_timeout: Duration::from_secs(5),
            backoff_base: Duration::from_secs(3),
            backoff_cap: Duration::from_secs(30),
            rate_limit_base: Duration::from_secs(10),
            rate_limit_cap: Duration::from_secs(60),
            override_price: None,
        }
    }
}

/// Per-slug retry bookkeeping.
#[derive(Debug, Clone)]
struct RetryState {
    consecutive_failures: u32,
    next_attempt: DateTime<Utc>,
}

/// Strike oracle with per-slug caching and non-terminating backoff.
pub struct StrikeOracle {
    http: Client,
    config: StrikeConfig,
    cache: HashMap<String, Decimal>,
    retries: HashMap<String, RetryState>,
}

impl StrikeOracle {
    pub fn new(config: StrikeConfig) -> Self {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            config,
            cache: HashMap::new(),
            retries: HashMap::new(),
        }
    }

    /// Resolve the strike for a window, if currently known or fetchable.
    ///
    /// Returns `None` while the endpoint is unavailable and no override is
    /// configured; the retry clock keeps running and a later call retries.
    pub async fn strike(
        &mut self,
        slug: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Option<Decimal> {
        if let Some(price) = self.cache.get(slug) {
            return Some(*price);
        }

        if let Some(price) = self.config.override_price {
            info!(slug, %price, "using operator strike override");
            self.cache.insert(slug.to_string(), price);
            return Some(price);
        }

        let now = Utc::now();
        if let Some(state) = self.retries.get(slug) {
            if now < state.next_attempt {
                debug!(
                    slug,
                    retry_in_s = (state.next_attempt - now).num_seconds(),
                    "strike fetch backing off"
                );
                return None;
            }
        }

        match self.fetch(start, end).await {
            Ok(price) => {
                info!(slug, %price, "strike resolved");
                self.retries.remove(slug);
                self.cache.insert(slug.to_string(), price);
                Some(price)
            }
            Err(e) => {
                let failures = self
                    .retries
                    .get(slug)
                    .map(|s| s.consecutive_failures + 1)
                    .unwrap_or(1);
                let delay = self.backoff_delay(failures, e.is_rate_limit());
                warn!(
                    slug,
                    attempt = failures,
                    retry_in_s = delay.as_secs(),
                    "strike fetch failed: {}",
                    e
                );
                self.retries.insert(
                    slug.to_string(),
                    RetryState {
                        consecutive_failures: failures,
                        next_attempt: now + chrono::Duration::from_std(delay).unwrap_or_default(),
                    },
                );
                None
            }
        }
    }

    /// Drop cached strikes and retry state for windows other than `keep`.
    pub fn retain_session(&mut self, keep: &str) {
        self.cache.retain(|slug, _| slug == keep);
        self.retries.retain(|slug, _| slug == keep);
    }

    /// Exponential backoff with distinct schedules for generic vs. 429.
    fn backoff_delay(&self, failures: u32, rate_limited: bool) -> Duration {
        let (base, cap) = if rate_limited {
            (self.config.rate_limit_base, self.config.rate_limit_cap)
        } else {
            (self.config.backoff_base, self.config.backoff_cap)
        };
        let exp = failures.saturating_sub(1).min(16);
        base.saturating_mul(1u32 << exp).min(cap)
    }

    /// Single fetch attempt against the crypto-price endpoint.
    async fn fetch(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Decimal, StrikeError> {
        let params = [
            ("symbol", self.config.asset.strike_symbol().to_string()),
            ("variant", "fifteen".to_string()),
            ("eventStartTime", start.to_rfc3339()),
            ("endDate", end.to_rfc3339()),
        ];

        let response = self
            .http
            .get(CRYPTO_PRICE_API_URL)
            .query(&params)
            .send()
            .await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(StrikeError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(StrikeError::Status(response.status()));
        }

        let body: crate::types::CryptoPriceResponse = response.json().await?;
        let open = body.open_price.ok_or(StrikeError::NotAvailable)?;

        // f64 -> string -> Decimal keeps the precision the API actually sent.
        let rendered = format!("{:.8}", open);
        Decimal::from_str(&rendered).map_err(|_| StrikeError::BadPrice(rendered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn oracle() -> StrikeOracle {
        StrikeOracle::new(StrikeConfig::default())
    }

    #[test]
    fn test_backoff_schedule_generic() {
        let o = oracle();
        assert_eq!(o.backoff_delay(1, false), Duration::from_secs(3));
        assert_eq!(o.backoff_delay(2, false), Duration::from_secs(6));
        assert_eq!(o.backoff_delay(3, false), Duration::from_secs(12));
        assert_eq!(o.backoff_delay(4, false), Duration::from_secs(24));
        // Capped at 30s from the 5th failure on.
        assert_eq!(o.backoff_delay(5, false), Duration::from_secs(30));
        assert_eq!(o.backoff_delay(12, false), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_schedule_rate_limited() {
        let o = oracle();
        assert_eq!(o.backoff_delay(1, true), Duration::from_secs(10));
        assert_eq!(o.backoff_delay(2, true), Duration::from_secs(20));
        assert_eq!(o.backoff_delay(3, true), Duration::from_secs(40));
        assert_eq!(o.backoff_delay(4, true), Duration::from_secs(60));
        assert_eq!(o.backoff_delay(9, true), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_override_short_circuits() {
        let mut o = StrikeOracle::new(StrikeConfig {
            override_price: Some(dec!(89750)),
            ..Default::default()
        });
        let now = Utc::now();
        let strike = o
            .strike("btc-updown-15m-1766223000", now, now + chrono::Duration::minutes(15))
            .await;
        assert_eq!(strike, Some(dec!(89750)));
        // Cached afterwards.
        assert_eq!(o.cache.get("btc-updown-15m-1766223000"), Some(&dec!(89750)));
    }

    #[test]
    fn test_retain_session() {
        let mut o = oracle();
        o.cache.insert("a".to_string(), dec!(1));
        o.cache.insert("b".to_string(), dec!(2));
        o.retries.insert(
            "a".to_string(),
            RetryState {
                consecutive_failures: 1,
                next_attempt: Utc::now(),
            },
        );
        o.retain_session("b");
        assert!(!o.cache.contains_key("a"));
        assert!(o.cache.contains_key("b"));
        assert!(o.retries.is_empty());
    }
}
