//! Market discovery via the Gamma API.
//!
//! 15-minute up/down windows align on quarter-hour boundaries and use
//! predictable slugs (`btc-updown-15m-<end_ts>`), so discovery probes the
//! candidate boundaries around "now" instead of scanning event listings.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info, warn};

use scalp_common::CryptoAsset;

use crate::types::GammaMarket;

/// Gamma API base URL.
const GAMMA_API_URL: &str = "https://gamma-api.polymarket.com";

/// Window length in seconds.
const WINDOW_SECS: i64 = 15 * 60;

/// Errors that can occur during market discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid market data: {0}")]
    InvalidData(String),
}

/// An immutable descriptor of a single trading window.
#[derive(Debug, Clone)]
pub struct Market {
    /// Unique session slug (e.g. `btc-updown-15m-1766223000`).
    pub slug: String,
    /// Condition ID for the market.
    pub condition_id: String,
    /// Market question (display only).
    pub question: String,
    /// Token ID for the UP outcome.
    pub token_id_up: String,
    /// Token ID for the DOWN outcome.
    pub token_id_down: String,
    /// Strike price; zero until the strike oracle resolves it.
    pub strike_price: Decimal,
    /// Window open.
    pub start: DateTime<Utc>,
    /// Window close (settlement).
    pub end: DateTime<Utc>,
    /// Slug of the next scheduled window.
    pub next_slug: Option<String>,
}

impl Market {
    /// Seconds until settlement, clamped at zero.
    pub fn time_remaining(&self) -> i64 {
        (self.end - Utc::now()).num_seconds().max(0)
    }

    /// True iff fewer than `threshold_s` seconds remain before settlement.
    pub fn is_expiring(&self, threshold_s: i64) -> bool {
        (self.end - Utc::now()).num_seconds() < threshold_s
    }

    /// True iff the window is open at `now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now >= self.start && now < self.end
    }

    /// Structural invariants: end > start, distinct non-empty token ids.
    pub fn validate(&self) -> Result<(), DiscoveryError> {
        if self.end <= self.start {
            return Err(DiscoveryError::InvalidData(format!(
                "window end {} not after start {}",
                self.end, self.start
            )));
        }
        if self.token_id_up.is_empty() || self.token_id_down.is_empty() {
            return Err(DiscoveryError::InvalidData(
                "empty outcome token id".to_string(),
            ));
        }
        if self.token_id_up == self.token_id_down {
            return Err(DiscoveryError::InvalidData(
                "UP and DOWN token ids are identical".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for market discovery.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Asset whose windows we trade.
    pub asset: CryptoAsset,
    /// Per-probe HTTP budget. Kept tight so rotation stays snappy.
    pub probe_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            asset: CryptoAsset::Btc,
            probe_timeout: Duration::from_millis(500),
        }
    }
}

/// Market discovery client for the active 15-minute window.
pub struct MarketDiscovery {
    http: Client,
    config: DiscoveryConfig,
}

impl MarketDiscovery {
    /// Create a new market discovery client.
    pub fn new(config: DiscoveryConfig) -> Self {
        let http = Client::builder()
            .timeout(config.probe_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { http, config }
    }

    /// Create with default config for an asset.
    pub fn for_asset(asset: CryptoAsset) -> Self {
        Self::new(DiscoveryConfig {
            asset,
            ..Default::default()
        })
    }

    /// Find the currently-active market window.
    ///
    /// Probes candidate end-boundaries concurrently; the first candidate (in
    /// probe order) whose window contains "now" and which the venue reports
    /// as tradable wins.
    pub async fn active_market(&self) -> Result<Option<Market>, DiscoveryError> {
        let now = Utc::now();
        let candidates = candidate_boundaries(now.timestamp());

        let mut probes = Vec::with_capacity(candidates.len());
        for end_ts in candidates {
            let slug = self.slug_for(end_ts);
            let http = self.http.clone();
            probes.push(tokio::spawn(async move {
                match fetch_market(&http, &slug).await {
                    Ok(m) => m,
                    Err(e) => {
                        debug!("probe {} failed: {}", slug, e);
                        None
                    }
                }
            }));
        }

        for probe in probes {
            let gamma = match probe.await {
                Ok(Some(g)) => g,
                _ => continue,
            };

            match self.build_market(&gamma) {
                Ok(market) => {
                    if market.is_active(now) && gamma.is_tradable() {
                        info!(
                            slug = %market.slug,
                            ends = %market.end,
                            "active market window found"
                        );
                        return Ok(Some(market));
                    }
                }
                Err(e) => warn!("discarding malformed market payload: {}", e),
            }
        }

        Ok(None)
    }

    /// Slug for the window ending at `end_ts`.
    fn slug_for(&self, end_ts: i64) -> String {
        format!("{}-updown-15m-{}", self.config.asset.slug_prefix(), end_ts)
    }

    /// Assemble a `Market` from a Gamma payload.
    fn build_market(&self, gamma: &GammaMarket) -> Result<Market, DiscoveryError> {
        let slug = gamma
            .slug
            .clone()
            .ok_or_else(|| DiscoveryError::InvalidData("missing slug".to_string()))?;

        if gamma.clob_token_ids.len() < 2 {
            return Err(DiscoveryError::InvalidData(format!(
                "market {} has {} token ids, need 2",
                slug,
                gamma.clob_token_ids.len()
            )));
        }

        let end = parse_rfc3339(gamma.end_date.as_deref())
            .ok_or_else(|| DiscoveryError::InvalidData(format!("market {} missing endDate", slug)))?;

        // Some payloads omit the start; the window is always 15 minutes.
        let start = parse_rfc3339(gamma.start_raw())
            .unwrap_or(end - chrono::Duration::seconds(WINDOW_SECS));

        let next_slug = Some(self.slug_for(end.timestamp() + WINDOW_SECS));

        let market = Market {
            slug,
            condition_id: gamma.condition_id.clone().unwrap_or_default(),
            question: gamma.question.clone().unwrap_or_default(),
            token_id_up: gamma.clob_token_ids[0].clone(),
            token_id_down: gamma.clob_token_ids[1].clone(),
            strike_price: Decimal::ZERO,
            start,
            end,
            next_slug,
        };

        market.validate()?;
        Ok(market)
    }
}

/// Candidate window end-boundaries around `now`, in probe order:
/// next boundary, current boundary, previous, previous−1.
fn candidate_boundaries(now: i64) -> Vec<i64> {
    let base = (now / WINDOW_SECS) * WINDOW_SECS;
    vec![
        base + WINDOW_SECS,
        base,
        base - WINDOW_SECS,
        base - 2 * WINDOW_SECS,
    ]
}

/// Fetch a market by slug; `None` on HTTP miss or empty result.
async fn fetch_market(http: &Client, slug: &str) -> Result<Option<GammaMarket>, DiscoveryError> {
    let url = format!("{}/markets?slug={}", GAMMA_API_URL, slug);
    let response = http.get(&url).send().await?;

    if !response.status().is_success() {
        return Ok(None);
    }

    let markets: Vec<GammaMarket> = response.json().await?;
    Ok(markets.into_iter().next())
}

fn parse_rfc3339(s: Option<&str>) -> Option<DateTime<Utc>> {
    let s = s?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ") {
        return Some(dt.and_utc());
    }
    None
}
