//! Spot feed: live reference price for the underlying asset.
//!
//! Subscribes to the venue's real-time data service over WebSocket and keeps
//! the most recent price for the configured asset in a shared cell. The feed
//! reconnects forever with exponential backoff; readers never block and
//! simply see the last cached value.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

use scalp_common::CryptoAsset;

/// Real-time data service WebSocket URL.
const RTDS_WS_URL: &str = "wss://ws-live-data.polymarket.com";

/// Topic tag carried by price stream messages.
const PRICE_TOPIC: &str = "crypto_prices";

/// Errors inside a single feed session.
#[derive(Debug, Error)]
pub enum SpotFeedError {
    #[error("WebSocket connection failed: {0}")]
    Connection(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("connection timeout")]
    Timeout,

    #[error("stream ended unexpectedly")]
    StreamEnded,
}

/// Configuration for the spot feed.
#[derive(Debug, Clone)]
pub struct SpotFeedConfig {
    pub url: String,
    pub asset: CryptoAsset,
    pub connect_timeout: Duration,
    pub ping_interval: Duration,
    pub reconnect_base: Duration,
    pub reconnect_cap: Duration,
}

impl Default for SpotFeedConfig {
    fn default() -> Self {
        Self {
            url: RTDS_WS_URL.to_string(),
            asset: CryptoAsset::Btc,
            connect_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(5),
            reconnect_base: Duration::from_secs(1),
            reconnect_cap: Duration::from_secs(60),
        }
    }
}

/// Incoming message envelope.
#[derive(Debug, Deserialize)]
struct RtdsMessage {
    #[serde(default)]
    topic: String,
    #[serde(default)]
    payload: Option<RtdsPayload>,
}

/// Payload: either a single point or a historical dump on subscribe.
#[derive(Debug, Deserialize)]
struct RtdsPayload {
    symbol: String,
    #[serde(default)]
    value: Option<f64>,
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    data: Option<Vec<RtdsPoint>>,
}

#[derive(Debug, Deserialize)]
struct RtdsPoint {
    #[serde(default)]
    value: f64,
    #[serde(default)]
    #[allow(dead_code)]
    timestamp: i64,
}

/// State shared between the feed task and readers.
#[derive(Debug, Default)]
struct Shared {
    latest: RwLock<Option<Decimal>>,
    /// First element of the historical dump: the window's opening reference.
    opening: RwLock<Option<Decimal>>,
    ready: AtomicBool,
}

/// Push-based spot price feed. Single writer task, many readers.
pub struct SpotFeed {
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
}

impl SpotFeed {
    /// Start the feed; the background task runs until `close()`.
    pub fn start(config: SpotFeedConfig) -> Self {
        let shared = Arc::new(Shared::default());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(4);

        let task_shared = shared.clone();
        tokio::spawn(async move {
            run_feed(task_shared, config, shutdown_rx).await;
        });

        Self {
            shared,
            shutdown_tx,
        }
    }

    /// Latest observed price; `None` until the first message lands.
    pub async fn latest(&self) -> Option<Decimal> {
        *self.shared.latest.read().await
    }

    /// True once at least one price has been observed.
    pub fn ready(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire)
    }

    /// Opening reference from the historical dump, when one was served.
    pub async fn opening_reference(&self) -> Option<Decimal> {
        *self.shared.opening.read().await
    }

    /// Stop the feed task.
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Reconnect-forever outer loop.
async fn run_feed(shared: Arc<Shared>, config: SpotFeedConfig, mut shutdown: broadcast::Receiver<()>) {
    let mut reconnect_delay = config.reconnect_base;

    loop {
        if shutdown.try_recv().is_ok() {
            info!("spot feed: shutdown signal received");
            return;
        }

        match run_session(&shared, &config, &mut shutdown).await {
            Ok(()) => {
                info!("spot feed: clean shutdown");
                return;
            }
            Err(e) => {
                warn!(
                    "spot feed connection error: {}, reconnecting in {:?}",
                    e, reconnect_delay
                );

                tokio::select! {
                    _ = tokio::time::sleep(reconnect_delay) => {}
                    _ = shutdown.recv() => {
                        info!("spot feed: shutdown during reconnect");
                        return;
                    }
                }

                reconnect_delay = (reconnect_delay * 2).min(config.reconnect_cap);
            }
        }
    }
}

/// One WebSocket session: connect, subscribe, pump messages.
async fn run_session(
    shared: &Arc<Shared>,
    config: &SpotFeedConfig,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<(), SpotFeedError> {
    info!("connecting to RTDS at {}", config.url);

    let connect_result =
        tokio::time::timeout(config.connect_timeout, connect_async(config.url.as_str())).await;

    let (ws_stream, _) = match connect_result {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => return Err(SpotFeedError::Connection(e.to_string())),
        Err(_) => return Err(SpotFeedError::Timeout),
    };

    info!("spot feed connected");

    let (mut write, mut read) = ws_stream.split();

    // The RTDS protocol requires a ping before subscriptions are accepted.
    write
        .send(Message::Text("ping".into()))
        .await
        .map_err(|e| SpotFeedError::WebSocket(e.to_string()))?;

    let subscribe_msg = serde_json::json!({
        "action": "subscribe",
        "subscriptions": [{
            "topic": PRICE_TOPIC,
            "type": "update"
        }],
    });

    write
        .send(Message::Text(subscribe_msg.to_string().into()))
        .await
        .map_err(|e| SpotFeedError::WebSocket(e.to_string()))?;

    info!(symbol = config.asset.rtds_symbol(), "subscribed to price stream");

    let mut ping_timer = interval(config.ping_interval);
    ping_timer.tick().await; // skip the immediate first tick

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        apply_message(shared, config.asset, &text).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await
                            .map_err(|e| SpotFeedError::WebSocket(e.to_string()))?;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        warn!("spot feed: close frame: {:?}", frame);
                        return Err(SpotFeedError::StreamEnded);
                    }
                    Some(Err(e)) => {
                        return Err(SpotFeedError::WebSocket(e.to_string()));
                    }
                    None => {
                        return Err(SpotFeedError::StreamEnded);
                    }
                    _ => {}
                }
            }
            _ = ping_timer.tick() => {
                write.send(Message::Text("ping".into())).await
                    .map_err(|e| SpotFeedError::WebSocket(e.to_string()))?;
            }
            _ = shutdown.recv() => {
                info!("spot feed session: shutdown");
                return Ok(());
            }
        }
    }
}

/// Parse a frame and update the shared cell when it matches our stream.
async fn apply_message(shared: &Arc<Shared>, asset: CryptoAsset, text: &str) {
    let parsed = match parse_update(asset, text) {
        Some(p) => p,
        None => return,
    };

    if let Some(opening) = parsed.opening {
        let mut slot = shared.opening.write().await;
        if slot.is_none() {
            debug!(%opening, "opening reference captured from historical dump");
            *slot = Some(opening);
        }
    }

    *shared.latest.write().await = Some(parsed.latest);
    shared.ready.store(true, Ordering::Release);
}

struct ParsedUpdate {
    latest: Decimal,
    opening: Option<Decimal>,
}

/// Extract the latest (and optionally opening) price from a raw frame.
///
/// Accepts both payload shapes: a single `{symbol, timestamp, value}` update
/// and a historical dump `{symbol, data: [...]}` served on subscribe, whose
/// last element is the freshest. Non-positive values are discarded.
fn parse_update(asset: CryptoAsset, text: &str) -> Option<ParsedUpdate> {
    let msg: RtdsMessage = serde_json::from_str(text).ok()?;
    if msg.topic != PRICE_TOPIC {
        return None;
    }

    let payload = msg.payload?;
    if !payload.symbol.eq_ignore_ascii_case(asset.rtds_symbol()) {
        return None;
    }

    if let Some(points) = payload.data {
        let opening = points
            .first()
            .and_then(|p| decimal_price(p.value));
        let latest = points
            .last()
            .and_then(|p| decimal_price(p.value))?;
        return Some(ParsedUpdate { latest, opening });
    }

    let _ = payload.timestamp;
    let latest = decimal_price(payload.value?)?;
    Some(ParsedUpdate {
        latest,
        opening: None,
    })
}

/// Convert a raw value, rejecting non-positive garbage.
fn decimal_price(value: f64) -> Option<Decimal> {
    if value <= 0.0 {
        return None;
    }
    Decimal::from_f64(value)
}
