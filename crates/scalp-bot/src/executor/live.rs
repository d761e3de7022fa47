//! Live gateway: signed orders against the venue's CLOB endpoint.
//!
//! Key management and API-credential derivation are external collaborators:
//! the executor only depends on the narrow `CredentialProvider` contract.
//! Credentials are negotiated lazily on first use; a mutex makes the
//! derivation idempotent under concurrent callers. Every request after that
//! carries the venue's `POLY_*` auth headers.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use tokio::sync::Mutex;
use tracing::{info, warn};

use scalp_common::{Side, TimeInForce};

use super::{Executor, ExecutorError, OpenOrder, Position};

type HmacSha256 = Hmac<Sha256>;

/// Derived API credentials for L2 (header) authentication.
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
    pub address: String,
}

/// Narrow contract for credential material.
///
/// Deriving credentials from the operator's signing key (and the signature
/// scheme negotiation that goes with it) lives outside this crate; the
/// gateway only asks for the result.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn derive(&self) -> Result<ApiCredentials, ExecutorError>;
}

/// Credential provider fed by operator tooling through the environment.
pub struct EnvCredentialProvider {
    address: String,
}

impl EnvCredentialProvider {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for EnvCredentialProvider {
    async fn derive(&self) -> Result<ApiCredentials, ExecutorError> {
        let get = |key: &str| {
            std::env::var(key).map_err(|_| {
                ExecutorError::Internal(format!("{} not set; run the credential tool first", key))
            })
        };
        Ok(ApiCredentials {
            api_key: get("CLOB_API_KEY")?,
            secret: get("CLOB_API_SECRET")?,
            passphrase: get("CLOB_API_PASSPHRASE")?,
            address: self.address.clone(),
        })
    }
}

/// Configuration for the live gateway.
#[derive(Debug, Clone)]
pub struct LiveExecutorConfig {
    /// CLOB REST endpoint.
    pub api_endpoint: String,
    /// Fee rate attached to orders, in basis points.
    pub fee_rate_bps: u32,
    /// Operator-declared trading allowance. On-chain balance introspection
    /// belongs to the wallet collaborator; sizing works off this figure.
    pub trading_balance: Decimal,
}

impl Default for LiveExecutorConfig {
    fn default() -> Self {
        Self {
            api_endpoint: "https://clob.polymarket.com".to_string(),
            fee_rate_bps: 0,
            trading_balance: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PostOrderResponse {
    #[serde(default)]
    success: bool,
    #[serde(rename = "orderID", default)]
    order_id: Option<String>,
    #[serde(rename = "errorMsg", default)]
    error_msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LiveOrderStatus {
    #[serde(default)]
    status: String,
    #[serde(default)]
    asset_id: String,
    #[serde(default)]
    side: String,
    #[serde(default)]
    price: String,
    #[serde(default)]
    original_size: String,
    #[serde(default)]
    id: String,
}

/// Live trading gateway.
pub struct LiveExecutor {
    config: LiveExecutorConfig,
    http: Client,
    provider: Arc<dyn CredentialProvider>,
    /// Lazily-derived credentials; the mutex serializes first use.
    creds: Mutex<Option<ApiCredentials>>,
}

impl LiveExecutor {
    pub fn new(config: LiveExecutorConfig, provider: Arc<dyn CredentialProvider>) -> Self {
        Self {
            config,
            http: Client::new(),
            provider,
            creds: Mutex::new(None),
        }
    }

    /// Credentials, deriving them on first use. Idempotent.
    async fn credentials(&self) -> Result<ApiCredentials, ExecutorError> {
        let mut slot = self.creds.lock().await;
        if let Some(creds) = slot.as_ref() {
            return Ok(creds.clone());
        }
        let creds = self.provider.derive().await?;
        info!(address = %creds.address, "API credentials derived");
        *slot = Some(creds.clone());
        Ok(creds)
    }

    /// Signed request builder for the venue's L2 header scheme.
    async fn signed(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::RequestBuilder, ExecutorError> {
        let creds = self.credentials().await?;
        let timestamp = Utc::now().timestamp().to_string();
        let body_str = body
            .as_ref()
            .map(|b| b.to_string())
            .unwrap_or_default();

        let signature = l2_signature(
            &creds.secret,
            &timestamp,
            method.as_str(),
            path,
            &body_str,
        )?;

        let url = format!("{}{}", self.config.api_endpoint, path);
        let mut request = self
            .http
            .request(method, &url)
            .header("POLY_ADDRESS", &creds.address)
            .header("POLY_API_KEY", &creds.api_key)
            .header("POLY_PASSPHRASE", &creds.passphrase)
            .header("POLY_TIMESTAMP", &timestamp)
            .header("POLY_SIGNATURE", signature);

        if let Some(body) = body {
            request = request.json(&body);
        }

        Ok(request)
    }

    /// Submit one order to the venue; returns the assigned order id.
    async fn post_order(
        &self,
        token_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
        tif: TimeInForce,
    ) -> Result<String, ExecutorError> {
        let body = order_payload(token_id, side, price, size, tif, self.config.fee_rate_bps);
        let response = self
            .signed(reqwest::Method::POST, "/order", Some(body))
            .await?
            .send()
            .await
            .map_err(|e| ExecutorError::Connection(e.to_string()))?;

        let status = response.status();
        let parsed: PostOrderResponse = response
            .json()
            .await
            .map_err(|e| ExecutorError::Connection(e.to_string()))?;

        if !status.is_success() || !parsed.success {
            return Err(ExecutorError::Rejected(
                parsed
                    .error_msg
                    .unwrap_or_else(|| format!("venue returned {}", status)),
            ));
        }

        parsed
            .order_id
            .ok_or_else(|| ExecutorError::Internal("venue omitted orderID".to_string()))
    }

    async fn fetch_open_orders(&self) -> Result<Vec<LiveOrderStatus>, ExecutorError> {
        let response = self
            .signed(reqwest::Method::GET, "/data/orders", None)
            .await?
            .send()
            .await
            .map_err(|e| ExecutorError::Connection(e.to_string()))?;

        response
            .json()
            .await
            .map_err(|e| ExecutorError::Connection(e.to_string()))
    }
}

#[async_trait]
impl Executor for LiveExecutor {
    async fn place_limit(
        &mut self,
        token_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
        tif: TimeInForce,
    ) -> Result<String, ExecutorError> {
        let order_id = self.post_order(token_id, side, price, size, tif).await?;
        info!(%order_id, %side, %price, %size, %tif, "[LIVE] order placed");
        Ok(order_id)
    }

    async fn place_fok(
        &mut self,
        token_id: &str,
        side: Side,
        amount: Decimal,
        price: Decimal,
    ) -> Result<String, ExecutorError> {
        if price <= Decimal::ZERO {
            return Err(ExecutorError::InvalidOrder("price must be positive".to_string()));
        }
        // Marketable FOK: BUY amount is monetary, SELL amount is shares.
        let size = match side {
            Side::Buy => amount / price,
            Side::Sell => amount,
        };
        let order_id = self
            .post_order(token_id, side, price, size, TimeInForce::Fok)
            .await?;
        info!(%order_id, %side, %price, %amount, "[LIVE] FOK placed");
        Ok(order_id)
    }

    async fn cancel(&mut self, order_id: &str) -> Result<bool, ExecutorError> {
        let body = serde_json::json!({ "orderID": order_id });
        let response = self
            .signed(reqwest::Method::DELETE, "/order", Some(body))
            .await?
            .send()
            .await
            .map_err(|e| ExecutorError::Connection(e.to_string()))?;

        let cancelled = response.status().is_success();
        if cancelled {
            info!(order_id, "[LIVE] order cancelled");
        } else {
            warn!(order_id, status = %response.status(), "[LIVE] cancel refused");
        }
        Ok(cancelled)
    }

    async fn execute_fak(
        &mut self,
        token_id: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> Result<bool, ExecutorError> {
        match self
            .post_order(token_id, side, price, size, TimeInForce::Fak)
            .await
        {
            Ok(order_id) => {
                info!(%order_id, %side, %price, %size, "[LIVE] FAK executed");
                Ok(true)
            }
            Err(ExecutorError::Rejected(reason)) => {
                warn!(%side, %price, %size, reason, "[LIVE] FAK refused");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn is_filled(&self, order_id: &str) -> bool {
        let path = format!("/data/order/{}", order_id);
        let request = match self.signed(reqwest::Method::GET, &path, None).await {
            Ok(r) => r,
            Err(_) => return false,
        };
        let response = match request.send().await {
            Ok(r) => r,
            Err(_) => return false,
        };
        match response.json::<LiveOrderStatus>().await {
            Ok(status) => matches!(status.status.as_str(), "FILLED" | "MATCHED"),
            Err(_) => false,
        }
    }

    async fn position(&self, _token_id: &str) -> Option<Position> {
        // Live inventory lives on-chain behind the wallet collaborator; the
        // strategy tracks its own exposure through the ledger.
        None
    }

    async fn all_positions(&self) -> Vec<Position> {
        Vec::new()
    }

    async fn cash(&self) -> Decimal {
        self.config.trading_balance
    }

    async fn open_orders(&self) -> Vec<OpenOrder> {
        let raw = match self.fetch_open_orders().await {
            Ok(r) => r,
            Err(e) => {
                warn!("[LIVE] open-order fetch failed: {}", e);
                return Vec::new();
            }
        };

        raw.into_iter()
            .filter_map(|o| {
                Some(OpenOrder {
                    order_id: o.id,
                    token_id: o.asset_id,
                    side: if o.side.eq_ignore_ascii_case("buy") {
                        Side::Buy
                    } else {
                        Side::Sell
                    },
                    price: o.price.parse().ok()?,
                    size: o.original_size.parse().ok()?,
                    tif: TimeInForce::Gtc,
                    created_at: Utc::now(),
                })
            })
            .collect()
    }

    async fn clear_all(&mut self) -> Result<(), ExecutorError> {
        let open = self.fetch_open_orders().await?;
        if open.is_empty() {
            return Ok(());
        }

        let ids: Vec<String> = open.into_iter().map(|o| o.id).collect();
        info!(count = ids.len(), "[LIVE] cancelling all open orders");

        let body = serde_json::json!({ "orderIDs": ids });
        let response = self
            .signed(reqwest::Method::DELETE, "/orders", Some(body))
            .await?
            .send()
            .await
            .map_err(|e| ExecutorError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ExecutorError::Rejected(format!(
                "cancel-all returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Venue L2 signature: base64(HMAC-SHA256(secret, ts + method + path + body)).
fn l2_signature(
    secret: &str,
    timestamp: &str,
    method: &str,
    path: &str,
    body: &str,
) -> Result<String, ExecutorError> {
    let engine = base64::engine::general_purpose::URL_SAFE;
    let key = engine
        .decode(secret)
        .map_err(|_| ExecutorError::Internal("API secret is not valid base64".to_string()))?;

    let message = format!("{}{}{}{}", timestamp, method, path, body);
    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| ExecutorError::Internal(format!("HMAC init failed: {}", e)))?;
    mac.update(message.as_bytes());

    Ok(engine.encode(mac.finalize().into_bytes()))
}

/// Venue order payload with the {GTC, GTD, FOK, FAK} time-in-force model.
fn order_payload(
    token_id: &str,
    side: Side,
    price: Decimal,
    size: Decimal,
    tif: TimeInForce,
    fee_rate_bps: u32,
) -> serde_json::Value {
    let mut payload = serde_json::json!({
        "tokenID": token_id,
        "side": side.to_string(),
        "price": price.to_string(),
        "size": size.to_string(),
        "feeRateBps": fee_rate_bps,
        "orderType": tif.venue_code(),
    });

    if let TimeInForce::Gtd(expiry) = tif {
        payload["expiration"] = serde_json::json!(expiry.timestamp().to_string());
    }

    payload
}
