// =============================================================================
// Order Client — REST wrapper for submitting orders to the engine
// =============================================================================
//
// Thin request/response collaborator around the engine's HTTP API. Validation
// mirrors what the engine enforces server-side so obviously bad orders fail
// before hitting the wire; error bodies are mapped to readable failures.
// =============================================================================

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::types::{OrderBookView, Side};

/// A limit order to submit. `user_id` identifies the submitter to the engine.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub price: f64,
    pub qty: i64,
    pub user_id: String,
}

impl OrderRequest {
    /// Build an order with a generated terminal submitter id.
    pub fn new(symbol: impl Into<String>, side: Side, price: f64, qty: i64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            price,
            qty,
            user_id: format!("term-{}", Uuid::new_v4()),
        }
    }
}

/// Engine confirmation for an accepted order.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderResponse {
    pub status: String,
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Error body returned by the engine on a rejected request.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// REST client for the engine's order and status endpoints.
#[derive(Clone)]
pub struct OrderClient {
    base_url: String,
    client: reqwest::Client,
}

impl OrderClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url: base_url.into(),
            client,
        }
    }

    /// POST /order — submit a limit order.
    pub async fn place_order(&self, order: &OrderRequest) -> Result<OrderResponse> {
        if order.symbol.is_empty() {
            bail!("order rejected: symbol is required");
        }
        if order.price <= 0.0 {
            bail!("order rejected: price must be greater than 0");
        }
        if order.qty <= 0 {
            bail!("order rejected: quantity must be greater than 0");
        }

        let url = format!("{}/order", self.base_url);
        debug!(url = %url, symbol = %order.symbol, side = %order.side, "submitting order");

        let resp = self
            .client
            .post(&url)
            .json(order)
            .send()
            .await
            .context("POST /order request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let reason = resp
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|body| body.message.or(body.error))
                .unwrap_or_else(|| {
                    status
                        .canonical_reason()
                        .unwrap_or("request failed")
                        .to_string()
                });
            bail!("order rejected by engine ({status}): {reason}");
        }

        let confirmation: OrderResponse = resp
            .json()
            .await
            .context("failed to parse order confirmation")?;

        info!(
            order_id = %confirmation.order_id,
            status = %confirmation.status,
            symbol = %order.symbol,
            side = %order.side,
            price = order.price,
            qty = order.qty,
            "order accepted"
        );
        Ok(confirmation)
    }

    /// GET /health — engine liveness and mode.
    pub async fn health(&self) -> Result<serde_json::Value> {
        self.get_json("/health").await
    }

    /// GET /stats — monitor and market-maker statistics.
    pub async fn stats(&self) -> Result<serde_json::Value> {
        self.get_json("/stats").await
    }

    /// GET /book/{symbol} — on-demand book snapshot outside the push feed.
    pub async fn order_book(&self, symbol: &str) -> Result<OrderBookView> {
        let url = format!("{}/book/{}", self.base_url, symbol);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET /book/{symbol} request failed"))?;

        let status = resp.status();
        if !status.is_success() {
            bail!("GET /book/{symbol} returned {status}");
        }

        resp.json()
            .await
            .with_context(|| format!("failed to parse book snapshot for {symbol}"))
    }

    async fn get_json(&self, path: &str) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {path} request failed"))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse GET {path} response"))?;

        if !status.is_success() {
            bail!("GET {path} returned {status}: {body}");
        }
        Ok(body)
    }
}
