//! Order execution and the broker HTTP client
//!
//! The scanner only sees the [`OrderExecutor`] port. In LIVE mode orders go
//! through the HMAC-signed broker REST API; without credentials the
//! simulation executor logs the intent and reports success.

use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use tracing::info;

use crate::data::MarketData;
use crate::types::{Candle, Symbol};

type HmacSha256 = Hmac<Sha256>;

/// Port for submitting orders.
///
/// A failure means the order did not reach the market; the caller must not
/// mutate position state for it.
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    async fn submit_order(
        &self,
        symbol: &Symbol,
        side: &str,
        quantity: u32,
        price: f64,
    ) -> Result<()>;
}

/// Simulation executor: every order fills at the requested price
pub struct SimulatedExecutor;

#[async_trait]
impl OrderExecutor for SimulatedExecutor {
    async fn submit_order(
        &self,
        symbol: &Symbol,
        side: &str,
        quantity: u32,
        price: f64,
    ) -> Result<()> {
        info!(
            "[SIM] Order filled: {} {} qty={} @ {:.2}",
            side, symbol, quantity, price
        );
        Ok(())
    }
}

// =============================================================================
// Broker REST client
// =============================================================================

#[derive(Debug, Clone)]
pub struct BrokerClient {
    api_key: String,
    api_secret: String,
    base_url: String,
    client: reqwest::Client,
}

impl BrokerClient {
    pub fn new(
        api_key: String,
        api_secret: String,
        base_url: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(BrokerClient {
            api_key,
            api_secret,
            base_url,
            client,
        })
    }

    fn generate_signature(&self, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    pub async fn fetch_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/v1/api/charting/candles?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );

        let response = self
            .client
            .get(&url)
            .header("X-API-KEY", &self.api_key)
            .send()
            .await
            .context("Failed to fetch candles")?;

        let payload: CandleResponse = response.json().await.context("Failed to parse candles")?;
        Ok(payload
            .candles
            .into_iter()
            .filter_map(|row| {
                let datetime = chrono::DateTime::from_timestamp(row.0, 0)?;
                Some(Candle {
                    datetime,
                    open: row.1,
                    high: row.2,
                    low: row.3,
                    close: row.4,
                    volume: row.5,
                })
            })
            .collect())
    }

    pub async fn place_order(&self, order: &OrderRequest) -> Result<OrderResponse> {
        let url = format!("{}/v1/api/orders/create", self.base_url);

        let body = serde_json::to_string(order)?;
        let signature = self.generate_signature(&body);

        let response = self
            .client
            .post(&url)
            .header("X-API-KEY", &self.api_key)
            .header("X-SIGNATURE", signature)
            .json(order)
            .send()
            .await
            .context("Failed to place order")?;

        response
            .json()
            .await
            .context("Failed to parse order response")
    }
}

/// Broker-backed market data adapter
pub struct BrokerMarketData {
    client: BrokerClient,
}

impl BrokerMarketData {
    pub fn new(client: BrokerClient) -> Self {
        BrokerMarketData { client }
    }
}

#[async_trait]
impl MarketData for BrokerMarketData {
    async fn fetch(&self, symbol: &Symbol, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        self.client.fetch_candles(symbol.as_str(), interval, limit).await
    }
}

/// Broker-backed order executor placing day-validity intraday market orders
pub struct BrokerExecutor {
    client: BrokerClient,
}

impl BrokerExecutor {
    pub fn new(client: BrokerClient) -> Self {
        BrokerExecutor { client }
    }
}

#[async_trait]
impl OrderExecutor for BrokerExecutor {
    async fn submit_order(
        &self,
        symbol: &Symbol,
        side: &str,
        quantity: u32,
        price: f64,
    ) -> Result<()> {
        let order = OrderRequest {
            symbol: symbol.as_str().to_string(),
            side: side.to_string(),
            quantity,
            validity: "DAY".to_string(),
            product: "INTRADAY".to_string(),
            order_type: "MARKET".to_string(),
        };

        let response = self.client.place_order(&order).await?;
        info!(
            "Order placed: {} {} qty={} @ ~{:.2} | id={} status={}",
            side, symbol, quantity, price, response.id, response.status
        );
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct CandleResponse {
    /// Rows of [epoch_secs, open, high, low, close, volume]
    candles: Vec<(i64, f64, f64, f64, f64, f64)>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: String,
    pub quantity: u32,
    pub validity: String,
    pub product: String,
    pub order_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderResponse {
    pub id: String,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_executor_always_fills() {
        let executor = SimulatedExecutor;
        let result = executor
            .submit_order(&Symbol::new("RELIANCE"), "BUY", 10, 100.0)
            .await;
        assert!(result.is_ok());
    }

    #[test]
    fn test_signature_is_deterministic() {
        let client = BrokerClient::new(
            "key".to_string(),
            "secret".to_string(),
            "http://localhost".to_string(),
            Duration::from_secs(3),
        )
        .unwrap();

        let a = client.generate_signature("payload");
        let b = client.generate_signature("payload");
        let c = client.generate_signature("other");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64); // hex-encoded SHA-256
    }
}
