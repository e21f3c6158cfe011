//! Production REST adapter.
//!
//! Thin HTTP client over the exchange's spot API. Authentication headers
//! are attached but request signing lives outside this crate's scope; the
//! core only depends on the success/data-or-error contract. Every request
//! carries an explicit timeout so no call is ever left pending.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

use snipe_core::{Price, TargetStatus, TradingPosition};

use crate::error::{ExchangeError, ExchangeResult};
use crate::traits::{ExchangeClient, ExecutionStore, MarketDataFeed};
use crate::types::{
    ExecutionRecord, MarketSnapshot, OrderRequest, OrderResponse, OrderStatus, SymbolInfo, Ticker,
};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Raw 24h ticker payload.
#[derive(Debug, Deserialize)]
struct RawTicker {
    symbol: String,
    #[serde(rename = "lastPrice")]
    last_price: String,
    #[serde(rename = "priceChangePercent")]
    price_change_percent: String,
    #[serde(rename = "quoteVolume")]
    quote_volume: String,
}

/// Raw order book payload (top levels only).
#[derive(Debug, Deserialize)]
struct RawDepth {
    bids: Vec<(String, String)>,
    asks: Vec<(String, String)>,
}

/// Raw symbol entry from exchangeInfo.
#[derive(Debug, Deserialize)]
struct RawSymbol {
    symbol: String,
    #[serde(rename = "baseAsset")]
    base_asset: String,
    #[serde(rename = "quoteAsset")]
    quote_asset: String,
    #[serde(default = "default_state_field")]
    sts: u8,
    #[serde(default = "default_state_field")]
    st: u8,
    #[serde(default = "default_tt_field")]
    tt: u8,
}

fn default_state_field() -> u8 {
    2
}

fn default_tt_field() -> u8 {
    4
}

#[derive(Debug, Deserialize)]
struct RawExchangeInfo {
    symbols: Vec<RawSymbol>,
}

#[derive(Debug, Deserialize)]
struct RawBalance {
    asset: String,
    free: String,
}

#[derive(Debug, Deserialize)]
struct RawAccount {
    balances: Vec<RawBalance>,
}

#[derive(Debug, Deserialize)]
struct RawOrderAck {
    #[serde(rename = "orderId")]
    order_id: serde_json::Value,
    status: Option<String>,
    #[serde(rename = "executedQty")]
    executed_qty: Option<String>,
    price: Option<String>,
}

/// REST exchange adapter.
pub struct RestExchange {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RestExchange {
    /// Create a new adapter.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> ExchangeResult<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ExchangeError::Internal(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn map_status(status: StatusCode, body: &str) -> ExchangeError {
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return ExchangeError::Connectivity(format!("HTTP {status}: {body}"));
        }
        if status == StatusCode::NOT_FOUND {
            return ExchangeError::NotFound(body.to_string());
        }
        let lowered = body.to_ascii_lowercase();
        if lowered.contains("not ready") || lowered.contains("trading disabled") {
            return ExchangeError::SymbolNotReady(body.to_string());
        }
        ExchangeError::Rejected(format!("HTTP {status}: {body}"))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> ExchangeResult<T> {
        let response = self
            .client
            .get(self.url(path))
            .query(query)
            .header("X-API-KEY", &self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, &body));
        }

        response
            .json()
            .await
            .map_err(|e| ExchangeError::Internal(format!("failed to parse response: {e}")))
    }

    fn parse_decimal(raw: &str, field: &str) -> ExchangeResult<Decimal> {
        raw.parse()
            .map_err(|e| ExchangeError::Internal(format!("bad {field} value '{raw}': {e}")))
    }
}

#[async_trait]
impl ExchangeClient for RestExchange {
    async fn place_order(&self, request: &OrderRequest) -> ExchangeResult<OrderResponse> {
        let mut params = vec![
            ("symbol", request.symbol.clone()),
            ("side", request.side.to_string()),
            ("type", request.order_type.to_string()),
            ("quantity", request.quantity.to_string()),
        ];
        if let Some(price) = request.price {
            params.push(("price", price.to_string()));
        }

        debug!(symbol = %request.symbol, side = %request.side, order_type = %request.order_type, "Placing order");

        let response = self
            .client
            .post(self.url("/api/v3/order"))
            .header("X-API-KEY", &self.api_key)
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(symbol = %request.symbol, %status, "Order rejected by exchange");
            return Err(Self::map_status(status, &body));
        }

        let ack: RawOrderAck = response
            .json()
            .await
            .map_err(|e| ExchangeError::Internal(format!("failed to parse order ack: {e}")))?;

        let filled = ack
            .executed_qty
            .as_deref()
            .map(|q| Self::parse_decimal(q, "executedQty"))
            .transpose()?
            .unwrap_or(request.quantity.inner());
        let price = ack
            .price
            .as_deref()
            .map(|p| Self::parse_decimal(p, "price"))
            .transpose()?
            .map(Price::new)
            .or(request.price)
            .unwrap_or(Price::ZERO);

        Ok(OrderResponse {
            order_id: ack.order_id.to_string().trim_matches('"').to_string(),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            quantity: request.quantity,
            price,
            status: match ack.status.as_deref() {
                Some("FILLED") => OrderStatus::Filled,
                Some("PARTIALLY_FILLED") => OrderStatus::PartiallyFilled,
                Some("CANCELED") | Some("CANCELLED") => OrderStatus::Cancelled,
                Some("REJECTED") => OrderStatus::Rejected,
                _ => OrderStatus::New,
            },
            filled_qty: filled.into(),
            created_at: Utc::now(),
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> ExchangeResult<()> {
        let response = self
            .client
            .delete(self.url("/api/v3/order"))
            .query(&[("symbol", symbol), ("orderId", order_id)])
            .header("X-API-KEY", &self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::map_status(status, &body));
        }
        Ok(())
    }

    async fn query_order(&self, symbol: &str, order_id: &str) -> ExchangeResult<OrderResponse> {
        let ack: RawOrderAck = self
            .get_json("/api/v3/order", &[("symbol", symbol), ("orderId", order_id)])
            .await?;

        let filled = ack
            .executed_qty
            .as_deref()
            .map(|q| Self::parse_decimal(q, "executedQty"))
            .transpose()?
            .unwrap_or(Decimal::ZERO);
        let price = ack
            .price
            .as_deref()
            .map(|p| Self::parse_decimal(p, "price"))
            .transpose()?
            .unwrap_or(Decimal::ZERO);

        Ok(OrderResponse {
            order_id: order_id.to_string(),
            symbol: symbol.to_string(),
            side: snipe_core::OrderSide::Buy,
            order_type: snipe_core::OrderType::Limit,
            quantity: filled.into(),
            price: Price::new(price),
            status: match ack.status.as_deref() {
                Some("FILLED") => OrderStatus::Filled,
                Some("PARTIALLY_FILLED") => OrderStatus::PartiallyFilled,
                Some("CANCELED") | Some("CANCELLED") => OrderStatus::Cancelled,
                Some("REJECTED") => OrderStatus::Rejected,
                _ => OrderStatus::New,
            },
            filled_qty: filled.into(),
            created_at: Utc::now(),
        })
    }

    async fn get_balance(&self, asset: &str) -> ExchangeResult<Decimal> {
        let account: RawAccount = self.get_json("/api/v3/account", &[]).await?;
        for balance in account.balances {
            if balance.asset == asset {
                return Self::parse_decimal(&balance.free, "free");
            }
        }
        Ok(Decimal::ZERO)
    }

    async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
        let raw: RawTicker = self
            .get_json("/api/v3/ticker/24hr", &[("symbol", symbol)])
            .await?;

        Ok(Ticker {
            symbol: raw.symbol,
            last_price: Price::new(Self::parse_decimal(&raw.last_price, "lastPrice")?),
            volume_24h: Self::parse_decimal(&raw.quote_volume, "quoteVolume")?,
            timestamp: Utc::now(),
        })
    }

    async fn get_symbol_info(&self, symbol: &str) -> ExchangeResult<SymbolInfo> {
        let info: RawExchangeInfo = self
            .get_json("/api/v3/exchangeInfo", &[("symbol", symbol)])
            .await?;

        let raw = info
            .symbols
            .into_iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| ExchangeError::NotFound(format!("symbol {symbol}")))?;

        Ok(SymbolInfo {
            symbol: raw.symbol,
            base_asset: raw.base_asset,
            quote_asset: raw.quote_asset,
            sts: raw.sts,
            st: raw.st,
            tt: raw.tt,
            min_notional: Decimal::from(5),
        })
    }

    async fn ping(&self) -> ExchangeResult<()> {
        let response = self
            .client
            .get(self.url("/api/v3/ping"))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ExchangeError::Connectivity(format!(
                "ping returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MarketDataFeed for RestExchange {
    async fn current_price(&self, symbol: &str) -> ExchangeResult<Price> {
        Ok(self.get_ticker(symbol).await?.last_price)
    }

    /// Best-effort scan snapshot assembled from ticker and depth.
    ///
    /// Indicator fields default to neutral values when the upstream feed
    /// does not supply them; the scoring formulas handle neutral inputs.
    async fn market_snapshot(&self, symbol: &str) -> ExchangeResult<MarketSnapshot> {
        let raw: RawTicker = self
            .get_json("/api/v3/ticker/24hr", &[("symbol", symbol)])
            .await?;
        let depth: RawDepth = self
            .get_json("/api/v3/depth", &[("symbol", symbol), ("limit", "20")])
            .await?;

        let mut liquidity = 0.0f64;
        for (price, qty) in depth.bids.iter().chain(depth.asks.iter()) {
            let p: f64 = price.parse().unwrap_or(0.0);
            let q: f64 = qty.parse().unwrap_or(0.0);
            liquidity += p * q;
        }

        let price_change: f64 = raw.price_change_percent.parse().unwrap_or(0.0);

        Ok(MarketSnapshot {
            symbol: raw.symbol,
            last_price: Price::new(Self::parse_decimal(&raw.last_price, "lastPrice")?),
            volume_change_pct: 0.0,
            price_change_pct: price_change,
            liquidity_depth_usdt: liquidity,
            rsi: 50.0,
            macd_histogram: 0.0,
            volatility_pct: price_change.abs(),
            taken_at: Utc::now(),
        })
    }
}

/// REST persistence adapter.
///
/// Posts execution history to the storage service's HTTP surface. The
/// schema behind it is out of scope here.
pub struct RestStore {
    client: Client,
    base_url: String,
}

impl RestStore {
    pub fn new(base_url: impl Into<String>) -> ExchangeResult<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ExchangeError::Internal(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl ExecutionStore for RestStore {
    async fn save_execution_record(&self, record: &ExecutionRecord) -> ExchangeResult<String> {
        #[derive(Debug, Deserialize)]
        struct SaveAck {
            id: String,
        }

        let response = self
            .client
            .post(self.url("/executions"))
            .json(record)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExchangeError::Internal(format!(
                "save_execution_record failed: HTTP {status}: {body}"
            )));
        }

        let ack: SaveAck = response
            .json()
            .await
            .map_err(|e| ExchangeError::Internal(format!("failed to parse save ack: {e}")))?;
        Ok(ack.id)
    }

    async fn update_target_status(
        &self,
        target_id: &str,
        status: TargetStatus,
    ) -> ExchangeResult<()> {
        let response = self
            .client
            .patch(self.url(&format!("/targets/{target_id}")))
            .json(&serde_json::json!({ "status": status }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ExchangeError::Internal(format!(
                "update_target_status failed: HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn upsert_position(&self, position: &TradingPosition) -> ExchangeResult<()> {
        let response = self
            .client
            .put(self.url(&format!("/positions/{}", position.id)))
            .json(position)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ExchangeError::Internal(format!(
                "upsert_position failed: HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            RestExchange::map_status(StatusCode::SERVICE_UNAVAILABLE, "down"),
            ExchangeError::Connectivity(_)
        ));
        assert!(matches!(
            RestExchange::map_status(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            ExchangeError::Connectivity(_)
        ));
        assert!(matches!(
            RestExchange::map_status(StatusCode::BAD_REQUEST, "symbol not ready for trading"),
            ExchangeError::SymbolNotReady(_)
        ));
        assert!(matches!(
            RestExchange::map_status(StatusCode::BAD_REQUEST, "insufficient balance"),
            ExchangeError::Rejected(_)
        ));
    }

    #[test]
    fn test_parse_decimal_errors_are_internal() {
        assert!(matches!(
            RestExchange::parse_decimal("abc", "lastPrice"),
            Err(ExchangeError::Internal(_))
        ));
    }
}
