//! Wire-adjacent types for the exchange contracts.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use snipe_core::{OrderSide, OrderType, Price, Qty, TargetId};

/// Order placement request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Qty,
    /// Required for LIMIT and STOP_LIMIT.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Price>,
}

/// Order state reported by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }
}

/// Order placement/query response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Qty,
    /// Fill price for market orders, requested price otherwise.
    pub price: Price,
    pub status: OrderStatus,
    pub filled_qty: Qty,
    pub created_at: DateTime<Utc>,
}

/// 24h ticker for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: Price,
    pub volume_24h: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Symbol metadata, including the exchange's trading-state fields.
///
/// The state triple follows the exchange's listing flow: a freshly
/// announced symbol moves through intermediate values until
/// `sts == 2 && st == 2 && tt == 4`, at which point it is tradable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    /// Symbol trading status.
    pub sts: u8,
    /// State.
    pub st: u8,
    /// Trading type.
    pub tt: u8,
    /// Minimum order notional in quote currency.
    pub min_notional: Decimal,
}

impl SymbolInfo {
    /// Ready-state pattern: sts:2, st:2, tt:4.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.sts == 2 && self.st == 2 && self.tt == 4
    }
}

/// One scan-cycle snapshot of market state for a symbol.
///
/// Inputs to pattern scoring; indicator values are point-in-time reads
/// from the feed, not recomputed by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub last_price: Price,
    /// Volume change vs. the previous window, percent.
    pub volume_change_pct: f64,
    /// Price change over the scan window, percent.
    pub price_change_pct: f64,
    /// Order book depth within 1% of mid, quote currency.
    pub liquidity_depth_usdt: f64,
    /// Relative strength index (0-100).
    pub rsi: f64,
    /// MACD histogram value.
    pub macd_histogram: f64,
    /// Recent realized volatility, percent.
    pub volatility_pct: f64,
    pub taken_at: DateTime<Utc>,
}

/// Durable record of one execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub target_id: Option<TargetId>,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Qty,
    pub price: Price,
    pub order_id: Option<String>,
    pub success: bool,
    pub message: String,
    pub latency_ms: u64,
    pub paper: bool,
    pub executed_at: DateTime<Utc>,
}
