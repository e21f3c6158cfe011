//! Capability traits consumed by the core.
//!
//! Each trait is a narrow contract (§ external interfaces): the core never
//! sees wire formats or authentication, only success/data-or-error results.

use async_trait::async_trait;
use rust_decimal::Decimal;

use snipe_core::{Price, TargetStatus, TradingPosition};

use crate::error::ExchangeResult;
use crate::types::{
    ExecutionRecord, MarketSnapshot, OrderRequest, OrderResponse, SymbolInfo, Ticker,
};

/// Exchange trading API.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Place an order. The response carries the exchange order id and status.
    async fn place_order(&self, request: &OrderRequest) -> ExchangeResult<OrderResponse>;

    /// Cancel a previously placed order.
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> ExchangeResult<()>;

    /// Query the current state of an order.
    async fn query_order(&self, symbol: &str, order_id: &str) -> ExchangeResult<OrderResponse>;

    /// Free balance of a single asset.
    async fn get_balance(&self, asset: &str) -> ExchangeResult<Decimal>;

    /// 24h ticker for a symbol.
    async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Ticker>;

    /// Symbol metadata including trading-state fields.
    async fn get_symbol_info(&self, symbol: &str) -> ExchangeResult<SymbolInfo>;

    /// Connectivity probe. Success means the exchange answered.
    async fn ping(&self) -> ExchangeResult<()>;
}

/// Market data feed. Push or poll behind the scenes; the core only needs
/// "current price for symbol" and a scan snapshot.
#[async_trait]
pub trait MarketDataFeed: Send + Sync {
    async fn current_price(&self, symbol: &str) -> ExchangeResult<Price>;

    async fn market_snapshot(&self, symbol: &str) -> ExchangeResult<MarketSnapshot>;
}

/// Durable storage for execution history and row updates.
///
/// Schema and migrations are out of scope; this is the whole contract.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Persist one execution attempt. Returns the record id.
    async fn save_execution_record(&self, record: &ExecutionRecord) -> ExchangeResult<String>;

    /// Update the status of a stored target row.
    async fn update_target_status(
        &self,
        target_id: &str,
        status: TargetStatus,
    ) -> ExchangeResult<()>;

    /// Upsert a position row.
    async fn upsert_position(&self, position: &TradingPosition) -> ExchangeResult<()>;
}
