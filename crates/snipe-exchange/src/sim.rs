//! Deterministic in-memory exchange for tests and paper trading.
//!
//! No randomness: prices and indicator snapshots are whatever the caller
//! scripts, orders fill instantly at the scripted price, and failures are
//! injected explicitly. The scoring and order-preparation code paths see
//! exactly the same contract as production.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;

use snipe_core::{Price, Qty, TargetStatus, TradingPosition};

use crate::error::{ExchangeError, ExchangeResult};
use crate::traits::{ExchangeClient, ExecutionStore, MarketDataFeed};
use crate::types::{
    ExecutionRecord, MarketSnapshot, OrderRequest, OrderResponse, OrderStatus, SymbolInfo, Ticker,
};

/// Scripted, deterministic exchange + feed + store.
#[derive(Default)]
pub struct SimExchange {
    prices: DashMap<String, Price>,
    snapshots: DashMap<String, MarketSnapshot>,
    symbols: DashMap<String, SymbolInfo>,
    balances: DashMap<String, Decimal>,
    /// Symbol -> remaining dispatches that report not-ready.
    not_ready: DashMap<String, u32>,
    /// Orders accepted but scripted to stay open (cancel targets).
    open_orders: DashMap<String, OrderResponse>,
    records: RwLock<Vec<ExecutionRecord>>,
    target_updates: RwLock<Vec<(String, TargetStatus)>>,
    position_upserts: RwLock<Vec<TradingPosition>>,
    offline: AtomicBool,
    reject_next: RwLock<Option<String>>,
    /// When set, LIMIT orders rest on the book instead of filling.
    resting_limits: AtomicBool,
    order_seq: AtomicU64,
}

impl SimExchange {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the current price for a symbol. Also refreshes the snapshot
    /// price if one exists.
    pub fn set_price(&self, symbol: &str, price: Price) {
        self.prices.insert(symbol.to_string(), price);
        if let Some(mut snap) = self.snapshots.get_mut(symbol) {
            snap.last_price = price;
        }
    }

    /// Script the full scan snapshot for a symbol.
    pub fn set_snapshot(&self, snapshot: MarketSnapshot) {
        self.prices
            .insert(snapshot.symbol.clone(), snapshot.last_price);
        self.snapshots.insert(snapshot.symbol.clone(), snapshot);
    }

    /// Neutral snapshot helper: flat market at the given price.
    #[must_use]
    pub fn neutral_snapshot(symbol: &str, price: Price) -> MarketSnapshot {
        MarketSnapshot {
            symbol: symbol.to_string(),
            last_price: price,
            volume_change_pct: 0.0,
            price_change_pct: 0.0,
            liquidity_depth_usdt: 50_000.0,
            rsi: 50.0,
            macd_histogram: 0.0,
            volatility_pct: 2.0,
            taken_at: Utc::now(),
        }
    }

    pub fn set_balance(&self, asset: &str, amount: Decimal) {
        self.balances.insert(asset.to_string(), amount);
    }

    /// Register a symbol in ready state (sts:2, st:2, tt:4).
    pub fn list_symbol(&self, symbol: &str) {
        let (base, quote) = symbol
            .strip_suffix("USDT")
            .map(|b| (b.to_string(), "USDT".to_string()))
            .unwrap_or_else(|| (symbol.to_string(), String::new()));
        self.symbols.insert(
            symbol.to_string(),
            SymbolInfo {
                symbol: symbol.to_string(),
                base_asset: base,
                quote_asset: quote,
                sts: 2,
                st: 2,
                tt: 4,
                min_notional: Decimal::from(5),
            },
        );
    }

    /// Make the next `count` dispatches for `symbol` report not-ready.
    pub fn delay_symbol_ready(&self, symbol: &str, count: u32) {
        self.not_ready.insert(symbol.to_string(), count);
    }

    /// Take the exchange offline (connectivity failures everywhere).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Reject the next order with the given reason.
    pub fn reject_next_order(&self, reason: &str) {
        *self.reject_next.write() = Some(reason.to_string());
    }

    /// Script an order that stays open so cancel paths have work to do.
    pub fn add_open_order(&self, order: OrderResponse) {
        self.open_orders.insert(order.order_id.clone(), order);
    }

    /// When enabled, LIMIT orders rest on the book (status `New`) instead
    /// of filling immediately.
    pub fn set_resting_limits(&self, resting: bool) {
        self.resting_limits.store(resting, Ordering::SeqCst);
    }

    /// Number of orders currently open.
    #[must_use]
    pub fn open_order_count(&self) -> usize {
        self.open_orders.len()
    }

    /// Execution records saved so far.
    #[must_use]
    pub fn saved_records(&self) -> Vec<ExecutionRecord> {
        self.records.read().clone()
    }

    /// Target status updates saved so far.
    #[must_use]
    pub fn saved_target_updates(&self) -> Vec<(String, TargetStatus)> {
        self.target_updates.read().clone()
    }

    fn check_online(&self) -> ExchangeResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ExchangeError::Connectivity(
                "simulated exchange offline".to_string(),
            ));
        }
        Ok(())
    }

    fn price_of(&self, symbol: &str) -> ExchangeResult<Price> {
        self.prices
            .get(symbol)
            .map(|p| *p)
            .ok_or_else(|| ExchangeError::NotFound(format!("no price for {symbol}")))
    }
}

#[async_trait]
impl ExchangeClient for SimExchange {
    async fn place_order(&self, request: &OrderRequest) -> ExchangeResult<OrderResponse> {
        self.check_online()?;

        if let Some(reason) = self.reject_next.write().take() {
            return Err(ExchangeError::Rejected(reason));
        }

        if let Some(mut remaining) = self.not_ready.get_mut(&request.symbol) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ExchangeError::SymbolNotReady(request.symbol.clone()));
            }
        }

        let mark = self.price_of(&request.symbol)?;
        let fill_price = request.price.unwrap_or(mark);
        let seq = self.order_seq.fetch_add(1, Ordering::SeqCst);

        let rests = request.price.is_some() && self.resting_limits.load(Ordering::SeqCst);
        let response = OrderResponse {
            order_id: format!("sim-{seq}"),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            quantity: request.quantity,
            price: fill_price,
            status: if rests {
                OrderStatus::New
            } else {
                OrderStatus::Filled
            },
            filled_qty: if rests { Qty::ZERO } else { request.quantity },
            created_at: Utc::now(),
        };

        if rests {
            self.open_orders
                .insert(response.order_id.clone(), response.clone());
        }
        Ok(response)
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> ExchangeResult<()> {
        self.check_online()?;
        self.open_orders.remove(order_id);
        Ok(())
    }

    async fn query_order(&self, _symbol: &str, order_id: &str) -> ExchangeResult<OrderResponse> {
        self.check_online()?;
        self.open_orders
            .get(order_id)
            .map(|o| o.clone())
            .ok_or_else(|| ExchangeError::NotFound(format!("order {order_id}")))
    }

    async fn get_balance(&self, asset: &str) -> ExchangeResult<Decimal> {
        self.check_online()?;
        Ok(self.balances.get(asset).map(|b| *b).unwrap_or(Decimal::ZERO))
    }

    async fn get_ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
        self.check_online()?;
        let price = self.price_of(symbol)?;
        Ok(Ticker {
            symbol: symbol.to_string(),
            last_price: price,
            volume_24h: Decimal::ZERO,
            timestamp: Utc::now(),
        })
    }

    async fn get_symbol_info(&self, symbol: &str) -> ExchangeResult<SymbolInfo> {
        self.check_online()?;
        self.symbols
            .get(symbol)
            .map(|s| s.clone())
            .ok_or_else(|| ExchangeError::NotFound(format!("symbol {symbol}")))
    }

    async fn ping(&self) -> ExchangeResult<()> {
        self.check_online()
    }
}

#[async_trait]
impl MarketDataFeed for SimExchange {
    async fn current_price(&self, symbol: &str) -> ExchangeResult<Price> {
        self.check_online()?;
        self.price_of(symbol)
    }

    async fn market_snapshot(&self, symbol: &str) -> ExchangeResult<MarketSnapshot> {
        self.check_online()?;
        self.snapshots
            .get(symbol)
            .map(|s| s.clone())
            .ok_or_else(|| ExchangeError::NotFound(format!("no snapshot for {symbol}")))
    }
}

#[async_trait]
impl ExecutionStore for SimExchange {
    async fn save_execution_record(&self, record: &ExecutionRecord) -> ExchangeResult<String> {
        let mut records = self.records.write();
        records.push(record.clone());
        Ok(format!("rec-{}", records.len()))
    }

    async fn update_target_status(
        &self,
        target_id: &str,
        status: TargetStatus,
    ) -> ExchangeResult<()> {
        self.target_updates
            .write()
            .push((target_id.to_string(), status));
        Ok(())
    }

    async fn upsert_position(&self, position: &TradingPosition) -> ExchangeResult<()> {
        self.position_upserts.write().push(position.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use snipe_core::{OrderSide, OrderType, Qty};

    fn buy_order(symbol: &str) -> OrderRequest {
        OrderRequest {
            symbol: symbol.to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            quantity: Qty::new(dec!(10)),
            price: None,
        }
    }

    #[tokio::test]
    async fn test_order_fills_at_scripted_price() {
        let sim = SimExchange::new();
        sim.set_price("NEWUSDT", Price::new(dec!(2.5)));

        let response = sim.place_order(&buy_order("NEWUSDT")).await.unwrap();
        assert_eq!(response.status, OrderStatus::Filled);
        assert_eq!(response.price, Price::new(dec!(2.5)));
        assert_eq!(response.filled_qty, Qty::new(dec!(10)));
    }

    #[tokio::test]
    async fn test_offline_reports_connectivity() {
        let sim = SimExchange::new();
        sim.set_price("NEWUSDT", Price::new(dec!(1)));
        sim.set_offline(true);

        assert!(matches!(
            sim.ping().await,
            Err(ExchangeError::Connectivity(_))
        ));
        assert!(matches!(
            sim.place_order(&buy_order("NEWUSDT")).await,
            Err(ExchangeError::Connectivity(_))
        ));
    }

    #[tokio::test]
    async fn test_not_ready_decrements() {
        let sim = SimExchange::new();
        sim.set_price("NEWUSDT", Price::new(dec!(1)));
        sim.delay_symbol_ready("NEWUSDT", 2);

        assert!(matches!(
            sim.place_order(&buy_order("NEWUSDT")).await,
            Err(ExchangeError::SymbolNotReady(_))
        ));
        assert!(matches!(
            sim.place_order(&buy_order("NEWUSDT")).await,
            Err(ExchangeError::SymbolNotReady(_))
        ));
        assert!(sim.place_order(&buy_order("NEWUSDT")).await.is_ok());
    }

    #[tokio::test]
    async fn test_reject_next_is_one_shot() {
        let sim = SimExchange::new();
        sim.set_price("NEWUSDT", Price::new(dec!(1)));
        sim.reject_next_order("insufficient balance");

        assert!(matches!(
            sim.place_order(&buy_order("NEWUSDT")).await,
            Err(ExchangeError::Rejected(_))
        ));
        assert!(sim.place_order(&buy_order("NEWUSDT")).await.is_ok());
    }

    #[tokio::test]
    async fn test_records_accumulate() {
        let sim = SimExchange::new();
        let record = ExecutionRecord {
            target_id: None,
            symbol: "NEWUSDT".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            quantity: Qty::new(dec!(1)),
            price: Price::new(dec!(1)),
            order_id: Some("sim-0".to_string()),
            success: true,
            message: "filled".to_string(),
            latency_ms: 3,
            paper: false,
            executed_at: Utc::now(),
        };

        let id = sim.save_execution_record(&record).await.unwrap();
        assert_eq!(id, "rec-1");
        assert_eq!(sim.saved_records().len(), 1);
    }
}
