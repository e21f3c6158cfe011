//! Trade executor implementation.
//!
//! Dispatch discipline, in order:
//! 1. halt latch check (emergency stop pre-empts everything)
//! 2. connectivity probe if the last successful probe is stale
//! 3. minimum inter-order spacing (a floor independent of any external
//!    adaptive limiter)
//! 4. bounded-retry dispatch with a per-attempt timeout
//!
//! Every attempt updates the success/failure counters, the rolling latency
//! window, and is persisted through the execution store.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use snipe_core::{
    EngineConfig, EngineEvent, ExecutionLimits, OrderSide, OrderType, Price, Qty, SnipeTarget,
    StrategyMode, TargetId,
};
use snipe_exchange::{
    retry_with_backoff, ExchangeClient, ExchangeError, ExecutionRecord, ExecutionStore,
    MarketDataFeed, OrderRequest, RetryPolicy,
};
use snipe_telemetry::Metrics;

use crate::error::{ExecutorError, ExecutorResult};

/// Rolling latency window size.
const LATENCY_WINDOW: usize = 100;

/// Manual trade request, validated in full before dispatch.
///
/// Side and type arrive as strings from the operator surface; parsing is
/// part of validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualTradeParams {
    pub symbol: String,
    pub side: String,
    pub order_type: String,
    pub quantity: Option<Decimal>,
    /// Order value in quote currency, used when quantity is absent.
    pub quote_notional: Option<Decimal>,
    pub price: Option<Decimal>,
}

/// Outcome of one dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub target_id: Option<TargetId>,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Qty,
    pub price: Price,
    pub order_id: Option<String>,
    pub latency_ms: u64,
    pub paper: bool,
}

/// Executor counters and derived metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorStats {
    pub executed: u64,
    pub failed: u64,
    pub avg_latency_ms: f64,
    pub pending_orders: usize,
}

/// Settings the executor derives from the engine configuration.
#[derive(Debug, Clone)]
struct ExecutorSettings {
    strategy: StrategyMode,
    paper_trading: bool,
    limits: ExecutionLimits,
}

/// Mutable dispatch state. Never held across an await point.
struct ExecState {
    /// Reserved time of the next allowed dispatch (rate floor).
    next_dispatch_at: Option<Instant>,
    /// Last successful connectivity probe.
    last_probe: Option<Instant>,
    /// Rolling window of dispatch latencies.
    latencies_ms: VecDeque<u64>,
    /// Orders accepted but not terminal: order_id -> symbol.
    pending_orders: HashMap<String, String>,
}

/// Validates and dispatches orders against the exchange.
pub struct TradeExecutor {
    exchange: Arc<dyn ExchangeClient>,
    feed: Arc<dyn MarketDataFeed>,
    store: Arc<dyn ExecutionStore>,
    events: mpsc::Sender<EngineEvent>,
    settings: RwLock<ExecutorSettings>,
    state: Mutex<ExecState>,
    halted: AtomicBool,
    executed: AtomicU64,
    failed: AtomicU64,
}

impl TradeExecutor {
    #[must_use]
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        feed: Arc<dyn MarketDataFeed>,
        store: Arc<dyn ExecutionStore>,
        events: mpsc::Sender<EngineEvent>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            exchange,
            feed,
            store,
            events,
            settings: RwLock::new(ExecutorSettings {
                strategy: config.strategy,
                paper_trading: config.paper_trading,
                limits: config.executor.clone(),
            }),
            state: Mutex::new(ExecState {
                next_dispatch_at: None,
                last_probe: None,
                latencies_ms: VecDeque::with_capacity(LATENCY_WINDOW),
                pending_orders: HashMap::new(),
            }),
            halted: AtomicBool::new(false),
            executed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Adopt updated configuration. Takes effect on the next dispatch.
    pub fn update_config(&self, config: &EngineConfig) {
        let mut settings = self.settings.write();
        settings.strategy = config.strategy;
        settings.paper_trading = config.paper_trading;
        settings.limits = config.executor.clone();
    }

    /// Execute a snipe target: derive order parameters and dispatch.
    ///
    /// Quantity = positionSizeUsdt / current price. Order type is MARKET
    /// for the aggressive strategy, otherwise LIMIT at a small discount to
    /// the current price.
    pub async fn execute_snipe_target(
        &self,
        target: &SnipeTarget,
    ) -> ExecutorResult<ExecutionReport> {
        target
            .validate()
            .map_err(|e| ExecutorError::Validation(e.to_string()))?;

        let (strategy, limits) = {
            let settings = self.settings.read();
            (settings.strategy, settings.limits.clone())
        };

        let price = self.fetch_price(&target.symbol, &limits).await?;
        if !price.is_positive() {
            return Err(ExecutorError::Execution(format!(
                "no positive price for {}",
                target.symbol
            )));
        }

        let quantity = Qty::new((target.position_size_usdt / price.inner()).round_dp(6));
        let (order_type, limit_price) = match strategy {
            StrategyMode::Aggressive => (OrderType::Market, None),
            _ => {
                let discounted =
                    Price::new(price.inner() * (Decimal::ONE - limits.limit_discount));
                (OrderType::Limit, Some(discounted))
            }
        };

        let request = OrderRequest {
            symbol: target.symbol.clone(),
            side: OrderSide::Buy,
            order_type,
            quantity,
            price: limit_price,
        };

        self.dispatch(Some(target.id), request).await
    }

    /// Execute a manually requested trade. Full parameter validation
    /// happens first; validation failures are returned immediately and
    /// never retried.
    pub async fn execute_manual_trade(
        &self,
        params: &ManualTradeParams,
    ) -> ExecutorResult<ExecutionReport> {
        let (side, order_type) = Self::validate_manual(params)?;

        let limits = self.settings.read().limits.clone();
        let quantity = match params.quantity {
            Some(qty) => Qty::new(qty),
            None => {
                // quote_notional is present (validated above); price it out
                let notional = params.quote_notional.unwrap_or(Decimal::ZERO);
                let price = match params.price {
                    Some(p) => Price::new(p),
                    None => self.fetch_price(&params.symbol, &limits).await?,
                };
                if !price.is_positive() {
                    return Err(ExecutorError::Execution(format!(
                        "no positive price for {}",
                        params.symbol
                    )));
                }
                Qty::new((notional / price.inner()).round_dp(6))
            }
        };

        let request = OrderRequest {
            symbol: params.symbol.clone(),
            side,
            order_type,
            quantity,
            price: params.price.map(Price::new),
        };

        self.dispatch(None, request).await
    }

    /// Parameter validation for manual trades.
    fn validate_manual(params: &ManualTradeParams) -> ExecutorResult<(OrderSide, OrderType)> {
        if params.symbol.is_empty() {
            return Err(ExecutorError::Validation("symbol is required".to_string()));
        }
        let side: OrderSide = params
            .side
            .parse()
            .map_err(|_| ExecutorError::Validation("side must be BUY or SELL".to_string()))?;
        let order_type: OrderType = params.order_type.parse().map_err(|_| {
            ExecutorError::Validation("type must be MARKET, LIMIT, or STOP_LIMIT".to_string())
        })?;
        if order_type.requires_price() && params.price.is_none() {
            return Err(ExecutorError::Validation(format!(
                "{order_type} orders require a price"
            )));
        }
        if params.quantity.is_none() && params.quote_notional.is_none() {
            return Err(ExecutorError::Validation(
                "quantity or notional value required".to_string(),
            ));
        }
        if let Some(qty) = params.quantity {
            if qty <= Decimal::ZERO {
                return Err(ExecutorError::Validation(
                    "quantity must be positive".to_string(),
                ));
            }
        }
        if let Some(notional) = params.quote_notional {
            if notional <= Decimal::ZERO {
                return Err(ExecutorError::Validation(
                    "notional value must be positive".to_string(),
                ));
            }
        }
        if let Some(price) = params.price {
            if price <= Decimal::ZERO {
                return Err(ExecutorError::Validation(
                    "price must be positive".to_string(),
                ));
            }
        }
        Ok((side, order_type))
    }

    /// Common dispatch path for snipe and manual orders.
    async fn dispatch(
        &self,
        target_id: Option<TargetId>,
        request: OrderRequest,
    ) -> ExecutorResult<ExecutionReport> {
        if self.halted.load(Ordering::SeqCst) {
            return Err(ExecutorError::Halted);
        }

        let (paper, limits) = {
            let settings = self.settings.read();
            (settings.paper_trading, settings.limits.clone())
        };

        self.ensure_connectivity(&limits).await?;
        self.wait_rate_floor(&limits).await;

        // Halt may have been raised while waiting on the floor
        if self.halted.load(Ordering::SeqCst) {
            return Err(ExecutorError::Halted);
        }

        let started = Instant::now();
        let outcome = if paper {
            self.paper_fill(&request, &limits).await
        } else {
            self.dispatch_live(&request, &limits).await
        };
        let latency_ms = started.elapsed().as_millis() as u64;

        self.record_latency(latency_ms);
        Metrics::execution_latency(latency_ms as f64);

        match outcome {
            Ok((order_id, fill_price, terminal)) => {
                self.executed.fetch_add(1, Ordering::SeqCst);
                Metrics::trade_executed();

                if !terminal {
                    self.state
                        .lock()
                        .pending_orders
                        .insert(order_id.clone(), request.symbol.clone());
                }

                let report = ExecutionReport {
                    target_id,
                    symbol: request.symbol.clone(),
                    side: request.side,
                    order_type: request.order_type,
                    quantity: request.quantity,
                    price: fill_price,
                    order_id: Some(order_id),
                    latency_ms,
                    paper,
                };

                info!(
                    symbol = %report.symbol,
                    order_type = %report.order_type,
                    qty = %report.quantity,
                    price = %report.price,
                    latency_ms,
                    paper,
                    "order dispatched"
                );

                self.persist(&report, true, "filled").await;
                self.publish(&report, true, "filled");
                Ok(report)
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                Metrics::execution_failed(e.class());

                let report = ExecutionReport {
                    target_id,
                    symbol: request.symbol.clone(),
                    side: request.side,
                    order_type: request.order_type,
                    quantity: request.quantity,
                    price: request.price.unwrap_or(Price::ZERO),
                    order_id: None,
                    latency_ms,
                    paper,
                };

                warn!(symbol = %report.symbol, error = %e, latency_ms, "order dispatch failed");

                self.persist(&report, false, &e.to_string()).await;
                self.publish(&report, false, &e.to_string());
                Err(e)
            }
        }
    }

    /// Live dispatch with bounded retry around transient failures.
    async fn dispatch_live(
        &self,
        request: &OrderRequest,
        limits: &ExecutionLimits,
    ) -> ExecutorResult<(String, Price, bool)> {
        let policy = RetryPolicy {
            max_attempts: limits.max_retry_attempts,
            base_delay: Duration::from_millis(limits.retry_base_delay_ms),
            max_delay: Duration::from_millis(limits.retry_max_delay_ms),
        };
        let timeout = Duration::from_millis(limits.order_timeout_ms);
        let timeout_ms = limits.order_timeout_ms;
        let exchange = self.exchange.clone();
        let request = request.clone();

        let response = retry_with_backoff(policy, "place_order", move || {
            let exchange = exchange.clone();
            let request = request.clone();
            async move {
                match tokio::time::timeout(timeout, exchange.place_order(&request)).await {
                    Ok(result) => result,
                    Err(_) => Err(ExchangeError::Timeout(timeout_ms)),
                }
            }
        })
        .await?;

        let terminal = response.status.is_terminal();
        Ok((response.order_id, response.price, terminal))
    }

    /// Paper fill: no order leaves the process.
    async fn paper_fill(
        &self,
        request: &OrderRequest,
        limits: &ExecutionLimits,
    ) -> ExecutorResult<(String, Price, bool)> {
        let price = match request.price {
            Some(p) => p,
            None => self.fetch_price(&request.symbol, limits).await?,
        };
        debug!(symbol = %request.symbol, %price, "paper fill");
        Ok((format!("paper-{}", request.symbol.to_ascii_lowercase()), price, true))
    }

    /// Re-probe connectivity when the last successful probe is stale.
    async fn ensure_connectivity(&self, limits: &ExecutionLimits) -> ExecutorResult<()> {
        let ttl = Duration::from_secs(limits.connectivity_ttl_secs);
        let fresh = self
            .state
            .lock()
            .last_probe
            .map(|at| at.elapsed() < ttl)
            .unwrap_or(false);
        if fresh {
            return Ok(());
        }

        let timeout = Duration::from_millis(limits.order_timeout_ms);
        match tokio::time::timeout(timeout, self.exchange.ping()).await {
            Ok(Ok(())) => {
                self.state.lock().last_probe = Some(Instant::now());
                Ok(())
            }
            Ok(Err(e)) => Err(ExecutorError::Connectivity(format!(
                "connectivity probe failed: {e}"
            ))),
            Err(_) => Err(ExecutorError::Connectivity(
                "connectivity probe timed out".to_string(),
            )),
        }
    }

    /// Reserve the next dispatch slot and sleep until it opens.
    ///
    /// Reservation happens under the lock so concurrent dispatches space
    /// out rather than racing through together.
    async fn wait_rate_floor(&self, limits: &ExecutionLimits) {
        let spacing = Duration::from_millis(limits.min_order_spacing_ms);
        let wait = {
            let mut state = self.state.lock();
            let now = Instant::now();
            let slot = match state.next_dispatch_at {
                Some(at) if at > now => at,
                _ => now,
            };
            state.next_dispatch_at = Some(slot + spacing);
            slot.saturating_duration_since(now)
        };
        if !wait.is_zero() {
            debug!(wait_ms = wait.as_millis() as u64, "rate floor wait");
            tokio::time::sleep(wait).await;
        }
    }

    async fn fetch_price(
        &self,
        symbol: &str,
        limits: &ExecutionLimits,
    ) -> ExecutorResult<Price> {
        let timeout = Duration::from_millis(limits.order_timeout_ms);
        match tokio::time::timeout(timeout, self.feed.current_price(symbol)).await {
            Ok(Ok(price)) => Ok(price),
            Ok(Err(e)) => Err(ExecutorError::from(e)),
            Err(_) => Err(ExecutorError::Connectivity(format!(
                "price fetch for {symbol} timed out"
            ))),
        }
    }

    fn record_latency(&self, latency_ms: u64) {
        let mut state = self.state.lock();
        if state.latencies_ms.len() == LATENCY_WINDOW {
            state.latencies_ms.pop_front();
        }
        state.latencies_ms.push_back(latency_ms);
    }

    async fn persist(&self, report: &ExecutionReport, success: bool, message: &str) {
        let record = ExecutionRecord {
            target_id: report.target_id,
            symbol: report.symbol.clone(),
            side: report.side,
            order_type: report.order_type,
            quantity: report.quantity,
            price: report.price,
            order_id: report.order_id.clone(),
            success,
            message: message.to_string(),
            latency_ms: report.latency_ms,
            paper: report.paper,
            executed_at: chrono::Utc::now(),
        };
        if let Err(e) = self.store.save_execution_record(&record).await {
            warn!(symbol = %report.symbol, error = %e, "failed to persist execution record");
        }
    }

    fn publish(&self, report: &ExecutionReport, success: bool, message: &str) {
        let event = EngineEvent::TradeExecuted {
            target_id: report.target_id,
            symbol: report.symbol.clone(),
            success,
            order_id: report.order_id.clone(),
            latency_ms: report.latency_ms,
            message: message.to_string(),
        };
        if self.events.try_send(event).is_err() {
            warn!("event channel full, dropping trade_executed event");
        }
    }

    /// Cancel every tracked pending order. Returns how many cancels were
    /// acknowledged. Per-order failures are logged and skipped.
    pub async fn cancel_all_pending_orders(&self) -> usize {
        let pending: Vec<(String, String)> = {
            let mut state = self.state.lock();
            state.pending_orders.drain().collect()
        };

        let mut cancelled = 0;
        for (order_id, symbol) in pending {
            match self.exchange.cancel_order(&symbol, &order_id).await {
                Ok(()) => cancelled += 1,
                Err(e) => {
                    warn!(%order_id, %symbol, error = %e, "failed to cancel pending order");
                }
            }
        }
        if cancelled > 0 {
            info!(cancelled, "cancelled pending orders");
        }
        cancelled
    }

    /// Hard stop: latch the halt flag and cancel everything pending. The
    /// rate floor does not apply to this path.
    pub async fn emergency_stop(&self) -> usize {
        self.halted.store(true, Ordering::SeqCst);
        self.cancel_all_pending_orders().await
    }

    /// Clear the halt latch (re-initialization path).
    pub fn reset(&self) {
        self.halted.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Counters and rolling average latency.
    #[must_use]
    pub fn stats(&self) -> ExecutorStats {
        let state = self.state.lock();
        let avg = if state.latencies_ms.is_empty() {
            0.0
        } else {
            state.latencies_ms.iter().sum::<u64>() as f64 / state.latencies_ms.len() as f64
        };
        ExecutorStats {
            executed: self.executed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            avg_latency_ms: avg,
            pending_orders: state.pending_orders.len(),
        }
    }
}
