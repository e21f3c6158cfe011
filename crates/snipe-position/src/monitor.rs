//! Position monitor implementation.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use snipe_core::{
    CloseReason, EngineConfig, EngineEvent, OrderSide, PositionId, Price, TradingPosition,
};
use snipe_exchange::MarketDataFeed;
use snipe_telemetry::Metrics;

use crate::error::{PositionError, PositionResult};

/// Closed positions retained for derived metrics.
const CLOSED_HISTORY_CAP: usize = 256;

/// Absolute PnL percentage considered a significant move. Audit-only:
/// logged, never acted on.
const SIGNIFICANT_MOVE_PCT: Decimal = Decimal::TEN;

/// Derived, read-only metrics over the position set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionStats {
    pub open: usize,
    pub closed: usize,
    pub realized_pnl_total: Decimal,
    pub unrealized_pnl_total: Decimal,
    /// Running maximum of (peak cumulative PnL - current cumulative PnL).
    pub max_drawdown: Decimal,
    /// Fraction of closed positions with positive realized PnL.
    pub win_rate: f64,
    /// Mean realized PnL over its standard deviation (rolling window of
    /// the closed history). Zero when fewer than two closes.
    pub risk_adjusted_return: f64,
    pub avg_hold_secs: f64,
}

struct MonitorState {
    open: HashMap<PositionId, TradingPosition>,
    closed: VecDeque<TradingPosition>,
    realized_pnl_total: Decimal,
    peak_pnl: Decimal,
    max_drawdown: Decimal,
}

/// Owns open/closed position state and evaluates exit triggers.
pub struct PositionMonitor {
    feed: Arc<dyn MarketDataFeed>,
    events: mpsc::Sender<EngineEvent>,
    max_concurrent: RwLock<usize>,
    state: RwLock<MonitorState>,
}

impl PositionMonitor {
    #[must_use]
    pub fn new(
        feed: Arc<dyn MarketDataFeed>,
        events: mpsc::Sender<EngineEvent>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            feed,
            events,
            max_concurrent: RwLock::new(config.max_concurrent_positions),
            state: RwLock::new(MonitorState {
                open: HashMap::new(),
                closed: VecDeque::with_capacity(CLOSED_HISTORY_CAP),
                realized_pnl_total: Decimal::ZERO,
                peak_pnl: Decimal::ZERO,
                max_drawdown: Decimal::ZERO,
            }),
        }
    }

    /// Adopt updated configuration. An already-exceeded cap never closes
    /// positions; it only blocks new ones.
    pub fn update_config(&self, config: &EngineConfig) {
        *self.max_concurrent.write() = config.max_concurrent_positions;
    }

    /// Take ownership of a new position.
    ///
    /// Rejects when the global position-count cap is reached or the id is
    /// already tracked.
    pub fn add_position(&self, position: TradingPosition) -> PositionResult<()> {
        let cap = *self.max_concurrent.read();
        let mut state = self.state.write();

        if state.open.len() >= cap {
            return Err(PositionError::LimitReached(cap));
        }
        if state.open.contains_key(&position.id) {
            return Err(PositionError::Duplicate(position.id));
        }

        info!(
            position_id = %position.id,
            symbol = %position.symbol,
            side = %position.side,
            entry = %position.entry_price,
            qty = %position.amount,
            "position opened"
        );

        state.open.insert(position.id, position.clone());
        Metrics::open_positions(state.open.len());
        drop(state);

        if self
            .events
            .try_send(EngineEvent::PositionOpened { position })
            .is_err()
        {
            warn!("event channel full, dropping position_opened event");
        }
        Ok(())
    }

    /// Close a position at its current mark through the common close path.
    ///
    /// Realized PnL = exit value - entry value over the position's
    /// notional. Updates running totals and the high-water-mark drawdown
    /// tracker, then moves the position to the bounded closed history.
    pub fn close_position(
        &self,
        id: PositionId,
        reason: CloseReason,
    ) -> PositionResult<TradingPosition> {
        let mut state = self.state.write();
        let mut position = state.open.remove(&id).ok_or(PositionError::NotFound(id))?;

        let exit_price = position.current_price;
        position.close(exit_price, reason);

        state.realized_pnl_total += position.realized_pnl;
        let current = state.realized_pnl_total;
        if current > state.peak_pnl {
            state.peak_pnl = current;
        }
        let drawdown = state.peak_pnl - current;
        if drawdown > state.max_drawdown {
            state.max_drawdown = drawdown;
        }

        if state.closed.len() == CLOSED_HISTORY_CAP {
            state.closed.pop_front();
        }
        state.closed.push_back(position.clone());
        Metrics::open_positions(state.open.len());
        drop(state);

        info!(
            position_id = %position.id,
            symbol = %position.symbol,
            reason = %reason,
            realized_pnl = %position.realized_pnl,
            "position closed"
        );

        if self
            .events
            .try_send(EngineEvent::PositionClosed {
                position_id: position.id,
                symbol: position.symbol.clone(),
                reason,
                realized_pnl: position.realized_pnl,
            })
            .is_err()
        {
            warn!("event channel full, dropping position_closed event");
        }

        Ok(position)
    }

    /// Close every open position. Used by `stop()` and the emergency path.
    pub fn close_all(&self, reason: CloseReason) -> Vec<TradingPosition> {
        let ids: Vec<PositionId> = self.state.read().open.keys().copied().collect();
        let mut closed = Vec::with_capacity(ids.len());
        for id in ids {
            match self.close_position(id, reason) {
                Ok(position) => closed.push(position),
                Err(e) => warn!(position_id = %id, error = %e, "close_all skip"),
            }
        }
        closed
    }

    /// One monitor cycle: refresh marks, recompute unrealized PnL, and
    /// evaluate the two exit triggers. Returns the positions closed this
    /// cycle. Feed failures leave the previous mark in place.
    pub async fn check_positions(&self) -> Vec<TradingPosition> {
        let snapshots: Vec<(PositionId, String)> = self
            .state
            .read()
            .open
            .values()
            .map(|p| (p.id, p.symbol.clone()))
            .collect();

        let mut closed = Vec::new();
        for (id, symbol) in snapshots {
            let mark = match self.feed.current_price(&symbol).await {
                Ok(price) => price,
                Err(e) => {
                    warn!(%symbol, error = %e, "mark refresh failed, keeping previous price");
                    continue;
                }
            };

            let exit = {
                let mut state = self.state.write();
                let Some(position) = state.open.get_mut(&id) else {
                    continue; // closed concurrently
                };
                position.apply_mark(mark);

                let pnl_pct = position.pnl_pct();
                if pnl_pct.abs() > SIGNIFICANT_MOVE_PCT {
                    // Audit-only: never triggers action
                    info!(
                        position_id = %id,
                        %symbol,
                        pnl_pct = %pnl_pct,
                        "significant move"
                    );
                }

                Self::exit_trigger(position, mark)
            };

            if let Some(reason) = exit {
                debug!(position_id = %id, %symbol, %mark, reason = %reason, "exit trigger");
                if let Ok(position) = self.close_position(id, reason) {
                    closed.push(position);
                }
            }
        }
        closed
    }

    /// Evaluate stop-loss and take-profit for a position at a mark.
    ///
    /// BUY: stop when mark <= stop level, take when mark >= target.
    /// SELL: mirrored.
    fn exit_trigger(position: &TradingPosition, mark: Price) -> Option<CloseReason> {
        match position.side {
            OrderSide::Buy => {
                if mark <= position.stop_loss {
                    return Some(CloseReason::StopLoss);
                }
                if let Some(target) = position.take_profit {
                    if mark >= target {
                        return Some(CloseReason::TakeProfit);
                    }
                }
            }
            OrderSide::Sell => {
                if mark >= position.stop_loss {
                    return Some(CloseReason::StopLoss);
                }
                if let Some(target) = position.take_profit {
                    if mark <= target {
                        return Some(CloseReason::TakeProfit);
                    }
                }
            }
        }
        None
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.state.read().open.len()
    }

    #[must_use]
    pub fn open_positions(&self) -> Vec<TradingPosition> {
        self.state.read().open.values().cloned().collect()
    }

    #[must_use]
    pub fn closed_history(&self) -> Vec<TradingPosition> {
        self.state.read().closed.iter().cloned().collect()
    }

    /// Total exposure (entry notional) across open positions.
    #[must_use]
    pub fn open_exposure(&self) -> Decimal {
        self.state
            .read()
            .open
            .values()
            .map(|p| p.entry_notional())
            .sum()
    }

    #[must_use]
    pub fn max_drawdown(&self) -> Decimal {
        self.state.read().max_drawdown
    }

    /// Derived read-only metrics.
    #[must_use]
    pub fn stats(&self) -> PositionStats {
        let state = self.state.read();

        let unrealized: Decimal = state.open.values().map(|p| p.unrealized_pnl).sum();
        let closed_count = state.closed.len();

        let wins = state
            .closed
            .iter()
            .filter(|p| p.realized_pnl > Decimal::ZERO)
            .count();
        let win_rate = if closed_count == 0 {
            0.0
        } else {
            wins as f64 / closed_count as f64
        };

        let avg_hold_secs = if closed_count == 0 {
            0.0
        } else {
            state
                .closed
                .iter()
                .map(|p| p.hold_time().num_milliseconds() as f64 / 1000.0)
                .sum::<f64>()
                / closed_count as f64
        };

        PositionStats {
            open: state.open.len(),
            closed: closed_count,
            realized_pnl_total: state.realized_pnl_total,
            unrealized_pnl_total: unrealized,
            max_drawdown: state.max_drawdown,
            win_rate,
            risk_adjusted_return: Self::risk_adjusted_return(&state.closed),
            avg_hold_secs,
        }
    }

    /// Mean over standard deviation of realized PnL across the closed
    /// window. A rolling-variance form rather than a fixed volatility
    /// proxy; the metric name is load-bearing for downstream consumers.
    fn risk_adjusted_return(closed: &VecDeque<TradingPosition>) -> f64 {
        if closed.len() < 2 {
            return 0.0;
        }
        let returns: Vec<f64> = closed
            .iter()
            .map(|p| p.realized_pnl.to_f64().unwrap_or(0.0))
            .collect();
        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let stddev = variance.sqrt();
        if stddev == 0.0 {
            return 0.0;
        }
        mean / stddev
    }
}
