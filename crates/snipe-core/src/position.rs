//! Trading position types.
//!
//! Positions are owned exclusively by the position monitor: created on a
//! confirmed fill, mutated on each monitor tick while open, frozen on close.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::decimal::{Price, Qty};
use crate::order::OrderSide;
use crate::config::StrategyMode;

/// Unique position identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionId(pub Uuid);

impl PositionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PositionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    StopLoss,
    TakeProfit,
    Manual,
    Shutdown,
    EmergencyStop,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::StopLoss => "stop_loss",
            Self::TakeProfit => "take_profit",
            Self::Manual => "manual",
            Self::Shutdown => "shutdown",
            Self::EmergencyStop => "emergency_stop",
        };
        write!(f, "{s}")
    }
}

/// An open or closed trading position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingPosition {
    pub id: PositionId,
    pub symbol: String,
    pub side: OrderSide,
    /// Base-asset amount (always positive).
    pub amount: Qty,
    pub entry_price: Price,
    /// Latest mark price.
    pub current_price: Price,
    /// Exit trigger: close when mark crosses this level against the position.
    pub stop_loss: Price,
    /// Exit trigger: close when mark crosses this level in favor.
    pub take_profit: Option<Price>,
    /// Mark-to-market PnL while open.
    pub unrealized_pnl: Decimal,
    /// PnL locked in at close; zero while open.
    pub realized_pnl: Decimal,
    pub status: PositionStatus,
    /// Strategy mode active when the position was opened.
    pub strategy: StrategyMode,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub close_reason: Option<CloseReason>,
}

impl TradingPosition {
    /// Create a new open position from a confirmed fill.
    #[must_use]
    pub fn new(
        symbol: impl Into<String>,
        side: OrderSide,
        amount: Qty,
        entry_price: Price,
        stop_loss: Price,
        take_profit: Option<Price>,
        strategy: StrategyMode,
    ) -> Self {
        Self {
            id: PositionId::new(),
            symbol: symbol.into(),
            side,
            amount,
            entry_price,
            current_price: entry_price,
            stop_loss,
            take_profit,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            status: PositionStatus::Open,
            strategy,
            opened_at: Utc::now(),
            closed_at: None,
            close_reason: None,
        }
    }

    /// Entry notional in quote currency.
    #[must_use]
    pub fn entry_notional(&self) -> Decimal {
        self.amount.notional(self.entry_price)
    }

    /// Signed PnL at a given mark price.
    ///
    /// BUY: (mark - entry) * amount; SELL: (entry - mark) * amount.
    #[must_use]
    pub fn pnl_at(&self, mark: Price) -> Decimal {
        match self.side {
            OrderSide::Buy => (mark.inner() - self.entry_price.inner()) * self.amount.inner(),
            OrderSide::Sell => (self.entry_price.inner() - mark.inner()) * self.amount.inner(),
        }
    }

    /// PnL as a percentage of entry notional. Zero when entry notional is zero.
    #[must_use]
    pub fn pnl_pct(&self) -> Decimal {
        let notional = self.entry_notional();
        if notional.is_zero() {
            return Decimal::ZERO;
        }
        self.unrealized_pnl / notional * Decimal::from(100)
    }

    /// Apply a fresh mark price and recompute unrealized PnL.
    pub fn apply_mark(&mut self, mark: Price) {
        self.current_price = mark;
        self.unrealized_pnl = self.pnl_at(mark);
    }

    /// Freeze the position at an exit price.
    pub fn close(&mut self, exit_price: Price, reason: CloseReason) {
        self.current_price = exit_price;
        self.realized_pnl = self.pnl_at(exit_price);
        self.unrealized_pnl = Decimal::ZERO;
        self.status = PositionStatus::Closed;
        self.closed_at = Some(Utc::now());
        self.close_reason = Some(reason);
    }

    /// Time the position has been (or was) held.
    #[must_use]
    pub fn hold_time(&self) -> chrono::Duration {
        let end = self.closed_at.unwrap_or_else(Utc::now);
        end - self.opened_at
    }
}
