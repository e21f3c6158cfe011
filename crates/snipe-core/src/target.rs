//! Snipe targets and their status lifecycle.
//!
//! A target is a symbol flagged as a near-term trading opportunity awaiting
//! execution. Status moves forward monotonically through
//! `Pending -> Ready -> Executing -> Completed | Failed`; `Cancelled` is
//! reachable from any non-terminal state.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Unique target identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(pub Uuid);

impl TargetId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TargetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Target execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    Pending,
    Ready,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl TargetStatus {
    /// Position in the forward order. `Cancelled` sits outside the chain.
    fn ordinal(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Ready => 1,
            Self::Executing => 2,
            Self::Completed => 3,
            Self::Failed => 3,
            Self::Cancelled => 4,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Check whether a transition to `next` is allowed.
    ///
    /// Forward moves only; cancel allowed from any non-terminal state.
    #[must_use]
    pub fn can_transition(&self, next: TargetStatus) -> bool {
        if *self == next {
            return false;
        }
        if next == Self::Cancelled {
            return !self.is_terminal();
        }
        !self.is_terminal() && next.ordinal() > self.ordinal()
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// A symbol flagged for near-term execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnipeTarget {
    /// Unique identifier.
    pub id: TargetId,
    /// Exchange symbol (e.g., "NEWUSDT").
    pub symbol: String,
    /// Desired position size in quote currency.
    pub position_size_usdt: Decimal,
    /// Confidence score from pattern analysis (0-100).
    pub confidence_score: f64,
    /// Stop-loss distance as a fraction of entry price.
    pub stop_loss_pct: Decimal,
    /// Scheduling priority (lower = sooner).
    pub priority: u8,
    /// Current lifecycle status.
    pub status: TargetStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl SnipeTarget {
    /// Create a new pending target.
    #[must_use]
    pub fn new(
        symbol: impl Into<String>,
        position_size_usdt: Decimal,
        confidence_score: f64,
        stop_loss_pct: Decimal,
    ) -> Self {
        Self {
            id: TargetId::new(),
            symbol: symbol.into(),
            position_size_usdt,
            confidence_score,
            stop_loss_pct,
            priority: 5,
            status: TargetStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Validate field ranges.
    pub fn validate(&self) -> CoreResult<()> {
        if self.symbol.is_empty() {
            return Err(CoreError::InvalidTarget("symbol is empty".to_string()));
        }
        if self.position_size_usdt <= Decimal::ZERO {
            return Err(CoreError::InvalidTarget(
                "position size must be positive".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.confidence_score) {
            return Err(CoreError::InvalidTarget(format!(
                "confidence score out of range: {}",
                self.confidence_score
            )));
        }
        if self.stop_loss_pct < Decimal::ZERO || self.stop_loss_pct >= Decimal::ONE {
            return Err(CoreError::InvalidTarget(
                "stop loss must be a fraction in [0, 1)".to_string(),
            ));
        }
        Ok(())
    }

    /// Advance to a new status, enforcing the forward-monotonic order.
    pub fn transition(&mut self, next: TargetStatus) -> CoreResult<()> {
        if !self.status.can_transition(next) {
            return Err(CoreError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}
