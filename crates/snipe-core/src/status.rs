//! Engine status snapshots and the uniform operation result.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::StrategyMode;

/// Orchestrator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Created,
    Initialized,
    Running,
    Stopped,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Health reported by status/metrics endpoints.
///
/// Always derivable, even when a module is degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Operational,
    Degraded,
    Offline,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Operational => "operational",
            Self::Degraded => "degraded",
            Self::Offline => "offline",
        };
        write!(f, "{s}")
    }
}

/// Best-effort snapshot of engine state and counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub state: EngineState,
    pub health: HealthState,
    pub strategy: StrategyMode,
    pub paper_trading: bool,
    pub open_positions: usize,
    pub executed_trades: u64,
    pub failed_executions: u64,
    pub safety_violations: u64,
    /// Last composite risk score, if a safety cycle has run.
    pub risk_score: Option<f64>,
    /// Total realized PnL across closed positions.
    pub realized_pnl: Decimal,
    pub taken_at: DateTime<Utc>,
}

/// Uniform return value of every public orchestrator operation.
///
/// Expected failures come back as `success: false`; faults are reserved
/// for programmer misuse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
    pub status: Option<StatusSnapshot>,
}

impl OperationResult {
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            status: None,
        }
    }

    #[must_use]
    pub fn ok_with(message: impl Into<String>, status: StatusSnapshot) -> Self {
        Self {
            success: true,
            message: message.into(),
            status: Some(status),
        }
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            status: None,
        }
    }

    #[must_use]
    pub fn failure_with(message: impl Into<String>, status: StatusSnapshot) -> Self {
        Self {
            success: false,
            message: message.into(),
            status: Some(status),
        }
    }
}
