//! The closed set of events routed between modules.
//!
//! Every variant carries a fully-typed payload. Delivery is over an
//! explicit channel owned by the orchestrator; consumption by dashboards
//! or alerting is out of scope.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::pattern::PatternMatch;
use crate::position::{CloseReason, PositionId, TradingPosition};
use crate::safety::Severity;
use crate::target::TargetId;

/// Engine event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    PatternDetected {
        pattern: PatternMatch,
    },
    TradeExecuted {
        /// Absent for manual trades.
        target_id: Option<TargetId>,
        symbol: String,
        success: bool,
        order_id: Option<String>,
        latency_ms: u64,
        message: String,
    },
    PositionOpened {
        position: TradingPosition,
    },
    PositionClosed {
        position_id: PositionId,
        symbol: String,
        reason: CloseReason,
        realized_pnl: Decimal,
    },
    SafetyViolation {
        message: String,
        severity: Severity,
    },
    EmergencyStop {
        reason: String,
    },
    AutoSnipingStarted,
    AutoSnipingStopped,
}

impl EngineEvent {
    /// Stable event name, as published to the sink.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::PatternDetected { .. } => "pattern_detected",
            Self::TradeExecuted { .. } => "trade_executed",
            Self::PositionOpened { .. } => "position_opened",
            Self::PositionClosed { .. } => "position_closed",
            Self::SafetyViolation { .. } => "safety_violation",
            Self::EmergencyStop { .. } => "emergency_stop",
            Self::AutoSnipingStarted => "auto_sniping_started",
            Self::AutoSnipingStopped => "auto_sniping_stopped",
        }
    }

    /// Whether this event must pre-empt normal processing.
    #[must_use]
    pub fn is_critical(&self) -> bool {
        match self {
            Self::EmergencyStop { .. } => true,
            Self::SafetyViolation { severity, .. } => *severity == Severity::Critical,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(EngineEvent::AutoSnipingStarted.name(), "auto_sniping_started");
        assert_eq!(
            EngineEvent::EmergencyStop {
                reason: "test".to_string()
            }
            .name(),
            "emergency_stop"
        );
    }

    #[test]
    fn test_critical_classification() {
        assert!(EngineEvent::EmergencyStop {
            reason: "x".to_string()
        }
        .is_critical());
        assert!(EngineEvent::SafetyViolation {
            message: "x".to_string(),
            severity: Severity::Critical
        }
        .is_critical());
        assert!(!EngineEvent::SafetyViolation {
            message: "x".to_string(),
            severity: Severity::Warning
        }
        .is_critical());
        assert!(!EngineEvent::AutoSnipingStarted.is_critical());
    }
}
