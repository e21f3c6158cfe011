//! Core domain types for the auto-sniping engine.
//!
//! This crate provides the fundamental types used throughout the system:
//! - `SnipeTarget`: a symbol flagged for near-term execution
//! - `PatternMatch`: the output of one detection cycle
//! - `TradingPosition`: an open or closed position owned by the monitor
//! - `Price`, `Qty`: precision-safe numeric types
//! - `EngineConfig`: validated, immutable-per-cycle settings
//! - `EngineEvent`: the closed set of events routed between modules

pub mod config;
pub mod decimal;
pub mod error;
pub mod events;
pub mod order;
pub mod pattern;
pub mod position;
pub mod safety;
pub mod status;
pub mod target;

pub use config::{ConfigPatch, EngineConfig, ExecutionLimits, SafetyLimits, StrategyMode};
pub use decimal::{Price, Qty};
pub use error::{CoreError, CoreResult};
pub use events::EngineEvent;
pub use order::{OrderSide, OrderType};
pub use pattern::{PatternMatch, PatternType, RiskLevel, ScoreBreakdown};
pub use position::{CloseReason, PositionId, PositionStatus, TradingPosition};
pub use safety::{composite_risk_score, CheckType, RiskBand, SafetyCheck, Severity, HARD_STOP_SCORE};
pub use status::{EngineState, HealthState, OperationResult, StatusSnapshot};
pub use target::{SnipeTarget, TargetId, TargetStatus};
