//! Auto-sniping orchestration engine.
//!
//! Composes the pattern processor, trade executor, position monitor, and
//! safety manager; owns the periodic-task lifecycle; routes events between
//! modules; and exposes the public control surface.

pub mod config;
pub mod engine;
pub mod error;

pub use config::{AppConfig, ExchangeMode, ExchangeSettings};
pub use engine::{EngineMetrics, SnipingEngine};
pub use error::{AppError, AppResult};
