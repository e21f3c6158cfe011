//! Position ownership and monitoring.
//!
//! The monitor owns the open-position set and a bounded closed history.
//! Its periodic cycle refreshes marks, recomputes unrealized PnL, and
//! evaluates stop-loss/take-profit exits through the same close path used
//! for manual and emergency closes.

pub mod error;
pub mod monitor;

pub use error::{PositionError, PositionResult};
pub use monitor::{PositionMonitor, PositionStats};
