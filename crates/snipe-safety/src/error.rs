//! Error types for snipe-safety.

use thiserror::Error;

/// Safety manager error.
#[derive(Debug, Error)]
pub enum SafetyError {
    /// Target failed validation. The message aggregates every failing
    /// reason.
    #[error("Target rejected: {0}")]
    TargetRejected(String),

    /// Manager not initialized or emergency-stopped.
    #[error("Safety manager unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for safety operations.
pub type SafetyResult<T> = std::result::Result<T, SafetyError>;
