//! Error types for snipe-position.

use snipe_core::PositionId;
use thiserror::Error;

/// Position monitor error.
#[derive(Debug, Error)]
pub enum PositionError {
    #[error("maximum concurrent positions reached ({0})")]
    LimitReached(usize),

    #[error("position {0} already exists")]
    Duplicate(PositionId),

    #[error("position {0} not found")]
    NotFound(PositionId),
}

/// Result type alias for position operations.
pub type PositionResult<T> = std::result::Result<T, PositionError>;
