//! Error taxonomy for exchange collaborators.
//!
//! Retryability is a property of the error class: connectivity failures
//! and the transient symbol-not-ready condition may be retried with
//! bounded backoff; validation and exchange rejections may not.

use thiserror::Error;

/// Exchange collaborator error.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Bad request parameters. Non-retryable, surfaced immediately.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Exchange unreachable or transport failure. Retryable.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// A blocking call exceeded its deadline. Retryable.
    #[error("Timeout after {0} ms")]
    Timeout(u64),

    /// Symbol exists but is not yet tradable. Retryable.
    #[error("Symbol not ready: {0}")]
    SymbolNotReady(String),

    /// Order rejected by the exchange. Non-retryable, recorded.
    #[error("Order rejected: {0}")]
    Rejected(String),

    /// Unknown symbol or order. Non-retryable.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unexpected fault converted at the module boundary.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExchangeError {
    /// Whether a bounded-backoff retry is appropriate.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connectivity(_) | Self::Timeout(_) | Self::SymbolNotReady(_)
        )
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(0)
        } else if e.is_connect() {
            Self::Connectivity(e.to_string())
        } else {
            Self::Internal(e.to_string())
        }
    }
}

/// Result type alias for exchange operations.
pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;
