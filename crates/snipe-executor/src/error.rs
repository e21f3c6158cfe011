//! Error types for snipe-executor.

use thiserror::Error;

use snipe_exchange::ExchangeError;

/// Executor error.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Bad parameters. Non-retryable, surfaced immediately.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The executor has been emergency-halted.
    #[error("Executor halted")]
    Halted,

    /// Exchange unreachable; the connectivity probe failed.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Order rejected by the exchange or retries exhausted.
    #[error("Execution error: {0}")]
    Execution(String),

    /// Unexpected fault converted at the module boundary.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExecutorError {
    /// Short class label for metrics.
    #[must_use]
    pub fn class(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Halted => "halted",
            Self::Connectivity(_) => "connectivity",
            Self::Execution(_) => "execution",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<ExchangeError> for ExecutorError {
    fn from(e: ExchangeError) -> Self {
        match e {
            ExchangeError::Validation(msg) => Self::Validation(msg),
            ExchangeError::Connectivity(msg) => Self::Connectivity(msg),
            ExchangeError::Timeout(ms) => Self::Connectivity(format!("timed out after {ms} ms")),
            ExchangeError::SymbolNotReady(s) => {
                Self::Execution(format!("symbol {s} not yet tradeable"))
            }
            ExchangeError::Rejected(msg) => Self::Execution(msg),
            ExchangeError::NotFound(msg) => Self::Execution(msg),
            ExchangeError::Internal(msg) => Self::Internal(msg),
        }
    }
}

/// Result type alias for executor operations.
pub type ExecutorResult<T> = std::result::Result<T, ExecutorError>;
