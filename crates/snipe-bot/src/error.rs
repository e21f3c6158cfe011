//! Error types for the snipe-bot application shell.
//!
//! Engine operations themselves return `OperationResult` values; these
//! errors cover configuration loading and process startup only.

use thiserror::Error;

/// Application error.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Core error: {0}")]
    Core(#[from] snipe_core::CoreError),

    #[error("Exchange error: {0}")]
    Exchange(#[from] snipe_exchange::ExchangeError),
}

impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

/// Result type alias for application operations.
pub type AppResult<T> = std::result::Result<T, AppError>;
