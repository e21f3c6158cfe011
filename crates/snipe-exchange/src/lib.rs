//! Narrow collaborator contracts for the auto-sniping engine.
//!
//! The core consumes the exchange, the market data feed, and durable
//! storage through the traits defined here. Two implementations ship:
//! - `RestExchange`: production HTTP adapter with explicit timeouts
//! - `SimExchange`: deterministic in-memory fake for tests and paper runs

pub mod error;
pub mod rest;
pub mod retry;
pub mod sim;
pub mod traits;
pub mod types;

pub use error::{ExchangeError, ExchangeResult};
pub use rest::{RestExchange, RestStore};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use sim::SimExchange;
pub use traits::{ExchangeClient, ExecutionStore, MarketDataFeed};
pub use types::{
    ExecutionRecord, MarketSnapshot, OrderRequest, OrderResponse, OrderStatus, SymbolInfo, Ticker,
};
