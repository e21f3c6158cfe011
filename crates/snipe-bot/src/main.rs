//! Auto-Sniping Bot - Entry Point

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use rust_decimal::Decimal;
use tracing::{info, warn};

use snipe_bot::{AppConfig, ExchangeMode, SnipingEngine};
use snipe_core::Price;
use snipe_exchange::{
    ExchangeClient, ExecutionStore, MarketDataFeed, RestExchange, RestStore, SimExchange,
};

/// Auto-Sniping Bot
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via SNIPE_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    snipe_telemetry::init_logging()?;

    info!("Starting snipe-bot v{}", env!("CARGO_PKG_VERSION"));

    // Config path: CLI arg > SNIPE_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("SNIPE_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");
    let app_config = AppConfig::from_file(&config_path)?;
    info!(
        mode = ?app_config.exchange.mode,
        strategy = %app_config.engine.strategy,
        paper = app_config.engine.paper_trading,
        watchlist = ?app_config.engine.watchlist,
        "Configuration loaded"
    );

    // Build the collaborators for the configured mode
    let (exchange, feed, store): (
        Arc<dyn ExchangeClient>,
        Arc<dyn MarketDataFeed>,
        Arc<dyn ExecutionStore>,
    ) = match app_config.exchange.mode {
        ExchangeMode::Sim => {
            let sim = Arc::new(SimExchange::new());
            sim.set_balance("USDT", Decimal::from(10_000));
            for symbol in &app_config.engine.watchlist {
                sim.list_symbol(symbol);
                sim.set_snapshot(SimExchange::neutral_snapshot(symbol, Price::new(Decimal::ONE)));
            }
            info!("Using deterministic sim exchange");
            (sim.clone(), sim.clone(), sim)
        }
        ExchangeMode::Rest => {
            let rest = Arc::new(RestExchange::new(
                &app_config.exchange.base_url,
                &app_config.exchange.api_key,
            )?);
            let store: Arc<dyn ExecutionStore> = match &app_config.exchange.store_url {
                Some(url) => Arc::new(RestStore::new(url)?),
                None => {
                    warn!("No store_url configured; falling back to in-memory records");
                    Arc::new(SimExchange::new())
                }
            };
            (rest.clone(), rest, store)
        }
    };

    let engine = SnipingEngine::new(app_config.engine, exchange, feed, store)?;

    let result = engine.initialize().await;
    if !result.success {
        anyhow::bail!("initialization failed: {}", result.message);
    }
    let result = engine.start().await;
    if !result.success {
        anyhow::bail!("start failed: {}", result.message);
    }

    // Log the event stream until shutdown
    let mut events = engine.subscribe_events();
    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => info!(event = event.name(), "event"),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "event subscriber lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    let metrics = engine.metrics();
    info!(
        executed = metrics.executor.executed,
        failed = metrics.executor.failed,
        realized_pnl = %metrics.positions.realized_pnl_total,
        "Final statistics"
    );
    engine.shutdown().await;

    Ok(())
}
