//! End-to-end engine scenarios against the deterministic sim exchange.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;

use snipe_bot::SnipingEngine;
use snipe_core::{
    CloseReason, EngineConfig, EngineState, Price, SnipeTarget, StrategyMode,
};
use snipe_exchange::{MarketSnapshot, SimExchange};

fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.paper_trading = false;
    config.strategy = StrategyMode::Aggressive; // market fills at the mark
    config.pattern_detection_interval_ms = 100;
    config.safety_check_interval_ms = 100;
    config.executor.min_order_spacing_ms = 1;
    config.executor.retry_base_delay_ms = 1;
    config.executor.retry_max_delay_ms = 4;
    config
}

fn healthy_sim() -> Arc<SimExchange> {
    let sim = Arc::new(SimExchange::new());
    sim.set_balance("USDT", dec!(10000));
    sim
}

async fn running_engine(sim: &Arc<SimExchange>, config: EngineConfig) -> Arc<SnipingEngine> {
    let engine = SnipingEngine::new(config, sim.clone(), sim.clone(), sim.clone()).unwrap();
    assert!(engine.initialize().await.success);
    let started = engine.start().await;
    assert!(started.success, "start failed: {}", started.message);
    engine
}

/// Poll until `predicate` holds or the deadline passes.
async fn wait_until<F: Fn() -> bool>(predicate: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    predicate()
}

#[tokio::test]
async fn rejected_target_returns_failure_without_executing() {
    let sim = healthy_sim();
    sim.set_price("NEWUSDT", Price::new(dec!(2)));
    let engine = running_engine(&sim, fast_config()).await;

    for confidence in [0.0, 30.0, 74.9] {
        let target = SnipeTarget::new("NEWUSDT", dec!(100), confidence, dec!(0.05));
        let result = engine.process_target(target).await;
        assert!(!result.success);
    }

    // The executor was never reached for any rejected target
    let metrics = engine.metrics();
    assert_eq!(metrics.executor.executed, 0);
    assert_eq!(metrics.executor.failed, 0);
    assert!(metrics.safety_violations >= 3);
}

#[tokio::test]
async fn open_positions_never_exceed_cap() {
    let sim = healthy_sim();
    sim.set_price("AUSDT", Price::new(dec!(2)));
    sim.set_price("BUSDT", Price::new(dec!(2)));

    let mut config = fast_config();
    config.max_concurrent_positions = 1;
    let engine = running_engine(&sim, config).await;

    let first = engine
        .process_target(SnipeTarget::new("AUSDT", dec!(100), 90.0, dec!(0.05)))
        .await;
    assert!(first.success, "first target failed: {}", first.message);

    let second = engine
        .process_target(SnipeTarget::new("BUSDT", dec!(100), 90.0, dec!(0.05)))
        .await;
    assert!(!second.success);
    assert!(second.message.contains("maximum concurrent positions"));

    assert_eq!(engine.metrics().positions.open, 1);
}

#[tokio::test]
async fn stop_loss_closes_position_with_negative_pnl() {
    let sim = healthy_sim();
    sim.set_price("NEWUSDT", Price::new(dec!(100)));
    let engine = running_engine(&sim, fast_config()).await;

    // Entry at 100 with a 10% stop: stop level 90
    let target = SnipeTarget::new("NEWUSDT", dec!(500), 90.0, dec!(0.10));
    let result = engine.process_target(target).await;
    assert!(result.success, "target failed: {}", result.message);
    assert_eq!(engine.metrics().positions.open, 1);

    // Mark drops through the stop; the monitor cycle closes it
    sim.set_price("NEWUSDT", Price::new(dec!(85)));
    let closed = wait_until(
        || engine.metrics().positions.open == 0,
        Duration::from_secs(2),
    )
    .await;
    assert!(closed, "position was not closed by the monitor cycle");

    let stats = engine.metrics().positions;
    assert_eq!(stats.closed, 1);
    // entry 100, qty 5, exit 85: realized -75
    assert_eq!(stats.realized_pnl_total, dec!(-75));
}

#[tokio::test]
async fn watchlist_pattern_cycle_snipes_automatically() {
    let sim = healthy_sim();
    let hot = MarketSnapshot {
        volume_change_pct: 200.0,
        price_change_pct: 8.0,
        liquidity_depth_usdt: 120_000.0,
        rsi: 60.0,
        macd_histogram: 0.5,
        volatility_pct: 4.0,
        ..SimExchange::neutral_snapshot("HOTUSDT", Price::new(dec!(2)))
    };
    sim.set_snapshot(hot);

    let mut config = fast_config();
    config.confidence_threshold = 60.0;
    config.watchlist = vec!["HOTUSDT".to_string()];
    let engine = running_engine(&sim, config).await;

    let sniped = wait_until(
        || engine.metrics().positions.open == 1,
        Duration::from_secs(2),
    )
    .await;
    assert!(sniped, "pattern cycle did not snipe the hot symbol");

    let metrics = engine.metrics();
    assert_eq!(metrics.executor.executed, 1);
    assert!(!sim.saved_records().is_empty());
}

#[tokio::test]
async fn critical_safety_failures_auto_invoke_emergency_stop() {
    let sim = healthy_sim();
    sim.set_price("NEWUSDT", Price::new(dec!(2)));
    let mut config = fast_config();
    config.safety_check_interval_ms = 50;
    let engine = running_engine(&sim, config).await;
    assert_eq!(engine.metrics().state, EngineState::Running);

    // Collapse the balance below the minimum: every safety cycle from here
    // fails critically
    sim.set_balance("USDT", dec!(1));

    let stopped = wait_until(
        || engine.metrics().state == EngineState::Stopped,
        Duration::from_secs(2),
    )
    .await;
    assert!(stopped, "engine did not stop after critical safety failures");

    // Running is false; new targets are refused
    let result = engine
        .process_target(SnipeTarget::new("NEWUSDT", dec!(100), 90.0, dec!(0.05)))
        .await;
    assert!(!result.success);
    assert!(result.message.contains("not running"));
}

#[tokio::test]
async fn emergency_stop_twice_is_stable() {
    let sim = healthy_sim();
    sim.set_price("NEWUSDT", Price::new(dec!(2)));
    let engine = running_engine(&sim, fast_config()).await;

    engine
        .process_target(SnipeTarget::new("NEWUSDT", dec!(100), 90.0, dec!(0.05)))
        .await;

    let first = engine.emergency_stop("operator halt").await;
    let snapshot_first = first.status.unwrap();

    let second = engine.emergency_stop("operator halt").await;
    let snapshot_second = second.status.unwrap();

    assert!(first.success && second.success);
    assert_eq!(snapshot_first.state, EngineState::Stopped);
    assert_eq!(snapshot_second.state, EngineState::Stopped);
    assert_eq!(snapshot_second.open_positions, 0);

    // Force-closed positions carry the emergency close reason
    // (visible through realized history)
    assert_eq!(engine.metrics().positions.closed, 1);
}

#[tokio::test]
async fn events_are_published_for_the_full_flow() {
    let sim = healthy_sim();
    sim.set_price("NEWUSDT", Price::new(dec!(2)));
    let engine = running_engine(&sim, fast_config()).await;
    let mut events = engine.subscribe_events();

    engine
        .process_target(SnipeTarget::new("NEWUSDT", dec!(100), 90.0, dec!(0.05)))
        .await;
    engine.emergency_stop("drill").await;

    let mut seen = Vec::new();
    while let Ok(event) =
        tokio::time::timeout(Duration::from_millis(500), events.recv()).await
    {
        if let Ok(event) = event {
            seen.push(event.name().to_string());
        } else {
            break;
        }
    }

    assert!(seen.contains(&"trade_executed".to_string()), "{seen:?}");
    assert!(seen.contains(&"position_opened".to_string()), "{seen:?}");
    assert!(seen.contains(&"position_closed".to_string()), "{seen:?}");
    assert!(seen.contains(&"emergency_stop".to_string()), "{seen:?}");
}

#[tokio::test]
async fn stopped_engine_recovers_via_reinitialize() {
    let sim = healthy_sim();
    sim.set_price("NEWUSDT", Price::new(dec!(2)));
    let engine = running_engine(&sim, fast_config()).await;

    engine.emergency_stop("drill").await;
    assert_eq!(engine.metrics().state, EngineState::Stopped);

    assert!(engine.initialize().await.success);
    assert!(engine.start().await.success);
    assert_eq!(engine.metrics().state, EngineState::Running);

    let result = engine
        .process_target(SnipeTarget::new("NEWUSDT", dec!(100), 90.0, dec!(0.05)))
        .await;
    assert!(result.success, "post-recovery target failed: {}", result.message);
}

#[tokio::test]
async fn shutdown_during_open_position_closes_cleanly() {
    let sim = healthy_sim();
    sim.set_price("NEWUSDT", Price::new(dec!(2)));
    let engine = running_engine(&sim, fast_config()).await;

    engine
        .process_target(SnipeTarget::new("NEWUSDT", dec!(100), 90.0, dec!(0.05)))
        .await;

    assert!(engine.shutdown().await.success);
    let metrics = engine.metrics();
    assert_eq!(metrics.state, EngineState::Stopped);
    assert_eq!(metrics.positions.open, 0);
}

#[tokio::test]
async fn take_profit_closes_position_with_positive_pnl() {
    let sim = healthy_sim();
    sim.set_price("NEWUSDT", Price::new(dec!(100)));
    let mut config = fast_config();
    config.take_profit_pct = dec!(0.10); // target at 110
    let engine = running_engine(&sim, config).await;

    let result = engine
        .process_target(SnipeTarget::new("NEWUSDT", dec!(500), 90.0, dec!(0.05)))
        .await;
    assert!(result.success);

    sim.set_price("NEWUSDT", Price::new(dec!(112)));
    let closed = wait_until(
        || engine.metrics().positions.open == 0,
        Duration::from_secs(2),
    )
    .await;
    assert!(closed, "take-profit did not close the position");
    assert!(engine.metrics().positions.realized_pnl_total > rust_decimal::Decimal::ZERO);
}

#[tokio::test]
async fn close_reason_is_visible_on_events() {
    let sim = healthy_sim();
    sim.set_price("NEWUSDT", Price::new(dec!(100)));
    let engine = running_engine(&sim, fast_config()).await;
    let mut events = engine.subscribe_events();

    engine
        .process_target(SnipeTarget::new("NEWUSDT", dec!(500), 90.0, dec!(0.10)))
        .await;
    sim.set_price("NEWUSDT", Price::new(dec!(80)));

    let mut reason = None;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
            Ok(Ok(snipe_core::EngineEvent::PositionClosed {
                reason: close_reason,
                realized_pnl,
                ..
            })) => {
                assert!(realized_pnl < rust_decimal::Decimal::ZERO);
                reason = Some(close_reason);
                break;
            }
            Ok(Ok(_)) => continue,
            Ok(Err(_)) => break,
            Err(_) => continue,
        }
    }
    assert_eq!(reason, Some(CloseReason::StopLoss));
}
