//! Engine orchestration.
//!
//! Lifecycle: created -> initialized -> running -> stopped (terminal until
//! re-initialized). While running, two independently scheduled periodic
//! tasks drive the system: opportunity detection and the safety check.
//! Each guards re-entrancy with a busy flag; a tick arriving while the
//! previous cycle is still in flight is skipped, not queued.
//!
//! Event flow: modules publish typed `EngineEvent`s into an mpsc channel;
//! the router task fans them out to subscribers and reacts to critical
//! safety violations. `emergency_stop` pre-empts everything: it latches,
//! aborts in-flight cycles, force-closes positions, and cancels pending
//! orders.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use snipe_core::{
    CloseReason, ConfigPatch, EngineConfig, EngineEvent, EngineState, HealthState,
    OperationResult, Price, Severity, SnipeTarget, StatusSnapshot, StrategyMode, TargetStatus,
    TradingPosition,
};
use snipe_exchange::{ExchangeClient, ExecutionStore, MarketDataFeed};
use snipe_executor::{ExecutorStats, ManualTradeParams, TradeExecutor};
use snipe_pattern::{assess::assess_opportunity, PatternProcessor, RecommendedAction};
use snipe_position::{PositionMonitor, PositionStats};
use snipe_safety::{EmergencyLatch, SafetyManager};
use snipe_telemetry::Metrics;

/// Quote asset for sizing and balance queries.
const QUOTE_ASSET: &str = "USDT";

/// Event channel depth between modules and the router.
const EVENT_CHANNEL_DEPTH: usize = 256;

/// One periodic task: its cancellation token and join handle.
struct TaskHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct PeriodicTasks {
    pattern: TaskHandle,
    safety: TaskHandle,
}

/// Full metrics snapshot. Best-effort: always answers, even when a module
/// is degraded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineMetrics {
    pub state: EngineState,
    pub health: HealthState,
    pub uptime_secs: u64,
    pub executor: ExecutorStats,
    pub positions: PositionStats,
    pub risk_score: Option<f64>,
    pub safety_violations: u64,
    pub recent_patterns: usize,
}

/// The auto-sniping orchestration engine.
///
/// Constructed explicitly by the process entry point and owned there; no
/// process-wide singleton.
pub struct SnipingEngine {
    config: RwLock<EngineConfig>,
    exchange: Arc<dyn ExchangeClient>,
    store: Arc<dyn ExecutionStore>,
    pattern: Arc<PatternProcessor>,
    executor: Arc<TradeExecutor>,
    positions: Arc<PositionMonitor>,
    safety: Arc<SafetyManager>,
    latch: Arc<EmergencyLatch>,
    state: RwLock<EngineState>,
    defunct: AtomicBool,
    started_at: RwLock<Option<Instant>>,
    events_tx: mpsc::Sender<EngineEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<EngineEvent>>>,
    sink: broadcast::Sender<EngineEvent>,
    router: Mutex<Option<JoinHandle<()>>>,
    tasks: Mutex<Option<PeriodicTasks>>,
    pattern_busy: Arc<AtomicBool>,
    safety_busy: Arc<AtomicBool>,
}

impl SnipingEngine {
    /// Wire the modules together with the given collaborators.
    pub fn new(
        config: EngineConfig,
        exchange: Arc<dyn ExchangeClient>,
        feed: Arc<dyn MarketDataFeed>,
        store: Arc<dyn ExecutionStore>,
    ) -> Result<Arc<Self>, snipe_core::CoreError> {
        config.validate()?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);
        let (sink, _) = broadcast::channel(EVENT_CHANNEL_DEPTH);
        let latch = Arc::new(EmergencyLatch::new());

        let pattern = Arc::new(PatternProcessor::new(feed.clone()));
        let executor = Arc::new(TradeExecutor::new(
            exchange.clone(),
            feed.clone(),
            store.clone(),
            events_tx.clone(),
            &config,
        ));
        let positions = Arc::new(PositionMonitor::new(
            feed.clone(),
            events_tx.clone(),
            &config,
        ));
        let safety = Arc::new(SafetyManager::new(
            exchange.clone(),
            feed,
            positions.clone(),
            events_tx.clone(),
            latch.clone(),
            &config,
        ));

        Ok(Arc::new(Self {
            config: RwLock::new(config),
            exchange,
            store,
            pattern,
            executor,
            positions,
            safety,
            latch,
            state: RwLock::new(EngineState::Created),
            defunct: AtomicBool::new(false),
            started_at: RwLock::new(None),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            sink,
            router: Mutex::new(None),
            tasks: Mutex::new(None),
            pattern_busy: Arc::new(AtomicBool::new(false)),
            safety_busy: Arc::new(AtomicBool::new(false)),
        }))
    }

    /// Subscribe to the engine's event stream.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.sink.subscribe()
    }

    /// Wire modules with the current config. Idempotent.
    pub async fn initialize(self: &Arc<Self>) -> OperationResult {
        if self.defunct.load(Ordering::SeqCst) {
            return OperationResult::failure("engine has been shut down");
        }
        {
            let state = *self.state.read();
            if state == EngineState::Initialized || state == EngineState::Running {
                return OperationResult::ok("already initialized");
            }
        }

        self.latch.reset();
        self.executor.reset();
        self.safety.initialize();

        // Router starts once per engine lifetime
        if let Some(rx) = self.events_rx.lock().take() {
            let weak = Arc::downgrade(self);
            let sink = self.sink.clone();
            *self.router.lock() = Some(tokio::spawn(Self::route_events(weak, rx, sink)));
        }

        *self.state.write() = EngineState::Initialized;
        info!("engine initialized");
        OperationResult::ok("engine initialized")
    }

    /// Start auto-sniping. Requires initialization and `config.enabled`,
    /// and runs the safety check once as a pre-flight gate. Re-entrant
    /// calls while already running return success without side effects.
    pub async fn start(self: &Arc<Self>) -> OperationResult {
        if self.defunct.load(Ordering::SeqCst) {
            return OperationResult::failure("engine has been shut down");
        }
        match *self.state.read() {
            EngineState::Running => return OperationResult::ok("already running"),
            EngineState::Created => {
                return OperationResult::failure("initialize the engine before starting")
            }
            EngineState::Stopped => {
                return OperationResult::failure("engine stopped; re-initialize before starting")
            }
            EngineState::Initialized => {}
        }

        let config = self.config.read().clone();
        if !config.enabled {
            return OperationResult::failure("auto-sniping disabled by configuration");
        }

        // Pre-flight gate: one full safety cycle
        let preflight = self.safety.run_checks().await;
        if preflight.has_critical || preflight.band == snipe_core::RiskBand::Critical {
            return OperationResult::failure_with(
                format!(
                    "pre-flight safety check failed (risk score {:.1})",
                    preflight.score
                ),
                self.snapshot(),
            );
        }

        *self.tasks.lock() = Some(PeriodicTasks {
            pattern: self.spawn_pattern_task(config.pattern_detection_interval_ms),
            safety: self.spawn_safety_task(config.safety_check_interval_ms),
        });
        *self.state.write() = EngineState::Running;
        *self.started_at.write() = Some(Instant::now());

        self.publish(EngineEvent::AutoSnipingStarted);
        info!(
            pattern_interval_ms = config.pattern_detection_interval_ms,
            safety_interval_ms = config.safety_check_interval_ms,
            strategy = %config.strategy,
            paper = config.paper_trading,
            "auto-sniping started"
        );
        OperationResult::ok_with("auto-sniping started", self.snapshot())
    }

    /// Stop auto-sniping: cancel both periodic tasks and, unless the
    /// strategy is conservative, close all open positions through the
    /// normal close path.
    pub async fn stop(&self) -> OperationResult {
        if *self.state.read() != EngineState::Running {
            return OperationResult::ok("not running");
        }

        let tasks = self.tasks.lock().take();
        if let Some(tasks) = tasks {
            tasks.pattern.token.cancel();
            tasks.safety.token.cancel();
            let _ = tasks.pattern.handle.await;
            let _ = tasks.safety.handle.await;
        }

        let strategy = self.config.read().strategy;
        if strategy != StrategyMode::Conservative {
            let closed = self.positions.close_all(CloseReason::Shutdown);
            if !closed.is_empty() {
                info!(count = closed.len(), "closed open positions on stop");
            }
        } else {
            debug!("conservative strategy: leaving open positions in place");
        }

        *self.state.write() = EngineState::Stopped;
        *self.started_at.write() = None;
        self.publish(EngineEvent::AutoSnipingStopped);
        info!("auto-sniping stopped");
        OperationResult::ok_with("auto-sniping stopped", self.snapshot())
    }

    /// Highest-priority operation: latch, pre-empt in-flight cycles,
    /// cancel pending orders, force-close positions, and leave every
    /// module in its stopped sub-state. Idempotent.
    pub async fn emergency_stop(&self, reason: &str) -> OperationResult {
        let first = !self.latch.is_triggered();
        self.latch.trigger(reason);

        // Pre-empt periodic work immediately; no graceful await
        let tasks = self.tasks.lock().take();
        if let Some(tasks) = tasks {
            tasks.pattern.token.cancel();
            tasks.safety.token.cancel();
            tasks.pattern.handle.abort();
            tasks.safety.handle.abort();
        }

        let cancelled = self.executor.emergency_stop().await;
        let closed = self.positions.close_all(CloseReason::EmergencyStop);
        self.safety.mark_stopped();

        *self.state.write() = EngineState::Stopped;
        *self.started_at.write() = None;

        if first {
            Metrics::emergency_stop();
            self.publish(EngineEvent::EmergencyStop {
                reason: reason.to_string(),
            });
            warn!(
                reason,
                cancelled_orders = cancelled,
                closed_positions = closed.len(),
                "emergency stop executed"
            );
        }
        OperationResult::ok_with(format!("emergency stop: {reason}"), self.snapshot())
    }

    /// Process a snipe target: gate through the safety manager, execute,
    /// and hand the resulting position to the monitor.
    pub async fn process_target(&self, mut target: SnipeTarget) -> OperationResult {
        if self.defunct.load(Ordering::SeqCst) {
            return OperationResult::failure("engine has been shut down");
        }
        if *self.state.read() != EngineState::Running {
            return OperationResult::failure("auto-sniping is not running");
        }

        if let Err(e) = self.safety.validate_target(&target).await {
            let _ = target.transition(TargetStatus::Cancelled);
            self.update_target_row(&target).await;
            return OperationResult::failure(e.to_string());
        }

        if target.transition(TargetStatus::Ready).is_err()
            || target.transition(TargetStatus::Executing).is_err()
        {
            return OperationResult::failure(format!(
                "target {} in non-executable status {}",
                target.id, target.status
            ));
        }
        self.update_target_row(&target).await;

        match self.executor.execute_snipe_target(&target).await {
            Ok(report) => {
                let _ = target.transition(TargetStatus::Completed);
                self.update_target_row(&target).await;

                let config = self.config.read().clone();
                let entry = report.price;
                let stop_loss =
                    Price::new(entry.inner() * (Decimal::ONE - target.stop_loss_pct));
                let take_profit =
                    Price::new(entry.inner() * (Decimal::ONE + config.take_profit_pct));
                let position = TradingPosition::new(
                    target.symbol.clone(),
                    report.side,
                    report.quantity,
                    entry,
                    stop_loss,
                    Some(take_profit),
                    config.strategy,
                );

                let position_snapshot = position.clone();
                if let Err(e) = self.positions.add_position(position) {
                    // Validation held the slot; losing it here means a race
                    // with a concurrent fill. Surface it, don't hide it.
                    warn!(symbol = %target.symbol, error = %e, "executed but could not track position");
                    return OperationResult::failure(format!(
                        "executed but position not tracked: {e}"
                    ));
                }
                if let Err(e) = self.store.upsert_position(&position_snapshot).await {
                    warn!(error = %e, "failed to persist position row");
                }

                OperationResult::ok_with(
                    format!(
                        "target {} executed ({})",
                        target.symbol,
                        report.order_id.as_deref().unwrap_or("paper")
                    ),
                    self.snapshot(),
                )
            }
            Err(e) => {
                let _ = target.transition(TargetStatus::Failed);
                self.update_target_row(&target).await;
                OperationResult::failure(format!("execution failed: {e}"))
            }
        }
    }

    /// Manual trade pass-through with full parameter validation.
    pub async fn execute_manual_trade(&self, params: &ManualTradeParams) -> OperationResult {
        if self.defunct.load(Ordering::SeqCst) {
            return OperationResult::failure("engine has been shut down");
        }
        if *self.state.read() != EngineState::Running {
            return OperationResult::failure("auto-sniping is not running");
        }
        match self.executor.execute_manual_trade(params).await {
            Ok(report) => OperationResult::ok(format!(
                "manual trade executed ({})",
                report.order_id.as_deref().unwrap_or("paper")
            )),
            Err(e) => OperationResult::failure(format!("manual trade failed: {e}")),
        }
    }

    /// Revalidate the merged configuration, propagate it to all modules,
    /// and restart periodic tasks whose intervals changed.
    pub async fn update_configuration(self: &Arc<Self>, patch: ConfigPatch) -> OperationResult {
        if self.defunct.load(Ordering::SeqCst) {
            return OperationResult::failure("engine has been shut down");
        }

        let current = self.config.read().clone();
        let merged = match patch.apply(&current) {
            Ok(merged) => merged,
            Err(e) => return OperationResult::failure(format!("invalid configuration: {e}")),
        };

        let pattern_interval_changed =
            merged.pattern_detection_interval_ms != current.pattern_detection_interval_ms;
        let safety_interval_changed =
            merged.safety_check_interval_ms != current.safety_check_interval_ms;
        let watchlist_changed = merged.watchlist != current.watchlist;

        *self.config.write() = merged.clone();
        self.executor.update_config(&merged);
        self.positions.update_config(&merged);
        self.safety.update_config(&merged);
        if watchlist_changed {
            self.pattern.reset_dedup();
        }

        if *self.state.read() == EngineState::Running {
            let mut tasks = self.tasks.lock();
            if let Some(tasks) = tasks.as_mut() {
                if pattern_interval_changed {
                    debug!(
                        interval_ms = merged.pattern_detection_interval_ms,
                        "restarting pattern detection task"
                    );
                    tasks.pattern.token.cancel();
                    tasks.pattern.handle.abort();
                    tasks.pattern = self.spawn_pattern_task(merged.pattern_detection_interval_ms);
                }
                if safety_interval_changed {
                    debug!(
                        interval_ms = merged.safety_check_interval_ms,
                        "restarting safety check task"
                    );
                    tasks.safety.token.cancel();
                    tasks.safety.handle.abort();
                    tasks.safety = self.spawn_safety_task(merged.safety_check_interval_ms);
                }
            }
        }

        info!("configuration updated");
        OperationResult::ok("configuration updated")
    }

    /// Best-effort status snapshot. Never fails.
    #[must_use]
    pub fn status(&self) -> OperationResult {
        OperationResult::ok_with("status", self.snapshot())
    }

    /// Best-effort metrics snapshot. Never fails.
    #[must_use]
    pub fn metrics(&self) -> EngineMetrics {
        let uptime = self
            .started_at
            .read()
            .map(|at| at.elapsed().as_secs())
            .unwrap_or(0);
        EngineMetrics {
            state: *self.state.read(),
            health: self.health(),
            uptime_secs: uptime,
            executor: self.executor.stats(),
            positions: self.positions.stats(),
            risk_score: self.safety.last_score(),
            safety_violations: self.safety.violation_count(),
            recent_patterns: self.pattern.recent_patterns().len(),
        }
    }

    /// Stop if running, release module resources, and invalidate the
    /// instance. Further operations fail with a uniform result.
    pub async fn shutdown(&self) -> OperationResult {
        if self.defunct.swap(true, Ordering::SeqCst) {
            return OperationResult::ok("already shut down");
        }

        let _ = self.stop().await;

        if let Some(router) = self.router.lock().take() {
            router.abort();
        }
        info!("engine shut down");
        OperationResult::ok("engine shut down")
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn publish(&self, event: EngineEvent) {
        if self.events_tx.try_send(event).is_err() {
            warn!("event channel full, dropping engine event");
        }
    }

    fn snapshot(&self) -> StatusSnapshot {
        let config = self.config.read();
        let executor = self.executor.stats();
        let positions = self.positions.stats();
        StatusSnapshot {
            state: *self.state.read(),
            health: self.health(),
            strategy: config.strategy,
            paper_trading: config.paper_trading,
            open_positions: positions.open,
            executed_trades: executor.executed,
            failed_executions: executor.failed,
            safety_violations: self.safety.violation_count(),
            risk_score: self.safety.last_score(),
            realized_pnl: positions.realized_pnl_total,
            taken_at: chrono::Utc::now(),
        }
    }

    fn health(&self) -> HealthState {
        if self.defunct.load(Ordering::SeqCst)
            || self.latch.is_triggered()
            || *self.state.read() == EngineState::Stopped
        {
            return HealthState::Offline;
        }
        if *self.state.read() != EngineState::Running {
            return HealthState::Degraded;
        }
        if self.executor.is_halted() {
            return HealthState::Degraded;
        }
        if let Some(score) = self.safety.last_score() {
            if score > 60.0 {
                return HealthState::Degraded;
            }
        }
        HealthState::Operational
    }

    async fn update_target_row(&self, target: &SnipeTarget) {
        if let Err(e) = self
            .store
            .update_target_status(&target.id.to_string(), target.status)
            .await
        {
            debug!(target_id = %target.id, error = %e, "target row update failed");
        }
    }

    fn spawn_pattern_task(self: &Arc<Self>, interval_ms: u64) -> TaskHandle {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let weak = Arc::downgrade(self);
        let busy = self.pattern_busy.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(engine) = weak.upgrade() else { break };
                        if busy
                            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                            .is_err()
                        {
                            debug!("pattern cycle still in flight, skipping tick");
                            continue;
                        }
                        engine.pattern_cycle().await;
                        busy.store(false, Ordering::SeqCst);
                    }
                }
            }
        });
        TaskHandle { token, handle }
    }

    fn spawn_safety_task(self: &Arc<Self>, interval_ms: u64) -> TaskHandle {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let weak = Arc::downgrade(self);
        let busy = self.safety_busy.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(engine) = weak.upgrade() else { break };
                        if busy
                            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                            .is_err()
                        {
                            debug!("safety cycle still in flight, skipping tick");
                            continue;
                        }
                        engine.safety_cycle().await;
                        busy.store(false, Ordering::SeqCst);
                    }
                }
            }
        });
        TaskHandle { token, handle }
    }

    /// One opportunity-detection cycle: scan the watchlist, publish
    /// candidates, and run qualifying ones straight through the target
    /// pipeline. Also drives the position monitor's mark refresh.
    async fn pattern_cycle(self: &Arc<Self>) {
        let config = self.config.read().clone();

        // Position upkeep shares the detection cadence
        let closed = self.positions.check_positions().await;
        for position in &closed {
            if let Err(e) = self.store.upsert_position(position).await {
                debug!(position_id = %position.id, error = %e, "position row update failed");
            }
        }

        if config.watchlist.is_empty() {
            return;
        }

        let candidates = self.pattern.detect_patterns(&config.watchlist).await;
        for pattern in candidates {
            self.publish(EngineEvent::PatternDetected {
                pattern: pattern.clone(),
            });

            let assessment = assess_opportunity(&pattern, &config);
            if assessment.recommended_action != RecommendedAction::Execute {
                debug!(
                    symbol = %pattern.symbol,
                    action = ?assessment.recommended_action,
                    reasons = ?assessment.reasons,
                    "assessment declined execution"
                );
                continue;
            }

            let size = match self.exchange.get_balance(QUOTE_ASSET).await {
                Ok(balance) => (balance * config.max_position_size).round_dp(2),
                Err(e) => {
                    warn!(symbol = %pattern.symbol, error = %e, "sizing balance unavailable");
                    continue;
                }
            };
            if size <= Decimal::ZERO {
                warn!(symbol = %pattern.symbol, "zero position size, skipping target");
                continue;
            }

            let target = SnipeTarget::new(
                pattern.symbol.clone(),
                size,
                assessment.adjusted_confidence,
                config.stop_loss_pct,
            );
            let result = self.process_target(target).await;
            if result.success {
                info!(symbol = %pattern.symbol, message = %result.message, "auto-sniped target");
            } else {
                debug!(symbol = %pattern.symbol, message = %result.message, "target not executed");
            }
        }
    }

    /// One safety cycle. A critical failure from the periodic check, or a
    /// composite score in the hard-stop band, auto-invokes the emergency
    /// stop — detached, so the stop can abort this very task without
    /// deadlocking.
    async fn safety_cycle(self: &Arc<Self>) {
        let outcome = self.safety.run_checks().await;
        if outcome.has_critical || outcome.score > snipe_core::HARD_STOP_SCORE {
            let engine = self.clone();
            tokio::spawn(async move {
                engine
                    .emergency_stop("critical safety-check failure")
                    .await;
            });
        }
    }

    /// Event router: fan out to subscribers and auto-stop on critical
    /// safety violations raised by any module.
    async fn route_events(
        weak: Weak<SnipingEngine>,
        mut rx: mpsc::Receiver<EngineEvent>,
        sink: broadcast::Sender<EngineEvent>,
    ) {
        while let Some(event) = rx.recv().await {
            debug!(event = event.name(), "engine event");

            let critical_violation = matches!(
                &event,
                EngineEvent::SafetyViolation {
                    severity: Severity::Critical,
                    ..
                }
            );

            // No subscribers is fine
            let _ = sink.send(event);

            if critical_violation {
                if let Some(engine) = weak.upgrade() {
                    if *engine.state.read() == EngineState::Running
                        && !engine.latch.is_triggered()
                    {
                        warn!("critical safety violation routed, stopping auto-sniping");
                        let _ = engine.stop().await;
                    }
                }
            }
        }
        debug!("event router terminated");
    }
}
