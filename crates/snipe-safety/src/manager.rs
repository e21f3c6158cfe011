//! Safety manager implementation.
//!
//! Five independent checks per cycle, each carrying a severity. The
//! composite risk score is the severity-weighted failure average over all
//! checks, kept in [0, 100]. The bot prioritizes stopping over trading
//! when in doubt.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use snipe_core::{
    composite_risk_score, CheckType, EngineConfig, EngineEvent, RiskBand, SafetyCheck, Severity,
    SnipeTarget,
};
use snipe_exchange::{ExchangeClient, MarketDataFeed};
use snipe_position::PositionMonitor;
use snipe_telemetry::Metrics;

use crate::error::{SafetyError, SafetyResult};
use crate::latch::EmergencyLatch;

/// Quote asset used for balance checks.
const QUOTE_ASSET: &str = "USDT";

/// Outcome of one safety cycle.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub checks: Vec<SafetyCheck>,
    pub score: f64,
    pub band: RiskBand,
    /// A critical-severity check failed this cycle. The orchestrator's
    /// periodic task reacts by invoking its emergency stop.
    pub has_critical: bool,
    /// Critical cycles in a row, for operator telemetry and the
    /// consecutive-failure alarm threshold.
    pub consecutive_criticals: u32,
}

struct CachedOutcome {
    outcome: CheckOutcome,
    at: Instant,
}

/// Runs independent risk checks and gates targets.
pub struct SafetyManager {
    exchange: Arc<dyn ExchangeClient>,
    feed: Arc<dyn MarketDataFeed>,
    positions: Arc<PositionMonitor>,
    events: mpsc::Sender<EngineEvent>,
    config: RwLock<EngineConfig>,
    cache: RwLock<Option<CachedOutcome>>,
    latch: Arc<EmergencyLatch>,
    initialized: AtomicBool,
    violations: AtomicU64,
    consecutive_criticals: AtomicU32,
}

impl SafetyManager {
    #[must_use]
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        feed: Arc<dyn MarketDataFeed>,
        positions: Arc<PositionMonitor>,
        events: mpsc::Sender<EngineEvent>,
        latch: Arc<EmergencyLatch>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            exchange,
            feed,
            positions,
            events,
            config: RwLock::new(config.clone()),
            cache: RwLock::new(None),
            latch,
            initialized: AtomicBool::new(false),
            violations: AtomicU64::new(0),
            consecutive_criticals: AtomicU32::new(0),
        }
    }

    /// Mark the manager initialized and clear stale state.
    pub fn initialize(&self) {
        self.initialized.store(true, Ordering::SeqCst);
        self.consecutive_criticals.store(0, Ordering::SeqCst);
        *self.cache.write() = None;
        info!("safety manager initialized");
    }

    /// Adopt updated configuration. Invalidates the cached check.
    pub fn update_config(&self, config: &EngineConfig) {
        *self.config.write() = config.clone();
        *self.cache.write() = None;
    }

    /// Enter the stopped sub-state (emergency path).
    pub fn mark_stopped(&self) {
        self.initialized.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn violation_count(&self) -> u64 {
        self.violations.load(Ordering::SeqCst)
    }

    /// Last composite score, if a cycle has run.
    #[must_use]
    pub fn last_score(&self) -> Option<f64> {
        self.cache.read().as_ref().map(|c| c.outcome.score)
    }

    /// Run the five checks and compute the composite score.
    pub async fn run_checks(&self) -> CheckOutcome {
        let config = self.config.read().clone();

        let mut checks = Vec::with_capacity(5);
        checks.push(self.check_account_balance(&config).await);
        checks.push(self.check_position_count(&config));
        checks.push(self.check_risk_exposure(&config).await);
        checks.push(self.check_drawdown(&config));
        checks.push(self.check_market_conditions(&config).await);

        let score = composite_risk_score(&checks);
        let band = RiskBand::from_score(score);
        let has_critical = checks
            .iter()
            .any(|c| !c.passed && c.severity == Severity::Critical);

        let consecutive = if has_critical {
            self.consecutive_criticals.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            self.consecutive_criticals.store(0, Ordering::SeqCst);
            0
        };
        if consecutive >= config.safety.max_consecutive_criticals && consecutive > 0 {
            warn!(consecutive, "critical safety failures persist across cycles");
        }

        for check in checks.iter().filter(|c| !c.passed) {
            warn!(
                check = %check.check_type,
                severity = %check.severity,
                message = %check.message,
                "safety check failed"
            );
            self.record_violation(&check.message, check.severity);
        }

        Metrics::risk_score(score);
        if score > snipe_core::HARD_STOP_SCORE {
            warn!(score = format!("{score:.1}"), "risk score in hard-stop band");
        }
        debug!(score = format!("{score:.1}"), band = %band, "safety cycle complete");

        let outcome = CheckOutcome {
            checks,
            score,
            band,
            has_critical,
            consecutive_criticals: consecutive,
        };
        *self.cache.write() = Some(CachedOutcome {
            outcome: outcome.clone(),
            at: Instant::now(),
        });
        outcome
    }

    /// Whether trading may proceed at all.
    ///
    /// False when uninitialized, emergency-stopped, or the composite score
    /// is in the critical band. Re-runs the checks when the cached result
    /// is older than the configured TTL.
    pub async fn is_safe_to_operate(&self) -> bool {
        if !self.initialized.load(Ordering::SeqCst) || self.latch.is_triggered() {
            return false;
        }

        let ttl = Duration::from_secs(self.config.read().safety.check_cache_ttl_secs);
        let cached_score = {
            let cache = self.cache.read();
            cache
                .as_ref()
                .filter(|c| c.at.elapsed() < ttl)
                .map(|c| c.outcome.score)
        };

        let score = match cached_score {
            Some(score) => score,
            None => self.run_checks().await.score,
        };

        RiskBand::from_score(score) != RiskBand::Critical
    }

    /// Gate one target. Aggregates every failing reason into a single
    /// rejection and emits a non-fatal `safety_violation` event.
    pub async fn validate_target(&self, target: &SnipeTarget) -> SafetyResult<()> {
        if !self.initialized.load(Ordering::SeqCst) {
            return Err(SafetyError::Unavailable("not initialized".to_string()));
        }
        if self.latch.is_triggered() {
            return Err(SafetyError::Unavailable("emergency stop active".to_string()));
        }

        let config = self.config.read().clone();
        let mut reasons = Vec::new();

        // Position size vs. the portfolio-fraction cap
        match self.exchange.get_balance(QUOTE_ASSET).await {
            Ok(balance) => {
                let portfolio = balance + self.positions.open_exposure();
                let cap = portfolio * config.max_position_size;
                if target.position_size_usdt > cap {
                    reasons.push(format!(
                        "position size {} exceeds cap {cap:.2}",
                        target.position_size_usdt
                    ));
                }
            }
            Err(e) => {
                reasons.push(format!("balance unavailable: {e}"));
            }
        }

        if target.confidence_score < config.confidence_threshold {
            reasons.push(format!(
                "confidence score too low ({:.1} < {:.1})",
                target.confidence_score, config.confidence_threshold
            ));
        }

        if config
            .safety
            .blacklist
            .iter()
            .any(|s| s.eq_ignore_ascii_case(&target.symbol))
        {
            reasons.push(format!("symbol {} is blacklisted", target.symbol));
        }

        match self.feed.market_snapshot(&target.symbol).await {
            Ok(snapshot) => {
                if snapshot.volatility_pct > config.safety.volatility_cap_pct {
                    reasons.push(format!(
                        "volatility {:.1}% above cap {:.1}%",
                        snapshot.volatility_pct, config.safety.volatility_cap_pct
                    ));
                }
            }
            Err(e) => {
                debug!(symbol = %target.symbol, error = %e, "no snapshot for volatility gate");
            }
        }

        if self.positions.open_count() >= config.max_concurrent_positions {
            reasons.push(format!(
                "maximum concurrent positions reached ({})",
                config.max_concurrent_positions
            ));
        }

        if reasons.is_empty() {
            return Ok(());
        }

        let message = format!("target {} rejected: {}", target.symbol, reasons.join("; "));
        self.record_violation(&message, Severity::Warning);
        Err(SafetyError::TargetRejected(message))
    }

    fn record_violation(&self, message: &str, severity: Severity) {
        self.violations.fetch_add(1, Ordering::SeqCst);
        Metrics::safety_violation(&severity.to_string());
        if self
            .events
            .try_send(EngineEvent::SafetyViolation {
                message: message.to_string(),
                severity,
            })
            .is_err()
        {
            warn!("event channel full, dropping safety_violation event");
        }
    }

    /// Check 1: account balance above the configured minimum.
    async fn check_account_balance(&self, config: &EngineConfig) -> SafetyCheck {
        match self.exchange.get_balance(QUOTE_ASSET).await {
            Ok(balance) => {
                let min = config.safety.min_balance_usdt;
                if balance < min {
                    SafetyCheck::fail(
                        CheckType::AccountBalance,
                        Severity::Critical,
                        format!("balance {balance} below minimum {min}"),
                    )
                } else if balance < min * Decimal::TWO {
                    SafetyCheck::fail(
                        CheckType::AccountBalance,
                        Severity::Warning,
                        format!("balance {balance} approaching minimum {min}"),
                    )
                } else {
                    SafetyCheck::pass(CheckType::AccountBalance, format!("balance {balance}"))
                }
            }
            Err(e) => SafetyCheck::fail(
                CheckType::AccountBalance,
                Severity::Error,
                format!("balance unavailable: {e}"),
            ),
        }
    }

    /// Check 2: open-position count vs. the configured limit.
    fn check_position_count(&self, config: &EngineConfig) -> SafetyCheck {
        let open = self.positions.open_count();
        let max = config.max_concurrent_positions;
        if open > max {
            // Invariant breach: should be impossible
            SafetyCheck::fail(
                CheckType::PositionCount,
                Severity::Critical,
                format!("{open} open positions exceed limit {max}"),
            )
        } else if open == max {
            SafetyCheck::fail(
                CheckType::PositionCount,
                Severity::Warning,
                format!("at position limit ({max})"),
            )
        } else {
            SafetyCheck::pass(CheckType::PositionCount, format!("{open}/{max} positions"))
        }
    }

    /// Check 3: largest single-position exposure vs. the fraction cap.
    async fn check_risk_exposure(&self, config: &EngineConfig) -> SafetyCheck {
        let exposure = self.positions.open_exposure();
        if exposure.is_zero() {
            return SafetyCheck::pass(CheckType::RiskExposure, "no open exposure");
        }

        let balance = match self.exchange.get_balance(QUOTE_ASSET).await {
            Ok(b) => b,
            Err(e) => {
                return SafetyCheck::fail(
                    CheckType::RiskExposure,
                    Severity::Error,
                    format!("balance unavailable: {e}"),
                )
            }
        };

        let portfolio = balance + exposure;
        if portfolio.is_zero() {
            return SafetyCheck::fail(
                CheckType::RiskExposure,
                Severity::Error,
                "portfolio value is zero",
            );
        }

        let largest = self
            .positions
            .open_positions()
            .iter()
            .map(|p| p.entry_notional())
            .max()
            .unwrap_or(Decimal::ZERO);
        let fraction = largest / portfolio;

        if fraction > config.max_position_size {
            SafetyCheck::fail(
                CheckType::RiskExposure,
                Severity::Error,
                format!(
                    "largest position fraction {fraction:.3} exceeds cap {}",
                    config.max_position_size
                ),
            )
        } else {
            SafetyCheck::pass(
                CheckType::RiskExposure,
                format!("largest position fraction {fraction:.3}"),
            )
        }
    }

    /// Check 4: running max drawdown vs. the configured cap.
    fn check_drawdown(&self, config: &EngineConfig) -> SafetyCheck {
        let drawdown = self.positions.max_drawdown();
        let cap = config.safety.max_drawdown_usdt;
        if drawdown >= cap {
            SafetyCheck::fail(
                CheckType::Drawdown,
                Severity::Critical,
                format!("drawdown {drawdown} breached cap {cap}"),
            )
        } else if drawdown >= cap * Decimal::new(75, 2) {
            SafetyCheck::fail(
                CheckType::Drawdown,
                Severity::Warning,
                format!("drawdown {drawdown} approaching cap {cap}"),
            )
        } else {
            SafetyCheck::pass(CheckType::Drawdown, format!("drawdown {drawdown}"))
        }
    }

    /// Check 5: volatility across open-position symbols vs. the cap.
    async fn check_market_conditions(&self, config: &EngineConfig) -> SafetyCheck {
        let symbols: Vec<String> = self
            .positions
            .open_positions()
            .iter()
            .map(|p| p.symbol.clone())
            .collect();
        if symbols.is_empty() {
            return SafetyCheck::pass(CheckType::MarketConditions, "no open markets");
        }

        let mut worst: f64 = 0.0;
        let mut worst_symbol = String::new();
        for symbol in symbols {
            match self.feed.market_snapshot(&symbol).await {
                Ok(snapshot) => {
                    if snapshot.volatility_pct > worst {
                        worst = snapshot.volatility_pct;
                        worst_symbol = symbol;
                    }
                }
                Err(e) => {
                    debug!(%symbol, error = %e, "snapshot unavailable for market check");
                }
            }
        }

        let cap = config.safety.volatility_cap_pct;
        if worst > cap {
            SafetyCheck::fail(
                CheckType::MarketConditions,
                Severity::Error,
                format!("volatility {worst:.1}% on {worst_symbol} above cap {cap:.1}%"),
            )
        } else if worst > cap * 0.75 {
            SafetyCheck::fail(
                CheckType::MarketConditions,
                Severity::Warning,
                format!("volatility {worst:.1}% on {worst_symbol} near cap {cap:.1}%"),
            )
        } else {
            SafetyCheck::pass(
                CheckType::MarketConditions,
                format!("worst volatility {worst:.1}%"),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use snipe_core::Price;
    use snipe_exchange::SimExchange;

    fn setup(config: EngineConfig) -> (Arc<SimExchange>, Arc<PositionMonitor>, SafetyManager) {
        let sim = Arc::new(SimExchange::new());
        let (tx, _rx) = mpsc::channel(64);
        let monitor = Arc::new(PositionMonitor::new(sim.clone(), tx.clone(), &config));
        let manager = SafetyManager::new(
            sim.clone(),
            sim.clone(),
            monitor.clone(),
            tx,
            Arc::new(EmergencyLatch::new()),
            &config,
        );
        manager.initialize();
        (sim, monitor, manager)
    }

    fn target(confidence: f64) -> SnipeTarget {
        SnipeTarget::new("NEWUSDT", dec!(50), confidence, dec!(0.05))
    }

    #[tokio::test]
    async fn test_healthy_account_scores_low() {
        let (sim, _monitor, manager) = setup(EngineConfig::default());
        sim.set_balance("USDT", dec!(10000));

        let outcome = manager.run_checks().await;
        assert!(outcome.score <= 30.0, "score {} not low", outcome.score);
        assert_eq!(outcome.band, RiskBand::Low);
        assert!(!outcome.has_critical);
        assert!(manager.is_safe_to_operate().await);
    }

    #[tokio::test]
    async fn test_low_balance_is_critical() {
        let (sim, _monitor, manager) = setup(EngineConfig::default());
        sim.set_balance("USDT", dec!(10)); // below default 100 minimum

        let outcome = manager.run_checks().await;
        assert!(outcome.has_critical);
        assert!(outcome.score > 0.0);
        assert!((0.0..=100.0).contains(&outcome.score));
    }

    #[tokio::test]
    async fn test_consecutive_criticals_are_counted() {
        let (sim, _monitor, manager) = setup(EngineConfig::default());
        sim.set_balance("USDT", dec!(1));

        assert_eq!(manager.run_checks().await.consecutive_criticals, 1);
        assert_eq!(manager.run_checks().await.consecutive_criticals, 2);
        assert_eq!(manager.run_checks().await.consecutive_criticals, 3);
    }

    #[tokio::test]
    async fn test_passing_cycle_resets_critical_streak() {
        let (sim, _monitor, manager) = setup(EngineConfig::default());

        sim.set_balance("USDT", dec!(1));
        manager.run_checks().await;

        // Recovery cycle resets the streak
        sim.set_balance("USDT", dec!(10000));
        let recovered = manager.run_checks().await;
        assert!(!recovered.has_critical);
        assert_eq!(recovered.consecutive_criticals, 0);

        sim.set_balance("USDT", dec!(1));
        let again = manager.run_checks().await;
        assert!(again.has_critical);
        assert_eq!(again.consecutive_criticals, 1);
    }

    #[tokio::test]
    async fn test_validate_rejects_low_confidence() {
        let (sim, _monitor, manager) = setup(EngineConfig::default());
        sim.set_balance("USDT", dec!(10000));

        // confidence 30 vs. default threshold 75
        let err = manager.validate_target(&target(30.0)).await.unwrap_err();
        assert!(err.to_string().contains("confidence score too low"));
        assert_eq!(manager.violation_count(), 1);
    }

    #[tokio::test]
    async fn test_validate_rejects_blacklisted() {
        let mut config = EngineConfig::default();
        config.safety.blacklist = vec!["NEWUSDT".to_string()];
        let (sim, _monitor, manager) = setup(config);
        sim.set_balance("USDT", dec!(10000));

        let err = manager.validate_target(&target(90.0)).await.unwrap_err();
        assert!(err.to_string().contains("blacklisted"));
    }

    #[tokio::test]
    async fn test_validate_aggregates_reasons() {
        let mut config = EngineConfig::default();
        config.safety.blacklist = vec!["NEWUSDT".to_string()];
        let (sim, _monitor, manager) = setup(config);
        sim.set_balance("USDT", dec!(10)); // tiny portfolio: size cap fails too

        let err = manager.validate_target(&target(10.0)).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("confidence score too low"));
        assert!(message.contains("blacklisted"));
        assert!(message.contains("exceeds cap"));
    }

    #[tokio::test]
    async fn test_validate_rejects_when_at_position_cap() {
        let mut config = EngineConfig::default();
        config.max_concurrent_positions = 1;
        let (sim, monitor, manager) = setup(config);
        sim.set_balance("USDT", dec!(100000));

        let position = snipe_core::TradingPosition::new(
            "AUSDT",
            snipe_core::OrderSide::Buy,
            snipe_core::Qty::new(dec!(1)),
            Price::new(dec!(10)),
            Price::new(dec!(9)),
            None,
            snipe_core::StrategyMode::Balanced,
        );
        monitor.add_position(position).unwrap();

        let err = manager.validate_target(&target(90.0)).await.unwrap_err();
        assert!(err.to_string().contains("maximum concurrent positions"));
    }

    #[tokio::test]
    async fn test_validate_rejects_high_volatility() {
        let (sim, _monitor, manager) = setup(EngineConfig::default());
        sim.set_balance("USDT", dec!(10000));
        let mut snapshot = SimExchange::neutral_snapshot("NEWUSDT", Price::new(dec!(1)));
        snapshot.volatility_pct = 40.0; // above default 15% cap
        sim.set_snapshot(snapshot);

        let err = manager.validate_target(&target(90.0)).await.unwrap_err();
        assert!(err.to_string().contains("volatility"));
    }

    #[tokio::test]
    async fn test_not_safe_when_latch_triggered() {
        let (sim, _monitor, manager) = setup(EngineConfig::default());
        sim.set_balance("USDT", dec!(10000));
        assert!(manager.is_safe_to_operate().await);

        manager.latch.trigger("test halt");
        assert!(!manager.is_safe_to_operate().await);
    }

    #[tokio::test]
    async fn test_cached_score_reused() {
        let (sim, _monitor, manager) = setup(EngineConfig::default());
        sim.set_balance("USDT", dec!(10000));

        manager.run_checks().await;
        let score = manager.last_score().unwrap();

        // Balance collapses, but the cache is fresh: still safe
        sim.set_balance("USDT", dec!(1));
        assert!(manager.is_safe_to_operate().await);
        assert_eq!(manager.last_score().unwrap(), score);
    }
}
