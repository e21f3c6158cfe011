//! Engine configuration.
//!
//! Settings are validated at construction and treated as immutable per
//! cycle. Runtime updates go through `ConfigPatch`, which merges into a
//! copy and revalidates before the engine swaps it in.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CoreError, CoreResult};

/// Strategy mode. Biases order type, assessment scoring, and stop behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyMode {
    Conservative,
    #[default]
    Balanced,
    Aggressive,
}

impl fmt::Display for StrategyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Conservative => "conservative",
            Self::Balanced => "balanced",
            Self::Aggressive => "aggressive",
        };
        write!(f, "{s}")
    }
}

/// Safety limits consumed by the safety manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyLimits {
    /// Minimum free quote balance required to keep operating.
    #[serde(default = "default_min_balance_usdt")]
    pub min_balance_usdt: Decimal,
    /// Maximum tolerated drawdown (peak-to-current) in quote currency.
    #[serde(default = "default_max_drawdown_usdt")]
    pub max_drawdown_usdt: Decimal,
    /// Maximum tolerated market volatility (percent) for new targets.
    #[serde(default = "default_volatility_cap_pct")]
    pub volatility_cap_pct: f64,
    /// Symbols never traded, regardless of score.
    #[serde(default)]
    pub blacklist: Vec<String>,
    /// Consecutive critical safety-cycle failures before emergency stop.
    #[serde(default = "default_max_consecutive_criticals")]
    pub max_consecutive_criticals: u32,
    /// How long a cached safety-check result stays valid.
    #[serde(default = "default_check_cache_ttl_secs")]
    pub check_cache_ttl_secs: u64,
}

fn default_min_balance_usdt() -> Decimal {
    Decimal::from(100)
}

fn default_max_drawdown_usdt() -> Decimal {
    Decimal::from(500)
}

fn default_volatility_cap_pct() -> f64 {
    15.0
}

fn default_max_consecutive_criticals() -> u32 {
    3
}

fn default_check_cache_ttl_secs() -> u64 {
    300
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            min_balance_usdt: default_min_balance_usdt(),
            max_drawdown_usdt: default_max_drawdown_usdt(),
            volatility_cap_pct: default_volatility_cap_pct(),
            blacklist: Vec::new(),
            max_consecutive_criticals: default_max_consecutive_criticals(),
            check_cache_ttl_secs: default_check_cache_ttl_secs(),
        }
    }
}

/// Execution limits consumed by the trade executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionLimits {
    /// Timeout for any single blocking exchange call.
    #[serde(default = "default_order_timeout_ms")]
    pub order_timeout_ms: u64,
    /// Minimum spacing between dispatched orders. A floor independent of
    /// any external adaptive limiter.
    #[serde(default = "default_min_order_spacing_ms")]
    pub min_order_spacing_ms: u64,
    /// Maximum dispatch attempts for retryable failures.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    /// Initial retry backoff; doubles per attempt.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Backoff cap.
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// LIMIT order discount below current price (fraction).
    #[serde(default = "default_limit_discount")]
    pub limit_discount: Decimal,
    /// Connectivity probe considered stale after this long.
    #[serde(default = "default_connectivity_ttl_secs")]
    pub connectivity_ttl_secs: u64,
}

fn default_order_timeout_ms() -> u64 {
    20_000
}

fn default_min_order_spacing_ms() -> u64 {
    250
}

fn default_max_retry_attempts() -> u32 {
    5
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_retry_max_delay_ms() -> u64 {
    8_000
}

fn default_limit_discount() -> Decimal {
    Decimal::new(2, 3) // 0.002 = 0.2%
}

fn default_connectivity_ttl_secs() -> u64 {
    30
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            order_timeout_ms: default_order_timeout_ms(),
            min_order_spacing_ms: default_min_order_spacing_ms(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            limit_discount: default_limit_discount(),
            connectivity_ttl_secs: default_connectivity_ttl_secs(),
        }
    }
}

/// Validated engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Master enable flag. `start()` refuses to run when false.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub strategy: StrategyMode,
    /// Minimum confidence score (0-100) for a target to pass validation.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Maximum position size as a fraction of portfolio value.
    #[serde(default = "default_max_position_size")]
    pub max_position_size: Decimal,
    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: usize,
    /// Stop-loss distance as a fraction of entry price.
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: Decimal,
    /// Take-profit distance as a fraction of entry price.
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: Decimal,
    #[serde(default = "default_pattern_detection_interval_ms")]
    pub pattern_detection_interval_ms: u64,
    #[serde(default = "default_safety_check_interval_ms")]
    pub safety_check_interval_ms: u64,
    /// Simulated execution path; no real order placed.
    #[serde(default = "default_paper_trading")]
    pub paper_trading: bool,
    /// Candidate symbols scanned each pattern-detection cycle.
    #[serde(default)]
    pub watchlist: Vec<String>,
    #[serde(default)]
    pub safety: SafetyLimits,
    #[serde(default)]
    pub executor: ExecutionLimits,
}

fn default_enabled() -> bool {
    true
}

fn default_confidence_threshold() -> f64 {
    75.0
}

fn default_max_position_size() -> Decimal {
    Decimal::new(10, 2) // 0.10 = 10%
}

fn default_max_concurrent_positions() -> usize {
    3
}

fn default_stop_loss_pct() -> Decimal {
    Decimal::new(5, 2) // 0.05 = 5%
}

fn default_take_profit_pct() -> Decimal {
    Decimal::new(10, 2) // 0.10 = 10%
}

fn default_pattern_detection_interval_ms() -> u64 {
    30_000
}

fn default_safety_check_interval_ms() -> u64 {
    60_000
}

fn default_paper_trading() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            strategy: StrategyMode::default(),
            confidence_threshold: default_confidence_threshold(),
            max_position_size: default_max_position_size(),
            max_concurrent_positions: default_max_concurrent_positions(),
            stop_loss_pct: default_stop_loss_pct(),
            take_profit_pct: default_take_profit_pct(),
            pattern_detection_interval_ms: default_pattern_detection_interval_ms(),
            safety_check_interval_ms: default_safety_check_interval_ms(),
            paper_trading: default_paper_trading(),
            watchlist: Vec::new(),
            safety: SafetyLimits::default(),
            executor: ExecutionLimits::default(),
        }
    }
}

impl EngineConfig {
    /// Validate field ranges. Called at construction and after every merge.
    pub fn validate(&self) -> CoreResult<()> {
        if !(0.0..=100.0).contains(&self.confidence_threshold) {
            return Err(CoreError::InvalidConfig(format!(
                "confidence_threshold out of range: {}",
                self.confidence_threshold
            )));
        }
        if self.max_position_size <= Decimal::ZERO || self.max_position_size > Decimal::ONE {
            return Err(CoreError::InvalidConfig(format!(
                "max_position_size must be a fraction in (0, 1]: {}",
                self.max_position_size
            )));
        }
        if self.max_concurrent_positions == 0 {
            return Err(CoreError::InvalidConfig(
                "max_concurrent_positions must be at least 1".to_string(),
            ));
        }
        if self.stop_loss_pct <= Decimal::ZERO || self.stop_loss_pct >= Decimal::ONE {
            return Err(CoreError::InvalidConfig(format!(
                "stop_loss_pct must be a fraction in (0, 1): {}",
                self.stop_loss_pct
            )));
        }
        if self.take_profit_pct <= Decimal::ZERO || self.take_profit_pct > Decimal::ONE {
            return Err(CoreError::InvalidConfig(format!(
                "take_profit_pct must be a fraction in (0, 1]: {}",
                self.take_profit_pct
            )));
        }
        if self.pattern_detection_interval_ms < 100 {
            return Err(CoreError::InvalidConfig(
                "pattern_detection_interval_ms must be at least 100".to_string(),
            ));
        }
        if self.safety_check_interval_ms < 100 {
            return Err(CoreError::InvalidConfig(
                "safety_check_interval_ms must be at least 100".to_string(),
            ));
        }
        if self.executor.order_timeout_ms == 0 {
            return Err(CoreError::InvalidConfig(
                "order_timeout_ms must be positive".to_string(),
            ));
        }
        if self.executor.max_retry_attempts == 0 {
            return Err(CoreError::InvalidConfig(
                "max_retry_attempts must be at least 1".to_string(),
            ));
        }
        if self.executor.retry_base_delay_ms == 0
            || self.executor.retry_max_delay_ms < self.executor.retry_base_delay_ms
        {
            return Err(CoreError::InvalidConfig(
                "retry delays must be positive with max >= base".to_string(),
            ));
        }
        Ok(())
    }
}

/// Partial configuration update. `None` fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigPatch {
    pub enabled: Option<bool>,
    pub strategy: Option<StrategyMode>,
    pub confidence_threshold: Option<f64>,
    pub max_position_size: Option<Decimal>,
    pub max_concurrent_positions: Option<usize>,
    pub stop_loss_pct: Option<Decimal>,
    pub take_profit_pct: Option<Decimal>,
    pub pattern_detection_interval_ms: Option<u64>,
    pub safety_check_interval_ms: Option<u64>,
    pub paper_trading: Option<bool>,
    pub watchlist: Option<Vec<String>>,
}

impl ConfigPatch {
    /// Merge into a copy of `base` and validate the result.
    pub fn apply(&self, base: &EngineConfig) -> CoreResult<EngineConfig> {
        let mut merged = base.clone();
        if let Some(enabled) = self.enabled {
            merged.enabled = enabled;
        }
        if let Some(strategy) = self.strategy {
            merged.strategy = strategy;
        }
        if let Some(threshold) = self.confidence_threshold {
            merged.confidence_threshold = threshold;
        }
        if let Some(size) = self.max_position_size {
            merged.max_position_size = size;
        }
        if let Some(count) = self.max_concurrent_positions {
            merged.max_concurrent_positions = count;
        }
        if let Some(stop) = self.stop_loss_pct {
            merged.stop_loss_pct = stop;
        }
        if let Some(take) = self.take_profit_pct {
            merged.take_profit_pct = take;
        }
        if let Some(interval) = self.pattern_detection_interval_ms {
            merged.pattern_detection_interval_ms = interval;
        }
        if let Some(interval) = self.safety_check_interval_ms {
            merged.safety_check_interval_ms = interval;
        }
        if let Some(paper) = self.paper_trading {
            merged.paper_trading = paper;
        }
        if let Some(ref watchlist) = self.watchlist {
            merged.watchlist = watchlist.clone();
        }
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_threshold() {
        let mut config = EngineConfig::default();
        config.confidence_threshold = 150.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_positions() {
        let mut config = EngineConfig::default();
        config.max_concurrent_positions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_oversize_fraction() {
        let mut config = EngineConfig::default();
        config.max_position_size = dec!(1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_patch_merges_and_validates() {
        let base = EngineConfig::default();
        let patch = ConfigPatch {
            confidence_threshold: Some(60.0),
            max_concurrent_positions: Some(5),
            ..ConfigPatch::default()
        };
        let merged = patch.apply(&base).unwrap();
        assert_eq!(merged.confidence_threshold, 60.0);
        assert_eq!(merged.max_concurrent_positions, 5);
        // Untouched fields keep base values
        assert_eq!(merged.stop_loss_pct, base.stop_loss_pct);
    }

    #[test]
    fn test_patch_rejects_invalid_merge() {
        let base = EngineConfig::default();
        let patch = ConfigPatch {
            confidence_threshold: Some(-1.0),
            ..ConfigPatch::default()
        };
        assert!(patch.apply(&base).is_err());
    }
}
