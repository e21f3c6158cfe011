//! Safety check types and risk score banding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Above this composite score the hard-stop band begins.
pub const HARD_STOP_SCORE: f64 = 95.0;

/// Severity attached to a safety check result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// Weight used in the composite score denominator.
    #[must_use]
    pub fn weight(&self) -> f64 {
        match self {
            Self::Info => 1.0,
            Self::Warning => 1.5,
            Self::Error => 2.0,
            Self::Critical => 3.0,
        }
    }

    /// Score contributed by a failed check of this severity.
    #[must_use]
    pub fn failure_score(&self) -> f64 {
        match self {
            Self::Info => 20.0,
            Self::Warning => 60.0,
            Self::Error => 80.0,
            Self::Critical => 100.0,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// The five independent checks run each safety cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    AccountBalance,
    PositionCount,
    RiskExposure,
    Drawdown,
    MarketConditions,
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AccountBalance => "account_balance",
            Self::PositionCount => "position_count",
            Self::RiskExposure => "risk_exposure",
            Self::Drawdown => "drawdown",
            Self::MarketConditions => "market_conditions",
        };
        write!(f, "{s}")
    }
}

/// Result of one safety check. Transient, produced per cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyCheck {
    pub check_type: CheckType,
    pub passed: bool,
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

impl SafetyCheck {
    #[must_use]
    pub fn pass(check_type: CheckType, message: impl Into<String>) -> Self {
        Self {
            check_type,
            passed: true,
            message: message.into(),
            severity: Severity::Info,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn fail(check_type: CheckType, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            check_type,
            passed: false,
            message: message.into(),
            severity,
            timestamp: Utc::now(),
        }
    }
}

/// Composite risk score band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskBand {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskBand {
    /// Band thresholds: low <=30, medium <=60, high <=85, critical above.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score <= 30.0 {
            Self::Low
        } else if score <= 60.0 {
            Self::Medium
        } else if score <= 85.0 {
            Self::High
        } else {
            Self::Critical
        }
    }
}

impl fmt::Display for RiskBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// Compute the composite risk score over a set of checks.
///
/// score = sum(weight * failure_score for failed) / sum(weight for all),
/// which keeps the result in [0, 100]. An empty set scores 0.
#[must_use]
pub fn composite_risk_score(checks: &[SafetyCheck]) -> f64 {
    if checks.is_empty() {
        return 0.0;
    }
    let mut weighted_failures = 0.0;
    let mut total_weight = 0.0;
    for check in checks {
        let weight = check.severity.weight();
        total_weight += weight;
        if !check.passed {
            weighted_failures += weight * check.severity.failure_score();
        }
    }
    (weighted_failures / total_weight).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_passed_scores_zero() {
        let checks = vec![
            SafetyCheck::pass(CheckType::AccountBalance, "ok"),
            SafetyCheck::pass(CheckType::PositionCount, "ok"),
        ];
        assert_eq!(composite_risk_score(&checks), 0.0);
    }

    #[test]
    fn test_all_critical_failed_scores_100() {
        let checks = vec![
            SafetyCheck::fail(CheckType::AccountBalance, Severity::Critical, "bad"),
            SafetyCheck::fail(CheckType::Drawdown, Severity::Critical, "bad"),
        ];
        assert_eq!(composite_risk_score(&checks), 100.0);
    }

    #[test]
    fn test_score_in_range_and_monotonic() {
        let mut checks = vec![
            SafetyCheck::pass(CheckType::AccountBalance, "ok"),
            SafetyCheck::pass(CheckType::PositionCount, "ok"),
            SafetyCheck::pass(CheckType::RiskExposure, "ok"),
        ];
        let base = composite_risk_score(&checks);
        assert!((0.0..=100.0).contains(&base));

        // Adding a failing check never decreases the score
        checks.push(SafetyCheck::fail(
            CheckType::Drawdown,
            Severity::Warning,
            "drawdown high",
        ));
        let with_warning = composite_risk_score(&checks);
        assert!(with_warning >= base);
        assert!((0.0..=100.0).contains(&with_warning));

        // Upgrading the failure severity never decreases it either
        checks.pop();
        checks.push(SafetyCheck::fail(
            CheckType::Drawdown,
            Severity::Critical,
            "drawdown critical",
        ));
        let with_critical = composite_risk_score(&checks);
        assert!(with_critical >= with_warning);
        assert!((0.0..=100.0).contains(&with_critical));
    }

    #[test]
    fn test_band_thresholds() {
        assert_eq!(RiskBand::from_score(0.0), RiskBand::Low);
        assert_eq!(RiskBand::from_score(30.0), RiskBand::Low);
        assert_eq!(RiskBand::from_score(45.0), RiskBand::Medium);
        assert_eq!(RiskBand::from_score(85.0), RiskBand::High);
        assert_eq!(RiskBand::from_score(86.0), RiskBand::Critical);
        assert_eq!(RiskBand::from_score(100.0), RiskBand::Critical);
    }
}
