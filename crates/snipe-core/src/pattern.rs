//! Pattern detection output types.
//!
//! A `PatternMatch` is ephemeral: produced per scan cycle, consumed by the
//! opportunity assessment, never persisted by the core.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classified pattern type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    BreakoutWithVolume,
    AccumulationPattern,
    OversoldReversal,
    MomentumContinuation,
    TechnicalBreakout,
    GeneralOpportunity,
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BreakoutWithVolume => "breakout_with_volume",
            Self::AccumulationPattern => "accumulation_pattern",
            Self::OversoldReversal => "oversold_reversal",
            Self::MomentumContinuation => "momentum_continuation",
            Self::TechnicalBreakout => "technical_breakout",
            Self::GeneralOpportunity => "general_opportunity",
        };
        write!(f, "{s}")
    }
}

/// Risk classification attached to a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        write!(f, "{s}")
    }
}

/// Per-component confidence scores, retained for audit.
///
/// Each component is on a 0-100 scale before weighting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub volume: f64,
    pub price: f64,
    pub liquidity: f64,
    pub time_of_day: f64,
    pub technical: f64,
}

impl ScoreBreakdown {
    /// Weighted sum: volume 25%, price 30%, liquidity 20%,
    /// time-of-day 15%, technicals 10%. Clamped to [0, 100].
    #[must_use]
    pub fn weighted_total(&self) -> f64 {
        let total = self.volume * 0.25
            + self.price * 0.30
            + self.liquidity * 0.20
            + self.time_of_day * 0.15
            + self.technical * 0.10;
        total.clamp(0.0, 100.0)
    }
}

/// One detected opportunity, produced per scan cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternMatch {
    /// Exchange symbol.
    pub symbol: String,
    /// Classified pattern type.
    pub pattern_type: PatternType,
    /// Overall confidence (0-100).
    pub confidence: f64,
    /// Risk classification.
    pub risk_level: RiskLevel,
    /// Hours of advance notice before the symbol becomes tradable.
    pub advance_notice_hours: f64,
    /// When the pattern was detected.
    pub detected_at: DateTime<Utc>,
    /// After this instant the pattern should not be acted on.
    pub valid_until: DateTime<Utc>,
    /// Per-component scores for audit.
    pub factors: ScoreBreakdown,
}

impl PatternMatch {
    /// Default validity window for a fresh pattern.
    pub const VALIDITY_MINUTES: i64 = 10;

    #[must_use]
    pub fn new(
        symbol: impl Into<String>,
        pattern_type: PatternType,
        confidence: f64,
        risk_level: RiskLevel,
        factors: ScoreBreakdown,
    ) -> Self {
        let now = Utc::now();
        Self {
            symbol: symbol.into(),
            pattern_type,
            confidence: confidence.clamp(0.0, 100.0),
            risk_level,
            advance_notice_hours: 0.0,
            detected_at: now,
            valid_until: now + Duration::minutes(Self::VALIDITY_MINUTES),
            factors,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.valid_until
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_total() {
        let factors = ScoreBreakdown {
            volume: 100.0,
            price: 100.0,
            liquidity: 100.0,
            time_of_day: 100.0,
            technical: 100.0,
        };
        assert!((factors.weighted_total() - 100.0).abs() < f64::EPSILON);

        let half = ScoreBreakdown {
            volume: 50.0,
            price: 50.0,
            liquidity: 50.0,
            time_of_day: 50.0,
            technical: 50.0,
        };
        assert!((half.weighted_total() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_confidence_clamped_on_construction() {
        let factors = ScoreBreakdown {
            volume: 0.0,
            price: 0.0,
            liquidity: 0.0,
            time_of_day: 0.0,
            technical: 0.0,
        };
        let p = PatternMatch::new(
            "AUSDT",
            PatternType::GeneralOpportunity,
            250.0,
            RiskLevel::High,
            factors,
        );
        assert_eq!(p.confidence, 100.0);

        let n = PatternMatch::new(
            "BUSDT",
            PatternType::GeneralOpportunity,
            -10.0,
            RiskLevel::Low,
            factors,
        );
        assert_eq!(n.confidence, 0.0);
    }

    #[test]
    fn test_expiry() {
        let factors = ScoreBreakdown {
            volume: 0.0,
            price: 0.0,
            liquidity: 0.0,
            time_of_day: 0.0,
            technical: 0.0,
        };
        let p = PatternMatch::new(
            "AUSDT",
            PatternType::GeneralOpportunity,
            60.0,
            RiskLevel::Low,
            factors,
        );
        assert!(!p.is_expired(Utc::now()));
        assert!(p.is_expired(Utc::now() + Duration::minutes(11)));
    }
}
