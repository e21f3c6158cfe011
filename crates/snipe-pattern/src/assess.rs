//! Second-pass opportunity assessment.
//!
//! Independent of detection scoring: starts from the pattern's confidence,
//! applies context adjustments, and yields a recommended action with a
//! human-readable reasons list for audit.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use snipe_core::{EngineConfig, PatternMatch, RiskLevel, StrategyMode};

/// Recommended action from the assessment gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendedAction {
    Execute,
    Wait,
    Skip,
}

/// Assessment output: adjusted confidence plus audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunityAssessment {
    pub symbol: String,
    /// Confidence after adjustments, clamped to [0, 100].
    pub adjusted_confidence: f64,
    pub recommended_action: RecommendedAction,
    /// One line per adjustment and for the final decision.
    pub reasons: Vec<String>,
}

/// Active trading window (UTC hours, inclusive start / exclusive end).
const ACTIVE_HOURS: (u32, u32) = (6, 22);

/// Below the threshold but within this margin: wait instead of skip.
const WAIT_MARGIN: f64 = 10.0;

/// Assess a pattern against the current configuration.
#[must_use]
pub fn assess_opportunity(pattern: &PatternMatch, config: &EngineConfig) -> OpportunityAssessment {
    assess_opportunity_at(pattern, config, Utc::now())
}

/// Assessment with an explicit clock, for deterministic tests.
#[must_use]
pub fn assess_opportunity_at(
    pattern: &PatternMatch,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> OpportunityAssessment {
    let mut confidence = pattern.confidence;
    let mut reasons = Vec::new();
    reasons.push(format!("base confidence {:.1}", pattern.confidence));

    match pattern.risk_level {
        RiskLevel::Low => {
            confidence += 5.0;
            reasons.push("low risk: +5".to_string());
        }
        RiskLevel::Medium => {}
        RiskLevel::High => {
            confidence -= 10.0;
            reasons.push("high risk: -10".to_string());
        }
    }

    let hour = now.hour();
    if (ACTIVE_HOURS.0..ACTIVE_HOURS.1).contains(&hour) {
        confidence += 3.0;
        reasons.push("active trading hours: +3".to_string());
    } else {
        confidence -= 5.0;
        reasons.push("outside active trading hours: -5".to_string());
    }

    if config.paper_trading {
        confidence += 5.0;
        reasons.push("paper trading leniency: +5".to_string());
    }

    match config.strategy {
        StrategyMode::Conservative => {
            confidence -= 5.0;
            reasons.push("conservative strategy: -5".to_string());
        }
        StrategyMode::Balanced => {}
        StrategyMode::Aggressive => {
            confidence += 5.0;
            reasons.push("aggressive strategy: +5".to_string());
        }
    }

    let adjusted = confidence.clamp(0.0, 100.0);

    let action = if pattern.is_expired(now) {
        reasons.push("pattern expired: skip".to_string());
        RecommendedAction::Skip
    } else if adjusted >= config.confidence_threshold {
        reasons.push(format!(
            "adjusted {:.1} >= threshold {:.1}: execute",
            adjusted, config.confidence_threshold
        ));
        RecommendedAction::Execute
    } else if adjusted >= config.confidence_threshold - WAIT_MARGIN {
        reasons.push(format!(
            "adjusted {:.1} within {WAIT_MARGIN:.0} of threshold {:.1}: wait",
            adjusted, config.confidence_threshold
        ));
        RecommendedAction::Wait
    } else {
        reasons.push(format!(
            "adjusted {:.1} below threshold {:.1}: skip",
            adjusted, config.confidence_threshold
        ));
        RecommendedAction::Skip
    };

    OpportunityAssessment {
        symbol: pattern.symbol.clone(),
        adjusted_confidence: adjusted,
        recommended_action: action,
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use snipe_core::{PatternType, ScoreBreakdown};

    fn pattern(confidence: f64, risk: RiskLevel) -> PatternMatch {
        PatternMatch::new(
            "NEWUSDT",
            PatternType::BreakoutWithVolume,
            confidence,
            risk,
            ScoreBreakdown {
                volume: confidence,
                price: confidence,
                liquidity: confidence,
                time_of_day: confidence,
                technical: confidence,
            },
        )
    }

    fn active_hour() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 14, 0, 0).unwrap()
    }

    fn dead_hour() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, 3, 0, 0).unwrap()
    }

    #[test]
    fn test_execute_above_threshold() {
        let mut config = EngineConfig::default();
        config.confidence_threshold = 70.0;
        config.paper_trading = false;

        // 80 base, low risk +5, active +3 = 88
        let result = assess_opportunity_at(&pattern(80.0, RiskLevel::Low), &config, active_hour());
        assert_eq!(result.recommended_action, RecommendedAction::Execute);
        assert!((result.adjusted_confidence - 88.0).abs() < 1e-9);
        assert!(result.reasons.iter().any(|r| r.contains("low risk")));
    }

    #[test]
    fn test_high_risk_penalty_can_demote() {
        let mut config = EngineConfig::default();
        config.confidence_threshold = 75.0;
        config.paper_trading = false;

        // 78 base, high risk -10, dead hours -5 = 63: below wait margin
        let result = assess_opportunity_at(&pattern(78.0, RiskLevel::High), &config, dead_hour());
        assert_eq!(result.recommended_action, RecommendedAction::Skip);
    }

    #[test]
    fn test_wait_band() {
        let mut config = EngineConfig::default();
        config.confidence_threshold = 75.0;
        config.paper_trading = false;

        // 65 base, medium risk, active +3 = 68: within 10 of threshold
        let result =
            assess_opportunity_at(&pattern(65.0, RiskLevel::Medium), &config, active_hour());
        assert_eq!(result.recommended_action, RecommendedAction::Wait);
    }

    #[test]
    fn test_strategy_bias() {
        let mut config = EngineConfig::default();
        config.confidence_threshold = 80.0;
        config.paper_trading = false;

        // 75 base, medium risk, active +3 = 78: short of 80 for balanced...
        config.strategy = StrategyMode::Balanced;
        let balanced =
            assess_opportunity_at(&pattern(75.0, RiskLevel::Medium), &config, active_hour());
        assert_eq!(balanced.recommended_action, RecommendedAction::Wait);

        // ...but aggressive +5 clears it
        config.strategy = StrategyMode::Aggressive;
        let aggressive =
            assess_opportunity_at(&pattern(75.0, RiskLevel::Medium), &config, active_hour());
        assert_eq!(aggressive.recommended_action, RecommendedAction::Execute);

        // and conservative -5 falls further behind
        config.strategy = StrategyMode::Conservative;
        let conservative =
            assess_opportunity_at(&pattern(75.0, RiskLevel::Medium), &config, active_hour());
        assert!(conservative.adjusted_confidence < balanced.adjusted_confidence);
    }

    #[test]
    fn test_adjustments_clamp() {
        let mut config = EngineConfig::default();
        config.strategy = StrategyMode::Aggressive;
        config.paper_trading = true;

        let result = assess_opportunity_at(&pattern(99.0, RiskLevel::Low), &config, active_hour());
        assert!(result.adjusted_confidence <= 100.0);
    }

    #[test]
    fn test_expired_pattern_skipped() {
        let config = EngineConfig::default();
        let p = pattern(95.0, RiskLevel::Low);
        let later = p.valid_until + chrono::Duration::minutes(1);

        let result = assess_opportunity_at(&p, &config, later);
        assert_eq!(result.recommended_action, RecommendedAction::Skip);
        assert!(result.reasons.iter().any(|r| r.contains("expired")));
    }
}
