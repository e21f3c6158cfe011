//! Confidence scoring and pattern classification.
//!
//! Each component maps a raw market reading onto a 0-100 scale; the
//! weighted sum (volume 25%, price 30%, liquidity 20%, time-of-day 15%,
//! technicals 10%) is the pattern's confidence. The formulas are fixed
//! rule tables, deliberately cheap to evaluate per symbol per cycle.

use chrono::{DateTime, Timelike, Utc};

use snipe_core::{PatternType, RiskLevel, ScoreBreakdown};
use snipe_exchange::MarketSnapshot;

/// Patterns scoring below this are discarded entirely.
pub const DISCARD_BELOW: f64 = 40.0;

/// Patterns scoring at or above this are published as candidates.
pub const CANDIDATE_AT: f64 = 50.0;

/// Volume-change component (percent change vs. previous window).
pub fn score_volume(change_pct: f64) -> f64 {
    match change_pct {
        c if c >= 300.0 => 100.0,
        c if c >= 150.0 => 85.0,
        c if c >= 75.0 => 70.0,
        c if c >= 30.0 => 55.0,
        c if c >= 0.0 => 40.0,
        c if c >= -25.0 => 25.0,
        _ => 10.0,
    }
}

/// Price-movement component. Moderate upward moves score best; an
/// overextended move is already late.
pub fn score_price(change_pct: f64) -> f64 {
    match change_pct {
        c if c >= 20.0 => 75.0,
        c if c >= 10.0 => 100.0,
        c if c >= 5.0 => 85.0,
        c if c >= 2.0 => 65.0,
        c if c >= 0.0 => 45.0,
        c if c >= -5.0 => 25.0,
        _ => 10.0,
    }
}

/// Liquidity-depth component (quote currency within 1% of mid).
pub fn score_liquidity(depth_usdt: f64) -> f64 {
    match depth_usdt {
        d if d >= 250_000.0 => 100.0,
        d if d >= 100_000.0 => 85.0,
        d if d >= 50_000.0 => 70.0,
        d if d >= 20_000.0 => 50.0,
        d if d >= 5_000.0 => 30.0,
        _ => 10.0,
    }
}

/// Time-of-day component. Liquidity and follow-through concentrate in the
/// overlap of the major sessions.
pub fn score_time_of_day(at: DateTime<Utc>) -> f64 {
    match at.hour() {
        12..=17 => 100.0,
        6..=11 | 18..=21 => 75.0,
        _ => 35.0,
    }
}

/// Technical-indicator component from RSI and MACD histogram.
pub fn score_technical(rsi: f64, macd_histogram: f64) -> f64 {
    let mut score: f64 = 50.0;
    if rsi < 30.0 {
        score += 25.0;
    } else if rsi > 70.0 {
        score -= 20.0;
    }
    if macd_histogram > 0.0 {
        score += 25.0;
    } else if macd_histogram < 0.0 {
        score -= 10.0;
    }
    score.clamp(0.0, 100.0)
}

/// Full component breakdown for one snapshot.
#[must_use]
pub fn breakdown(snapshot: &MarketSnapshot) -> ScoreBreakdown {
    ScoreBreakdown {
        volume: score_volume(snapshot.volume_change_pct),
        price: score_price(snapshot.price_change_pct),
        liquidity: score_liquidity(snapshot.liquidity_depth_usdt),
        time_of_day: score_time_of_day(snapshot.taken_at),
        technical: score_technical(snapshot.rsi, snapshot.macd_histogram),
    }
}

/// Classify the pattern shape by rule thresholds over volume, price, RSI,
/// and MACD. First matching rule wins; `GeneralOpportunity` is the
/// fallback.
#[must_use]
pub fn classify(snapshot: &MarketSnapshot) -> PatternType {
    let volume = snapshot.volume_change_pct;
    let price = snapshot.price_change_pct;
    let rsi = snapshot.rsi;
    let macd = snapshot.macd_histogram;

    if volume >= 150.0 && price >= 5.0 {
        PatternType::BreakoutWithVolume
    } else if volume >= 75.0 && price.abs() < 2.0 {
        PatternType::AccumulationPattern
    } else if rsi < 30.0 && price > 0.0 {
        PatternType::OversoldReversal
    } else if price >= 5.0 && macd > 0.0 {
        PatternType::MomentumContinuation
    } else if rsi > 55.0 && macd > 0.0 && price >= 2.0 {
        PatternType::TechnicalBreakout
    } else {
        PatternType::GeneralOpportunity
    }
}

/// Risk classification from volatility and depth.
#[must_use]
pub fn risk_level(snapshot: &MarketSnapshot) -> RiskLevel {
    if snapshot.volatility_pct > 10.0 || snapshot.liquidity_depth_usdt < 20_000.0 {
        RiskLevel::High
    } else if snapshot.volatility_pct > 5.0 || snapshot.liquidity_depth_usdt < 50_000.0 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use snipe_core::Price;

    fn snapshot() -> MarketSnapshot {
        MarketSnapshot {
            symbol: "NEWUSDT".to_string(),
            last_price: Price::new(dec!(1)),
            volume_change_pct: 0.0,
            price_change_pct: 0.0,
            liquidity_depth_usdt: 50_000.0,
            rsi: 50.0,
            macd_histogram: 0.0,
            volatility_pct: 2.0,
            taken_at: Utc.with_ymd_and_hms(2024, 6, 3, 14, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_component_ranges() {
        // Every component stays within 0-100 for extreme inputs
        for change in [-1e9, -100.0, 0.0, 50.0, 1e9] {
            assert!((0.0..=100.0).contains(&score_volume(change)));
            assert!((0.0..=100.0).contains(&score_price(change)));
        }
        for depth in [0.0, 1e3, 1e6, 1e12] {
            assert!((0.0..=100.0).contains(&score_liquidity(depth)));
        }
        for rsi in [-50.0, 0.0, 50.0, 150.0] {
            for macd in [-10.0, 0.0, 10.0] {
                assert!((0.0..=100.0).contains(&score_technical(rsi, macd)));
            }
        }
    }

    #[test]
    fn test_weighted_total_clamped_under_fuzzed_extremes() {
        // Deterministic sweep over pathological snapshot inputs; the
        // resulting confidence must stay inside [0, 100].
        let extremes = [
            f64::MIN,
            -1e18,
            -1.0,
            0.0,
            1.0,
            1e18,
            f64::MAX,
        ];
        for &volume in &extremes {
            for &price in &extremes {
                for &depth in &extremes {
                    let mut snap = snapshot();
                    snap.volume_change_pct = volume;
                    snap.price_change_pct = price;
                    snap.liquidity_depth_usdt = depth;
                    snap.rsi = price;
                    snap.macd_histogram = volume;

                    let total = breakdown(&snap).weighted_total();
                    assert!(
                        (0.0..=100.0).contains(&total),
                        "confidence {total} out of range"
                    );
                }
            }
        }
    }

    #[test]
    fn test_classification_rules() {
        let mut snap = snapshot();
        snap.volume_change_pct = 200.0;
        snap.price_change_pct = 8.0;
        assert_eq!(classify(&snap), PatternType::BreakoutWithVolume);

        let mut snap = snapshot();
        snap.volume_change_pct = 90.0;
        snap.price_change_pct = 0.5;
        assert_eq!(classify(&snap), PatternType::AccumulationPattern);

        let mut snap = snapshot();
        snap.rsi = 25.0;
        snap.price_change_pct = 1.0;
        assert_eq!(classify(&snap), PatternType::OversoldReversal);

        let mut snap = snapshot();
        snap.price_change_pct = 6.0;
        snap.macd_histogram = 0.4;
        assert_eq!(classify(&snap), PatternType::MomentumContinuation);

        let mut snap = snapshot();
        snap.rsi = 60.0;
        snap.macd_histogram = 0.2;
        snap.price_change_pct = 3.0;
        assert_eq!(classify(&snap), PatternType::TechnicalBreakout);

        assert_eq!(classify(&snapshot()), PatternType::GeneralOpportunity);
    }

    #[test]
    fn test_risk_level() {
        assert_eq!(risk_level(&snapshot()), RiskLevel::Low);

        let mut snap = snapshot();
        snap.volatility_pct = 7.0;
        assert_eq!(risk_level(&snap), RiskLevel::Medium);

        let mut snap = snapshot();
        snap.liquidity_depth_usdt = 10_000.0;
        assert_eq!(risk_level(&snap), RiskLevel::High);

        let mut snap = snapshot();
        snap.volatility_pct = 12.0;
        assert_eq!(risk_level(&snap), RiskLevel::High);
    }

    #[test]
    fn test_time_of_day_bands() {
        let peak = Utc.with_ymd_and_hms(2024, 6, 3, 14, 0, 0).unwrap();
        let shoulder = Utc.with_ymd_and_hms(2024, 6, 3, 7, 0, 0).unwrap();
        let dead = Utc.with_ymd_and_hms(2024, 6, 3, 2, 0, 0).unwrap();

        assert_eq!(score_time_of_day(peak), 100.0);
        assert_eq!(score_time_of_day(shoulder), 75.0);
        assert_eq!(score_time_of_day(dead), 35.0);
    }
}
