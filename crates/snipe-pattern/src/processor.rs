//! Pattern processor: the per-cycle scan over candidate symbols.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use snipe_core::PatternMatch;
use snipe_exchange::MarketDataFeed;
use snipe_telemetry::Metrics;

use crate::score;

/// A symbol is not rescored within this window of a previous scan.
const DEDUP_WINDOW: Duration = Duration::from_secs(60);

/// Scans candidate symbols, scores and classifies opportunities.
///
/// Holds the most recent scan's pattern list and a short-lived
/// de-duplication set per symbol. All interior state is lock-protected;
/// the orchestrator guarantees at most one detection cycle in flight.
pub struct PatternProcessor {
    feed: Arc<dyn MarketDataFeed>,
    /// Symbol -> last time it was scored.
    recently_scored: Mutex<HashMap<String, Instant>>,
    /// Patterns (score >= discard floor) from the most recent cycle.
    last_scan: Mutex<Vec<PatternMatch>>,
}

impl PatternProcessor {
    #[must_use]
    pub fn new(feed: Arc<dyn MarketDataFeed>) -> Self {
        Self {
            feed,
            recently_scored: Mutex::new(HashMap::new()),
            last_scan: Mutex::new(Vec::new()),
        }
    }

    /// Run one detection cycle over `symbols`.
    ///
    /// Returns the candidates (score >= 50). Patterns scoring below 40 are
    /// discarded entirely; the 40-50 band is retained in the recent-scan
    /// list for status queries but not published. Feed failures skip the
    /// symbol; the cycle itself never fails.
    pub async fn detect_patterns(&self, symbols: &[String]) -> Vec<PatternMatch> {
        self.prune_dedup();

        let mut retained = Vec::new();
        let mut candidates = Vec::new();

        for symbol in symbols {
            if self.is_recently_scored(symbol) {
                debug!(%symbol, "skipping recently scored symbol");
                continue;
            }

            let snapshot = match self.feed.market_snapshot(symbol).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(%symbol, error = %e, "market snapshot unavailable, skipping");
                    continue;
                }
            };

            self.recently_scored
                .lock()
                .insert(symbol.clone(), Instant::now());

            let factors = score::breakdown(&snapshot);
            let confidence = factors.weighted_total();
            if confidence < score::DISCARD_BELOW {
                debug!(%symbol, confidence, "pattern below discard floor");
                continue;
            }

            let pattern = PatternMatch::new(
                symbol.clone(),
                score::classify(&snapshot),
                confidence,
                score::risk_level(&snapshot),
                factors,
            );

            if confidence >= score::CANDIDATE_AT {
                info!(
                    %symbol,
                    pattern_type = %pattern.pattern_type,
                    confidence = format!("{confidence:.1}"),
                    risk = %pattern.risk_level,
                    "pattern candidate"
                );
                Metrics::pattern_detected(&pattern.pattern_type.to_string());
                candidates.push(pattern.clone());
            }
            retained.push(pattern);
        }

        *self.last_scan.lock() = retained;
        candidates
    }

    /// Patterns retained from the most recent cycle.
    #[must_use]
    pub fn recent_patterns(&self) -> Vec<PatternMatch> {
        self.last_scan.lock().clone()
    }

    fn is_recently_scored(&self, symbol: &str) -> bool {
        self.recently_scored
            .lock()
            .get(symbol)
            .map(|at| at.elapsed() < DEDUP_WINDOW)
            .unwrap_or(false)
    }

    fn prune_dedup(&self) {
        self.recently_scored
            .lock()
            .retain(|_, at| at.elapsed() < DEDUP_WINDOW);
    }

    /// Drop the de-duplication state (used when configuration changes the
    /// watchlist, so new symbols score immediately).
    pub fn reset_dedup(&self) {
        self.recently_scored.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use snipe_core::Price;
    use snipe_exchange::{MarketSnapshot, SimExchange};

    fn hot_snapshot(symbol: &str) -> MarketSnapshot {
        MarketSnapshot {
            volume_change_pct: 200.0,
            price_change_pct: 8.0,
            liquidity_depth_usdt: 120_000.0,
            rsi: 60.0,
            macd_histogram: 0.5,
            volatility_pct: 4.0,
            ..SimExchange::neutral_snapshot(symbol, Price::new(dec!(2)))
        }
    }

    fn cold_snapshot(symbol: &str) -> MarketSnapshot {
        MarketSnapshot {
            volume_change_pct: -60.0,
            price_change_pct: -12.0,
            liquidity_depth_usdt: 1_000.0,
            rsi: 80.0,
            macd_histogram: -1.0,
            volatility_pct: 20.0,
            ..SimExchange::neutral_snapshot(symbol, Price::new(dec!(2)))
        }
    }

    #[tokio::test]
    async fn test_hot_symbol_becomes_candidate() {
        let sim = Arc::new(SimExchange::new());
        sim.set_snapshot(hot_snapshot("AUSDT"));

        let processor = PatternProcessor::new(sim);
        let candidates = processor
            .detect_patterns(&["AUSDT".to_string()])
            .await;

        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].confidence >= score::CANDIDATE_AT);
    }

    #[tokio::test]
    async fn test_cold_symbol_discarded_entirely() {
        let sim = Arc::new(SimExchange::new());
        sim.set_snapshot(cold_snapshot("BUSDT"));

        let processor = PatternProcessor::new(sim);
        let candidates = processor
            .detect_patterns(&["BUSDT".to_string()])
            .await;

        assert!(candidates.is_empty());
        assert!(processor.recent_patterns().is_empty());
    }

    #[tokio::test]
    async fn test_dedup_skips_second_scan() {
        let sim = Arc::new(SimExchange::new());
        sim.set_snapshot(hot_snapshot("AUSDT"));

        let processor = PatternProcessor::new(sim);
        let first = processor.detect_patterns(&["AUSDT".to_string()]).await;
        assert_eq!(first.len(), 1);

        // Second cycle inside the window: symbol skipped
        let second = processor.detect_patterns(&["AUSDT".to_string()]).await;
        assert!(second.is_empty());

        processor.reset_dedup();
        let third = processor.detect_patterns(&["AUSDT".to_string()]).await;
        assert_eq!(third.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_feed_data_skips_symbol() {
        let sim = Arc::new(SimExchange::new());
        sim.set_snapshot(hot_snapshot("AUSDT"));
        // "MISSING" has no snapshot scripted

        let processor = PatternProcessor::new(sim);
        let candidates = processor
            .detect_patterns(&["MISSING".to_string(), "AUSDT".to_string()])
            .await;

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].symbol, "AUSDT");
    }
}
