use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::domain::errors::LlmError;
use crate::domain::ports::LlmAdapter;
use crate::domain::types::{AdversaryMode, AdversaryResult, Archetype, MarketSnapshot, Signal};

const CONSECUTIVE_ERROR_LIMIT: u32 = 3;

/// Classifies a behavioral archetype from market indicators and emits a
/// contrarian signal plus liquidity zones. Falls back to a heuristic for a
/// single call on a transient error, and permanently to shadow mode after a
/// regional block or three consecutive errors.
pub struct BehavioralAdversary {
    llm: Option<Arc<dyn LlmAdapter>>,
    consecutive_errors: AtomicU32,
    shadow_latched: AtomicBool,
}

impl BehavioralAdversary {
    pub fn new(llm: Option<Arc<dyn LlmAdapter>>) -> Self {
        Self { llm, consecutive_errors: AtomicU32::new(0), shadow_latched: AtomicBool::new(false) }
    }

    pub async fn analyze(&self, market: MarketSnapshot, sentiment_label: &str) -> AdversaryResult {
        let started = Instant::now();

        if self.shadow_latched.load(Ordering::SeqCst) || self.llm.is_none() {
            return self.heuristic(market, sentiment_label, AdversaryMode::Shadow, started);
        }

        match self.try_api(market, sentiment_label).await {
            Ok(result) => {
                self.consecutive_errors.store(0, Ordering::SeqCst);
                result
            }
            Err(LlmError::RegionalBlock) => {
                self.shadow_latched.store(true, Ordering::SeqCst);
                self.heuristic(market, sentiment_label, AdversaryMode::Shadow, started)
            }
            Err(_) => {
                let errors = self.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1;
                if errors >= CONSECUTIVE_ERROR_LIMIT {
                    self.shadow_latched.store(true, Ordering::SeqCst);
                    self.heuristic(market, sentiment_label, AdversaryMode::Shadow, started)
                } else {
                    self.heuristic(market, sentiment_label, AdversaryMode::Heuristic, started)
                }
            }
        }
    }

    async fn try_api(&self, market: MarketSnapshot, sentiment_label: &str) -> Result<AdversaryResult, LlmError> {
        let llm = self.llm.as_ref().expect("checked by caller");
        let system = "You are a behavioral-finance adversary classifying trader archetypes.";
        let user = format!(
            "price={} rsi={} price_change_pct={} sentiment={sentiment_label}",
            market.price, market.rsi, market.price_change_pct
        );
        let completion = llm.complete(system, &user, 0.2, 512).await?;
        // The content of the LLM's reasoning is out of scope; only that a
        // successful call short-circuits the heuristic classifier matters
        // here, so a minimal structural result is built from the heuristic
        // path and tagged with mode API.
        let mut result = self.classify(market, sentiment_label);
        result.mode = AdversaryMode::Api;
        result.reasoning = completion.content;
        Ok(result)
    }

    fn heuristic(
        &self,
        market: MarketSnapshot,
        sentiment_label: &str,
        mode: AdversaryMode,
        started: Instant,
    ) -> AdversaryResult {
        let mut result = self.classify(market, sentiment_label);
        result.mode = mode;
        result.response_time_ms = started.elapsed().as_millis() as u64;
        result
    }

    fn classify(&self, market: MarketSnapshot, sentiment_label: &str) -> AdversaryResult {
        let (archetype, signal, vulnerability_score, confidence, predicted_bias, predicted_outcome) =
            if market.rsi > 75.0 && market.price_change_pct > 3.0 {
                (
                    Archetype::FomoChaser,
                    Signal::Sell,
                    ((market.rsi - 70.0) / 30.0).min(1.0),
                    0.7,
                    "overextended longs".to_string(),
                    "late buyers get trapped on reversal".to_string(),
                )
            } else if market.rsi < 25.0 && sentiment_label.to_lowercase().contains("fear") {
                (
                    Archetype::PanicSeller,
                    Signal::Buy,
                    (25.0 - market.rsi) / 25.0,
                    0.75,
                    "capitulation selling".to_string(),
                    "panic sellers exhausted near local bottom".to_string(),
                )
            } else {
                (
                    Archetype::Neutral,
                    Signal::Hold,
                    0.5,
                    0.6,
                    "no dominant archetype".to_string(),
                    "mixed positioning".to_string(),
                )
            };

        AdversaryResult {
            timestamp: Utc::now(),
            detected_archetype: archetype,
            vulnerability_score,
            predicted_bias,
            predicted_outcome,
            confidence,
            reasoning: format!("{archetype} detected from rsi={:.1} Δ%={:.2}", market.rsi, market.price_change_pct),
            signal,
            liquidity_zones: liquidity_zones(market.price, &[]),
            market_regime: coarse_regime(market),
            mode: AdversaryMode::Heuristic,
            response_time_ms: 0,
        }
    }
}

fn coarse_regime(market: MarketSnapshot) -> String {
    if market.price_change_pct > 2.0 {
        "BULL".to_string()
    } else if market.price_change_pct < -2.0 {
        "BEAR".to_string()
    } else if market.rsi < 30.0 || market.rsi > 70.0 {
        "VOLATILE".to_string()
    } else {
        "CHOPPY".to_string()
    }
}

/// Deterministic descending-sorted, deduplicated liquidity zone list.
pub fn liquidity_zones(price: f64, recent_lows: &[f64]) -> Vec<f64> {
    if price <= 0.0 {
        return Vec::new();
    }
    let mut zones: Vec<f64> = vec![price * 0.995, price * 0.99, price * 0.98];
    zones.extend(recent_lows.iter().map(|low| low * 0.995));
    zones.sort_by(|a, b| b.partial_cmp(a).unwrap());
    zones.dedup_by(|a, b| (*a - *b).abs() < f64::EPSILON);
    zones
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_llm_configured_means_shadow_mode() {
        let adversary = BehavioralAdversary::new(None);
        let result = tokio_test::block_on(adversary.analyze(MarketSnapshot::synthetic_floor(), "Neutral"));
        assert_eq!(result.mode, AdversaryMode::Shadow);
    }

    #[test]
    fn fomo_chaser_detected_on_high_rsi_and_pump() {
        let adversary = BehavioralAdversary::new(None);
        let market = MarketSnapshot { price: 90_000.0, rsi: 80.0, volume: 1000.0, price_change_pct: 5.0, vwap: 89_000.0, volume_24h: 0.0 };
        let result = tokio_test::block_on(adversary.analyze(market, "Neutral"));
        assert_eq!(result.detected_archetype, Archetype::FomoChaser);
        assert_eq!(result.signal, Signal::Sell);
    }

    #[test]
    fn panic_seller_detected_on_low_rsi_and_fear() {
        let adversary = BehavioralAdversary::new(None);
        let market = MarketSnapshot { price: 85_500.0, rsi: 20.0, volume: 1000.0, price_change_pct: -5.0, vwap: 86_000.0, volume_24h: 0.0 };
        let result = tokio_test::block_on(adversary.analyze(market, "Extreme Fear"));
        assert_eq!(result.detected_archetype, Archetype::PanicSeller);
        assert_eq!(result.signal, Signal::Buy);
        assert!(result.vulnerability_score > 0.0);
        assert!(!result.liquidity_zones.is_empty());
    }

    #[test]
    fn liquidity_zones_empty_for_zero_price() {
        assert!(liquidity_zones(0.0, &[]).is_empty());
    }

    #[test]
    fn liquidity_zones_sorted_descending() {
        let zones = liquidity_zones(100.0, &[90.0, 95.0]);
        let mut sorted = zones.clone();
        sorted.sort_by(|a, b| b.partial_cmp(a).unwrap());
        assert_eq!(zones, sorted);
    }
}
