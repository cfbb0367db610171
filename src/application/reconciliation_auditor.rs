//! Periodic reconciliation of open predictions against realized prices.
//! Runs on the longest configured cadence; iterates all three timeframes
//! each invocation.

use std::sync::Arc;

use tracing::{error, info};

use crate::application::ledger::Ledger;
use crate::domain::ports::MarketAdapter;
use crate::domain::types::{Signal, Timeframe};

const REVERSAL_VOCAB: &[&str] = &["reversal", "trap"];
const MEAN_REVERSION_VOCAB: &[&str] = &["mean reversion", "mean-reversion", "reversion to the mean"];

fn contains_any(haystack: &str, vocab: &[&str]) -> bool {
    let lower = haystack.to_lowercase();
    vocab.iter().any(|w| lower.contains(w))
}

/// `Δ% = (actual − predicted) / predicted · 100`, scored per-signal, with a
/// mutually-exclusive pattern bonus, then scaled by confidence and rounded
/// to 3 decimals.
pub fn score_prediction(signal: Signal, predicted_price: f64, actual_price: f64, predicted_outcome: &str, confidence: f64) -> f64 {
    if predicted_price == 0.0 {
        return 0.0;
    }
    let pct_change = (actual_price - predicted_price) / predicted_price * 100.0;

    let mut score = match signal {
        Signal::Buy => (pct_change / 5.0).clamp(-1.0, 1.0),
        Signal::Sell => (-pct_change / 5.0).clamp(-1.0, 1.0),
        Signal::Hold => 0.0,
    };

    let reversal_direction_match = (signal == Signal::Sell && pct_change < -1.0) || (signal == Signal::Buy && pct_change > 1.0);
    if contains_any(predicted_outcome, REVERSAL_VOCAB) && reversal_direction_match {
        score = score.max(0.8);
    } else if contains_any(predicted_outcome, MEAN_REVERSION_VOCAB) && reversal_direction_match {
        score = score.max(0.7);
    }

    score *= confidence;
    (score * 1000.0).round() / 1000.0
}

pub struct ReconciliationAuditor {
    ledger: Arc<Ledger>,
    market: Arc<dyn MarketAdapter>,
    symbol: String,
}

impl ReconciliationAuditor {
    pub fn new(ledger: Arc<Ledger>, market: Arc<dyn MarketAdapter>, symbol: String) -> Self {
        Self { ledger, market, symbol }
    }

    pub async fn run_cycle(&self) {
        for tf in Timeframe::ALL {
            if let Err(e) = self.reconcile_timeframe(tf).await {
                error!(error = %e, timeframe = ?tf, "reconciliation cycle failed for timeframe");
            }
        }
    }

    async fn reconcile_timeframe(&self, tf: Timeframe) -> Result<(), crate::domain::errors::PersistenceError> {
        let rows = self.ledger.unaudited(tf, tf.hours()).await?;
        if rows.is_empty() {
            return Ok(());
        }
        let candles = self.market.fetch_ohlcv(&self.symbol, "1h", 1).await;
        let Some(spot) = candles.last().map(|c| c.close) else {
            return Ok(());
        };

        for row in rows {
            self.ledger.set_actual_price(row.id, tf, spot).await?;
            let score = score_prediction(row.signal, row.price_at_prediction, spot, &row.predicted_outcome, row.confidence);
            self.ledger.set_score(row.id, tf, score).await?;
            info!(id = row.id, ?tf, score, "prediction reconciled");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buy_signal_scores_positively_on_price_rise() {
        let score = score_prediction(Signal::Buy, 100.0, 103.0, "bullish continuation", 0.8);
        assert!(score > 0.0);
    }

    #[test]
    fn sell_signal_scores_positively_on_price_fall() {
        let score = score_prediction(Signal::Sell, 100.0, 95.0, "bearish continuation", 0.8);
        assert!(score > 0.0);
    }

    #[test]
    fn reversal_vocab_applies_bonus_when_direction_matches() {
        let score = score_prediction(Signal::Sell, 100.0, 97.0, "classic bull trap reversal pattern", 1.0);
        assert!(score >= 0.8);
    }

    #[test]
    fn score_is_clamped_to_unit_range_before_confidence_scaling() {
        let score = score_prediction(Signal::Buy, 100.0, 200.0, "", 1.0);
        assert_eq!(score, 1.0);
    }

    #[test]
    fn hold_signal_always_scores_zero() {
        let score = score_prediction(Signal::Hold, 100.0, 150.0, "", 1.0);
        assert_eq!(score, 0.0);
    }

    #[tokio::test]
    async fn full_cycle_marks_audited_after_third_timeframe() {
        use crate::domain::ports::{AssetBalance, DiscoveryMode, FearGreedIndex, SymbolDiscovery};
        use crate::domain::types::Candle;
        use async_trait::async_trait;
        use std::collections::HashMap;

        struct FixedPrice(f64);
        #[async_trait]
        impl MarketAdapter for FixedPrice {
            async fn fetch_ohlcv(&self, _symbol: &str, _timeframe: &str, _limit: usize) -> Vec<Candle> {
                vec![Candle { ts_ms: 0, open: self.0, high: self.0, low: self.0, close: self.0, volume: 1.0 }]
            }
            async fn fetch_balance(&self) -> HashMap<String, AssetBalance> { HashMap::new() }
            async fn fetch_equity_bars(&self, _ticker: &str) -> Option<(Candle, Candle)> { None }
            async fn fetch_fear_greed(&self) -> FearGreedIndex {
                FearGreedIndex { value: 50, classification: "Neutral".to_string(), source: "test".to_string() }
            }
            async fn fetch_headlines(&self, _count: usize) -> Vec<String> { Vec::new() }
            async fn discover_symbols(&self) -> SymbolDiscovery { SymbolDiscovery { symbols: Vec::new(), mode: DiscoveryMode::Live } }
            async fn fetch_whale_flow(&self, _symbol: &str) -> f64 { 0.0 }
        }

        let ledger = Arc::new(Ledger::open("sqlite::memory:").await.unwrap());
        let id = ledger.record("bullish", "continuation expected", 0.8, "TRENDING_UP", "NEUTRAL", Signal::Buy, 100.0).await.unwrap();
        ledger.backdate(id, 13).await.unwrap();
        let market = Arc::new(FixedPrice(103.0));
        let auditor = ReconciliationAuditor::new(ledger.clone(), market, "BTC/USDT".to_string());

        auditor.run_cycle().await;

        let row = ledger.failed(10, 0.0).await.unwrap();
        let reconciled = row.iter().find(|p| p.id == id).expect("row present");
        assert!(reconciled.audited);
        assert!(reconciled.success_score_1h.is_some());
        assert!(reconciled.success_score_4h.is_some());
        assert!(reconciled.success_score_12h.is_some());
    }
}
