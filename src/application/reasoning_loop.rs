//! Periodic regime-aware signal heuristic. Sole writer of the published
//! `Analysis`; publication is atomic so readers never observe a torn value.

use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::domain::ports::MarketAdapter;
use crate::domain::regime;
use crate::domain::types::{Analysis, Candle, EvolutionSuggestion, Regime, RegimeMetrics, Signal};
use crate::infrastructure::reasoning_trace::ReasoningTraceLog;

const CANDLE_LIMIT: usize = 100;
const CONFIDENCE_SUGGESTION_THRESHOLD: f64 = 0.6;

/// Single-writer holder for the latest published `Analysis`. Readers get a
/// cloned snapshot, never a reference into the writer's critical section.
#[derive(Default)]
pub struct AnalysisPublisher {
    inner: RwLock<Option<Analysis>>,
}

impl AnalysisPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, analysis: Analysis) {
        *self.inner.write().expect("analysis publisher lock poisoned") = Some(analysis);
    }

    pub fn latest(&self) -> Option<Analysis> {
        self.inner.read().expect("analysis publisher lock poisoned").clone()
    }
}

fn sma(closes: &[f64], period: usize) -> Option<f64> {
    if closes.len() < period {
        return None;
    }
    Some(closes[closes.len() - period..].iter().sum::<f64>() / period as f64)
}

fn trend_signal(candles: &[Candle], regime: Regime) -> (Signal, f64, String) {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let last_close = *closes.last().expect("non-empty by caller");
    let short_sma = sma(&closes, 10).unwrap_or(last_close);
    let long_sma = sma(&closes, 30).unwrap_or(last_close);

    let recent_change_pct = if candles.len() >= 2 {
        let prev = candles[candles.len() - 2].close;
        if prev != 0.0 { (last_close - prev) / prev * 100.0 } else { 0.0 }
    } else {
        0.0
    };

    let recent_volumes: Vec<f64> = candles.iter().rev().take(20).map(|c| c.volume).collect();
    let avg_volume = recent_volumes.iter().sum::<f64>() / recent_volumes.len().max(1) as f64;
    let volume_spike = candles.last().map(|c| c.volume > avg_volume * 1.5).unwrap_or(false);

    let (signal, aligned_price, aligned_sma, aligned_change) = match regime {
        Regime::TrendingUp => (Signal::Buy, last_close > short_sma, short_sma > long_sma, recent_change_pct > 0.0),
        Regime::TrendingDown => (Signal::Sell, last_close < short_sma, short_sma < long_sma, recent_change_pct < 0.0),
        _ => unreachable!("trend_signal only called for trending regimes"),
    };
    let confirming = [aligned_price, aligned_sma, aligned_change, volume_spike].into_iter().filter(|b| *b).count();
    let confidence = 0.70 + 0.10 * (confirming as f64 / 4.0);

    let reasoning = format!(
        "{regime}: price/SMA alignment and {:.2}% recent move support {signal:?} at {:.0}% confidence",
        recent_change_pct,
        confidence * 100.0
    );
    (signal, confidence.min(0.80), reasoning)
}

fn suggestion_for(confidence: f64, regime: Regime) -> Option<EvolutionSuggestion> {
    if confidence >= CONFIDENCE_SUGGESTION_THRESHOLD {
        return None;
    }
    Some(EvolutionSuggestion {
        reason: format!("Low confidence ({:.0}%) in {regime} regime", confidence * 100.0),
        suggestion: format!("Adapt strategy for {regime} market conditions to improve confidence"),
        regime,
    })
}

fn build_analysis(symbol: &str, candles: &[Candle], metrics: RegimeMetrics) -> Analysis {
    if metrics.insufficient_data {
        return Analysis {
            timestamp: Utc::now(),
            symbol: symbol.to_string(),
            signal: Signal::Hold,
            confidence: 0.0,
            reasoning: "insufficient candle history for regime classification".to_string(),
            regime: metrics.regime,
            metrics,
            evolution_suggestion: None,
        };
    }

    let (signal, confidence, reasoning) = match metrics.regime {
        Regime::TrendingUp | Regime::TrendingDown => trend_signal(candles, metrics.regime),
        Regime::RangeVolatile => (Signal::Hold, 0.40, "range-bound with elevated volatility; holding".to_string()),
        Regime::RangeQuiet => (Signal::Hold, 0.45, "quiet range; watching for breakout".to_string()),
    };

    Analysis {
        timestamp: Utc::now(),
        symbol: symbol.to_string(),
        signal,
        confidence,
        reasoning,
        regime: metrics.regime,
        metrics,
        evolution_suggestion: suggestion_for(confidence, metrics.regime),
    }
}

pub struct ReasoningLoop {
    market: Arc<dyn MarketAdapter>,
    publisher: Arc<AnalysisPublisher>,
    symbol: String,
    timeframe: String,
    interval: Duration,
    trace_log: Option<Arc<ReasoningTraceLog>>,
}

impl ReasoningLoop {
    pub fn new(market: Arc<dyn MarketAdapter>, publisher: Arc<AnalysisPublisher>, symbol: String, timeframe: String, interval: Duration) -> Self {
        Self { market, publisher, symbol, timeframe, interval, trace_log: None }
    }

    pub fn with_trace_log(mut self, trace_log: Arc<ReasoningTraceLog>) -> Self {
        self.trace_log = Some(trace_log);
        self
    }

    pub async fn tick(&self) {
        let candles = self.market.fetch_ohlcv(&self.symbol, &self.timeframe, CANDLE_LIMIT).await;
        if candles.len() < 2 {
            let analysis = Analysis {
                timestamp: Utc::now(),
                symbol: self.symbol.clone(),
                signal: Signal::Hold,
                confidence: 0.0,
                reasoning: "fewer than 2 candles available".to_string(),
                regime: Regime::RangeQuiet,
                metrics: RegimeMetrics { regime: Regime::RangeQuiet, adx: 0.0, plus_di: 0.0, minus_di: 0.0, atr: 0.0, rsi: 50.0, insufficient_data: true },
                evolution_suggestion: None,
            };
            self.trace(&analysis);
            self.publisher.publish(analysis);
            return;
        }
        let metrics = regime::analyze(&candles);
        let analysis = build_analysis(&self.symbol, &candles, metrics);
        info!(signal = ?analysis.signal, confidence = analysis.confidence, regime = %analysis.regime, "reasoning loop tick published");
        self.trace(&analysis);
        self.publisher.publish(analysis);
    }

    fn trace(&self, analysis: &Analysis) {
        if let Some(trace_log) = &self.trace_log {
            trace_log.append(analysis);
        }
    }

    pub async fn run(&self, cancellation: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    info!("reasoning loop shutting down");
                    return;
                }
                _ = self.tick() => {}
            }
            tokio::select! {
                _ = cancellation.cancelled() => {
                    info!("reasoning loop shutting down");
                    return;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{AssetBalance, DiscoveryMode, FearGreedIndex, SymbolDiscovery};
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct FixedCandles(Vec<Candle>);
    #[async_trait]
    impl MarketAdapter for FixedCandles {
        async fn fetch_ohlcv(&self, _symbol: &str, _timeframe: &str, _limit: usize) -> Vec<Candle> { self.0.clone() }
        async fn fetch_balance(&self) -> HashMap<String, AssetBalance> { HashMap::new() }
        async fn fetch_equity_bars(&self, _ticker: &str) -> Option<(Candle, Candle)> { None }
        async fn fetch_fear_greed(&self) -> FearGreedIndex {
            FearGreedIndex { value: 50, classification: "Neutral".to_string(), source: "test".to_string() }
        }
        async fn fetch_headlines(&self, _count: usize) -> Vec<String> { Vec::new() }
        async fn discover_symbols(&self) -> SymbolDiscovery { SymbolDiscovery { symbols: Vec::new(), mode: DiscoveryMode::Live } }
        async fn fetch_whale_flow(&self, _symbol: &str) -> f64 { 0.0 }
    }

    fn candle(close: f64) -> Candle {
        Candle { ts_ms: 0, open: close, high: close + 0.5, low: close - 0.5, close, volume: 100.0 }
    }

    #[tokio::test]
    async fn fewer_than_two_candles_publishes_hold_zero_confidence() {
        let market = Arc::new(FixedCandles(vec![candle(100.0)]));
        let publisher = Arc::new(AnalysisPublisher::new());
        let reasoning = ReasoningLoop::new(market, publisher.clone(), "BTC/USDT".to_string(), "1h".to_string(), Duration::from_secs(900));
        reasoning.tick().await;
        let analysis = publisher.latest().expect("published");
        assert_eq!(analysis.signal, Signal::Hold);
        assert_eq!(analysis.confidence, 0.0);
    }

    #[tokio::test]
    async fn strong_uptrend_publishes_buy_with_suggestion_absent() {
        let mut candles = Vec::new();
        let mut price = 100.0;
        for _ in 0..60 {
            price += 2.0;
            candles.push(candle(price));
        }
        let market = Arc::new(FixedCandles(candles));
        let publisher = Arc::new(AnalysisPublisher::new());
        let reasoning = ReasoningLoop::new(market, publisher.clone(), "BTC/USDT".to_string(), "1h".to_string(), Duration::from_secs(900));
        reasoning.tick().await;
        let analysis = publisher.latest().expect("published");
        assert_eq!(analysis.regime, Regime::TrendingUp);
        assert_eq!(analysis.signal, Signal::Buy);
        assert!(analysis.confidence >= 0.70 && analysis.confidence <= 0.80);
        assert!(analysis.evolution_suggestion.is_none());
    }

    #[tokio::test]
    async fn flat_range_produces_low_confidence_suggestion() {
        let candles: Vec<Candle> = (0..60).map(|_| candle(100.0)).collect();
        let market = Arc::new(FixedCandles(candles));
        let publisher = Arc::new(AnalysisPublisher::new());
        let reasoning = ReasoningLoop::new(market, publisher.clone(), "BTC/USDT".to_string(), "1h".to_string(), Duration::from_secs(900));
        reasoning.tick().await;
        let analysis = publisher.latest().expect("published");
        assert_eq!(analysis.signal, Signal::Hold);
        assert!(analysis.confidence < CONFIDENCE_SUGGESTION_THRESHOLD);
        assert!(analysis.evolution_suggestion.is_some());
    }
}
