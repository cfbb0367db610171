//! Periodic equities-driven risk gate. Watches a primary ticker's 1h percent
//! change and raises `SharedState`'s risk level to `HIGH` on a sharp drop.
//! Oracle is the sole component that demotes risk back to `NORMAL`.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::ports::MarketAdapter;
use crate::domain::shared_state::SharedState;
use crate::domain::types::RiskLevel;

const DEFAULT_PRIMARY_TICKER: &str = "SPY";
const DEFAULT_SECONDARY_TICKER: &str = "QQQ";

pub struct Oracle {
    market: Arc<dyn MarketAdapter>,
    shared_state: Arc<SharedState>,
    spy_threshold: f64,
    primary_ticker: String,
    secondary_ticker: String,
    interval: Duration,
}

impl Oracle {
    pub fn new(market: Arc<dyn MarketAdapter>, shared_state: Arc<SharedState>, spy_threshold: f64, interval: Duration) -> Self {
        Self {
            market,
            shared_state,
            spy_threshold,
            primary_ticker: DEFAULT_PRIMARY_TICKER.to_string(),
            secondary_ticker: DEFAULT_SECONDARY_TICKER.to_string(),
            interval,
        }
    }

    /// One evaluation cycle. Returns the computed primary percent change when
    /// both tickers produced at least two bars, for observability.
    pub async fn tick(&self) -> Option<f64> {
        let primary_bars = self.market.fetch_equity_bars(&self.primary_ticker).await;
        // Fetched for observability/logging only; does not drive the threshold decision.
        let secondary_bars = self.market.fetch_equity_bars(&self.secondary_ticker).await;
        if let Some((open, close)) = secondary_bars {
            info!(ticker = %self.secondary_ticker, open = open.close, close = close.close, "secondary equity bars observed");
        }

        let Some((open, close)) = primary_bars else {
            self.shared_state.set_risk(RiskLevel::Normal, Some("equity bars unavailable; defaulting to normal".to_string()));
            return None;
        };
        if open.close == 0.0 {
            self.shared_state.set_risk(RiskLevel::Normal, Some("primary ticker opening price is zero".to_string()));
            return None;
        }

        let pct_change = (close.close - open.close) / open.close * 100.0;
        if pct_change < self.spy_threshold * 100.0 {
            let payload = format!("{} 1h change {:.2}% breached spy_threshold", self.primary_ticker, pct_change);
            warn!(ticker = %self.primary_ticker, pct_change, "equity risk elevated to HIGH");
            self.shared_state.set_risk(RiskLevel::High, Some(payload));
        } else {
            self.shared_state.set_risk(RiskLevel::Normal, Some(format!("{} 1h change {:.2}%", self.primary_ticker, pct_change)));
        }
        Some(pct_change)
    }

    pub async fn run(&self, cancellation: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    info!("oracle loop shutting down");
                    return;
                }
                _ = self.tick() => {}
            }
            tokio::select! {
                _ = cancellation.cancelled() => {
                    info!("oracle loop shutting down");
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
    use crate::domain::types::Candle;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct FixedBars {
        primary: Option<(f64, f64)>,
    }

    fn candle_with_close(close: f64) -> Candle {
        Candle { ts_ms: 0, open: close, high: close, low: close, close, volume: 1.0 }
    }

    #[async_trait]
    impl MarketAdapter for FixedBars {
        async fn fetch_ohlcv(&self, _symbol: &str, _timeframe: &str, _limit: usize) -> Vec<Candle> { Vec::new() }
        async fn fetch_balance(&self) -> HashMap<String, AssetBalance> { HashMap::new() }
        async fn fetch_equity_bars(&self, ticker: &str) -> Option<(Candle, Candle)> {
            if ticker == DEFAULT_PRIMARY_TICKER {
                self.primary.map(|(o, c)| (candle_with_close(o), candle_with_close(c)))
            } else {
                Some((candle_with_close(100.0), candle_with_close(100.0)))
            }
        }
        async fn fetch_fear_greed(&self) -> FearGreedIndex {
            FearGreedIndex { value: 50, classification: "Neutral".to_string(), source: "test".to_string() }
        }
        async fn fetch_headlines(&self, _count: usize) -> Vec<String> { Vec::new() }
        async fn discover_symbols(&self) -> SymbolDiscovery { SymbolDiscovery { symbols: vec!["BTC/USDT".to_string()], mode: DiscoveryMode::Live } }
        async fn fetch_whale_flow(&self, _symbol: &str) -> f64 { 0.0 }
    }

    #[tokio::test]
    async fn sharp_drop_elevates_risk_to_high() {
        let market = Arc::new(FixedBars { primary: Some((100.0, 98.5)) });
        let shared_state = Arc::new(SharedState::new());
        let oracle = Oracle::new(market, shared_state.clone(), -0.01, Duration::from_secs(3600));
        oracle.tick().await;
        assert_eq!(shared_state.get_risk(), RiskLevel::High);
    }

    #[tokio::test]
    async fn mild_move_keeps_risk_normal() {
        let market = Arc::new(FixedBars { primary: Some((100.0, 99.5)) });
        let shared_state = Arc::new(SharedState::new());
        let oracle = Oracle::new(market, shared_state.clone(), -0.01, Duration::from_secs(3600));
        oracle.tick().await;
        assert_eq!(shared_state.get_risk(), RiskLevel::Normal);
    }

    #[tokio::test]
    async fn missing_bars_default_to_normal() {
        let market = Arc::new(FixedBars { primary: None });
        let shared_state = Arc::new(SharedState::new());
        shared_state.set_risk(RiskLevel::High, None);
        let oracle = Oracle::new(market, shared_state.clone(), -0.01, Duration::from_secs(3600));
        oracle.tick().await;
        assert_eq!(shared_state.get_risk(), RiskLevel::Normal);
    }
}
