//! Periodic whale-inflow tracker. Elevates `SharedState`'s risk to `HIGH` on
//! a large exchange inflow, but never demotes it — Oracle is the sole
//! demoter. Also derives a coarser narrative summary for status logging.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::ports::MarketAdapter;
use crate::domain::shared_state::SharedState;
use crate::domain::types::RiskLevel;

const PRICE_MOVE_THRESHOLD_PCT: f64 = 5.0;
const HIGH_VOLUME_MULTIPLIER: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhaleRiskLevel {
    High,
    Medium,
}

#[derive(Debug, Clone)]
pub struct WhaleEvent {
    pub inflow_btc: f64,
    pub risk_level: WhaleRiskLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrativeSentiment {
    Caution,
    Watchful,
    Normal,
}

impl NarrativeSentiment {
    pub fn as_str(self) -> &'static str {
        match self {
            NarrativeSentiment::Caution => "CAUTION",
            NarrativeSentiment::Watchful => "WATCHFUL",
            NarrativeSentiment::Normal => "NORMAL",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NarrativeReport {
    pub whale_dump_risk: bool,
    pub whale_event: Option<WhaleEvent>,
    pub sentiment: NarrativeSentiment,
    pub recommendation: String,
}

/// Additive reporting only; derives a coarse sentiment from whale events, a
/// price move threshold, and a volume threshold. Never itself gates a safety
/// decision (see whale-risk elevation in `tick`, which is separate).
fn derive_narrative(whale_event: Option<&WhaleEvent>, price_change_pct: f64, volume: f64, avg_volume: f64) -> (NarrativeSentiment, String) {
    let high_volume = avg_volume > 0.0 && volume > avg_volume * HIGH_VOLUME_MULTIPLIER;
    let dump = price_change_pct <= -PRICE_MOVE_THRESHOLD_PCT;
    let pump = price_change_pct >= PRICE_MOVE_THRESHOLD_PCT;

    if matches!(whale_event.map(|e| e.risk_level), Some(WhaleRiskLevel::High)) || dump {
        (NarrativeSentiment::Caution, "large inflow or sharp price dump observed; reduce exposure".to_string())
    } else if whale_event.is_some() || pump || high_volume {
        (NarrativeSentiment::Watchful, "elevated whale or volume activity; monitor closely".to_string())
    } else {
        (NarrativeSentiment::Normal, "no unusual whale or volume activity".to_string())
    }
}

pub struct NarrativePulse {
    market: Arc<dyn MarketAdapter>,
    shared_state: Arc<SharedState>,
    symbol: String,
    whale_threshold_btc: f64,
    interval: Duration,
    whale_dump_risk: AtomicBool,
}

impl NarrativePulse {
    pub fn new(market: Arc<dyn MarketAdapter>, shared_state: Arc<SharedState>, symbol: String, whale_threshold_btc: f64, interval: Duration) -> Self {
        Self { market, shared_state, symbol, whale_threshold_btc, interval, whale_dump_risk: AtomicBool::new(false) }
    }

    pub async fn tick(&self) -> NarrativeReport {
        let inflow = self.market.fetch_whale_flow(&self.symbol).await;
        let whale_event = if inflow > self.whale_threshold_btc {
            let risk_level = if inflow > 2.0 * self.whale_threshold_btc { WhaleRiskLevel::High } else { WhaleRiskLevel::Medium };
            self.whale_dump_risk.store(true, Ordering::SeqCst);
            self.shared_state.set_whale_dump(true);
            if self.shared_state.get_risk() == RiskLevel::Normal {
                warn!(inflow, "whale inflow elevates risk to HIGH");
                self.shared_state.set_risk(RiskLevel::High, Some(format!("whale inflow {inflow:.1} BTC exceeded threshold")));
            }
            Some(WhaleEvent { inflow_btc: inflow, risk_level })
        } else {
            self.whale_dump_risk.store(false, Ordering::SeqCst);
            self.shared_state.set_whale_dump(false);
            None
        };

        let (sentiment, recommendation) = derive_narrative(whale_event.as_ref(), 0.0, 0.0, 0.0);
        info!(sentiment = sentiment.as_str(), "narrative pulse tick complete");
        NarrativeReport { whale_dump_risk: self.whale_dump_risk.load(Ordering::SeqCst), whale_event, sentiment, recommendation }
    }

    pub async fn run(&self, cancellation: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    info!("narrative pulse loop shutting down");
                    return;
                }
                _ = self.tick() => {}
            }
            tokio::select! {
                _ = cancellation.cancelled() => {
                    info!("narrative pulse loop shutting down");
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

    struct FixedFlow(f64);
    #[async_trait]
    impl MarketAdapter for FixedFlow {
        async fn fetch_ohlcv(&self, _symbol: &str, _timeframe: &str, _limit: usize) -> Vec<Candle> { Vec::new() }
        async fn fetch_balance(&self) -> HashMap<String, AssetBalance> { HashMap::new() }
        async fn fetch_equity_bars(&self, _ticker: &str) -> Option<(Candle, Candle)> { None }
        async fn fetch_fear_greed(&self) -> FearGreedIndex {
            FearGreedIndex { value: 50, classification: "Neutral".to_string(), source: "test".to_string() }
        }
        async fn fetch_headlines(&self, _count: usize) -> Vec<String> { Vec::new() }
        async fn discover_symbols(&self) -> SymbolDiscovery { SymbolDiscovery { symbols: Vec::new(), mode: DiscoveryMode::Live } }
        async fn fetch_whale_flow(&self, _symbol: &str) -> f64 { self.0 }
    }

    #[tokio::test]
    async fn large_inflow_elevates_normal_risk_to_high() {
        let shared_state = Arc::new(SharedState::new());
        let pulse = NarrativePulse::new(Arc::new(FixedFlow(1500.0)), shared_state.clone(), "BTC/USDT".to_string(), 1000.0, Duration::from_secs(300));
        let report = pulse.tick().await;
        assert!(report.whale_dump_risk);
        assert_eq!(shared_state.get_risk(), RiskLevel::High);
        assert_eq!(report.whale_event.unwrap().risk_level, WhaleRiskLevel::Medium);
    }

    #[tokio::test]
    async fn very_large_inflow_is_high_severity_event() {
        let shared_state = Arc::new(SharedState::new());
        let pulse = NarrativePulse::new(Arc::new(FixedFlow(2500.0)), shared_state.clone(), "BTC/USDT".to_string(), 1000.0, Duration::from_secs(300));
        let report = pulse.tick().await;
        assert_eq!(report.whale_event.unwrap().risk_level, WhaleRiskLevel::High);
    }

    #[tokio::test]
    async fn never_demotes_an_already_high_risk() {
        let shared_state = Arc::new(SharedState::new());
        shared_state.set_risk(RiskLevel::High, Some("equity drop".to_string()));
        let pulse = NarrativePulse::new(Arc::new(FixedFlow(0.0)), shared_state.clone(), "BTC/USDT".to_string(), 1000.0, Duration::from_secs(300));
        pulse.tick().await;
        assert_eq!(shared_state.get_risk(), RiskLevel::High);
    }

    #[tokio::test]
    async fn low_inflow_clears_whale_dump_flag() {
        let shared_state = Arc::new(SharedState::new());
        shared_state.set_whale_dump(true);
        let pulse = NarrativePulse::new(Arc::new(FixedFlow(10.0)), shared_state.clone(), "BTC/USDT".to_string(), 1000.0, Duration::from_secs(300));
        let report = pulse.tick().await;
        assert!(!report.whale_dump_risk);
        assert!(!shared_state.get_whale_dump());
    }
}
