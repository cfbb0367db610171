//! The mutable decision module consulted by the signal-execution loop.
//!
//! The reference system rewrites a Python source file on disk and reloads
//! it as a module. A systems-language port cannot safely `exec()` untrusted
//! source at runtime, so this type keeps the textual source (for audit,
//! display, and the backup file) alongside a small enum of compiled-in
//! strategy kinds selected by sniffing keywords in that source. `commit`
//! bumps a version counter the signal-execution loop polls; the loop always
//! observes either the old or the new definition, never a torn one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::domain::types::{Candle, Regime, Signal};

/// The compiled-in decision kinds a proposed source can select. Content of
/// the indicator/signal bodies themselves is out of scope (see PURPOSE &
/// SCOPE); only that a committed module deterministically maps to one of
/// these known-safe evaluators is in scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    TrendFollowing,
    MeanReversion,
    Balanced,
}

impl StrategyKind {
    /// Sniff a candidate source for the keyword that selects its compiled
    /// counterpart. Defaults to `Balanced` when neither keyword is present,
    /// matching the Architect's regime-aware template for RANGE_* regimes.
    pub fn sniff(source: &str) -> Self {
        let lower = source.to_lowercase();
        if lower.contains("mean_reversion") || lower.contains("mean-reversion") {
            StrategyKind::MeanReversion
        } else if lower.contains("trend_following") || lower.contains("trend-following") {
            StrategyKind::TrendFollowing
        } else {
            StrategyKind::Balanced
        }
    }

    /// `generate_signal` for this kind, given the regime classification the
    /// current tick observed plus the short/long SMA comparison the caller
    /// already computed.
    pub fn generate_signal(self, regime: Regime, short_above_long: bool) -> Signal {
        match self {
            StrategyKind::TrendFollowing => match regime {
                Regime::TrendingUp => Signal::Buy,
                Regime::TrendingDown => Signal::Sell,
                _ => Signal::Hold,
            },
            StrategyKind::MeanReversion => match regime {
                Regime::RangeVolatile | Regime::RangeQuiet => {
                    if short_above_long {
                        Signal::Sell
                    } else {
                        Signal::Buy
                    }
                }
                _ => Signal::Hold,
            },
            StrategyKind::Balanced => Signal::Hold,
        }
    }
}

/// `calculate_indicators` for the signal-execution loop: a minimal pair of
/// short/long simple moving averages, sufficient to drive `generate_signal`
/// above without duplicating RegimeAnalyzer's indicator set.
pub fn calculate_indicators(candles: &[Candle]) -> Option<(f64, f64)> {
    const SHORT: usize = 10;
    const LONG: usize = 30;
    if candles.len() < LONG {
        return None;
    }
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let short_sma = closes[closes.len() - SHORT..].iter().sum::<f64>() / SHORT as f64;
    let long_sma = closes[closes.len() - LONG..].iter().sum::<f64>() / LONG as f64;
    Some((short_sma, long_sma))
}

struct Inner {
    source: String,
    kind: StrategyKind,
}

/// Single writer: the Architect, during evolution protocol step 7. Readers
/// (the signal-execution loop) poll `version()` and re-fetch `kind()`/
/// `source()` only when it changes, matching the "version counter" reload
/// strategy from the design notes.
pub struct ActiveModule {
    inner: RwLock<Inner>,
    version: AtomicU64,
}

impl ActiveModule {
    pub fn new(source: String) -> Self {
        let kind = StrategyKind::sniff(&source);
        Self { inner: RwLock::new(Inner { source, kind }), version: AtomicU64::new(1) }
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn kind(&self) -> StrategyKind {
        self.inner.read().expect("active module lock poisoned").kind
    }

    pub fn source(&self) -> String {
        self.inner.read().expect("active module lock poisoned").source.clone()
    }

    /// Atomically swap in a new source and bump the version counter. Called
    /// only after the candidate has cleared every gate in the evolution
    /// protocol.
    pub fn commit(&self, source: String) {
        let kind = StrategyKind::sniff(&source);
        let mut inner = self.inner.write().expect("active module lock poisoned");
        inner.source = source;
        inner.kind = kind;
        drop(inner);
        self.version.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(close: f64) -> Candle {
        Candle { ts_ms: 0, open: close, high: close, low: close, close, volume: 1.0 }
    }

    #[test]
    fn sniff_detects_mean_reversion_keyword() {
        assert_eq!(StrategyKind::sniff("fn generate_signal() { mean_reversion() }"), StrategyKind::MeanReversion);
    }

    #[test]
    fn sniff_defaults_to_balanced() {
        assert_eq!(StrategyKind::sniff("fn generate_signal() {}"), StrategyKind::Balanced);
    }

    #[test]
    fn commit_bumps_version_and_swaps_kind() {
        let module = ActiveModule::new("fn generate_signal() {}".to_string());
        assert_eq!(module.version(), 1);
        assert_eq!(module.kind(), StrategyKind::Balanced);
        module.commit("fn generate_signal() { trend_following() }".to_string());
        assert_eq!(module.version(), 2);
        assert_eq!(module.kind(), StrategyKind::TrendFollowing);
    }

    #[test]
    fn indicators_require_long_window() {
        let candles: Vec<Candle> = (0..20).map(|i| candle(100.0 + i as f64)).collect();
        assert!(calculate_indicators(&candles).is_none());
    }

    #[test]
    fn indicators_compute_on_sufficient_window() {
        let candles: Vec<Candle> = (0..30).map(|i| candle(100.0 + i as f64)).collect();
        let (short, long) = calculate_indicators(&candles).expect("should compute");
        assert!(short > long);
    }
}
