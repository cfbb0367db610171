use async_trait::async_trait;

use crate::domain::errors::LlmError;
use crate::domain::types::Candle;

/// Balance of a single asset, as returned by `MarketAdapter::fetch_balance`.
#[derive(Debug, Clone, Copy)]
pub struct AssetBalance {
    pub free: f64,
    pub locked: f64,
}

#[derive(Debug, Clone)]
pub struct FearGreedIndex {
    pub value: u32,
    pub classification: String,
    pub source: String,
}

/// Whether `discover_symbols` reached the live venue or fell back to the
/// minimum-viable mock universe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMode {
    Live,
    Mock,
}

/// Outcome of symbol enumeration. On any enumeration failure, `symbols` is
/// the minimum-viable set `{BTC/USDT, ETH/USDT, SOL/USDT}` and `mode` is
/// `Mock`; the operation never errors out to its caller.
#[derive(Debug, Clone)]
pub struct SymbolDiscovery {
    pub symbols: Vec<String>,
    pub mode: DiscoveryMode,
}

/// External I/O boundary for market data. Implementations never propagate a
/// live failure to the caller: on error they return a synthetic payload
/// tagged with its own `source` field, matching the discovery/fallback
/// behavior specified for this adapter.
#[async_trait]
pub trait MarketAdapter: Send + Sync {
    async fn fetch_ohlcv(&self, symbol: &str, timeframe: &str, limit: usize) -> Vec<Candle>;

    async fn fetch_balance(&self) -> std::collections::HashMap<String, AssetBalance>;

    /// Two 1h bars for an equities ticker (used by the Oracle). `None` if
    /// fewer than two bars are available even after falling back.
    async fn fetch_equity_bars(&self, ticker: &str) -> Option<(Candle, Candle)>;

    async fn fetch_fear_greed(&self) -> FearGreedIndex;

    async fn fetch_headlines(&self, count: usize) -> Vec<String>;

    /// Enumerate available symbols. On enumeration failure, falls back to
    /// the minimum-viable mock set `{BTC/USDT, ETH/USDT, SOL/USDT}` and
    /// reports `DiscoveryMode::Mock` rather than propagating an error.
    async fn discover_symbols(&self) -> SymbolDiscovery;

    /// Net large-order inflow to exchange wallets over the sampling window,
    /// in base-asset units (BTC). Feeds NarrativePulse's whale-dump check.
    async fn fetch_whale_flow(&self, symbol: &str) -> f64;
}

/// Outcome of the external backtest gate consulted at evolution step 6.
/// This collaborator is out of scope per the spec (only its contract is
/// pinned); implementations range from a synthetic pass-through to a real
/// historical replay harness.
#[derive(Debug, Clone, Copy)]
pub struct BacktestReport {
    pub can_deploy: bool,
    pub sharpe: f64,
    pub max_drawdown: f64,
}

#[async_trait]
pub trait BacktestGate: Send + Sync {
    async fn evaluate(&self, candidate_source: &str, regime: crate::domain::types::Regime) -> BacktestReport;
}

#[derive(Debug, Clone)]
pub struct LlmCompletion {
    pub content: String,
}

/// External I/O boundary for reasoning calls. `RegionalBlock` is returned
/// as a typed variant (never inferred from a string match against the error
/// message) so callers can reliably gate their mode-selection logic on it.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<LlmCompletion, LlmError>;
}
