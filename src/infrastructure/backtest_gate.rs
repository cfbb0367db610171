//! Synthetic historical-replay `BacktestGate`. The original backtester reads
//! cached OHLCV from disk and vectorizes a strategy module's signals across
//! it; this port has no market-data cache to replay, so it generates a
//! synthetic geometric random walk and replays the candidate's compiled
//! strategy kind across it instead. Out of scope per the spec beyond its
//! pinned contract, so this stays a synthetic pass-through rather than a
//! real historical-replay harness.

use async_trait::async_trait;
use rand::Rng;
use statrs::statistics::{Data, Distribution};

use crate::domain::active_module::{calculate_indicators, StrategyKind};
use crate::domain::ports::{BacktestGate, BacktestReport};
use crate::domain::types::{Candle, Regime, Signal};

const REPLAY_LENGTH: usize = 500;
const INDICATOR_WINDOW: usize = 30;
const ANNUALIZATION_FACTOR: f64 = 252.0;

fn synthetic_walk(length: usize, starting_price: f64, daily_vol: f64) -> Vec<Candle> {
    let mut rng = rand::rng();
    let mut price = starting_price;
    let mut candles = Vec::with_capacity(length);
    for i in 0..length {
        let u1: f64 = rng.random_range(1e-9..1.0);
        let u2: f64 = rng.random_range(0.0..1.0);
        let noise = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        let open = price;
        price = (price * (1.0 + noise * daily_vol)).max(1.0);
        candles.push(Candle {
            ts_ms: i as i64 * 3_600_000,
            open,
            high: open.max(price) * 1.001,
            low: open.min(price) * 0.999,
            close: price,
            volume: 1.0,
        });
    }
    candles
}

fn max_drawdown(equity_curve: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut worst = 0.0;
    for &equity in equity_curve {
        peak = peak.max(equity);
        if peak > 0.0 {
            worst = f64_max(worst, (peak - equity) / peak);
        }
    }
    worst
}

fn f64_max(a: f64, b: f64) -> f64 {
    if a > b { a } else { b }
}

pub struct SyntheticBacktestGate {
    min_sharpe_deploy: f64,
    max_drawdown_deploy: f64,
}

impl SyntheticBacktestGate {
    pub fn new(min_sharpe_deploy: f64, max_drawdown_deploy: f64) -> Self {
        Self { min_sharpe_deploy, max_drawdown_deploy }
    }
}

#[async_trait]
impl BacktestGate for SyntheticBacktestGate {
    async fn evaluate(&self, candidate_source: &str, regime: Regime) -> BacktestReport {
        let kind = StrategyKind::sniff(candidate_source);
        let candles = synthetic_walk(REPLAY_LENGTH, 90_000.0, 0.01);

        let mut equity = 1000.0;
        let mut equity_curve = vec![equity];
        let mut returns = Vec::new();

        for i in INDICATOR_WINDOW..candles.len() {
            let Some((short, long)) = calculate_indicators(&candles[..=i]) else { continue };
            let signal = kind.generate_signal(regime, short > long);
            let prev_close = candles[i - 1].close;
            let ret = match signal {
                Signal::Buy => (candles[i].close - prev_close) / prev_close,
                Signal::Sell => (prev_close - candles[i].close) / prev_close,
                Signal::Hold => 0.0,
            };
            equity *= 1.0 + ret;
            equity_curve.push(equity);
            returns.push(ret);
        }

        let sharpe = if returns.len() >= 2 {
            let data = Data::new(returns);
            match (data.mean(), data.std_dev()) {
                (Some(mean), Some(std_dev)) if std_dev > 0.0 => (mean / std_dev) * ANNUALIZATION_FACTOR.sqrt(),
                _ => 0.0,
            }
        } else {
            0.0
        };

        let drawdown = max_drawdown(&equity_curve);
        let can_deploy = sharpe >= self.min_sharpe_deploy && drawdown <= self.max_drawdown_deploy;
        BacktestReport { can_deploy, sharpe, max_drawdown: drawdown }
    }
}
