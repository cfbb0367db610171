use rand::Rng;
use statrs::statistics::{Data, Distribution};
use std::sync::Mutex;

use crate::domain::types::Signal;

const SHARPE_WINDOW: usize = 30;
const ANNUALIZATION_FACTOR: f64 = 252.0;

#[derive(Debug, Clone)]
struct Strategy {
    name: String,
    leverage: f64,
    risk_multiplier: f64,
    roi_history: Vec<f64>,
    trade_count: u64,
    wins: u64,
    total_pnl: f64,
}

impl Strategy {
    fn new(name: &str, leverage: f64, risk_multiplier: f64) -> Self {
        Self {
            name: name.to_string(),
            leverage,
            risk_multiplier,
            roi_history: Vec::new(),
            trade_count: 0,
            wins: 0,
            total_pnl: 0.0,
        }
    }

    /// Sharpe of the trailing window *before* the pending trade is recorded,
    /// so the first trade of a session always yields 0 for lack of two
    /// prior points.
    fn rolling_sharpe(&self) -> f64 {
        let start = self.roi_history.len().saturating_sub(SHARPE_WINDOW);
        let window = &self.roi_history[start..];
        if window.len() < 2 {
            return 0.0;
        }
        let data = Data::new(window.to_vec());
        let (Some(mean), Some(std_dev)) = (data.mean(), data.std_dev()) else {
            return 0.0;
        };
        if std_dev == 0.0 {
            return 0.0;
        }
        (mean / std_dev) * ANNUALIZATION_FACTOR.sqrt()
    }

    fn record(&mut self, pnl: f64, roi: f64) {
        self.roi_history.push(roi);
        self.trade_count += 1;
        self.total_pnl += pnl;
        if pnl > 0.0 {
            self.wins += 1;
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PairedTrade {
    pub live_pnl: f64,
    pub shadow_pnl: f64,
    pub live_sharpe: f64,
    pub shadow_sharpe: f64,
    pub promotion_alert: bool,
}

struct Inner {
    live: Strategy,
    shadow: Strategy,
    promotion_threshold_iterations: u64,
    ratio_threshold: f64,
    shadow_generation: u32,
}

/// In-memory paired live/shadow simulator. All state mutations serialize
/// under a single exclusion scope, mirroring the source's lock around the
/// simulate-and-record critical section.
pub struct ShadowEngine {
    inner: Mutex<Inner>,
}

impl ShadowEngine {
    pub fn new(promotion_threshold_iterations: u32, ratio_threshold: f64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                live: Strategy::new("Live", 1.0, 1.0),
                shadow: Strategy::new("Shadow-HighRisk", 2.0, 1.5),
                promotion_threshold_iterations: promotion_threshold_iterations as u64,
                ratio_threshold,
                shadow_generation: 1,
            }),
        }
    }

    pub fn simulate(&self, signal: Signal, volatility: f64) -> PairedTrade {
        let mut inner = self.inner.lock().expect("shadow engine lock poisoned");
        let live_sharpe_before = inner.live.rolling_sharpe();
        let shadow_sharpe_before = inner.shadow.rolling_sharpe();

        let (live_pnl, live_roi) = draw_trade(signal, volatility, inner.live.leverage, 1.0);
        let (shadow_pnl, shadow_roi) =
            draw_trade(signal, volatility, inner.shadow.leverage, inner.shadow.risk_multiplier);

        inner.live.record(live_pnl, live_roi);
        inner.shadow.record(shadow_pnl, shadow_roi);

        let mut promotion_alert = false;
        if inner.shadow.trade_count >= inner.promotion_threshold_iterations {
            let shadow_sharpe = inner.shadow.rolling_sharpe();
            let live_sharpe = inner.live.rolling_sharpe();
            if shadow_sharpe > live_sharpe && shadow_sharpe >= inner.ratio_threshold {
                promotion_alert = true;
                inner.live.trade_count = 0;
                inner.shadow.trade_count = 0;
            }
        }

        PairedTrade {
            live_pnl,
            shadow_pnl,
            live_sharpe: live_sharpe_before,
            shadow_sharpe: shadow_sharpe_before,
            promotion_alert,
        }
    }

    /// Manually replace the shadow strategy wholesale, discarding all shadow
    /// history. Distinct from -- and never automatically triggered by --
    /// the promotion check in `simulate`.
    pub fn reset_shadow_strategy(&self, leverage: f64, risk_multiplier: f64) {
        let mut inner = self.inner.lock().expect("shadow engine lock poisoned");
        inner.shadow_generation += 1;
        let name = format!("Shadow-HighRisk-v{}", inner.shadow_generation);
        inner.shadow = Strategy::new(&name, leverage, risk_multiplier);
    }

    pub fn live_sharpe(&self) -> f64 {
        self.inner.lock().expect("shadow engine lock poisoned").live.rolling_sharpe()
    }

    pub fn shadow_sharpe(&self) -> f64 {
        self.inner.lock().expect("shadow engine lock poisoned").shadow.rolling_sharpe()
    }
}

fn draw_trade(signal: Signal, volatility: f64, leverage: f64, risk_multiplier: f64) -> (f64, f64) {
    if signal == Signal::Hold {
        return (0.0, 0.0);
    }
    let sign = if signal == Signal::Buy { 1.0 } else { -1.0 };
    let scaled_vol = volatility * risk_multiplier;
    let mut rng = rand::rng();
    let noise: f64 = {
        // Box-Muller transform for a standard normal sample.
        let u1: f64 = rng.random_range(1e-9..1.0);
        let u2: f64 = rng.random_range(0.0..1.0);
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    };
    let price_move = noise * scaled_vol + sign * 0.3 * scaled_vol;
    let pnl = price_move * leverage * 1000.0;
    let roi = (pnl / 1000.0) * 100.0;
    (pnl, roi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hold_signal_produces_zero_pnl() {
        let engine = ShadowEngine::new(100, 1.2);
        let trade = engine.simulate(Signal::Hold, 0.02);
        assert_eq!(trade.live_pnl, 0.0);
        assert_eq!(trade.shadow_pnl, 0.0);
    }

    #[test]
    fn first_trade_has_zero_sharpe() {
        let engine = ShadowEngine::new(100, 1.2);
        let trade = engine.simulate(Signal::Buy, 0.02);
        assert_eq!(trade.live_sharpe, 0.0);
        assert_eq!(trade.shadow_sharpe, 0.0);
    }

    #[test]
    fn promotion_alert_never_fires_before_threshold() {
        let engine = ShadowEngine::new(10, 0.0);
        for _ in 0..9 {
            let trade = engine.simulate(Signal::Buy, 0.01);
            assert!(!trade.promotion_alert);
        }
    }

    #[test]
    fn reset_shadow_strategy_clears_history_and_bumps_generation() {
        let engine = ShadowEngine::new(100, 1.2);
        for _ in 0..5 {
            engine.simulate(Signal::Buy, 0.02);
        }
        engine.reset_shadow_strategy(3.0, 2.0);
        assert_eq!(engine.shadow_sharpe(), 0.0);
    }
}
