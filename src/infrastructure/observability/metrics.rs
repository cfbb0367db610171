//! Prometheus metrics, `aether_`-prefixed, read-only.

use prometheus::{
    core::{AtomicF64, GenericGauge},
    Gauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    pub risk_level: GenericGauge<AtomicF64>,
    pub sentiment_multiplier: GenericGauge<AtomicF64>,
    pub whale_dump_risk: GenericGauge<AtomicF64>,
    pub kill_switch_active: GenericGauge<AtomicF64>,
    pub current_equity_usd: GenericGauge<AtomicF64>,
    pub active_module_version: GenericGauge<AtomicF64>,
    pub predictions_total: GenericGauge<AtomicF64>,
    pub predictions_audited: GenericGauge<AtomicF64>,
    pub live_sharpe: GenericGauge<AtomicF64>,
    pub shadow_sharpe: GenericGauge<AtomicF64>,
    pub prompt_version: GenericGauge<AtomicF64>,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        macro_rules! gauge {
            ($name:literal, $help:literal) => {{
                let g = Gauge::with_opts(Opts::new($name, $help))?;
                registry.register(Box::new(g.clone()))?;
                g
            }};
        }

        let risk_level = gauge!("aether_risk_level", "Current SharedState risk level (0=Normal, 1=High)");
        let sentiment_multiplier = gauge!("aether_sentiment_multiplier", "Current position-size sentiment multiplier");
        let whale_dump_risk = gauge!("aether_whale_dump_risk", "Whether a whale-dump condition is currently latched (0/1)");
        let kill_switch_active = gauge!("aether_kill_switch_active", "Whether the guardrails kill switch is tripped (0/1)");
        let current_equity_usd = gauge!("aether_current_equity_usd", "Current tracked equity in USD");
        let active_module_version = gauge!("aether_active_module_version", "Version counter of the committed strategy module");
        let predictions_total = gauge!("aether_predictions_total", "Total predictions recorded in the ledger");
        let predictions_audited = gauge!("aether_predictions_audited", "Predictions that have completed reconciliation");
        let live_sharpe = gauge!("aether_live_sharpe", "Rolling Sharpe of the live shadow strategy");
        let shadow_sharpe = gauge!("aether_shadow_sharpe", "Rolling Sharpe of the high-risk shadow strategy");
        let prompt_version = gauge!("aether_prompt_version", "Version counter of the adversary prompt");

        Ok(Self {
            registry: Arc::new(registry),
            risk_level,
            sentiment_multiplier,
            whale_dump_risk,
            kill_switch_active,
            current_equity_usd,
            active_module_version,
            predictions_total,
            predictions_audited,
            live_sharpe,
            shadow_sharpe,
            prompt_version,
        })
    }

    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        encoder.encode_to_string(&families).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("failed to construct default Metrics registry")
    }
}
