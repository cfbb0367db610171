//! Push-based metrics reporter: periodically snapshots every shared
//! component and emits one `METRICS_JSON:`-prefixed line to stdout. No HTTP
//! server, no incoming connections — outbound only.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::application::guardrails::Guardrails;
use crate::application::ledger::Ledger;
use crate::application::shadow_engine::ShadowEngine;
use crate::domain::active_module::ActiveModule;
use crate::domain::shared_state::SharedState;
use crate::domain::types::RiskLevel;
use crate::infrastructure::observability::metrics::Metrics;

#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub risk: RiskSnapshot,
    pub ledger: LedgerSnapshot,
    pub shadow: ShadowSnapshot,
    pub guardrails: GuardrailsSnapshot,
    pub active_module_version: u64,
}

#[derive(Serialize)]
pub struct RiskSnapshot {
    pub risk_level: &'static str,
    pub sentiment_multiplier: f64,
    pub whale_dump_risk: bool,
}

#[derive(Serialize)]
pub struct LedgerSnapshot {
    pub total: i64,
    pub audited: i64,
    pub avg_score_1h: Option<f64>,
}

#[derive(Serialize)]
pub struct ShadowSnapshot {
    pub live_sharpe: f64,
    pub shadow_sharpe: f64,
}

#[derive(Serialize)]
pub struct GuardrailsSnapshot {
    pub initial_equity: f64,
    pub current_equity: f64,
    pub kill_switch_triggered: bool,
}

pub struct MetricsReporter {
    shared_state: Arc<SharedState>,
    ledger: Arc<Ledger>,
    guardrails: Arc<Guardrails>,
    active_module: Arc<ActiveModule>,
    shadow_engine: Arc<ShadowEngine>,
    metrics: Metrics,
    start_time: Instant,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(
        shared_state: Arc<SharedState>,
        ledger: Arc<Ledger>,
        guardrails: Arc<Guardrails>,
        active_module: Arc<ActiveModule>,
        shadow_engine: Arc<ShadowEngine>,
        metrics: Metrics,
        interval_seconds: u64,
    ) -> Self {
        Self {
            shared_state,
            ledger,
            guardrails,
            active_module,
            shadow_engine,
            metrics,
            start_time: Instant::now(),
            interval: Duration::from_secs(interval_seconds),
        }
    }

    pub async fn run(self) {
        info!(interval = ?self.interval, "metrics reporter starting push-based reporting");
        loop {
            tokio::time::sleep(self.interval).await;
            match self.collect_snapshot().await {
                Ok(snapshot) => match serde_json::to_string(&snapshot) {
                    Ok(json) => {
                        println!("METRICS_JSON:{json}");
                        info!(
                            risk = snapshot.risk.risk_level,
                            live_sharpe = snapshot.shadow.live_sharpe,
                            kill_switch = snapshot.guardrails.kill_switch_triggered,
                            "metrics snapshot reported"
                        );
                    }
                    Err(e) => warn!(error = %e, "failed to serialize metrics snapshot"),
                },
                Err(e) => warn!(error = %e, "failed to collect metrics snapshot"),
            }
        }
    }

    async fn collect_snapshot(&self) -> Result<MetricsSnapshot, crate::domain::errors::PersistenceError> {
        let state = self.shared_state.snapshot();
        let stats = self.ledger.statistics().await?;
        let guardrails_status = self.guardrails.status();
        let live_sharpe = self.shadow_engine.live_sharpe();
        let shadow_sharpe = self.shadow_engine.shadow_sharpe();
        let active_module_version = self.active_module.version();

        self.metrics.risk_level.set(if state.risk_level == RiskLevel::High { 1.0 } else { 0.0 });
        self.metrics.sentiment_multiplier.set(state.sentiment_multiplier);
        self.metrics.whale_dump_risk.set(if state.whale_dump_risk { 1.0 } else { 0.0 });
        self.metrics.kill_switch_active.set(if guardrails_status.kill_switch_triggered { 1.0 } else { 0.0 });
        self.metrics.current_equity_usd.set(guardrails_status.current_equity);
        self.metrics.active_module_version.set(active_module_version as f64);
        self.metrics.predictions_total.set(stats.total as f64);
        self.metrics.predictions_audited.set(stats.audited as f64);
        self.metrics.live_sharpe.set(live_sharpe);
        self.metrics.shadow_sharpe.set(shadow_sharpe);

        Ok(MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            risk: RiskSnapshot {
                risk_level: if state.risk_level == RiskLevel::High { "HIGH" } else { "NORMAL" },
                sentiment_multiplier: state.sentiment_multiplier,
                whale_dump_risk: state.whale_dump_risk,
            },
            ledger: LedgerSnapshot { total: stats.total, audited: stats.audited, avg_score_1h: stats.avg_score_1h },
            shadow: ShadowSnapshot { live_sharpe, shadow_sharpe },
            guardrails: GuardrailsSnapshot {
                initial_equity: guardrails_status.initial_equity,
                current_equity: guardrails_status.current_equity,
                kill_switch_triggered: guardrails_status.kill_switch_triggered,
            },
            active_module_version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collect_snapshot_reflects_current_shared_state() {
        let shared_state = Arc::new(SharedState::new());
        shared_state.set_risk(RiskLevel::High, None);
        let ledger = Arc::new(Ledger::open("sqlite::memory:").await.unwrap());
        let guardrails = Arc::new(Guardrails::new(1000.0, 0.03, 12));
        let active_module = Arc::new(ActiveModule::new("fn generate_signal() {}".to_string()));
        let shadow_engine = Arc::new(ShadowEngine::new(100, 1.2));
        let metrics = Metrics::new().unwrap();

        let reporter = MetricsReporter::new(shared_state, ledger, guardrails, active_module, shadow_engine, metrics, 60);
        let snapshot = reporter.collect_snapshot().await.unwrap();

        assert_eq!(snapshot.risk.risk_level, "HIGH");
        assert_eq!(snapshot.active_module_version, 1);
        assert_eq!(snapshot.ledger.total, 0);
    }
}
