//! Starts, sequences, and coordinates shutdown of every periodic loop.
//!
//! Each collaborator owns its own concurrency (the reasoning loop, Oracle,
//! SentimentProducer, and NarrativePulse already expose an interruptible
//! `run(cancellation)`); the Supervisor additionally drives the loops that
//! have no independent scheduler of their own -- the signal-execution loop,
//! the shadow-engine driver, the evolution-gate loop, and the two
//! collaborators whose contract is a bare `run_cycle` (the reconciliation
//! auditor and the evolutionary mutator). A single `CancellationToken` fans
//! out shutdown to all of them; the push-based metrics reporter is spawned
//! alongside the Supervisor rather than owned by it, since it depends on no
//! Supervisor-private state.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::architect::Architect;
use crate::application::behavioral_adversary::BehavioralAdversary;
use crate::application::evolution_memory::EvolutionMemory;
use crate::application::evolutionary_mutator::EvolutionaryMutator;
use crate::application::guardrails::Guardrails;
use crate::application::ledger::Ledger;
use crate::application::narrative_pulse::NarrativePulse;
use crate::application::oracle::Oracle;
use crate::application::reasoning_loop::{AnalysisPublisher, ReasoningLoop};
use crate::application::reconciliation_auditor::ReconciliationAuditor;
use crate::application::sentiment_producer::SentimentProducer;
use crate::application::shadow_engine::ShadowEngine;
use crate::domain::ports::MarketAdapter;
use crate::domain::shared_state::SharedState;
use crate::domain::types::MarketSnapshot;

/// How often the signal-execution loop consumes `latest_analysis` and runs
/// the adversary + ledger recording step. Independent of the reasoning
/// loop's own publication cadence so a slow reasoning tick never blocks it.
const SIGNAL_LOOP_INTERVAL: Duration = Duration::from_secs(60);
/// Shadow-engine driver cadence: a paired trade per tick, much finer-grained
/// than `SIGNAL_LOOP_INTERVAL` so the Sharpe windows fill at a realistic rate.
const SHADOW_DRIVER_INTERVAL: Duration = Duration::from_secs(30);
/// "Every minute" per the evolution-gate loop contract.
const EVOLUTION_GATE_INTERVAL: Duration = Duration::from_secs(60);
/// Longest configured cadence: the reconciliation auditor runs here.
const RECONCILIATION_INTERVAL: Duration = Duration::from_secs(3600);
/// The mutator's own `due()` check gates the real 24h+ cadence; this is just
/// how often the Supervisor offers it a chance to notice it's due.
const MUTATOR_POLL_INTERVAL: Duration = Duration::from_secs(3600);

fn sentiment_label(multiplier: f64) -> &'static str {
    if multiplier <= 0.75 {
        "Panicked"
    } else if multiplier >= 1.25 {
        "Euphoric"
    } else {
        "Neutral"
    }
}

pub struct Supervisor {
    market: Arc<dyn MarketAdapter>,
    symbol: String,
    timeframe: String,
    shared_state: Arc<SharedState>,
    publisher: Arc<AnalysisPublisher>,
    reasoning_loop: Arc<ReasoningLoop>,
    oracle: Arc<Oracle>,
    sentiment: Arc<SentimentProducer>,
    narrative: Arc<NarrativePulse>,
    adversary: Arc<BehavioralAdversary>,
    ledger: Arc<Ledger>,
    reconciliation: Arc<ReconciliationAuditor>,
    mutator: Arc<EvolutionaryMutator>,
    architect: Arc<Architect>,
    guardrails: Arc<Guardrails>,
    evolution_memory: Arc<EvolutionMemory>,
    shadow_engine: Arc<ShadowEngine>,
    base_position_size: f64,
    open_evolution_windows: Mutex<Vec<usize>>,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        market: Arc<dyn MarketAdapter>,
        symbol: String,
        timeframe: String,
        shared_state: Arc<SharedState>,
        publisher: Arc<AnalysisPublisher>,
        reasoning_loop: Arc<ReasoningLoop>,
        oracle: Arc<Oracle>,
        sentiment: Arc<SentimentProducer>,
        narrative: Arc<NarrativePulse>,
        adversary: Arc<BehavioralAdversary>,
        ledger: Arc<Ledger>,
        reconciliation: Arc<ReconciliationAuditor>,
        mutator: Arc<EvolutionaryMutator>,
        architect: Arc<Architect>,
        guardrails: Arc<Guardrails>,
        evolution_memory: Arc<EvolutionMemory>,
        shadow_engine: Arc<ShadowEngine>,
        base_position_size: f64,
    ) -> Self {
        Self {
            market,
            symbol,
            timeframe,
            shared_state,
            publisher,
            reasoning_loop,
            oracle,
            sentiment,
            narrative,
            adversary,
            ledger,
            reconciliation,
            mutator,
            architect,
            guardrails,
            evolution_memory,
            shadow_engine,
            base_position_size,
            open_evolution_windows: Mutex::new(Vec::new()),
        }
    }

    /// Spawns every loop this Supervisor owns and returns their join
    /// handles. Shutdown is driven externally: cancel `cancellation`, then
    /// await the returned handles (each loop honors the token within its own
    /// bounded grace period). Takes `Arc<Self>` by value so every spawned
    /// task can hold its own cheap clone of the handle.
    pub fn start(self: Arc<Self>, cancellation: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        {
            let reasoning = self.reasoning_loop.clone();
            let token = cancellation.clone();
            handles.push(tokio::spawn(async move { reasoning.run(token).await }));
        }
        {
            let oracle = self.oracle.clone();
            let token = cancellation.clone();
            handles.push(tokio::spawn(async move { oracle.run(token).await }));
        }
        {
            let sentiment = self.sentiment.clone();
            let token = cancellation.clone();
            handles.push(tokio::spawn(async move { sentiment.run(token).await }));
        }
        {
            let narrative = self.narrative.clone();
            let token = cancellation.clone();
            handles.push(tokio::spawn(async move { narrative.run(token).await }));
        }

        handles.push(self.spawn_periodic("signal-execution", cancellation.clone(), SIGNAL_LOOP_INTERVAL, {
            let this = self.clone();
            move || {
                let this = this.clone();
                async move { this.signal_execution_tick().await }
            }
        }));

        handles.push(self.spawn_periodic("shadow-engine driver", cancellation.clone(), SHADOW_DRIVER_INTERVAL, {
            let this = self.clone();
            move || {
                let this = this.clone();
                async move { this.shadow_driver_tick().await }
            }
        }));

        handles.push(self.spawn_periodic("evolution-gate", cancellation.clone(), EVOLUTION_GATE_INTERVAL, {
            let this = self.clone();
            move || {
                let this = this.clone();
                async move { this.evolution_gate_tick().await }
            }
        }));

        handles.push(self.spawn_periodic("reconciliation auditor", cancellation.clone(), RECONCILIATION_INTERVAL, {
            let auditor = self.reconciliation.clone();
            move || {
                let auditor = auditor.clone();
                async move { auditor.run_cycle().await }
            }
        }));

        handles.push(self.spawn_periodic("evolutionary mutator", cancellation.clone(), MUTATOR_POLL_INTERVAL, {
            let mutator = self.mutator.clone();
            move || {
                let mutator = mutator.clone();
                async move {
                    mutator.run_cycle(false).await;
                }
            }
        }));

        handles
    }

    /// Generic interruptible periodic driver: mirrors the `select!`-on-sleep
    /// pattern every hand-rolled loop in this crate already uses, so ad hoc
    /// collaborators (the auditor, the mutator) get the same cancellation
    /// and fault-tolerance guarantees as the loops that implement `run`
    /// themselves.
    fn spawn_periodic<F, Fut>(&self, name: &'static str, cancellation: CancellationToken, interval: Duration, mut tick: F) -> JoinHandle<()>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => {
                        info!(loop_name = name, "loop shutting down");
                        return;
                    }
                    _ = tick() => {}
                }
                tokio::select! {
                    _ = cancellation.cancelled() => {
                        info!(loop_name = name, "loop shutting down");
                        return;
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        })
    }

    /// Consumes the latest published `Analysis`: classifies the market
    /// through the behavioral adversary, sizes the trade via the Architect,
    /// and records a new prediction row for later reconciliation.
    async fn signal_execution_tick(&self) {
        let Some(analysis) = self.publisher.latest() else { return };

        let candles = self.market.fetch_ohlcv(&self.symbol, &self.timeframe, 2).await;
        let Some(last) = candles.last() else { return };
        let price = last.close;
        let price_change_pct = if candles.len() >= 2 && candles[candles.len() - 2].close != 0.0 {
            let prev = candles[candles.len() - 2].close;
            (price - prev) / prev * 100.0
        } else {
            0.0
        };

        let snapshot = MarketSnapshot {
            price,
            rsi: analysis.metrics.rsi,
            volume: last.volume,
            price_change_pct,
            vwap: price * 0.99,
            volume_24h: last.volume,
        };
        let label = sentiment_label(self.shared_state.get_sentiment());

        let result = self.adversary.analyze(snapshot, label).await;
        let adjusted_size = self.architect.get_adjusted_size(self.base_position_size);

        match self
            .ledger
            .record(
                &result.predicted_bias,
                &result.predicted_outcome,
                result.confidence,
                &result.market_regime,
                &result.detected_archetype.to_string(),
                result.signal,
                price,
            )
            .await
        {
            Ok(id) => info!(
                prediction_id = id,
                archetype = %result.detected_archetype,
                mode = ?result.mode,
                adjusted_size,
                "signal execution tick recorded prediction"
            ),
            Err(e) => warn!(error = %e, "failed to record prediction"),
        }
    }

    /// Runs one paired live/shadow trade from the latest signal and folds
    /// the live leg's PnL into Guardrails' equity trail, so the kill-switch
    /// and stability-lock gates react to the same simulated performance the
    /// shadow engine is comparing against.
    async fn shadow_driver_tick(&self) {
        let Some(analysis) = self.publisher.latest() else { return };

        let candles = self.market.fetch_ohlcv(&self.symbol, &self.timeframe, 1).await;
        let price = candles.last().map(|c| c.close).unwrap_or(0.0);
        let volatility = if price > 0.0 { (analysis.metrics.atr / price).abs() } else { 0.02 };

        let trade = self.shadow_engine.simulate(analysis.signal, volatility.max(0.001));
        if trade.promotion_alert {
            warn!(
                shadow_sharpe = trade.shadow_sharpe,
                live_sharpe = trade.live_sharpe,
                "shadow engine promotion alert: shadow strategy has outperformed live"
            );
        }

        let status = self.guardrails.status();
        let new_equity = status.current_equity + trade.live_pnl;
        self.guardrails.update_equity(new_equity);

        let pnl = new_equity - status.initial_equity;
        let open_windows = self.open_evolution_windows.lock().expect("supervisor lock poisoned").clone();
        for index in open_windows {
            self.evolution_memory.update_window(index, new_equity, pnl).await;
        }
    }

    /// Every minute: if the latest analysis carries an evolution
    /// suggestion, attempt the full evolution protocol. A successful
    /// evolution already bumps the active module's version counter inside
    /// `Architect::evolve`; this loop's only remaining job is to start
    /// tracking the new record's PnL window.
    async fn evolution_gate_tick(&self) {
        let Some(analysis) = self.publisher.latest() else { return };
        if analysis.evolution_suggestion.is_none() {
            return;
        }

        if self.architect.evolve(&analysis).await {
            let index = self.evolution_memory.stats().total_evolutions.saturating_sub(1);
            self.open_evolution_windows.lock().expect("supervisor lock poisoned").push(index);
            info!(evolution_index = index, "evolution committed; active module reloaded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentiment_label_thresholds() {
        assert_eq!(sentiment_label(0.6), "Panicked");
        assert_eq!(sentiment_label(1.0), "Neutral");
        assert_eq!(sentiment_label(1.4), "Euphoric");
    }
}
