//! Aether Control Server - headless autonomous trading supervisor.
//!
//! Runs every periodic loop (reasoning, risk oracles, the evolution gate,
//! the shadow engine, the reconciliation auditor, the prompt mutator)
//! concurrently. Metrics are pushed via structured JSON logs to stdout and
//! exposed as Prometheus gauges through the same `Metrics` registry used by
//! the reporter -- there is no inbound HTTP server.
//!
//! # Environment Variables
//! See `Config::from_env` for the full list; the most relevant are
//! `TRADING_SYMBOL`, `INITIAL_EQUITY`, `KILL_SWITCH_THRESHOLD`,
//! `DEEPSEEK_API_KEY`, and `OBSERVABILITY_ENABLED`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::prelude::*;

use aether_control::application::adversarial_screen::AdversarialScreen;
use aether_control::application::architect::Architect;
use aether_control::application::behavioral_adversary::BehavioralAdversary;
use aether_control::application::evolution_memory::EvolutionMemory;
use aether_control::application::evolutionary_mutator::{EvolutionaryMutator, PromptStore};
use aether_control::application::guardrails::Guardrails;
use aether_control::application::ledger::Ledger;
use aether_control::application::narrative_pulse::NarrativePulse;
use aether_control::application::oracle::Oracle;
use aether_control::application::reasoning_loop::{AnalysisPublisher, ReasoningLoop};
use aether_control::application::reconciliation_auditor::ReconciliationAuditor;
use aether_control::application::sentiment_producer::SentimentProducer;
use aether_control::application::shadow_engine::ShadowEngine;
use aether_control::application::supervisor::Supervisor;
use aether_control::config::Config;
use aether_control::domain::active_module::ActiveModule;
use aether_control::domain::ports::{LlmAdapter, MarketAdapter};
use aether_control::domain::shared_state::SharedState;
use aether_control::infrastructure::backtest_gate::SyntheticBacktestGate;
use aether_control::infrastructure::llm_adapter::{DeepSeekAdapter, UnconfiguredLlmAdapter};
use aether_control::infrastructure::market_adapter::WeexMarketAdapter;
use aether_control::infrastructure::observability::metrics::Metrics;
use aether_control::infrastructure::observability::reporter::MetricsReporter;
use aether_control::infrastructure::reasoning_trace::ReasoningTraceLog;

const DEFAULT_TIMEFRAME: &str = "1h";
/// Position size (in quote-currency units) the signal-execution loop scales
/// via `Architect::get_adjusted_size` before logging. Not an order: the
/// core emits signals and adjusted sizes, never fills.
const BASE_POSITION_SIZE: f64 = 100.0;

const DEFAULT_ACTIVE_MODULE_SOURCE: &str = r#"// default decision module: balanced SMA crossover
// stop_loss: enforced via max_loss and drawdown_limit
// risk management: position_size capped, drawdown monitored every tick

const STOP_LOSS_PCT: f64 = 0.02;
const MAX_LOSS_PCT: f64 = 0.02;
const MAX_POSITION_SIZE: f64 = 0.25;
const DRAWDOWN_LIMIT: f64 = 0.15;

fn calculate_indicators(candles: &[Candle]) -> Option<(f64, f64)> {
    Some((sma(candles, 10), sma(candles, 30)))
}

fn generate_signal(short_sma: f64, long_sma: f64) -> Signal {
    if short_sma > long_sma { Signal::Buy } else if short_sma < long_sma { Signal::Sell } else { Signal::Hold }
}
"#;

async fn load_active_module_source(path: &str) -> String {
    match tokio::fs::read_to_string(path).await {
        Ok(source) => source,
        Err(_) => DEFAULT_ACTIVE_MODULE_SOURCE.to_string(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("Aether Control {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(symbol = %config.trading_symbol, initial_equity = config.initial_equity, "configuration loaded");

    // --- Durable stores ---
    let ledger = Arc::new(Ledger::open(&config.ledger_db_path).await?);
    let evolution_memory = Arc::new(EvolutionMemory::load(config.evolution_history_path.clone()).await);
    let prompts = Arc::new(PromptStore::load(config.prompts_dir.clone()).await?);
    let active_module_source = load_active_module_source(&config.active_module_path).await;
    let active_module = Arc::new(ActiveModule::new(active_module_source));

    // --- Shared state & guardrails ---
    let shared_state = Arc::new(SharedState::new());
    let guardrails = Arc::new(Guardrails::new(config.initial_equity, config.kill_switch_threshold, config.stability_lock_hours));

    // --- External adapters ---
    let market = Arc::new(WeexMarketAdapter::new(
        config.exchange_api_key.clone(),
        config.exchange_api_secret.clone(),
        config.exchange_api_password.clone(),
        config.alpaca_api_key.clone(),
        config.alpaca_secret_key.clone(),
    ));
    let llm: Arc<dyn LlmAdapter> = match config.deepseek_api_key.clone() {
        Some(key) => Arc::new(DeepSeekAdapter::new(key, config.deepseek_model.clone())),
        None => {
            warn!("DEEPSEEK_API_KEY not set; reasoning calls will permanently fall back to shadow mode");
            Arc::new(UnconfiguredLlmAdapter)
        }
    };

    // Resolve the trading symbol against the venue's actual universe before
    // wiring any loop to it. `DiscoveryMode::Mock` means enumeration failed
    // and `discovery.symbols` is the minimum-viable fallback set; in that
    // case a configured symbol outside the fallback set is replaced with
    // the fallback's first entry rather than handed to loops that would
    // fetch candles for a symbol the venue never confirmed.
    let discovery = market.discover_symbols().await;
    info!(mode = ?discovery.mode, symbols = ?discovery.symbols, "symbol discovery complete");
    let trading_symbol = if discovery.symbols.contains(&config.trading_symbol) {
        config.trading_symbol.clone()
    } else {
        let fallback = discovery.symbols.first().cloned().unwrap_or_else(|| config.trading_symbol.clone());
        warn!(
            configured = %config.trading_symbol,
            resolved = %fallback,
            "configured trading symbol not in discovered universe; using fallback"
        );
        fallback
    };

    // --- Protocol collaborators ---
    let adversarial_screen = AdversarialScreen::new(config.flash_crash_pct, config.max_drawdown_threshold, true);
    let backtest_gate = Arc::new(SyntheticBacktestGate::new(config.min_sharpe_deploy, config.max_drawdown_deploy));
    let architect = Arc::new(Architect::new(
        active_module.clone(),
        guardrails.clone(),
        shared_state.clone(),
        evolution_memory.clone(),
        adversarial_screen,
        backtest_gate,
        config.active_module_path.clone(),
        config.min_sharpe_deploy,
        config.max_drawdown_deploy,
    ));

    let publisher = Arc::new(AnalysisPublisher::new());
    let reasoning_trace = Arc::new(ReasoningTraceLog::new(config.reasoning_trace_path.clone()));
    let reasoning_loop = Arc::new(
        ReasoningLoop::new(
            market.clone(),
            publisher.clone(),
            trading_symbol.clone(),
            DEFAULT_TIMEFRAME.to_string(),
            Duration::from_secs(config.reasoning_interval_minutes.max(1) as u64 * 60),
        )
        .with_trace_log(reasoning_trace),
    );
    let oracle = Arc::new(Oracle::new(market.clone(), shared_state.clone(), config.spy_threshold, Duration::from_secs(3600)));
    let sentiment = Arc::new(SentimentProducer::new(market.clone(), shared_state.clone(), Duration::from_secs(900)));
    let narrative = Arc::new(NarrativePulse::new(
        market.clone(),
        shared_state.clone(),
        trading_symbol.clone(),
        config.whale_threshold_btc,
        Duration::from_secs(300),
    ));

    let adversary = Arc::new(BehavioralAdversary::new(Some(llm.clone())));
    let reconciliation = Arc::new(ReconciliationAuditor::new(ledger.clone(), market.clone(), trading_symbol.clone()));
    let mutator = Arc::new(EvolutionaryMutator::new(ledger.clone(), llm.clone(), prompts.clone(), config.evolution_interval_hours));
    let shadow_engine = Arc::new(ShadowEngine::new(config.promotion_threshold_iterations, config.sharpe_ratio_threshold));

    let supervisor = Arc::new(Supervisor::new(
        market.clone(),
        trading_symbol.clone(),
        DEFAULT_TIMEFRAME.to_string(),
        shared_state.clone(),
        publisher,
        reasoning_loop,
        oracle,
        sentiment,
        narrative,
        adversary,
        ledger.clone(),
        reconciliation,
        mutator,
        architect,
        guardrails.clone(),
        evolution_memory,
        shadow_engine.clone(),
        BASE_POSITION_SIZE,
    ));

    let cancellation = CancellationToken::new();
    let handles = supervisor.start(cancellation.clone());
    info!(loops = handles.len(), "supervisor started");

    if config.observability_enabled {
        let metrics = Metrics::new()?;
        let reporter = MetricsReporter::new(shared_state, ledger, guardrails, active_module, shadow_engine, metrics, config.observability_interval_secs);
        tokio::spawn(async move { reporter.run().await });
        info!(interval = config.observability_interval_secs, "metrics reporter started");
    } else {
        info!("metrics reporting disabled");
    }

    info!("server running; press Ctrl+C to shut down");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received; cancelling loops");
    cancellation.cancel();

    for handle in handles {
        if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
            warn!("a loop did not terminate within its shutdown grace period");
        }
    }

    info!("shutdown complete");
    Ok(())
}
