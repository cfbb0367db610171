use anyhow::{Context, Result};
use std::env;

/// Process-wide configuration, resolved once at startup from the
/// environment. Each field is read independently with its own documented
/// default; a field that genuinely cannot tolerate a bad value fails
/// startup via `.context(...)` rather than silently falling back.
#[derive(Debug, Clone)]
pub struct Config {
    pub trading_symbol: String,
    pub initial_equity: f64,
    pub kill_switch_threshold: f64,
    pub stability_lock_hours: i64,
    pub reasoning_interval_minutes: i64,

    pub evolution_interval_hours: i64,
    pub promotion_threshold_iterations: u32,
    pub sharpe_ratio_threshold: f64,
    pub min_sharpe_deploy: f64,
    pub max_drawdown_deploy: f64,
    pub whale_threshold_btc: f64,
    pub spy_threshold: f64,
    pub flash_crash_pct: f64,
    pub max_drawdown_threshold: f64,
    pub deepseek_model: String,

    pub evolution_history_path: String,
    pub ledger_db_path: String,
    pub prompts_dir: String,
    pub active_module_path: String,
    pub reasoning_trace_path: String,
    pub observability_enabled: bool,
    pub observability_interval_secs: u64,

    pub deepseek_api_key: Option<String>,
    pub alpaca_api_key: Option<String>,
    pub alpaca_secret_key: Option<String>,
    pub exchange_api_key: Option<String>,
    pub exchange_api_secret: Option<String>,
    pub exchange_api_password: Option<String>,
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("Failed to parse {key}")),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            trading_symbol: env::var("TRADING_SYMBOL").unwrap_or_else(|_| "BTC/USDT".to_string()),
            initial_equity: parse_env("INITIAL_EQUITY", 1000.0)?,
            kill_switch_threshold: parse_env("KILL_SWITCH_THRESHOLD", 0.03)?,
            stability_lock_hours: parse_env("STABILITY_LOCK_HOURS", 12)?,
            reasoning_interval_minutes: parse_env("REASONING_INTERVAL_MINUTES", 15)?,

            evolution_interval_hours: parse_env("EVOLUTION_INTERVAL_HOURS", 24)?,
            promotion_threshold_iterations: parse_env("PROMOTION_THRESHOLD_ITERATIONS", 100)?,
            sharpe_ratio_threshold: parse_env("SHARPE_RATIO_THRESHOLD", 1.2)?,
            min_sharpe_deploy: parse_env("MIN_SHARPE_DEPLOY", 1.2)?,
            max_drawdown_deploy: parse_env("MAX_DRAWDOWN_DEPLOY", 0.05)?,
            whale_threshold_btc: parse_env("WHALE_THRESHOLD_BTC", 1000.0)?,
            spy_threshold: parse_env("SPY_THRESHOLD", -0.01)?,
            flash_crash_pct: parse_env("FLASH_CRASH_PCT", -0.20)?,
            max_drawdown_threshold: parse_env("MAX_DRAWDOWN_THRESHOLD", 0.15)?,
            deepseek_model: env::var("DEEPSEEK_MODEL").unwrap_or_else(|_| "deepseek-r1".to_string()),

            evolution_history_path: env::var("EVOLUTION_HISTORY_PATH")
                .unwrap_or_else(|_| "data/evolution_history.json".to_string()),
            ledger_db_path: env::var("LEDGER_DB_PATH")
                .unwrap_or_else(|_| "sqlite://data/ledger.db".to_string()),
            prompts_dir: env::var("PROMPTS_DIR").unwrap_or_else(|_| "data/prompts".to_string()),
            active_module_path: env::var("ACTIVE_MODULE_PATH")
                .unwrap_or_else(|_| "data/active_logic.rs".to_string()),
            reasoning_trace_path: env::var("REASONING_TRACE_PATH")
                .unwrap_or_else(|_| "data/reasoning_trace.jsonl".to_string()),
            observability_enabled: parse_env("OBSERVABILITY_ENABLED", true)?,
            observability_interval_secs: parse_env("OBSERVABILITY_INTERVAL", 60)?,

            deepseek_api_key: env::var("DEEPSEEK_API_KEY").ok(),
            alpaca_api_key: env::var("ALPACA_API_KEY").ok(),
            alpaca_secret_key: env::var("ALPACA_SECRET_KEY").ok(),
            exchange_api_key: env::var("WEEX_API_KEY").ok(),
            exchange_api_secret: env::var("WEEX_API_SECRET").ok(),
            exchange_api_password: env::var("WEEX_API_PASSWORD").ok(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_env_falls_back_to_default_when_unset() {
        // SAFETY: test-only env mutation, not shared across threads by cargo test harness here
        // since this key is never used elsewhere.
        unsafe { env::remove_var("AETHER_TEST_UNSET_KEY") };
        let value: f64 = parse_env("AETHER_TEST_UNSET_KEY", 42.0).unwrap();
        assert_eq!(value, 42.0);
    }

    #[test]
    fn parse_env_errors_on_bad_value() {
        unsafe { env::set_var("AETHER_TEST_BAD_KEY", "not-a-number") };
        let result: Result<f64> = parse_env("AETHER_TEST_BAD_KEY", 1.0);
        assert!(result.is_err());
        unsafe { env::remove_var("AETHER_TEST_BAD_KEY") };
    }
}
