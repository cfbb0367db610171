//! Periodic prompt evolution: rewrites the adversary system prompt from the
//! ledger's worst-scoring predictions, gated by the Symmetry Guard so a
//! mutation can never drop risk language the original prompt carried.

use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{info, warn};

use crate::application::ledger::Ledger;
use crate::domain::errors::{LlmError, PersistenceError};
use crate::domain::ports::LlmAdapter;

const STOP_LOSS_VOCAB: &[&str] = &["stop", "risk", "loss", "risk management"];
const COT_VOCAB: &[&str] = &["reasoning", "explain", "step-by-step", "chain-of-thought"];
const DANGEROUS_VOCAB: &[&str] = &["no stop", "ignore risk", "unlimited loss", "all in", "no risk management"];

const BUILTIN_PROMPT_V0: &str = "You are a behavioral-finance adversary. Always reason step-by-step, \
explain your chain-of-thought, and never recommend a position without an explicit stop-loss and risk management plan.";

fn contains_any(haystack: &str, vocab: &[&str]) -> bool {
    let lower = haystack.to_lowercase();
    vocab.iter().any(|w| lower.contains(w))
}

/// The Symmetry Guard: checked in order so the rejection reason always
/// reflects the first failing check, never a later one masking an earlier
/// regression.
fn symmetry_guard(candidate: &str) -> Result<(), String> {
    if !contains_any(candidate, STOP_LOSS_VOCAB) {
        return Err("candidate prompt dropped stop-loss/risk vocabulary".to_string());
    }
    if !contains_any(candidate, COT_VOCAB) {
        return Err("candidate prompt dropped chain-of-thought vocabulary".to_string());
    }
    if contains_any(candidate, DANGEROUS_VOCAB) {
        return Err("candidate prompt introduced a dangerous pattern".to_string());
    }
    Ok(())
}

fn extract_prompt(response: &str) -> String {
    match (response.find("[PROMPT_START]"), response.find("[PROMPT_END]")) {
        (Some(start), Some(end)) if start < end => {
            response[start + "[PROMPT_START]".len()..end].trim().to_string()
        }
        _ => response.trim().to_string(),
    }
}

struct PromptState {
    current_version: u32,
    current_text: String,
}

/// Owns `prompts_dir`: `adversary_v{N}.txt` files plus `archive/` timestamped
/// copies. Single writer (this component); atomic-replace on each write.
pub struct PromptStore {
    prompts_dir: String,
    state: RwLock<PromptState>,
}

impl PromptStore {
    pub async fn load(prompts_dir: impl Into<String>) -> Result<Self, PersistenceError> {
        let prompts_dir = prompts_dir.into();
        tokio::fs::create_dir_all(&prompts_dir).await.map_err(|e| PersistenceError::Io { path: prompts_dir.clone(), source: e })?;
        tokio::fs::create_dir_all(format!("{prompts_dir}/archive"))
            .await
            .map_err(|e| PersistenceError::Io { path: prompts_dir.clone(), source: e })?;

        let mut entries = tokio::fs::read_dir(&prompts_dir).await.map_err(|e| PersistenceError::Io { path: prompts_dir.clone(), source: e })?;
        let mut highest: Option<(u32, std::path::PathBuf)> = None;
        while let Some(entry) = entries.next_entry().await.map_err(|e| PersistenceError::Io { path: prompts_dir.clone(), source: e })? {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(version) = name.strip_prefix("adversary_v").and_then(|s| s.strip_suffix(".txt")).and_then(|s| s.parse::<u32>().ok()) {
                if highest.as_ref().map(|(v, _)| version > *v).unwrap_or(true) {
                    highest = Some((version, entry.path()));
                }
            }
        }

        let (current_version, current_text) = match highest {
            Some((version, path)) => {
                let raw = tokio::fs::read_to_string(&path).await.map_err(|e| PersistenceError::Io { path: prompts_dir.clone(), source: e })?;
                (version, strip_header(&raw))
            }
            None => {
                let store = Self { prompts_dir: prompts_dir.clone(), state: RwLock::new(PromptState { current_version: 0, current_text: BUILTIN_PROMPT_V0.to_string() }) };
                store.write_version(0, BUILTIN_PROMPT_V0).await?;
                return Ok(store);
            }
        };

        Ok(Self { prompts_dir, state: RwLock::new(PromptState { current_version, current_text }) })
    }

    pub fn load_current_prompt(&self) -> String {
        self.state.read().expect("prompt store lock poisoned").current_text.clone()
    }

    pub fn current_version(&self) -> u32 {
        self.state.read().expect("prompt store lock poisoned").current_version
    }

    async fn write_version(&self, version: u32, text: &str) -> Result<(), PersistenceError> {
        let path = format!("{}/adversary_v{version}.txt", self.prompts_dir);
        let header = format!("# version={version} created_at={}\n", Utc::now().to_rfc3339());
        let body = format!("{header}{text}");
        let tmp_path = format!("{path}.tmp");
        tokio::fs::write(&tmp_path, &body).await.map_err(|e| PersistenceError::Io { path: tmp_path.clone(), source: e })?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(|e| PersistenceError::Io { path, source: e })?;
        Ok(())
    }

    /// Archives the current version under a `YYYYMMDD_HHMMSS` suffix, then
    /// writes and activates `text` as the new current version.
    async fn adopt(&self, text: String) -> Result<u32, PersistenceError> {
        let (old_version, old_text) = {
            let state = self.state.read().expect("prompt store lock poisoned");
            (state.current_version, state.current_text.clone())
        };
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let archive_path = format!("{}/archive/adversary_v{old_version}_{timestamp}.txt", self.prompts_dir);
        tokio::fs::write(&archive_path, &old_text).await.map_err(|e| PersistenceError::Io { path: archive_path, source: e })?;

        let new_version = old_version + 1;
        self.write_version(new_version, &text).await?;
        {
            let mut state = self.state.write().expect("prompt store lock poisoned");
            state.current_version = new_version;
            state.current_text = text;
        }
        Ok(new_version)
    }
}

fn strip_header(raw: &str) -> String {
    match raw.split_once('\n') {
        Some((first, rest)) if first.starts_with('#') => rest.to_string(),
        _ => raw.to_string(),
    }
}

pub struct EvolutionaryMutator {
    ledger: Arc<Ledger>,
    llm: Arc<dyn LlmAdapter>,
    prompts: Arc<PromptStore>,
    evolution_interval_hours: i64,
    last_evolution_time: RwLock<Option<DateTime<Utc>>>,
}

impl EvolutionaryMutator {
    pub fn new(ledger: Arc<Ledger>, llm: Arc<dyn LlmAdapter>, prompts: Arc<PromptStore>, evolution_interval_hours: i64) -> Self {
        Self { ledger, llm, prompts, evolution_interval_hours, last_evolution_time: RwLock::new(None) }
    }

    fn due(&self) -> bool {
        match *self.last_evolution_time.read().expect("mutator lock poisoned") {
            None => true,
            Some(last) => Utc::now() - last >= ChronoDuration::hours(self.evolution_interval_hours),
        }
    }

    pub async fn run_cycle(&self, force: bool) -> bool {
        if !force && !self.due() {
            return false;
        }

        let failures = match self.ledger.failed(5, 0.5).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "could not load failed predictions; skipping prompt evolution");
                return false;
            }
        };
        if failures.is_empty() {
            *self.last_evolution_time.write().expect("mutator lock poisoned") = Some(Utc::now());
            return false;
        }

        let current_prompt = self.prompts.load_current_prompt();
        let failures_json = serde_json::to_string(
            &failures.iter().map(|p| serde_json::json!({
                "predicted_bias": p.predicted_bias,
                "predicted_outcome": p.predicted_outcome,
                "confidence": p.confidence,
                "market_regime": p.market_regime,
            })).collect::<Vec<_>>(),
        )
        .unwrap_or_default();

        let system = "You rewrite trading-adversary system prompts to correct repeated prediction failures.";
        let user = format!(
            "Current prompt:\n{current_prompt}\n\nRecent failures:\n{failures_json}\n\n\
             Return the revised prompt between [PROMPT_START] and [PROMPT_END] markers."
        );

        let response = match self.llm.complete(system, &user, 0.3, 1024).await {
            Ok(completion) => completion.content,
            Err(LlmError::RegionalBlock) => {
                warn!("llm regional block during prompt evolution; skipping this cycle");
                *self.last_evolution_time.write().expect("mutator lock poisoned") = Some(Utc::now());
                return false;
            }
            Err(e) => {
                warn!(error = %e, "llm call failed during prompt evolution");
                return false;
            }
        };

        let candidate = extract_prompt(&response);
        if let Err(reason) = symmetry_guard(&candidate) {
            warn!(reason, "candidate prompt rejected by symmetry guard");
            *self.last_evolution_time.write().expect("mutator lock poisoned") = Some(Utc::now());
            return false;
        }

        match self.prompts.adopt(candidate).await {
            Ok(version) => {
                info!(version, "prompt evolved");
                *self.last_evolution_time.write().expect("mutator lock poisoned") = Some(Utc::now());
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to persist evolved prompt");
                false
            }
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.evolution_interval_hours.max(1) as u64 * 3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::domain::ports::LlmCompletion;
    use crate::domain::types::Signal;

    struct FixedLlm(String);
    #[async_trait]
    impl LlmAdapter for FixedLlm {
        async fn complete(&self, _system: &str, _user: &str, _temperature: f64, _max_tokens: u32) -> Result<LlmCompletion, LlmError> {
            Ok(LlmCompletion { content: self.0.clone() })
        }
    }

    struct BlockedLlm;
    #[async_trait]
    impl LlmAdapter for BlockedLlm {
        async fn complete(&self, _system: &str, _user: &str, _temperature: f64, _max_tokens: u32) -> Result<LlmCompletion, LlmError> {
            Err(LlmError::RegionalBlock)
        }
    }

    fn tempdir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("aether-mutator-test-{}", uuid::Uuid::new_v4()));
        dir
    }

    #[tokio::test]
    async fn bootstraps_version_zero_from_builtin_prompt_when_empty() {
        let dir = tempdir();
        let store = PromptStore::load(dir.to_string_lossy().to_string()).await.unwrap();
        assert_eq!(store.current_version(), 0);
        assert_eq!(store.load_current_prompt(), BUILTIN_PROMPT_V0);
    }

    #[tokio::test]
    async fn skips_cycle_when_no_failures_present() {
        let dir = tempdir();
        let ledger = Arc::new(Ledger::open("sqlite::memory:").await.unwrap());
        let prompts = Arc::new(PromptStore::load(dir.to_string_lossy().to_string()).await.unwrap());
        let llm = Arc::new(FixedLlm("[PROMPT_START]irrelevant[PROMPT_END]".to_string()));
        let mutator = EvolutionaryMutator::new(ledger, llm, prompts.clone(), 24);
        assert!(!mutator.run_cycle(true).await);
        assert_eq!(prompts.current_version(), 0);
    }

    #[tokio::test]
    async fn accepted_candidate_archives_and_bumps_version() {
        let dir = tempdir();
        let ledger = Arc::new(Ledger::open("sqlite::memory:").await.unwrap());
        let id = ledger.record("bearish", "x", 0.9, "TRENDING_DOWN", "NEUTRAL", Signal::Sell, 100.0).await.unwrap();
        ledger.set_score(id, crate::domain::types::Timeframe::OneHour, -0.9).await.unwrap();
        let prompts = Arc::new(PromptStore::load(dir.to_string_lossy().to_string()).await.unwrap());
        let candidate = "[PROMPT_START]Always explain your reasoning step-by-step, cap risk with a stop and never exceed the loss threshold.[PROMPT_END]";
        let llm = Arc::new(FixedLlm(candidate.to_string()));
        let mutator = EvolutionaryMutator::new(ledger, llm, prompts.clone(), 24);
        assert!(mutator.run_cycle(true).await);
        assert_eq!(prompts.current_version(), 1);
    }

    #[tokio::test]
    async fn symmetry_guard_rejects_candidate_missing_stop_loss_vocab() {
        let dir = tempdir();
        let ledger = Arc::new(Ledger::open("sqlite::memory:").await.unwrap());
        let id = ledger.record("bearish", "x", 0.9, "TRENDING_DOWN", "NEUTRAL", Signal::Sell, 100.0).await.unwrap();
        ledger.set_score(id, crate::domain::types::Timeframe::OneHour, -0.9).await.unwrap();
        let prompts = Arc::new(PromptStore::load(dir.to_string_lossy().to_string()).await.unwrap());
        let candidate = "[PROMPT_START]Always explain your reasoning step-by-step and go all in.[PROMPT_END]";
        let llm = Arc::new(FixedLlm(candidate.to_string()));
        let mutator = EvolutionaryMutator::new(ledger, llm, prompts.clone(), 24);
        assert!(!mutator.run_cycle(true).await);
        assert_eq!(prompts.current_version(), 0);
    }

    #[tokio::test]
    async fn regional_block_skips_cycle_without_changing_version() {
        let dir = tempdir();
        let ledger = Arc::new(Ledger::open("sqlite::memory:").await.unwrap());
        let id = ledger.record("bearish", "x", 0.9, "TRENDING_DOWN", "NEUTRAL", Signal::Sell, 100.0).await.unwrap();
        ledger.set_score(id, crate::domain::types::Timeframe::OneHour, -0.9).await.unwrap();
        let prompts = Arc::new(PromptStore::load(dir.to_string_lossy().to_string()).await.unwrap());
        let mutator = EvolutionaryMutator::new(ledger, Arc::new(BlockedLlm), prompts.clone(), 24);
        assert!(!mutator.run_cycle(true).await);
        assert_eq!(prompts.current_version(), 0);
    }
}
