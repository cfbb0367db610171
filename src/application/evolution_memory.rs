//! Durable store of evolution records and the blacklist of parameter
//! bundles that previously lost money. Single owner of the JSON document at
//! `path`; every write goes through `save` which writes to a sibling `.tmp`
//! file and renames over the original, so a crash mid-write never leaves a
//! torn document behind.

use std::sync::RwLock;

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::errors::PersistenceError;
use crate::domain::types::{BlacklistEntry, EvolutionParameters, EvolutionRecord};

const WINDOW_HOURS: i64 = 2;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct EvolutionDocument {
    evolutions: Vec<EvolutionRecord>,
    blacklisted_parameters: Vec<BlacklistEntry>,
    /// Reserved by the original schema for future windowed-metrics
    /// aggregation; no writer in this system populates it, matching the
    /// reference implementation, which carries the same dead field.
    #[serde(default)]
    performance_windows: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Copy)]
pub struct EvolutionStats {
    pub total_evolutions: usize,
    pub evaluated_evolutions: usize,
    pub blacklisted_parameters: usize,
    pub success_rate: f64,
    pub pending_evaluations: usize,
}

pub struct EvolutionMemory {
    path: String,
    doc: RwLock<EvolutionDocument>,
}

impl EvolutionMemory {
    /// Load the document from `path`, or start from an empty default if the
    /// file is absent, unreadable, or corrupt. A corrupt file is logged and
    /// treated as recoverable rather than a fatal error.
    pub async fn load(path: impl Into<String>) -> Self {
        let path = path.into();
        let doc = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => match serde_json::from_str::<EvolutionDocument>(&raw) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(path, error = %e, "evolution history file is corrupt; starting fresh");
                    EvolutionDocument::default()
                }
            },
            Err(_) => EvolutionDocument::default(),
        };
        Self { path, doc: RwLock::new(doc) }
    }

    pub async fn record_evolution(
        &self,
        parameters: EvolutionParameters,
        reason: String,
        suggestion: String,
        initial_equity: f64,
    ) -> usize {
        let now = Utc::now();
        let record = EvolutionRecord {
            timestamp: now,
            parameters,
            reason,
            suggestion,
            initial_equity,
            start_time: now,
            evaluated: false,
            final_pnl: None,
            final_equity: None,
            current_pnl: None,
            current_equity: None,
            last_update: None,
        };
        let index = {
            let mut doc = self.doc.write().expect("evolution memory lock poisoned");
            doc.evolutions.push(record);
            doc.evolutions.len() - 1
        };
        self.save().await;
        index
    }

    /// Updates the running PnL for an open window; closes it (evaluated =
    /// true) once `WINDOW_HOURS` have elapsed since `start_time`, and
    /// blacklists the parameter bundle if the closing PnL is negative.
    pub async fn update_window(&self, index: usize, current_equity: f64, pnl: f64) {
        let now = Utc::now();
        let mut newly_blacklisted = None;
        {
            let mut doc = self.doc.write().expect("evolution memory lock poisoned");
            let Some(record) = doc.evolutions.get_mut(index) else { return };
            if record.evaluated {
                return;
            }
            record.current_equity = Some(current_equity);
            record.current_pnl = Some(pnl);
            record.last_update = Some(now);

            if now - record.start_time >= ChronoDuration::hours(WINDOW_HOURS) {
                record.evaluated = true;
                record.final_pnl = Some(pnl);
                record.final_equity = Some(current_equity);
                if pnl < 0.0 {
                    let entry = BlacklistEntry {
                        parameters: record.parameters.clone(),
                        pnl,
                        timestamp: now,
                        evolution_index: index,
                        reason: format!("post-evolution window closed with pnl={pnl:.2}"),
                    };
                    newly_blacklisted = Some(entry.clone());
                    doc.blacklisted_parameters.push(entry);
                }
            }
        }
        if let Some(entry) = newly_blacklisted {
            warn!(pnl = entry.pnl, evolution_index = index, "parameters blacklisted after losing window");
        }
        self.save().await;
    }

    /// Full structural equality over `parameters`, matching the reference
    /// implementation's lookup key exactly (see DESIGN.md).
    pub fn is_blacklisted(&self, parameters: &EvolutionParameters) -> (bool, Option<String>) {
        let doc = self.doc.read().expect("evolution memory lock poisoned");
        match doc.blacklisted_parameters.iter().find(|e| &e.parameters == parameters) {
            Some(entry) => (true, Some(entry.reason.clone())),
            None => (false, None),
        }
    }

    pub fn recent(&self, k: usize) -> Vec<EvolutionRecord> {
        let doc = self.doc.read().expect("evolution memory lock poisoned");
        doc.evolutions.iter().rev().take(k).cloned().collect()
    }

    pub fn stats(&self) -> EvolutionStats {
        let doc = self.doc.read().expect("evolution memory lock poisoned");
        let total = doc.evolutions.len();
        let evaluated = doc.evolutions.iter().filter(|r| r.evaluated).count();
        let blacklisted = doc.blacklisted_parameters.len();
        let success_rate =
            if evaluated > 0 { (evaluated.saturating_sub(blacklisted)) as f64 / evaluated as f64 * 100.0 } else { 0.0 };
        EvolutionStats {
            total_evolutions: total,
            evaluated_evolutions: evaluated,
            blacklisted_parameters: blacklisted,
            success_rate,
            pending_evaluations: total - evaluated,
        }
    }

    pub async fn purge_blacklist_older_than(&self, days: i64) {
        let cutoff = Utc::now() - ChronoDuration::days(days);
        {
            let mut doc = self.doc.write().expect("evolution memory lock poisoned");
            doc.blacklisted_parameters.retain(|e| e.timestamp >= cutoff);
        }
        self.save().await;
    }

    async fn save(&self) {
        if let Err(e) = self.save_inner().await {
            warn!(path = self.path, error = %e, "failed to persist evolution history");
        }
    }

    async fn save_inner(&self) -> Result<(), PersistenceError> {
        let serialized = {
            let doc = self.doc.read().expect("evolution memory lock poisoned");
            serde_json::to_string_pretty(&*doc)
                .map_err(|e| PersistenceError::Corrupt { path: self.path.clone(), reason: e.to_string() })?
        };
        if let Some(parent) = std::path::Path::new(&self.path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| PersistenceError::Io { path: self.path.clone(), source: e })?;
            }
        }
        let tmp_path = format!("{}.tmp", self.path);
        tokio::fs::write(&tmp_path, serialized)
            .await
            .map_err(|e| PersistenceError::Io { path: tmp_path.clone(), source: e })?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| PersistenceError::Io { path: self.path.clone(), source: e })?;
        info!(path = self.path, "evolution history persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(regime: &str) -> EvolutionParameters {
        EvolutionParameters { reason: "low confidence".to_string(), suggestion: "adapt".to_string(), regime: regime.to_string() }
    }

    #[tokio::test]
    async fn record_then_recent_round_trips() {
        let dir = tempdir();
        let memory = EvolutionMemory::load(dir.join("evo.json").to_string_lossy().to_string()).await;
        let idx = memory.record_evolution(params("RANGE_QUIET"), "r".into(), "s".into(), 1000.0).await;
        assert_eq!(idx, 0);
        let recent = memory.recent(5);
        assert_eq!(recent.len(), 1);
        assert!(!recent[0].evaluated);
    }

    #[tokio::test]
    async fn not_blacklisted_before_any_record() {
        let dir = tempdir();
        let memory = EvolutionMemory::load(dir.join("evo.json").to_string_lossy().to_string()).await;
        let (blacklisted, _) = memory.is_blacklisted(&params("RANGE_QUIET"));
        assert!(!blacklisted);
    }

    #[tokio::test]
    async fn negative_pnl_after_elapsed_window_blacklists() {
        let dir = tempdir();
        let memory = EvolutionMemory::load(dir.join("evo.json").to_string_lossy().to_string()).await;
        let p = params("TRENDING_DOWN");
        let idx = memory.record_evolution(p.clone(), "r".into(), "s".into(), 1000.0).await;
        // Force the window closed by back-dating start_time past WINDOW_HOURS.
        {
            let mut doc = memory.doc.write().unwrap();
            doc.evolutions[idx].start_time = Utc::now() - ChronoDuration::hours(WINDOW_HOURS + 1);
        }
        memory.update_window(idx, 900.0, -100.0).await;
        let (blacklisted, reason) = memory.is_blacklisted(&p);
        assert!(blacklisted);
        assert!(reason.is_some());
    }

    #[tokio::test]
    async fn positive_pnl_after_elapsed_window_does_not_blacklist() {
        let dir = tempdir();
        let memory = EvolutionMemory::load(dir.join("evo.json").to_string_lossy().to_string()).await;
        let p = params("TRENDING_UP");
        let idx = memory.record_evolution(p.clone(), "r".into(), "s".into(), 1000.0).await;
        {
            let mut doc = memory.doc.write().unwrap();
            doc.evolutions[idx].start_time = Utc::now() - ChronoDuration::hours(WINDOW_HOURS + 1);
        }
        memory.update_window(idx, 1100.0, 100.0).await;
        let (blacklisted, _) = memory.is_blacklisted(&p);
        assert!(!blacklisted);
    }

    #[tokio::test]
    async fn stats_reflect_pending_and_evaluated() {
        let dir = tempdir();
        let memory = EvolutionMemory::load(dir.join("evo.json").to_string_lossy().to_string()).await;
        memory.record_evolution(params("RANGE_QUIET"), "r".into(), "s".into(), 1000.0).await;
        let stats = memory.stats();
        assert_eq!(stats.total_evolutions, 1);
        assert_eq!(stats.pending_evaluations, 1);
        assert_eq!(stats.evaluated_evolutions, 0);
    }

    #[tokio::test]
    async fn reload_from_disk_preserves_blacklist() {
        let dir = tempdir();
        let path = dir.join("evo.json").to_string_lossy().to_string();
        let p = params("RANGE_VOLATILE");
        {
            let memory = EvolutionMemory::load(path.clone()).await;
            let idx = memory.record_evolution(p.clone(), "r".into(), "s".into(), 1000.0).await;
            {
                let mut doc = memory.doc.write().unwrap();
                doc.evolutions[idx].start_time = Utc::now() - ChronoDuration::hours(WINDOW_HOURS + 1);
            }
            memory.update_window(idx, 900.0, -50.0).await;
        }
        let reloaded = EvolutionMemory::load(path).await;
        let (blacklisted, _) = reloaded.is_blacklisted(&p);
        assert!(blacklisted);
    }

    fn tempdir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("aether-evo-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
