//! Append-only newline-delimited JSON log of every published `Analysis`.
//!
//! Grounded on the teacher's `application/ml/data_collector.rs`, which
//! appends one record per update via `OpenOptions::new().append(true)`
//! rather than rewriting the whole file. This log plays the same role for
//! the reasoning loop's output: a durable trail a human (or the mutator's
//! failure-ranking stage) can replay, not a queryable store.

use std::path::PathBuf;

use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use tracing::{error, warn};

use crate::domain::types::Analysis;

/// Rotate once the file reaches this size. The spec pins the threshold at
/// "≥100 MB"; rotation happens on the next append that observes the file
/// already at or past it, so the file can briefly exceed it by one line.
const ROTATE_AT_BYTES: u64 = 100 * 1024 * 1024;

pub struct ReasoningTraceLog {
    path: PathBuf,
}

impl ReasoningTraceLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Append one NDJSON line for `analysis`, rotating first if the file is
    /// already at or past the size threshold. Failures are logged, never
    /// propagated -- a trace-log write must never interrupt the reasoning
    /// loop it observes.
    pub fn append(&self, analysis: &Analysis) {
        if let Err(e) = self.rotate_if_needed() {
            warn!(error = %e, "reasoning trace log rotation check failed");
        }

        let line = match serde_json::to_string(analysis) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to serialize analysis for reasoning trace log");
                return;
            }
        };

        if let Some(parent) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                error!(error = %e, path = %parent.display(), "failed to create reasoning trace log directory");
                return;
            }
        }

        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| writeln!(f, "{line}"));

        if let Err(e) = result {
            error!(error = %e, path = %self.path.display(), "failed to append to reasoning trace log");
        }
    }

    fn rotate_if_needed(&self) -> std::io::Result<()> {
        let metadata = match std::fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        if metadata.len() < ROTATE_AT_BYTES {
            return Ok(());
        }
        let archived = self.path.with_extension(format!("{}.jsonl", Utc::now().timestamp()));
        std::fs::rename(&self.path, archived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Regime, RegimeMetrics, Signal};

    fn sample_analysis() -> Analysis {
        Analysis {
            timestamp: Utc::now(),
            symbol: "BTC/USDT".to_string(),
            signal: Signal::Hold,
            confidence: 0.5,
            reasoning: "test".to_string(),
            regime: Regime::RangeQuiet,
            metrics: RegimeMetrics { regime: Regime::RangeQuiet, adx: 0.0, plus_di: 0.0, minus_di: 0.0, atr: 0.0, rsi: 50.0, insufficient_data: false },
            evolution_suggestion: None,
        }
    }

    #[test]
    fn append_creates_file_with_one_ndjson_line_per_call() {
        let dir = std::env::temp_dir().join(format!("aether-trace-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("trace.jsonl");
        let log = ReasoningTraceLog::new(&path);

        log.append(&sample_analysis());
        log.append(&sample_analysis());

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(parsed["symbol"], "BTC/USDT");
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn rotates_when_file_is_already_past_threshold() {
        let dir = std::env::temp_dir().join(format!("aether-trace-rotate-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("trace.jsonl");
        {
            let f = std::fs::File::create(&path).unwrap();
            f.set_len(ROTATE_AT_BYTES).unwrap();
        }
        let log = ReasoningTraceLog::new(&path);
        log.append(&sample_analysis());

        assert!(path.exists(), "a fresh file should exist after rotation");
        assert!(std::fs::metadata(&path).unwrap().len() < ROTATE_AT_BYTES);

        let mut entries = std::fs::read_dir(&dir).unwrap();
        let count = entries.by_ref().count();
        assert_eq!(count, 2, "expected the rotated archive plus the fresh trace file");
        std::fs::remove_dir_all(&dir).ok();
    }
}
