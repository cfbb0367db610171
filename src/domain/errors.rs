use thiserror::Error;

/// Errors surfaced by the LLM adapter. `RegionalBlock` is the one variant with
/// behavioral significance: it drives BehavioralAdversary's and the reasoning
/// loop's permanent fallback to shadow/synthetic operation, so callers must
/// match on it rather than inspect the error text.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("llm endpoint returned regional block (HTTP 451)")]
    RegionalBlock,

    #[error("llm request failed: {0}")]
    Transient(String),

    #[error("llm response was not valid JSON: {0}")]
    MalformedResponse(String),
}

/// Errors that abort startup. These are the only errors in the system that
/// are allowed to terminate the process.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(String),

    #[error("failed to parse environment variable {field}: {reason}")]
    Invalid { field: String, reason: String },
}

/// Errors from the durable stores (evolution memory JSON, ledger database,
/// prompt files). A `Corrupt` file is recoverable by falling back to a fresh
/// default; an `Io` failure on write is logged but never panics a loop.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("io error accessing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored document at {path} is corrupt: {reason}")]
    Corrupt { path: String, reason: String },
}

/// An internal consistency check failed in a place that should be
/// impossible to reach. Logged at critical severity; the affected subsystem
/// disables itself rather than continuing on bad state.
#[derive(Debug, Error)]
pub enum InvariantViolation {
    #[error("{0}")]
    Msg(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn llm_regional_block_message_is_stable() {
        let err = LlmError::RegionalBlock;
        assert_eq!(err.to_string(), "llm endpoint returned regional block (HTTP 451)");
    }

    #[test]
    fn llm_timeout_formatting() {
        let err = LlmError::Timeout(Duration::from_secs(10));
        assert!(err.to_string().contains("10s"));
    }

    #[test]
    fn config_missing_formatting() {
        let err = ConfigError::Missing("TRADING_SYMBOL".to_string());
        assert!(err.to_string().contains("TRADING_SYMBOL"));
    }

    #[test]
    fn config_invalid_formatting() {
        let err = ConfigError::Invalid {
            field: "KILL_SWITCH_THRESHOLD".to_string(),
            reason: "not a float".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("KILL_SWITCH_THRESHOLD"));
        assert!(msg.contains("not a float"));
    }

    #[test]
    fn persistence_corrupt_formatting() {
        let err = PersistenceError::Corrupt {
            path: "data/evolution_history.json".to_string(),
            reason: "truncated JSON".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("evolution_history.json"));
        assert!(msg.contains("truncated"));
    }
}
