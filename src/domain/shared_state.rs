use chrono::{DateTime, Utc};
use std::sync::RwLock;
use tracing::info;

use crate::domain::types::RiskLevel;

#[derive(Debug, Clone)]
struct Inner {
    risk_level: RiskLevel,
    risk_payload: Option<String>,
    risk_updated_at: Option<DateTime<Utc>>,

    sentiment_multiplier: f64,
    sentiment_payload: Option<String>,
    sentiment_updated_at: Option<DateTime<Utc>>,

    whale_dump_risk: bool,
    whale_updated_at: Option<DateTime<Utc>>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            risk_level: RiskLevel::Normal,
            risk_payload: None,
            risk_updated_at: None,
            sentiment_multiplier: 1.0,
            sentiment_payload: None,
            sentiment_updated_at: None,
            whale_dump_risk: false,
            whale_updated_at: None,
        }
    }
}

/// A coherent, point-in-time read of every field. Consumers that compute a
/// function of more than one field (e.g. `Architect::get_adjusted_size`)
/// must use this rather than chaining individual getters, which can observe
/// a torn view under concurrent writers.
#[derive(Debug, Clone, Copy)]
pub struct StateSnapshot {
    pub risk_level: RiskLevel,
    pub sentiment_multiplier: f64,
    pub whale_dump_risk: bool,
}

/// Process-wide risk state, shared by every periodic loop. All access
/// serializes through a single exclusion scope; there is no multi-field
/// atomic transaction beyond `snapshot()`.
#[derive(Default)]
pub struct SharedState {
    inner: RwLock<Inner>,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_risk(&self, level: RiskLevel, payload: Option<String>) {
        let mut inner = self.inner.write().expect("shared state lock poisoned");
        if inner.risk_level != level {
            info!(?level, "risk level transition");
        }
        inner.risk_level = level;
        inner.risk_payload = payload;
        inner.risk_updated_at = Some(Utc::now());
    }

    pub fn get_risk(&self) -> RiskLevel {
        self.inner.read().expect("shared state lock poisoned").risk_level
    }

    pub fn set_sentiment(&self, multiplier: f64, payload: Option<String>) {
        let clamped = multiplier.clamp(0.5, 1.5);
        let mut inner = self.inner.write().expect("shared state lock poisoned");
        inner.sentiment_multiplier = clamped;
        inner.sentiment_payload = payload;
        inner.sentiment_updated_at = Some(Utc::now());
    }

    pub fn get_sentiment(&self) -> f64 {
        self.inner.read().expect("shared state lock poisoned").sentiment_multiplier
    }

    pub fn set_whale_dump(&self, active: bool) {
        let mut inner = self.inner.write().expect("shared state lock poisoned");
        inner.whale_dump_risk = active;
        inner.whale_updated_at = Some(Utc::now());
    }

    pub fn get_whale_dump(&self) -> bool {
        self.inner.read().expect("shared state lock poisoned").whale_dump_risk
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let inner = self.inner.read().expect("shared state lock poisoned");
        StateSnapshot {
            risk_level: inner.risk_level,
            sentiment_multiplier: inner.sentiment_multiplier,
            whale_dump_risk: inner.whale_dump_risk,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentiment_clamps_to_bounds() {
        let state = SharedState::new();
        state.set_sentiment(3.0, None);
        assert_eq!(state.get_sentiment(), 1.5);
        state.set_sentiment(-1.0, None);
        assert_eq!(state.get_sentiment(), 0.5);
    }

    #[test]
    fn defaults_are_normal_neutral_no_whale() {
        let state = SharedState::new();
        let snap = state.snapshot();
        assert_eq!(snap.risk_level, RiskLevel::Normal);
        assert_eq!(snap.sentiment_multiplier, 1.0);
        assert!(!snap.whale_dump_risk);
    }

    #[test]
    fn snapshot_reflects_latest_writes() {
        let state = SharedState::new();
        state.set_risk(RiskLevel::High, Some("spy dropped".into()));
        state.set_whale_dump(true);
        let snap = state.snapshot();
        assert_eq!(snap.risk_level, RiskLevel::High);
        assert!(snap.whale_dump_risk);
    }
}
