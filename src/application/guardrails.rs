use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::RwLock;
use tracing::error;

#[derive(Debug, Clone, Copy)]
struct EquityPoint {
    at: DateTime<Utc>,
    equity: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct GuardrailsStatus {
    pub initial_equity: f64,
    pub current_equity: f64,
    pub kill_switch_triggered: bool,
    pub last_evolution_time: Option<DateTime<Utc>>,
}

struct Inner {
    initial_equity: f64,
    current_equity: f64,
    kill_switch_threshold: f64,
    stability_lock_hours: i64,
    kill_switch_triggered: bool,
    last_evolution_time: Option<DateTime<Utc>>,
    equity_history: Vec<EquityPoint>,
}

/// Owner of the equity trail, the kill-switch latch, and the stability-lock
/// timer. Every check here returns a plain value; nothing in this module
/// raises, matching the "Guardrails never raises" propagation policy.
pub struct Guardrails {
    inner: RwLock<Inner>,
}

impl Guardrails {
    pub fn new(initial_equity: f64, kill_switch_threshold: f64, stability_lock_hours: i64) -> Self {
        Self {
            inner: RwLock::new(Inner {
                initial_equity,
                current_equity: initial_equity,
                kill_switch_threshold,
                stability_lock_hours,
                kill_switch_triggered: false,
                last_evolution_time: None,
                equity_history: vec![EquityPoint { at: Utc::now(), equity: initial_equity }],
            }),
        }
    }

    pub fn update_equity(&self, new_equity: f64) {
        let mut inner = self.inner.write().expect("guardrails lock poisoned");
        inner.current_equity = new_equity;
        inner.equity_history.push(EquityPoint { at: Utc::now(), equity: new_equity });

        if inner.kill_switch_triggered {
            return;
        }

        let cutoff = Utc::now() - ChronoDuration::hours(1);
        let window: Vec<EquityPoint> =
            inner.equity_history.iter().copied().filter(|p| p.at >= cutoff).collect();
        let Some(earliest) = window.first() else { return };
        if earliest.equity == 0.0 {
            return;
        }
        let drawdown = (new_equity - earliest.equity) / earliest.equity;
        if drawdown <= -inner.kill_switch_threshold {
            inner.kill_switch_triggered = true;
            error!(
                target: "guardrails::kill_switch",
                drawdown, threshold = inner.kill_switch_threshold, "kill switch triggered"
            );
        }
    }

    pub fn is_kill_switch_active(&self) -> bool {
        self.inner.read().expect("guardrails lock poisoned").kill_switch_triggered
    }

    pub fn can_evolve(&self) -> bool {
        let inner = self.inner.read().expect("guardrails lock poisoned");
        match inner.last_evolution_time {
            None => true,
            Some(last) => Utc::now() - last >= ChronoDuration::hours(inner.stability_lock_hours),
        }
    }

    pub fn mark_evolution(&self) {
        let mut inner = self.inner.write().expect("guardrails lock poisoned");
        inner.last_evolution_time = Some(Utc::now());
    }

    pub fn status(&self) -> GuardrailsStatus {
        let inner = self.inner.read().expect("guardrails lock poisoned");
        GuardrailsStatus {
            initial_equity: inner.initial_equity,
            current_equity: inner.current_equity,
            kill_switch_triggered: inner.kill_switch_triggered,
            last_evolution_time: inner.last_evolution_time,
        }
    }

    /// Two-stage static audit of a candidate decision-module source: first
    /// a structural sanity check (non-empty, balanced delimiters), then a
    /// semantic contract check (both required entry points present as named
    /// function signatures). This trades the reference implementation's
    /// dynamic `exec()`-based check for one that never runs untrusted code.
    pub fn audit_code(&self, source: &str) -> (bool, Option<String>) {
        if source.trim().is_empty() {
            return (false, Some("candidate source is empty".to_string()));
        }
        if !balanced_delimiters(source) {
            return (false, Some("candidate source has unbalanced delimiters".to_string()));
        }
        let has_indicators = defines_function(source, "calculate_indicators");
        let has_signal = defines_function(source, "generate_signal");
        if !has_indicators || !has_signal {
            let mut missing = Vec::new();
            if !has_indicators {
                missing.push("calculate_indicators");
            }
            if !has_signal {
                missing.push("generate_signal");
            }
            return (false, Some(format!("missing required entry points: {}", missing.join(", "))));
        }
        (true, None)
    }
}

fn balanced_delimiters(source: &str) -> bool {
    let mut stack = Vec::new();
    for c in source.chars() {
        match c {
            '(' | '[' | '{' => stack.push(c),
            ')' => {
                if stack.pop() != Some('(') {
                    return false;
                }
            }
            ']' => {
                if stack.pop() != Some('[') {
                    return false;
                }
            }
            '}' => {
                if stack.pop() != Some('{') {
                    return false;
                }
            }
            _ => {}
        }
    }
    stack.is_empty()
}

fn defines_function(source: &str, name: &str) -> bool {
    let needle_fn = format!("fn {name}");
    let needle_def = format!("def {name}");
    source.contains(&needle_fn) || source.contains(&needle_def)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kill_switch_triggers_at_exact_threshold() {
        let g = Guardrails::new(1000.0, 0.03, 12);
        // Force the sole history entry to be > an hour old would require
        // time travel; instead exercise the formula's boundary directly
        // via two updates within the same window.
        g.update_equity(1000.0);
        g.update_equity(970.0); // exactly -3%
        assert!(g.is_kill_switch_active());
    }

    #[test]
    fn kill_switch_does_not_trigger_above_threshold() {
        let g = Guardrails::new(1000.0, 0.03, 12);
        g.update_equity(1000.0);
        g.update_equity(980.0); // -2%
        assert!(!g.is_kill_switch_active());
    }

    #[test]
    fn kill_switch_latches_permanently() {
        let g = Guardrails::new(1000.0, 0.03, 12);
        g.update_equity(1000.0);
        g.update_equity(900.0);
        assert!(g.is_kill_switch_active());
        g.update_equity(2000.0);
        assert!(g.is_kill_switch_active());
    }

    #[test]
    fn can_evolve_true_before_any_evolution() {
        let g = Guardrails::new(1000.0, 0.03, 12);
        assert!(g.can_evolve());
    }

    #[test]
    fn can_evolve_false_immediately_after_marking() {
        let g = Guardrails::new(1000.0, 0.03, 12);
        g.mark_evolution();
        assert!(!g.can_evolve());
    }

    #[test]
    fn audit_rejects_empty_source() {
        let g = Guardrails::new(1000.0, 0.03, 12);
        let (ok, reason) = g.audit_code("");
        assert!(!ok);
        assert!(reason.is_some());
    }

    #[test]
    fn audit_rejects_missing_entry_points() {
        let g = Guardrails::new(1000.0, 0.03, 12);
        let (ok, _) = g.audit_code("fn calculate_indicators() {}");
        assert!(!ok);
    }

    #[test]
    fn audit_accepts_well_formed_module() {
        let g = Guardrails::new(1000.0, 0.03, 12);
        let source = "fn calculate_indicators() { } fn generate_signal() { }";
        let (ok, reason) = g.audit_code(source);
        assert!(ok, "{reason:?}");
    }

    #[test]
    fn audit_rejects_unbalanced_delimiters() {
        let g = Guardrails::new(1000.0, 0.03, 12);
        let source = "fn calculate_indicators( { fn generate_signal() {}";
        let (ok, _) = g.audit_code(source);
        assert!(!ok);
    }
}
