//! Static pre-deployment screen for a candidate decision-module source.
//! Every check is a case-insensitive keyword search against a fixed
//! vocabulary -- intentionally heuristic, not semantic analysis.

const STOP_LOSS_KEYWORDS: &[&str] =
    &["stop_loss", "stop-loss", "stoploss", "max_loss", "loss_threshold", "drawdown_limit", "kill_switch"];
const POSITION_LIMIT_KEYWORDS: &[&str] = &["position_size", "max_position", "size_limit"];
const RISK_MANAGEMENT_KEYWORDS: &[&str] = &["risk", "drawdown", "volatility"];
const POSITION_SIZING_KEYWORDS: &[&str] =
    &["position_size", "max_position", "size_limit", "position_limit", "max_size", "leverage_limit"];
const DRAWDOWN_MONITORING_KEYWORDS: &[&str] =
    &["drawdown", "max_dd", "max_drawdown", "cumulative_loss", "peak_to_trough", "underwater"];

fn any_keyword(haystack: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| haystack.contains(k))
}

#[derive(Debug, Clone)]
pub struct ScreenReport {
    pub approved: bool,
    pub tests_passed: Vec<&'static str>,
    pub tests_failed: Vec<&'static str>,
    pub recommendations: Vec<String>,
    pub estimated_flash_crash_drawdown: f64,
}

pub struct AdversarialScreen {
    pub flash_crash_pct: f64,
    pub max_drawdown_threshold: f64,
    pub stop_loss_required: bool,
}

impl Default for AdversarialScreen {
    fn default() -> Self {
        Self { flash_crash_pct: -0.20, max_drawdown_threshold: 0.15, stop_loss_required: true }
    }
}

impl AdversarialScreen {
    pub fn new(flash_crash_pct: f64, max_drawdown_threshold: f64, stop_loss_required: bool) -> Self {
        Self { flash_crash_pct, max_drawdown_threshold, stop_loss_required }
    }

    pub fn screen(&self, source: &str) -> ScreenReport {
        let code = source.to_lowercase();
        let mut tests_passed = Vec::new();
        let mut tests_failed = Vec::new();
        let mut recommendations = Vec::new();

        let has_stop_loss = any_keyword(&code, STOP_LOSS_KEYWORDS);
        if has_stop_loss {
            tests_passed.push("stop_loss_present");
        } else {
            tests_failed.push("stop_loss_missing");
            if self.stop_loss_required {
                recommendations
                    .push("CRITICAL: implement stop-loss mechanism to prevent infinite drawdown".to_string());
            }
        }

        let has_position_limits = any_keyword(&code, POSITION_LIMIT_KEYWORDS);
        let has_risk_management = any_keyword(&code, RISK_MANAGEMENT_KEYWORDS);
        let mut estimated_drawdown = self.flash_crash_pct.abs();
        if has_stop_loss {
            estimated_drawdown *= 0.4;
        }
        if has_position_limits {
            estimated_drawdown *= 0.7;
        }
        if has_risk_management {
            estimated_drawdown *= 0.8;
        }
        let crash_passed = estimated_drawdown <= self.max_drawdown_threshold;
        if crash_passed {
            tests_passed.push("flash_crash_survival");
        } else {
            tests_failed.push("flash_crash_failure");
            recommendations.push(format!(
                "strategy shows {:.1}% estimated drawdown in flash crash, exceeds {:.1}% threshold",
                estimated_drawdown * 100.0,
                self.max_drawdown_threshold * 100.0
            ));
        }

        if any_keyword(&code, POSITION_SIZING_KEYWORDS) {
            tests_passed.push("position_limits_present");
        } else {
            tests_failed.push("position_limits_missing");
            recommendations.push("consider adding position sizing limits to prevent over-leverage".to_string());
        }

        if any_keyword(&code, DRAWDOWN_MONITORING_KEYWORDS) {
            tests_passed.push("drawdown_monitoring_present");
        } else {
            tests_failed.push("drawdown_monitoring_missing");
            recommendations.push("add drawdown monitoring to track cumulative losses".to_string());
        }

        let critical_failures = tests_failed.iter().any(|t| {
            (*t == "stop_loss_missing" && self.stop_loss_required) || *t == "flash_crash_failure"
        });

        ScreenReport {
            approved: !critical_failures,
            tests_passed,
            tests_failed,
            recommendations,
            estimated_flash_crash_drawdown: estimated_drawdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_source_with_no_stop_loss() {
        let screen = AdversarialScreen::default();
        let report = screen.screen("fn generate_signal() { buy() }");
        assert!(!report.approved);
        assert!(report.tests_failed.contains(&"stop_loss_missing"));
    }

    #[test]
    fn approves_well_defended_source() {
        let screen = AdversarialScreen::default();
        let source =
            "fn generate_signal() { if price < stop_loss { sell() } check_max_position(); track_drawdown(); }";
        let report = screen.screen(source);
        assert!(report.approved, "{report:?}");
        assert!(report.tests_passed.contains(&"stop_loss_present"));
        assert!(report.tests_passed.contains(&"flash_crash_survival"));
    }

    #[test]
    fn position_and_drawdown_checks_are_advisory_only() {
        let screen = AdversarialScreen::default();
        let source = "fn generate_signal() { if price < stop_loss { sell() } }";
        let report = screen.screen(source);
        assert!(report.approved);
        assert!(report.tests_failed.contains(&"position_limits_missing"));
        assert!(report.tests_failed.contains(&"drawdown_monitoring_missing"));
    }

    #[test]
    fn flash_crash_failure_is_blocking_even_with_stop_loss_absent_threshold() {
        let screen = AdversarialScreen::new(-0.20, 0.01, true);
        let source = "fn generate_signal() { if price < stop_loss { sell() } }";
        let report = screen.screen(source);
        assert!(!report.approved);
        assert!(report.tests_failed.contains(&"flash_crash_failure"));
    }
}
