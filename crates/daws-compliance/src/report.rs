// SPDX-License-Identifier: MIT OR Apache-2.0
//! Compliance report assembly.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::{AccessEvent, ComplianceGate, PatternCheck, Violation};

/// Headline compliance figures.
#[derive(Debug, Clone, Serialize)]
pub struct OverallCompliance {
    /// Share of checked patterns that are compliant, 0–100.
    pub pattern_compliance_rate: f64,
    /// Share of monitored accesses from allowlisted callers, 0–100.
    pub agent_access_compliance_rate: f64,
    /// Patterns checked so far.
    pub total_patterns_checked: u64,
    /// Patterns that passed.
    pub compliant_patterns: u64,
    /// Patterns that failed.
    pub non_compliant_patterns: u64,
}

/// Violation counters and the recent tail.
#[derive(Debug, Clone, Serialize)]
pub struct ViolationSummary {
    /// Total violations recorded.
    pub total: u64,
    /// Counts by violation kind.
    pub by_kind: BTreeMap<String, u64>,
    /// Counts by severity.
    pub by_severity: BTreeMap<String, u64>,
    /// Most recent violations, oldest first.
    pub recent: Vec<Violation>,
}

/// Runtime access-monitoring figures.
#[derive(Debug, Clone, Serialize)]
pub struct AccessSummary {
    /// Accesses observed.
    pub total_monitored: u64,
    /// Accesses from callers outside the allowlist.
    pub non_compliant: u64,
    /// Recent access events, oldest first.
    pub recent: Vec<AccessEvent>,
}

/// The full compliance report.
#[derive(Debug, Clone, Serialize)]
pub struct ComplianceReport {
    /// When the report was generated.
    pub generated_at: DateTime<Utc>,
    /// Whether strict mode was active.
    pub strict_mode: bool,
    /// Headline figures.
    pub overall: OverallCompliance,
    /// Violation breakdown.
    pub violations: ViolationSummary,
    /// Access-monitoring breakdown.
    pub agent_access: AccessSummary,
    /// Per-pattern check results.
    pub pattern_details: BTreeMap<String, PatternCheck>,
    /// Ranked remediation suggestions.
    pub recommendations: Vec<String>,
}

impl ComplianceGate {
    /// Assemble the compliance report from everything recorded so far.
    #[must_use]
    pub fn report(&self) -> ComplianceReport {
        let state = self.state.lock().expect("gate lock poisoned");

        let pattern_rate = if state.patterns_checked > 0 {
            state.patterns_compliant as f64 / state.patterns_checked as f64 * 100.0
        } else {
            100.0
        };
        let access_rate = if state.accesses_monitored > 0 {
            (state.accesses_monitored - state.non_compliant_accesses) as f64
                / state.accesses_monitored as f64
                * 100.0
        } else {
            100.0
        };

        let recommendations = recommend(
            &state.by_kind,
            &state.by_caller,
        );

        ComplianceReport {
            generated_at: Utc::now(),
            strict_mode: self.is_strict(),
            overall: OverallCompliance {
                pattern_compliance_rate: (pattern_rate * 100.0).round() / 100.0,
                agent_access_compliance_rate: (access_rate * 100.0).round() / 100.0,
                total_patterns_checked: state.patterns_checked,
                compliant_patterns: state.patterns_compliant,
                non_compliant_patterns: state.patterns_checked - state.patterns_compliant,
            },
            violations: ViolationSummary {
                total: state.by_severity.values().sum(),
                by_kind: state.by_kind.clone(),
                by_severity: state.by_severity.clone(),
                recent: state.violations.iter().rev().take(50).rev().cloned().collect(),
            },
            agent_access: AccessSummary {
                total_monitored: state.accesses_monitored,
                non_compliant: state.non_compliant_accesses,
                recent: state.access_log.iter().rev().take(20).rev().cloned().collect(),
            },
            pattern_details: state.checks.clone(),
            recommendations,
        }
    }

    /// Write the report as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be written.
    pub fn export_report(&self, path: &Path) -> std::io::Result<()> {
        let report = self.report();
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }
}

fn recommend(by_kind: &BTreeMap<String, u64>, by_caller: &BTreeMap<String, u64>) -> Vec<String> {
    let mut out = Vec::new();

    if by_kind.get("direct_agent_reference").copied().unwrap_or(0) > 0 {
        out.push(
            "Migrate steps with direct agent references to execute_through_registry".to_string(),
        );
    }
    if by_kind.get("legacy_agent_action").copied().unwrap_or(0) > 0 {
        out.push("Replace legacy 'agent:<name>' actions with capability routing".to_string());
    }
    if by_kind.get("missing_metadata").copied().unwrap_or(0) > 0 {
        out.push("Add version and last_updated fields to all patterns".to_string());
    }
    if by_kind.get("unknown_agent").copied().unwrap_or(0) > 0 {
        out.push("Verify all agent names in patterns match registered agents".to_string());
    }

    let mut offenders: Vec<(&String, &u64)> = by_caller.iter().collect();
    offenders.sort_by(|a, b| b.1.cmp(a.1));
    for (caller, count) in offenders.into_iter().take(3) {
        out.push(format!(
            "Module '{caller}' has {count} direct agent accesses; route through the executor"
        ));
    }

    if out.is_empty() {
        out.push("All agent access flows through the registry".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use daws_pattern::Pattern;
    use serde_json::json;

    fn pattern(v: serde_json::Value) -> Pattern {
        serde_json::from_value(v).expect("pattern literal")
    }

    #[test]
    fn report_summarizes_checks_and_accesses() {
        let gate = ComplianceGate::new(false);
        gate.check_pattern(&pattern(json!({
            "id": "good", "version": "1.0", "last_updated": "2025-10-21", "steps": []
        })));
        gate.check_pattern(&pattern(json!({
            "id": "bad", "version": "1.0", "last_updated": "2025-10-21",
            "steps": [{"name": "s", "action": "interpret", "agent": "claude"}]
        })));
        gate.check_access("executor", None);
        gate.check_access("ui.dashboard", None);

        let report = gate.report();
        assert_eq!(report.overall.total_patterns_checked, 2);
        assert_eq!(report.overall.compliant_patterns, 1);
        assert!((report.overall.pattern_compliance_rate - 50.0).abs() < 0.01);
        assert_eq!(report.agent_access.non_compliant, 1);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("execute_through_registry")));
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("ui.dashboard")));
        assert!(report.pattern_details.contains_key("bad"));
    }

    #[test]
    fn clean_gate_reports_all_clear() {
        let gate = ComplianceGate::new(false);
        let report = gate.report();
        assert_eq!(report.overall.pattern_compliance_rate, 100.0);
        assert_eq!(
            report.recommendations,
            vec!["All agent access flows through the registry".to_string()]
        );
    }

    #[test]
    fn export_writes_valid_json() {
        let gate = ComplianceGate::new(true);
        gate.check_access("notebook", Some("metrics.compute_twr"));
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("compliance.json");
        gate.export_report(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["strict_mode"], json!(true));
        assert_eq!(parsed["agent_access"]["non_compliant"], json!(1));
    }
}
