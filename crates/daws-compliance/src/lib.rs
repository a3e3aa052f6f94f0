// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! daws-compliance
#![deny(unsafe_code)]

/// Compliance report assembly and export.
pub mod report;

use chrono::{DateTime, Utc};
use daws_core::ContractCatalog;
use daws_pattern::{Pattern, StepAction};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use tracing::warn;

pub use report::ComplianceReport;

/// Environment variable that promotes warnings to errors.
pub const STRICT_MODE_ENV: &str = "STRICT_MODE";

/// Bounded capacity of the runtime access log (FIFO eviction).
pub const ACCESS_LOG_CAPACITY: usize = 1024;

/// Recent violations retained for reporting.
const RECENT_VIOLATIONS: usize = 512;

/// Modules allowed to ask for agent access at runtime.
const ALLOWED_CALLERS: &[&str] = &["executor", "adapter", "registry"];

/// Violation severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational only.
    Info,
    /// Should be fixed; blocks execution only in strict mode.
    Warning,
    /// Blocks execution.
    Error,
}

/// What rule a violation broke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// A step names an agent without routing through the registry.
    DirectAgentReference,
    /// A step uses the legacy `agent:<name>` action form.
    LegacyAgentAction,
    /// A step action is not recognized.
    UnknownAction,
    /// Required pattern metadata is missing.
    MissingMetadata,
    /// A referenced agent is not registered.
    UnknownAgent,
    /// A module outside the allowlist asked for agent access.
    UnauthorizedCaller,
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::DirectAgentReference => "direct_agent_reference",
            Self::LegacyAgentAction => "legacy_agent_action",
            Self::UnknownAction => "unknown_action",
            Self::MissingMetadata => "missing_metadata",
            Self::UnknownAgent => "unknown_agent",
            Self::UnauthorizedCaller => "unauthorized_caller",
        };
        f.write_str(s)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// A single recorded rule violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    /// The rule that was broken.
    pub kind: ViolationKind,
    /// How bad it is.
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
    /// Pattern involved, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_id: Option<String>,
    /// Step involved, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    /// When the violation was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// Result of statically checking one pattern.
#[derive(Debug, Clone, Serialize)]
pub struct PatternCheck {
    /// Pattern the check is about.
    pub pattern_id: String,
    /// Whether the pattern may execute under the current mode.
    pub compliant: bool,
    /// Everything the check found.
    pub violations: Vec<Violation>,
    /// When the check ran.
    pub checked_at: DateTime<Utc>,
}

impl PatternCheck {
    /// Violations at error severity.
    #[must_use]
    pub fn errors(&self) -> Vec<&Violation> {
        self.violations
            .iter()
            .filter(|v| v.severity == Severity::Error)
            .collect()
    }
}

/// One monitored agent-access request.
#[derive(Debug, Clone, Serialize)]
pub struct AccessEvent {
    /// When the access happened.
    pub occurred_at: DateTime<Utc>,
    /// Module that asked.
    pub caller: String,
    /// Capability requested, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    /// Whether the caller is on the allowlist.
    pub compliant: bool,
}

#[derive(Default)]
struct GateState {
    violations: VecDeque<Violation>,
    checks: BTreeMap<String, PatternCheck>,
    access_log: VecDeque<AccessEvent>,
    patterns_checked: u64,
    patterns_compliant: u64,
    accesses_monitored: u64,
    non_compliant_accesses: u64,
    by_kind: BTreeMap<String, u64>,
    by_severity: BTreeMap<String, u64>,
    by_caller: BTreeMap<String, u64>,
}

/// The compliance gate: static pattern checks plus runtime access monitoring.
pub struct ComplianceGate {
    strict: bool,
    catalog: Option<ContractCatalog>,
    state: Mutex<GateState>,
}

impl ComplianceGate {
    /// Create a gate; strict mode promotes warnings to errors.
    #[must_use]
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            catalog: None,
            state: Mutex::new(GateState::default()),
        }
    }

    /// Create a gate with strictness taken from `STRICT_MODE`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(strict_mode_from_env())
    }

    /// Attach a registry catalog so agent references can be verified.
    #[must_use]
    pub fn with_catalog(mut self, catalog: ContractCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Whether strict mode is active.
    #[must_use]
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Statically check one pattern, recording the outcome.
    pub fn check_pattern(&self, pattern: &Pattern) -> PatternCheck {
        let mut violations = Vec::new();
        self.check_metadata(pattern, &mut violations);
        self.check_steps(pattern, &mut violations);

        let has_errors = violations.iter().any(|v| v.severity == Severity::Error);
        let has_warnings = violations.iter().any(|v| v.severity == Severity::Warning);
        let compliant = !has_errors && !(self.strict && has_warnings);

        let check = PatternCheck {
            pattern_id: pattern.id.clone(),
            compliant,
            violations: violations.clone(),
            checked_at: Utc::now(),
        };

        let mut state = self.state.lock().expect("gate lock poisoned");
        state.patterns_checked += 1;
        if compliant {
            state.patterns_compliant += 1;
        }
        for v in violations {
            if self.strict && v.severity >= Severity::Warning {
                warn!(
                    target: "daws.compliance",
                    pattern = %pattern.id,
                    kind = %v.kind,
                    "{}",
                    v.message
                );
            }
            record_violation(&mut state, v);
        }
        state.checks.insert(pattern.id.clone(), check.clone());
        check
    }

    /// Monitor a runtime agent-access request.
    ///
    /// Returns the recorded event; in strict mode the caller must refuse the
    /// access when `compliant` is false.
    pub fn check_access(&self, caller: &str, capability: Option<&str>) -> AccessEvent {
        let compliant = ALLOWED_CALLERS.contains(&caller);
        let event = AccessEvent {
            occurred_at: Utc::now(),
            caller: caller.to_string(),
            capability: capability.map(str::to_string),
            compliant,
        };

        let mut state = self.state.lock().expect("gate lock poisoned");
        state.accesses_monitored += 1;
        if !compliant {
            state.non_compliant_accesses += 1;
            *state.by_caller.entry(caller.to_string()).or_default() += 1;
            let severity = if self.strict {
                Severity::Error
            } else {
                Severity::Warning
            };
            record_violation(
                &mut state,
                Violation {
                    kind: ViolationKind::UnauthorizedCaller,
                    severity,
                    message: format!(
                        "module '{caller}' accessed agents directly; route through the executor"
                    ),
                    pattern_id: None,
                    step: None,
                    recorded_at: Utc::now(),
                },
            );
        }
        if state.access_log.len() == ACCESS_LOG_CAPACITY {
            state.access_log.pop_front();
        }
        state.access_log.push_back(event.clone());
        event
    }

    /// The stored check for a pattern, if it was checked.
    #[must_use]
    pub fn pattern_status(&self, pattern_id: &str) -> Option<PatternCheck> {
        self.state
            .lock()
            .expect("gate lock poisoned")
            .checks
            .get(pattern_id)
            .cloned()
    }

    /// The most recent access events, newest last.
    #[must_use]
    pub fn recent_access(&self, limit: usize) -> Vec<AccessEvent> {
        let state = self.state.lock().expect("gate lock poisoned");
        state
            .access_log
            .iter()
            .rev()
            .take(limit)
            .rev()
            .cloned()
            .collect()
    }

    fn check_metadata(&self, pattern: &Pattern, out: &mut Vec<Violation>) {
        if pattern.id.trim().is_empty() {
            out.push(violation(
                ViolationKind::MissingMetadata,
                Severity::Error,
                "pattern is missing an id",
                pattern,
                None,
            ));
        }
        if pattern.version.trim().is_empty() {
            out.push(violation(
                ViolationKind::MissingMetadata,
                Severity::Warning,
                "pattern is missing a version",
                pattern,
                None,
            ));
        }
        if pattern.last_updated.is_none() {
            out.push(violation(
                ViolationKind::MissingMetadata,
                Severity::Warning,
                "pattern is missing last_updated",
                pattern,
                None,
            ));
        }
    }

    fn check_steps(&self, pattern: &Pattern, out: &mut Vec<Violation>) {
        for step in &pattern.steps {
            if step.agent.is_some() && !step.action.is_registry_action() {
                out.push(violation(
                    ViolationKind::DirectAgentReference,
                    Severity::Error,
                    format!(
                        "step '{}' names agent '{}' with action '{}'; agents may only be \
                         reached via execute_through_registry or execute_by_capability",
                        step.name,
                        step.agent.as_deref().unwrap_or_default(),
                        step.action
                    ),
                    pattern,
                    Some(&step.name),
                ));
            }

            if let StepAction::Legacy(raw) = &step.action {
                if let Some(agent) = raw.strip_prefix("agent:") {
                    out.push(violation(
                        ViolationKind::LegacyAgentAction,
                        Severity::Warning,
                        format!(
                            "step '{}' uses legacy action '{raw}'; migrate to \
                             execute_through_registry with capability routing",
                            step.name
                        ),
                        pattern,
                        Some(&step.name),
                    ));
                    self.check_agent_known(pattern, &step.name, agent, out);
                } else {
                    out.push(violation(
                        ViolationKind::UnknownAction,
                        Severity::Warning,
                        format!("step '{}' uses unrecognized action '{raw}'", step.name),
                        pattern,
                        Some(&step.name),
                    ));
                }
            }

            if let Some(agent) = &step.agent {
                self.check_agent_known(pattern, &step.name, agent, out);
            }
        }
    }

    fn check_agent_known(
        &self,
        pattern: &Pattern,
        step: &str,
        agent: &str,
        out: &mut Vec<Violation>,
    ) {
        let Some(catalog) = &self.catalog else {
            return;
        };
        if !catalog.has_agent(agent) {
            out.push(violation(
                ViolationKind::UnknownAgent,
                Severity::Error,
                format!("step '{step}' references unknown agent '{agent}'"),
                pattern,
                Some(step),
            ));
        }
    }
}

fn violation(
    kind: ViolationKind,
    severity: Severity,
    message: impl Into<String>,
    pattern: &Pattern,
    step: Option<&str>,
) -> Violation {
    Violation {
        kind,
        severity,
        message: message.into(),
        pattern_id: Some(pattern.id.clone()),
        step: step.map(str::to_string),
        recorded_at: Utc::now(),
    }
}

fn record_violation(state: &mut GateState, v: Violation) {
    *state.by_kind.entry(v.kind.to_string()).or_default() += 1;
    *state.by_severity.entry(v.severity.to_string()).or_default() += 1;
    if state.violations.len() == RECENT_VIOLATIONS {
        state.violations.pop_front();
    }
    state.violations.push_back(v);
}

/// Read `STRICT_MODE` from the environment.
#[must_use]
pub fn strict_mode_from_env() -> bool {
    std::env::var(STRICT_MODE_ENV)
        .map(|v| {
            let v = v.to_lowercase();
            v == "true" || v == "1" || v == "yes"
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pattern(v: serde_json::Value) -> Pattern {
        serde_json::from_value(v).expect("pattern literal")
    }

    fn direct_reference_pattern() -> Pattern {
        pattern(json!({
            "id": "bad",
            "version": "1.0",
            "last_updated": "2025-10-21",
            "steps": [{"name": "ask", "action": "interpret", "agent": "claude"}]
        }))
    }

    #[test]
    fn direct_agent_reference_is_always_an_error() {
        let gate = ComplianceGate::new(false);
        let check = gate.check_pattern(&direct_reference_pattern());
        assert!(!check.compliant);
        assert_eq!(check.violations[0].kind, ViolationKind::DirectAgentReference);
        assert_eq!(check.violations[0].severity, Severity::Error);
    }

    #[test]
    fn agent_with_registry_action_is_fine() {
        let gate = ComplianceGate::new(false);
        let check = gate.check_pattern(&pattern(json!({
            "id": "ok",
            "version": "1.0",
            "last_updated": "2025-10-21",
            "steps": [{
                "name": "twr",
                "action": "execute_through_registry",
                "capability": "metrics.compute_twr",
                "agent": "financial_analyst"
            }]
        })));
        assert!(check.compliant, "{:?}", check.violations);
    }

    #[test]
    fn legacy_action_form_is_a_warning() {
        let gate = ComplianceGate::new(false);
        let check = gate.check_pattern(&pattern(json!({
            "id": "legacy",
            "version": "1.0",
            "last_updated": "2025-10-21",
            "steps": [{"name": "harvest", "action": "agent:data_harvester"}]
        })));
        assert!(check.compliant, "warnings do not block in lax mode");
        assert!(check
            .violations
            .iter()
            .any(|v| v.kind == ViolationKind::LegacyAgentAction));
    }

    #[test]
    fn strict_mode_promotes_warnings_to_non_compliance() {
        let gate = ComplianceGate::new(true);
        let check = gate.check_pattern(&pattern(json!({
            "id": "nometa",
            "steps": []
        })));
        assert!(!check.compliant);
    }

    #[test]
    fn unknown_agent_is_an_error_with_catalog() {
        let mut catalog = ContractCatalog::default();
        catalog.agents.insert("financial_analyst".into());
        let gate = ComplianceGate::new(false).with_catalog(catalog);
        let check = gate.check_pattern(&direct_reference_pattern());
        assert!(check
            .violations
            .iter()
            .any(|v| v.kind == ViolationKind::UnknownAgent));
    }

    #[test]
    fn access_allowlist_admits_core_modules_only() {
        let gate = ComplianceGate::new(false);
        assert!(gate.check_access("executor", Some("metrics.compute_twr")).compliant);
        assert!(gate.check_access("adapter", None).compliant);
        assert!(gate.check_access("registry", None).compliant);
        assert!(!gate.check_access("ui.dashboard", None).compliant);
    }

    #[test]
    fn access_log_is_bounded_fifo() {
        let gate = ComplianceGate::new(false);
        for i in 0..(ACCESS_LOG_CAPACITY + 10) {
            gate.check_access(&format!("module{i}"), None);
        }
        let recent = gate.recent_access(ACCESS_LOG_CAPACITY + 10);
        assert_eq!(recent.len(), ACCESS_LOG_CAPACITY);
        assert_eq!(recent[0].caller, "module10", "oldest entries evicted first");
    }

    #[test]
    fn strict_env_parsing() {
        // Not set in the test environment by default.
        assert!(!strict_mode_from_env() || std::env::var(STRICT_MODE_ENV).is_ok());
    }
}
