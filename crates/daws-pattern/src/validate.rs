// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-pattern validation rules.

use daws_core::ContractCatalog;
use std::collections::BTreeSet;

use crate::model::{Pattern, Step, StepAction};
use crate::template::references;

/// Validation outcome for one pattern.
#[derive(Debug, Clone, Default)]
pub struct PatternReport {
    /// Pattern the report is about.
    pub pattern_id: String,
    /// Problems that make the pattern unusable.
    pub errors: Vec<String>,
    /// Advisory findings.
    pub warnings: Vec<String>,
}

impl PatternReport {
    /// `true` when there are no errors.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// `true` when there are neither errors nor warnings.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }
}

/// Validates patterns, optionally against a registry catalog.
///
/// Without a catalog (the standalone CLI case) capability-existence and
/// positions-ordering checks degrade to warnings or are skipped.
#[derive(Debug, Default)]
pub struct Validator {
    catalog: Option<ContractCatalog>,
}

impl Validator {
    /// A validator with no registry knowledge.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A validator that checks capability references against the catalog.
    #[must_use]
    pub fn with_catalog(catalog: ContractCatalog) -> Self {
        Self {
            catalog: Some(catalog),
        }
    }

    /// Run every per-pattern rule.
    #[must_use]
    pub fn validate(&self, pattern: &Pattern) -> PatternReport {
        let mut report = PatternReport {
            pattern_id: pattern.id.clone(),
            ..PatternReport::default()
        };

        if pattern.id.trim().is_empty() {
            report.errors.push("pattern is missing an id".into());
        }
        if pattern.version.trim().is_empty() {
            report.warnings.push("pattern is missing a version".into());
        }
        if pattern.last_updated.is_none() {
            report.warnings.push("pattern is missing last_updated".into());
        }
        if pattern.triggers.is_empty() {
            report
                .warnings
                .push("pattern declares no trigger phrases".into());
        }

        self.check_step_names(pattern, &mut report);
        self.check_references(pattern, &mut report);
        self.check_capabilities(pattern, &mut report);
        self.check_positions_ordering(pattern, &mut report);
        report
    }

    fn check_step_names(&self, pattern: &Pattern, report: &mut PatternReport) {
        let mut seen = BTreeSet::new();
        for step in &pattern.steps {
            if step.name.trim().is_empty() {
                report.errors.push("step with empty name".into());
            }
            if !seen.insert(step.name.as_str()) {
                report
                    .errors
                    .push(format!("duplicate step name '{}'", step.name));
            }
        }
    }

    /// Dotted references must point at a step declared earlier; bare
    /// references to a later step are forward references and equally fatal.
    fn check_references(&self, pattern: &Pattern, report: &mut PatternReport) {
        let all_steps: BTreeSet<&str> = pattern.steps.iter().map(|s| s.name.as_str()).collect();
        let mut bound: BTreeSet<&str> = BTreeSet::new();

        for step in &pattern.steps {
            for reference in step_references(step) {
                if let Some((target, _field)) = reference.split_once('.') {
                    if all_steps.contains(target) && !bound.contains(target) {
                        report.errors.push(format!(
                            "step '{}' references '{{{}}}' before step '{}' runs",
                            step.name, reference, target
                        ));
                    } else if !all_steps.contains(target) && !bound.contains(target) {
                        report.errors.push(format!(
                            "step '{}' references unknown step in '{{{}}}'",
                            step.name, reference
                        ));
                    }
                } else if all_steps.contains(reference.as_str())
                    && !bound.contains(reference.as_str())
                {
                    report.errors.push(format!(
                        "step '{}' references '{{{}}}' before it is produced",
                        step.name, reference
                    ));
                }
            }
            bound.extend(step.binding_names());
        }

        if let Some(template) = &pattern.template {
            for reference in references(template) {
                let target = reference.split_once('.').map_or(reference.as_str(), |(t, _)| t);
                if !bound.contains(target) && !is_context_field(target) {
                    report.warnings.push(format!(
                        "template references '{{{reference}}}' which no step produces"
                    ));
                }
            }
        }
    }

    fn check_capabilities(&self, pattern: &Pattern, report: &mut PatternReport) {
        for step in &pattern.steps {
            match step.action {
                StepAction::ExecuteThroughRegistry => {
                    if step.capability.is_none() {
                        report.errors.push(format!(
                            "step '{}' uses execute_through_registry without a capability",
                            step.name
                        ));
                    }
                }
                StepAction::ExecuteByCapability => {
                    if step.capability_tag.is_none() && step.capability.is_none() {
                        report.errors.push(format!(
                            "step '{}' uses execute_by_capability without a capability_tag",
                            step.name
                        ));
                    }
                }
                _ => {}
            }

            let Some(catalog) = &self.catalog else {
                continue;
            };
            if let Some(capability) = &step.capability {
                if !catalog.has_capability(capability) {
                    report.errors.push(format!(
                        "step '{}' references unknown capability '{}'",
                        step.name, capability
                    ));
                }
            }
            if let Some(tag) = &step.capability_tag {
                let any = catalog.contracts.values().any(|c| c.has_tag(tag));
                if !any {
                    report.warnings.push(format!(
                        "step '{}' routes by tag '{}' which no registered capability carries",
                        step.name, tag
                    ));
                }
            }
        }
    }

    /// Position-fetching capabilities must come first and must not chain.
    fn check_positions_ordering(&self, pattern: &Pattern, report: &mut PatternReport) {
        let Some(catalog) = &self.catalog else {
            return;
        };

        let mut fetch_seen: Option<&str> = None;
        let mut positions_available = false;

        for step in &pattern.steps {
            let fetches = step
                .capability
                .as_deref()
                .is_some_and(|c| catalog.fetches_positions(c));

            if fetches {
                if let Some(prior) = fetch_seen {
                    report.errors.push(format!(
                        "step '{}' fetches positions after step '{}' already did",
                        step.name, prior
                    ));
                }
                fetch_seen = Some(&step.name);
            }

            let consumes = step_references(step)
                .iter()
                .any(|r| r == "positions" || r.ends_with(".positions"));
            if consumes && !positions_available {
                report.errors.push(format!(
                    "step '{}' consumes positions before any step produces them",
                    step.name
                ));
            }

            if fetches || step.binding_names().any(|n| n == "positions") {
                positions_available = true;
            }
        }
    }
}

fn is_context_field(name: &str) -> bool {
    matches!(
        name,
        "user_input" | "portfolio_id" | "as_of_date" | "pricing_pack_id" | "ledger_commit_hash"
    ) || name.chars().all(|c| c.is_ascii_uppercase() || c == '_')
}

/// Every reference appearing in a step's params.
fn step_references(step: &Step) -> Vec<String> {
    let mut out = Vec::new();
    collect_references(&serde_json::Value::Object(step.params.clone()), &mut out);
    out
}

fn collect_references(value: &serde_json::Value, out: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) => out.extend(references(s)),
        serde_json::Value::Array(items) => {
            for item in items {
                collect_references(item, out);
            }
        }
        serde_json::Value::Object(map) => {
            for v in map.values() {
                collect_references(v, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daws_core::CapabilityContract;
    use serde_json::json;

    fn catalog() -> ContractCatalog {
        let mut c = ContractCatalog::default();
        c.agents.insert("financial_analyst".into());
        for contract in [
            CapabilityContract::new("ledger.positions").fetches_positions(),
            CapabilityContract::new("metrics.compute_twr").tag("can_compute_returns"),
            CapabilityContract::new("risk.factor_exposure"),
        ] {
            c.contracts.insert(contract.name.clone(), contract);
        }
        c
    }

    fn pattern(v: serde_json::Value) -> Pattern {
        serde_json::from_value(v).expect("pattern literal")
    }

    #[test]
    fn forward_references_are_errors() {
        let p = pattern(json!({
            "id": "p", "version": "1",
            "steps": [
                {"name": "first", "action": "evaluate",
                 "params": {"score": "{second.score}"}},
                {"name": "second", "action": "evaluate", "params": {"type": "brand_moat"}}
            ]
        }));
        let report = Validator::new().validate(&p);
        assert!(!report.is_valid());
        assert!(report.errors[0].contains("before step 'second' runs"), "{:?}", report.errors);
    }

    #[test]
    fn unknown_capability_is_an_error_with_catalog() {
        let p = pattern(json!({
            "id": "p", "version": "1",
            "steps": [{"name": "s", "action": "execute_through_registry",
                       "capability": "metrics.compute_sortino"}]
        }));
        let report = Validator::with_catalog(catalog()).validate(&p);
        assert!(report.errors.iter().any(|e| e.contains("metrics.compute_sortino")));

        // Without a catalog the reference is not checkable.
        let report = Validator::new().validate(&p);
        assert!(report.is_valid());
    }

    #[test]
    fn chained_position_fetches_are_errors() {
        let p = pattern(json!({
            "id": "p", "version": "1",
            "steps": [
                {"name": "a", "action": "execute_through_registry", "capability": "ledger.positions"},
                {"name": "b", "action": "execute_through_registry", "capability": "ledger.positions"}
            ]
        }));
        let report = Validator::with_catalog(catalog()).validate(&p);
        assert!(report.errors.iter().any(|e| e.contains("after step 'a'")));
    }

    #[test]
    fn consuming_positions_before_fetching_is_an_error() {
        let p = pattern(json!({
            "id": "p", "version": "1",
            "steps": [
                {"name": "exposure", "action": "execute_through_registry",
                 "capability": "risk.factor_exposure",
                 "params": {"positions": "{positions}"}},
                {"name": "fetch", "action": "execute_through_registry",
                 "capability": "ledger.positions", "outputs": ["positions"]}
            ]
        }));
        let report = Validator::with_catalog(catalog()).validate(&p);
        assert!(report.errors.iter().any(|e| e.contains("consumes positions")));
    }

    #[test]
    fn fetch_then_consume_is_fine() {
        let p = pattern(json!({
            "id": "p", "version": "1", "last_updated": "2025-10-21",
            "triggers": ["factor exposure"],
            "steps": [
                {"name": "fetch", "action": "execute_through_registry",
                 "capability": "ledger.positions", "outputs": ["positions"]},
                {"name": "exposure", "action": "execute_through_registry",
                 "capability": "risk.factor_exposure",
                 "params": {"positions": "{positions}"}}
            ]
        }));
        let report = Validator::with_catalog(catalog()).validate(&p);
        assert!(report.is_valid(), "{:?}", report.errors);
    }

    #[test]
    fn missing_metadata_is_only_a_warning() {
        let p = pattern(json!({"id": "p", "steps": []}));
        let report = Validator::new().validate(&p);
        assert!(report.is_valid());
        assert!(report.warnings.iter().any(|w| w.contains("version")));
        assert!(report.warnings.iter().any(|w| w.contains("last_updated")));
    }

    #[test]
    fn uppercase_vars_in_templates_are_host_supplied() {
        let p = pattern(json!({
            "id": "p", "version": "1",
            "steps": [{"name": "s", "action": "evaluate", "params": {"type": "brand_moat"}}],
            "template": "Symbol {SYMBOL} scored {s.score}"
        }));
        let report = Validator::new().validate(&p);
        assert!(
            !report.warnings.iter().any(|w| w.contains("SYMBOL")),
            "{:?}",
            report.warnings
        );
    }
}
