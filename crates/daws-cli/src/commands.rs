// SPDX-License-Identifier: MIT OR Apache-2.0
//! Subcommand implementations.
//!
//! Exit-code contract shared by both validators: 0 = clean, 1 = warnings,
//! 2 = errors.

use anyhow::{Context, Result};
use daws_compliance::{ComplianceGate, Severity};
use daws_pattern::PatternLoader;
use std::path::Path;

/// Exit code for a clean run.
pub const EXIT_CLEAN: u8 = 0;
/// Exit code when only warnings were found.
pub const EXIT_WARNINGS: u8 = 1;
/// Exit code when errors were found.
pub const EXIT_ERRORS: u8 = 2;

/// Which schema `daws schema` prints.
#[derive(Debug, Clone, Copy)]
pub enum SchemaKind {
    /// The pattern definition file format.
    Pattern,
    /// The provenance envelope.
    Envelope,
    /// The capability contract declaration.
    Contract,
}

/// `daws validate <dir>` — pattern-integrity check.
///
/// # Errors
///
/// Only when the directory itself cannot be read.
pub fn validate(dir: &Path) -> Result<u8> {
    let loader = PatternLoader::new();
    let report = loader
        .load_dir(dir)
        .with_context(|| format!("read pattern directory {}", dir.display()))?;

    for failure in &report.failures {
        println!(
            "error: {}: {}",
            failure.file.display(),
            failure.reason
        );
    }
    for warning in &report.warnings {
        println!("warning: {warning}");
    }
    println!(
        "{} pattern(s) loaded, {} rejected, {} warning(s)",
        report.patterns.len(),
        report.failures.len(),
        report.warnings.len()
    );

    Ok(if report.has_errors() {
        EXIT_ERRORS
    } else if report.has_warnings() {
        EXIT_WARNINGS
    } else {
        EXIT_CLEAN
    })
}

/// `daws compliance <dir>` — governance scan with optional report export.
///
/// # Errors
///
/// When the directory cannot be read or the export file cannot be written.
pub fn compliance(dir: &Path, strict: bool, export: Option<&Path>) -> Result<u8> {
    let loader = PatternLoader::new();
    let load = loader
        .load_dir(dir)
        .with_context(|| format!("read pattern directory {}", dir.display()))?;

    let gate = ComplianceGate::new(strict);
    let mut errors = load.failures.len();
    let mut warnings = 0usize;

    for failure in &load.failures {
        println!("error: {}: {}", failure.file.display(), failure.reason);
    }

    for pattern in &load.patterns {
        let check = gate.check_pattern(pattern);
        for v in &check.violations {
            match v.severity {
                Severity::Error => {
                    errors += 1;
                    println!("error: {}: {}", pattern.id, v.message);
                }
                Severity::Warning => {
                    warnings += 1;
                    println!("warning: {}: {}", pattern.id, v.message);
                }
                Severity::Info => println!("info: {}: {}", pattern.id, v.message),
            }
        }
    }

    let report = gate.report();
    println!(
        "{} pattern(s) checked, {:.1}% compliant ({} error(s), {} warning(s))",
        report.overall.total_patterns_checked,
        report.overall.pattern_compliance_rate,
        errors,
        warnings
    );
    for recommendation in &report.recommendations {
        println!("recommend: {recommendation}");
    }

    if let Some(path) = export {
        gate.export_report(path)
            .with_context(|| format!("write compliance report to {}", path.display()))?;
        println!("report written to {}", path.display());
    }

    Ok(if errors > 0 {
        EXIT_ERRORS
    } else if warnings > 0 || (strict && load.has_warnings()) {
        EXIT_WARNINGS
    } else {
        EXIT_CLEAN
    })
}

/// `daws schema <kind>` — print a JSON schema to stdout.
///
/// # Errors
///
/// When schema serialization fails.
pub fn schema(kind: SchemaKind) -> Result<()> {
    let schema = match kind {
        SchemaKind::Pattern => schemars::schema_for!(daws_pattern::Pattern),
        SchemaKind::Envelope => schemars::schema_for!(daws_core::Envelope),
        SchemaKind::Contract => schemars::schema_for!(daws_core::CapabilityContract),
    };
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}
