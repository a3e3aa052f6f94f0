// SPDX-License-Identifier: MIT OR Apache-2.0
//! Directory loader.
//!
//! One JSON file per pattern. The loader is deliberately tolerant: parse and
//! validation failures are recorded per file and the rest of the corpus still
//! loads, so a corpus stays partially usable during development.

use daws_core::ContractCatalog;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::model::Pattern;
use crate::validate::{PatternReport, Validator};

/// A file that failed to load or validate.
#[derive(Debug, Clone)]
pub struct LoadFailure {
    /// File the failure came from.
    pub file: PathBuf,
    /// Pattern id, when parsing got far enough to know it.
    pub pattern_id: Option<String>,
    /// Why the pattern was rejected.
    pub reason: String,
}

/// Outcome of loading a pattern directory.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Patterns that parsed and validated.
    pub patterns: Vec<Pattern>,
    /// Files that were rejected.
    pub failures: Vec<LoadFailure>,
    /// Advisory findings across the corpus, prefixed with the pattern id.
    pub warnings: Vec<String>,
}

impl LoadReport {
    /// `true` when any file was rejected.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.failures.is_empty()
    }

    /// `true` when any advisory finding was recorded.
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Find a loaded pattern by id.
    #[must_use]
    pub fn pattern(&self, id: &str) -> Option<&Pattern> {
        self.patterns.iter().find(|p| p.id == id)
    }
}

/// Loads and validates a directory of pattern files.
#[derive(Debug, Default)]
pub struct PatternLoader {
    validator: Validator,
}

impl PatternLoader {
    /// A loader without registry knowledge (capability checks are skipped).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A loader that validates capability references against the catalog.
    #[must_use]
    pub fn with_catalog(catalog: ContractCatalog) -> Self {
        Self {
            validator: Validator::with_catalog(catalog),
        }
    }

    /// Validate a single already-parsed pattern.
    #[must_use]
    pub fn validate(&self, pattern: &Pattern) -> PatternReport {
        self.validator.validate(pattern)
    }

    /// Load every `*.json` file under `dir`.
    ///
    /// # Errors
    ///
    /// Only if the directory itself cannot be read; individual file failures
    /// land in the report.
    pub fn load_dir(&self, dir: &Path) -> std::io::Result<LoadReport> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        files.sort();

        let mut report = LoadReport::default();
        let mut trigger_owners: BTreeMap<String, String> = BTreeMap::new();

        for file in files {
            match self.load_file(&file) {
                Ok((pattern, mut warnings)) => {
                    if report.pattern(&pattern.id).is_some() {
                        report.failures.push(LoadFailure {
                            file,
                            pattern_id: Some(pattern.id.clone()),
                            reason: format!("duplicate pattern id '{}'", pattern.id),
                        });
                        continue;
                    }

                    let check = self.validator.validate(&pattern);
                    let check_is_valid = check.is_valid();
                    let check_errors = check.errors.join("; ");
                    warnings.extend(check.warnings);
                    if !check_is_valid {
                        report.failures.push(LoadFailure {
                            file,
                            pattern_id: Some(pattern.id.clone()),
                            reason: check_errors,
                        });
                        continue;
                    }

                    for trigger in &pattern.triggers {
                        let key = trigger.trim().to_lowercase();
                        if let Some(owner) = trigger_owners.get(&key) {
                            // Ambiguity is the host's to resolve at dispatch
                            // time; here it is only advisory.
                            warnings.push(format!(
                                "trigger '{trigger}' duplicates one in pattern '{owner}'"
                            ));
                        } else {
                            trigger_owners.insert(key, pattern.id.clone());
                        }
                    }

                    for w in warnings {
                        report.warnings.push(format!("{}: {w}", pattern.id));
                    }
                    debug!(target: "daws.loader", pattern = %pattern.id, "loaded");
                    report.patterns.push(pattern);
                }
                Err(reason) => {
                    warn!(target: "daws.loader", file = %file.display(), %reason, "pattern rejected");
                    report.failures.push(LoadFailure {
                        file,
                        pattern_id: None,
                        reason,
                    });
                }
            }
        }

        Ok(report)
    }

    /// Parse one file, returning deprecation warnings alongside the pattern.
    fn load_file(&self, file: &Path) -> Result<(Pattern, Vec<String>), String> {
        let text = std::fs::read_to_string(file).map_err(|e| format!("read failed: {e}"))?;
        let raw: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| format!("invalid JSON: {e}"))?;

        let mut warnings = Vec::new();
        if let Some(steps) = raw.get("steps").and_then(|s| s.as_array()) {
            for step in steps {
                if step.get("parameters").is_some() && step.get("params").is_none() {
                    let name = step
                        .get("name")
                        .and_then(|n| n.as_str())
                        .unwrap_or("<unnamed>");
                    warnings.push(format!(
                        "step '{name}' uses deprecated 'parameters' key; rename to 'params'"
                    ));
                }
            }
        }

        let pattern: Pattern =
            serde_json::from_value(raw).map_err(|e| format!("invalid pattern: {e}"))?;
        Ok((pattern, warnings))
    }
}
