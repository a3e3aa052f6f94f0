// SPDX-License-Identifier: MIT OR Apache-2.0
//! Structured error taxonomy.
//!
//! Failures cross component boundaries as [`ErrorEnvelope`] values, never as
//! panics. Each carries a stable [`ErrorKind`], a human-readable reason, and
//! enough addressing (pattern, step, capability) for a user-facing message of
//! the form "pattern X failed at step Y: reason".

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable, machine-readable failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Registry lookup failed for an explicit capability name.
    CapabilityNotFound,
    /// A `{var}` template did not resolve from context or prior outputs.
    UnresolvedReference,
    /// A step exceeded its deadline.
    Timeout,
    /// The agent method returned an error result.
    CapabilityError,
    /// The pattern failed schema or compliance validation.
    ValidationFailed,
    /// The merged as-of is older than the configured staleness threshold.
    StaleData,
    /// A required data source is absent; the result is a stub.
    DataAbsent,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CapabilityNotFound => "capability_not_found",
            Self::UnresolvedReference => "unresolved_reference",
            Self::Timeout => "timeout",
            Self::CapabilityError => "capability_error",
            Self::ValidationFailed => "validation_failed",
            Self::StaleData => "stale_data",
            Self::DataAbsent => "data_absent",
        };
        f.write_str(s)
    }
}

impl ErrorKind {
    /// Whether this failure aborts a pattern by default (hard failure).
    ///
    /// Soft kinds leave a stub marker on optional steps and let the pattern
    /// continue.
    #[must_use]
    pub fn is_hard(&self) -> bool {
        matches!(
            self,
            Self::CapabilityNotFound | Self::UnresolvedReference | Self::ValidationFailed
        )
    }
}

/// A structured failure travelling between components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ErrorEnvelope {
    /// Failure classification.
    pub kind: ErrorKind,
    /// Human-readable reason.
    pub reason: String,
    /// Pattern the failure occurred in, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_id: Option<String>,
    /// Step the failure occurred at, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    /// Capability involved, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    /// Instant the failure was recorded.
    pub occurred_at: DateTime<Utc>,
}

impl ErrorEnvelope {
    /// Build an error with just a kind and reason.
    #[must_use]
    pub fn new(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            pattern_id: None,
            step: None,
            capability: None,
            occurred_at: Utc::now(),
        }
    }

    /// Attach the pattern id.
    #[must_use]
    pub fn in_pattern(mut self, pattern_id: impl Into<String>) -> Self {
        self.pattern_id = Some(pattern_id.into());
        self
    }

    /// Attach the step name.
    #[must_use]
    pub fn at_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    /// Attach the capability name.
    #[must_use]
    pub fn for_capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = Some(capability.into());
        self
    }
}

impl fmt::Display for ErrorEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.pattern_id, &self.step) {
            (Some(p), Some(s)) => write!(f, "pattern '{p}' failed at step '{s}': ")?,
            (Some(p), None) => write!(f, "pattern '{p}' failed: ")?,
            (None, Some(s)) => write!(f, "step '{s}' failed: ")?,
            (None, None) => {}
        }
        if let Some(cap) = &self.capability {
            write!(f, "[{cap}] ")?;
        }
        write!(f, "{}: {}", self.kind, self.reason)
    }
}

impl std::error::Error for ErrorEnvelope {}
