// SPDX-License-Identifier: MIT OR Apache-2.0
//! Telemetry record types.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of a single capability invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InvocationOutcome {
    /// The agent returned a real or partial result.
    Success,
    /// The agent returned an error result.
    Error,
    /// The invocation exceeded its deadline.
    Timeout,
    /// The agent returned a stub result.
    Stub,
}

/// One record per capability invocation, emitted by the adapter regardless
/// of outcome.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TelemetryRecord {
    /// Request the invocation belonged to.
    pub request_id: Uuid,
    /// Capability that was invoked.
    pub capability: String,
    /// Agent that served the invocation.
    pub agent: String,
    /// Instant the invocation started.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// How the invocation ended.
    pub outcome: InvocationOutcome,
    /// Whether a provenance envelope was written on the result.
    pub provenance_written: bool,
    /// Failure reason, for non-success outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
