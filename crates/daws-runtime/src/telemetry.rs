// SPDX-License-Identifier: MIT OR Apache-2.0
//! Telemetry sink: atomic counters, per-agent execution metrics, and an
//! append-only JSONL log.

use chrono::{DateTime, Utc};
use daws_core::{InvocationOutcome, TelemetryRecord};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use tracing::debug;

/// Failure reasons retained per agent.
const RECENT_FAILURES: usize = 10;

/// Per-agent execution bookkeeping.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentMetrics {
    /// Total invocations served by this agent.
    pub invocations: u64,
    /// Invocations that ended in error or timeout.
    pub failures: u64,
    /// Last successful invocation.
    pub last_success: Option<DateTime<Utc>>,
    /// Last failed invocation.
    pub last_failure: Option<DateTime<Utc>>,
    /// The most recent failure reasons, oldest first (bounded).
    pub recent_failures: VecDeque<String>,
}

/// Non-atomic, serializable snapshot of the global counters.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    /// Records emitted in total.
    pub total_invocations: u64,
    /// Successful invocations.
    pub successes: u64,
    /// Error outcomes.
    pub errors: u64,
    /// Timeout outcomes.
    pub timeouts: u64,
    /// Stub outcomes.
    pub stubs: u64,
    /// Running average invocation duration in milliseconds.
    pub average_duration_ms: u64,
}

/// Collects one record per capability invocation.
pub struct TelemetrySink {
    total: AtomicU64,
    successes: AtomicU64,
    errors: AtomicU64,
    timeouts: AtomicU64,
    stubs: AtomicU64,
    cumulative_duration_ms: AtomicU64,
    per_agent: Mutex<BTreeMap<String, AgentMetrics>>,
    log: Option<Mutex<File>>,
}

impl TelemetrySink {
    /// An in-memory sink with no persistent log.
    #[must_use]
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            stubs: AtomicU64::new(0),
            cumulative_duration_ms: AtomicU64::new(0),
            per_agent: Mutex::new(BTreeMap::new()),
            log: None,
        }
    }

    /// A sink that additionally appends every record as one JSON line.
    ///
    /// # Errors
    ///
    /// Returns an error when the log file cannot be opened for append.
    pub fn with_log_file(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut sink = Self::new();
        sink.log = Some(Mutex::new(file));
        Ok(sink)
    }

    /// Record one invocation.
    pub fn record(&self, record: &TelemetryRecord) {
        self.total.fetch_add(1, Relaxed);
        match record.outcome {
            InvocationOutcome::Success => self.successes.fetch_add(1, Relaxed),
            InvocationOutcome::Error => self.errors.fetch_add(1, Relaxed),
            InvocationOutcome::Timeout => self.timeouts.fetch_add(1, Relaxed),
            InvocationOutcome::Stub => self.stubs.fetch_add(1, Relaxed),
        };
        self.cumulative_duration_ms
            .fetch_add(record.duration_ms, Relaxed);

        {
            let mut agents = self.per_agent.lock().expect("telemetry lock poisoned");
            let metrics = agents.entry(record.agent.clone()).or_default();
            metrics.invocations += 1;
            match record.outcome {
                InvocationOutcome::Success | InvocationOutcome::Stub => {
                    metrics.last_success = Some(record.started_at);
                }
                InvocationOutcome::Error | InvocationOutcome::Timeout => {
                    metrics.failures += 1;
                    metrics.last_failure = Some(record.started_at);
                    if metrics.recent_failures.len() == RECENT_FAILURES {
                        metrics.recent_failures.pop_front();
                    }
                    metrics
                        .recent_failures
                        .push_back(record.reason.clone().unwrap_or_else(|| "unknown".into()));
                }
            }
        }

        if let Some(log) = &self.log {
            if let Ok(line) = serde_json::to_string(record) {
                let mut file = log.lock().expect("telemetry log lock poisoned");
                if let Err(e) = writeln!(file, "{line}") {
                    debug!(target: "daws.telemetry", error = %e, "telemetry append failed");
                }
            }
        }
    }

    /// Snapshot the global counters.
    #[must_use]
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let total = self.total.load(Relaxed);
        let cumulative = self.cumulative_duration_ms.load(Relaxed);
        TelemetrySnapshot {
            total_invocations: total,
            successes: self.successes.load(Relaxed),
            errors: self.errors.load(Relaxed),
            timeouts: self.timeouts.load(Relaxed),
            stubs: self.stubs.load(Relaxed),
            average_duration_ms: if total > 0 { cumulative / total } else { 0 },
        }
    }

    /// Metrics for one agent, if it has been invoked.
    #[must_use]
    pub fn agent_metrics(&self, agent: &str) -> Option<AgentMetrics> {
        self.per_agent
            .lock()
            .expect("telemetry lock poisoned")
            .get(agent)
            .cloned()
    }
}

impl Default for TelemetrySink {
    fn default() -> Self {
        Self::new()
    }
}
