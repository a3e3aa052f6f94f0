// SPDX-License-Identifier: MIT OR Apache-2.0
//! The agent adapter.
//!
//! [`AgentInvoker`] is the only path from any component to an agent method:
//! registry bindings keep their agent handle crate-private, so bypassing the
//! adapter is a compile error, not a convention. Per invocation the adapter
//! consults the compliance gate, applies the effective timeout, normalizes
//! the agent's return into a provenance envelope, and emits exactly one
//! telemetry record.

use chrono::Utc;
use daws_core::{
    DEFAULT_TIMEOUT_SECS, Envelope, ErrorEnvelope, ErrorKind, ExecutionContext, InvocationOutcome,
    Provenance, TelemetryRecord,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::registry::{Binding, CapabilityRegistry, RegistryError};
use crate::telemetry::TelemetrySink;
use daws_compliance::ComplianceGate;

/// Identifies the module asking for an agent invocation.
///
/// The compliance gate allowlists the core modules; anything else is recorded
/// as a violation and refused in strict mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallerModule {
    /// The pattern executor.
    Executor,
    /// The adapter itself (internal re-entry).
    Adapter,
    /// The registry (introspection probes).
    Registry,
    /// Any other module, by name.
    External(String),
}

impl CallerModule {
    /// The monitoring name recorded on access events.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Executor => "executor",
            Self::Adapter => "adapter",
            Self::Registry => "registry",
            Self::External(name) => name,
        }
    }
}

impl fmt::Display for CallerModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform invocation façade over heterogeneous agents.
pub struct AgentInvoker {
    registry: Arc<CapabilityRegistry>,
    gate: Arc<ComplianceGate>,
    telemetry: Arc<TelemetrySink>,
    default_timeout: Duration,
}

impl AgentInvoker {
    /// Create an adapter over the given registry, gate, and telemetry sink.
    #[must_use]
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        gate: Arc<ComplianceGate>,
        telemetry: Arc<TelemetrySink>,
    ) -> Self {
        Self {
            registry,
            gate,
            telemetry,
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Override the default per-invocation timeout.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Invoke a capability by name.
    ///
    /// `deadline` is the caller's remaining budget; the effective timeout is
    /// the smaller of it and the capability's own (contract override or
    /// default 30s).
    ///
    /// # Errors
    ///
    /// Structured [`ErrorEnvelope`]s only — `CapabilityNotFound`,
    /// `ValidationFailed` (refused caller in strict mode), `Timeout`, or
    /// `CapabilityError`. Nothing exception-like escapes to the executor.
    pub async fn invoke(
        &self,
        caller: CallerModule,
        capability: &str,
        ctx: &ExecutionContext,
        params: &serde_json::Map<String, serde_json::Value>,
        deadline: Option<Duration>,
    ) -> Result<Envelope, ErrorEnvelope> {
        let binding = match self.registry.lookup(capability) {
            Ok(b) => b,
            Err(RegistryError::CapabilityNotFound(name)) => {
                self.gate.check_access(caller.as_str(), Some(capability));
                let err = ErrorEnvelope::new(
                    ErrorKind::CapabilityNotFound,
                    format!("no agent provides '{name}'"),
                )
                .for_capability(capability);
                self.record(ctx, capability, "unresolved", 0, InvocationOutcome::Error, false, Some(&err.reason));
                return Err(err);
            }
            Err(other) => {
                self.gate.check_access(caller.as_str(), Some(capability));
                let err = ErrorEnvelope::new(ErrorKind::CapabilityError, other.to_string())
                    .for_capability(capability);
                self.record(ctx, capability, "unresolved", 0, InvocationOutcome::Error, false, Some(&err.reason));
                return Err(err);
            }
        };

        self.invoke_binding(caller, binding, ctx, params, deadline).await
    }

    /// Invoke a specific binding (used by the executor's tag fallback, where
    /// the candidate order is decided before invocation).
    pub(crate) async fn invoke_binding(
        &self,
        caller: CallerModule,
        binding: &Binding,
        ctx: &ExecutionContext,
        params: &serde_json::Map<String, serde_json::Value>,
        deadline: Option<Duration>,
    ) -> Result<Envelope, ErrorEnvelope> {
        let capability = binding.contract().name.clone();
        let access = self.gate.check_access(caller.as_str(), Some(&capability));
        if !access.compliant && self.gate.is_strict() {
            warn!(
                target: "daws.adapter",
                caller = %caller,
                capability = %capability,
                "refusing non-allowlisted caller in strict mode"
            );
            let err = ErrorEnvelope::new(
                ErrorKind::ValidationFailed,
                format!("caller '{caller}' may not invoke agents directly"),
            )
            .for_capability(&capability);
            self.record(ctx, &capability, "refused", 0, InvocationOutcome::Error, false, Some(&err.reason));
            return Err(err);
        }
        let contract = binding.contract();
        let capability = contract.name.as_str();
        let agent_name = binding.agent_name().to_string();

        let mut timeout = contract
            .timeout_secs
            .map_or(self.default_timeout, Duration::from_secs);
        if let Some(remaining) = deadline {
            timeout = timeout.min(remaining);
        }

        let start = std::time::Instant::now();
        debug!(
            target: "daws.adapter",
            capability,
            agent = %agent_name,
            timeout_ms = timeout.as_millis() as u64,
            "invoking"
        );

        let outcome =
            tokio::time::timeout(timeout, binding.agent.invoke(capability, ctx, params)).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(result)) => {
                let meta = result.meta.unwrap_or_else(|| {
                    // Agent omitted provenance; fill defaults from the
                    // adapter's own knowledge.
                    Provenance {
                        source: format!("{agent_name}:{}", ctx.pricing_pack_id),
                        as_of: ctx.as_of_date,
                        ttl_seconds: contract.ttl_seconds,
                        pricing_pack_id: ctx.pricing_pack_id.clone(),
                        computed_at: Utc::now(),
                        confidence: None,
                        status: contract.implementation_status,
                        stale: false,
                    }
                });
                let envelope = Envelope::wrap(result.payload, meta);
                let outcome = if envelope.is_stub() {
                    InvocationOutcome::Stub
                } else {
                    InvocationOutcome::Success
                };
                self.record(ctx, capability, &agent_name, duration_ms, outcome, true, None);
                Ok(envelope)
            }
            Ok(Err(agent_err)) => {
                let err = ErrorEnvelope::new(ErrorKind::CapabilityError, agent_err.to_string())
                    .for_capability(capability);
                self.record(
                    ctx,
                    capability,
                    &agent_name,
                    duration_ms,
                    InvocationOutcome::Error,
                    false,
                    Some(&err.reason),
                );
                Err(err)
            }
            Err(_elapsed) => {
                let err = ErrorEnvelope::new(
                    ErrorKind::Timeout,
                    format!("exceeded {}ms deadline", timeout.as_millis()),
                )
                .for_capability(capability);
                self.record(
                    ctx,
                    capability,
                    &agent_name,
                    duration_ms,
                    InvocationOutcome::Timeout,
                    false,
                    Some(&err.reason),
                );
                Err(err)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        ctx: &ExecutionContext,
        capability: &str,
        agent: &str,
        duration_ms: u64,
        outcome: InvocationOutcome,
        provenance_written: bool,
        reason: Option<&str>,
    ) {
        self.telemetry.record(&TelemetryRecord {
            request_id: ctx.request_id,
            capability: capability.to_string(),
            agent: agent.to_string(),
            started_at: Utc::now(),
            duration_ms,
            outcome,
            provenance_written,
            reason: reason.map(str::to_string),
        });
    }
}

impl fmt::Debug for AgentInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentInvoker")
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}
