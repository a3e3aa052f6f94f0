// SPDX-License-Identifier: MIT OR Apache-2.0
//! The pattern executor.
//!
//! Runs a validated pattern's steps strictly in order: resolves `{var}`
//! substitutions, routes registry actions through the adapter with the cache's
//! single-flight in front, prefers real implementations over stubs on tag
//! fallback, folds every step's provenance into the aggregate, and renders
//! the optional output template. Different requests execute concurrently
//! without cross-coupling; only identical fingerprints coalesce.

use chrono::Utc;
use daws_cache::FingerprintCache;
use daws_core::{
    DEFAULT_TTL_SECONDS, Envelope, ErrorEnvelope, ErrorKind, ExecutionContext, Fingerprint,
    ImplementationStatus, Provenance, ProvenanceMerge,
};
use daws_agent::Services;
use daws_compliance::ComplianceGate;
use daws_pattern::{Pattern, Step, StepAction, render_template, resolve_params};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::actions::ActionSet;
use crate::adapter::{AgentInvoker, CallerModule};
use crate::cancel::CancellationToken;
use crate::registry::{Binding, CapabilityRegistry};

/// Executor tuning knobs.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Days behind the wall clock after which a merged as-of is flagged
    /// stale.
    pub staleness_days: i64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { staleness_days: 5 }
    }
}

/// Sequentially executes validated patterns.
pub struct PatternExecutor {
    registry: Arc<CapabilityRegistry>,
    invoker: Arc<AgentInvoker>,
    gate: Arc<ComplianceGate>,
    cache: Arc<FingerprintCache>,
    actions: ActionSet,
    config: ExecutorConfig,
}

impl PatternExecutor {
    /// Assemble an executor from the shared core components.
    #[must_use]
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        invoker: Arc<AgentInvoker>,
        gate: Arc<ComplianceGate>,
        cache: Arc<FingerprintCache>,
        services: Services,
    ) -> Self {
        Self {
            registry,
            invoker,
            gate,
            cache,
            actions: ActionSet::defaults(services),
            config: ExecutorConfig::default(),
        }
    }

    /// Override the executor configuration.
    #[must_use]
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Execute a pattern to completion.
    ///
    /// # Errors
    ///
    /// A structured [`ErrorEnvelope`] naming the pattern and step: hard
    /// failures abort, soft failures on optional steps degrade to stub
    /// markers and the pattern continues.
    pub async fn execute(
        &self,
        pattern: &Pattern,
        ctx: &ExecutionContext,
    ) -> Result<Envelope, ErrorEnvelope> {
        self.execute_cancellable(pattern, ctx, &CancellationToken::new())
            .await
    }

    /// Execute with caller-supplied cancellation.
    ///
    /// Cancellation takes effect before each step and interrupts an
    /// in-flight step at its next suspension point.
    ///
    /// # Errors
    ///
    /// As [`execute`](Self::execute), plus a `Timeout`-kind envelope when
    /// the token fires.
    pub async fn execute_cancellable(
        &self,
        pattern: &Pattern,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<Envelope, ErrorEnvelope> {
        // Re-verify even previously-checked patterns: they may have been
        // loaded under a laxer mode than the one executing now.
        let check = self.gate.check_pattern(pattern);
        if !check.compliant {
            let reasons: Vec<String> = check
                .violations
                .iter()
                .map(|v| v.message.clone())
                .collect();
            return Err(ErrorEnvelope::new(
                ErrorKind::ValidationFailed,
                format!("pattern is non-compliant: {}", reasons.join("; ")),
            )
            .in_pattern(&pattern.id));
        }

        info!(target: "daws.executor", pattern = %pattern.id, request = %ctx.request_id, "executing");

        let mut outputs: BTreeMap<String, Value> = BTreeMap::new();
        let mut merge = ProvenanceMerge::new();
        let mut last_payload = Value::Null;

        for step in &pattern.steps {
            if cancel.is_cancelled() {
                return Err(ErrorEnvelope::new(ErrorKind::Timeout, "execution cancelled")
                    .in_pattern(&pattern.id)
                    .at_step(&step.name));
            }

            let result = tokio::select! {
                r = self.run_step(pattern, step, ctx, &outputs) => r,
                () = cancel.cancelled() => {
                    Err(ErrorEnvelope::new(ErrorKind::Timeout, "execution cancelled"))
                }
            };

            let envelope = match result {
                Ok(envelope) => envelope,
                Err(err) => {
                    let err = err.in_pattern(&pattern.id).at_step(&step.name);
                    if step.required || err.kind.is_hard() {
                        warn!(
                            target: "daws.executor",
                            pattern = %pattern.id,
                            step = %step.name,
                            kind = %err.kind,
                            "step failed, aborting"
                        );
                        return Err(err);
                    }
                    // Optional step: leave a typed stub marker and continue.
                    debug!(
                        target: "daws.executor",
                        pattern = %pattern.id,
                        step = %step.name,
                        "optional step failed, continuing with stub"
                    );
                    Envelope::from_error(&err, &ctx.pricing_pack_id)
                }
            };

            if envelope.meta.pricing_pack_id != ctx.pricing_pack_id {
                return Err(ErrorEnvelope::new(
                    ErrorKind::ValidationFailed,
                    "inconsistent pricing_pack_id across steps",
                )
                .in_pattern(&pattern.id)
                .at_step(&step.name));
            }

            merge.absorb(&envelope.meta);
            last_payload = envelope.payload.clone();
            for name in step.binding_names() {
                outputs.insert(name.to_string(), envelope.payload.clone());
            }
        }

        let payload = match &pattern.template {
            Some(template) => {
                let rendered = render_template(template, ctx, &outputs).map_err(|e| {
                    ErrorEnvelope::new(ErrorKind::UnresolvedReference, e.to_string())
                        .in_pattern(&pattern.id)
                })?;
                Value::String(rendered)
            }
            None => last_payload,
        };

        let mut meta = if merge.is_empty() {
            // Empty step list still yields a well-formed envelope.
            Provenance::new(
                "executor",
                ctx.as_of_date,
                DEFAULT_TTL_SECONDS,
                &ctx.pricing_pack_id,
            )
        } else {
            merge.finish().map_err(|e| {
                ErrorEnvelope::new(ErrorKind::ValidationFailed, e.to_string())
                    .in_pattern(&pattern.id)
            })?
        };

        if let Some(as_of) = meta.as_of {
            let age_days = (Utc::now().date_naive() - as_of).num_days();
            if age_days > self.config.staleness_days {
                meta.stale = true;
                warn!(
                    target: "daws.executor",
                    pattern = %pattern.id,
                    %as_of,
                    age_days,
                    "result is stale"
                );
            }
        }

        Ok(Envelope::wrap(payload, meta))
    }

    async fn run_step(
        &self,
        pattern: &Pattern,
        step: &Step,
        ctx: &ExecutionContext,
        outputs: &BTreeMap<String, Value>,
    ) -> Result<Envelope, ErrorEnvelope> {
        let resolved = resolve_params(&step.params, ctx, outputs)
            .map_err(|e| ErrorEnvelope::new(ErrorKind::UnresolvedReference, e.to_string()))?;

        match &step.action {
            StepAction::ExecuteThroughRegistry => {
                let capability = step.capability.as_deref().ok_or_else(|| {
                    ErrorEnvelope::new(
                        ErrorKind::ValidationFailed,
                        "execute_through_registry requires a capability",
                    )
                })?;
                self.invoke_cached(capability, step, ctx, &resolved).await
            }
            StepAction::ExecuteByCapability => {
                if let Some(capability) = step.capability.as_deref() {
                    return self.invoke_cached(capability, step, ctx, &resolved).await;
                }
                let tag = step.capability_tag.as_deref().ok_or_else(|| {
                    ErrorEnvelope::new(
                        ErrorKind::ValidationFailed,
                        "execute_by_capability requires a capability_tag",
                    )
                })?;
                self.invoke_by_tag(tag, step, ctx, &resolved).await
            }
            other => {
                let handler = self.actions.get(other).ok_or_else(|| {
                    ErrorEnvelope::new(
                        ErrorKind::ValidationFailed,
                        format!("no handler for action '{other}'"),
                    )
                    .in_pattern(&pattern.id)
                })?;
                handler.run(&resolved, ctx, outputs).await
            }
        }
    }

    /// Invoke a capability with the fingerprint cache and single-flight in
    /// front.
    async fn invoke_cached(
        &self,
        capability: &str,
        step: &Step,
        ctx: &ExecutionContext,
        params: &serde_json::Map<String, Value>,
    ) -> Result<Envelope, ErrorEnvelope> {
        let fingerprint = Fingerprint::compute(capability, params, &ctx.pricing_pack_id);
        let deadline = step.timeout_secs.map(Duration::from_secs);
        self.cache
            .single_flight(fingerprint, || async {
                self.invoker
                    .invoke(CallerModule::Executor, capability, ctx, params, deadline)
                    .await
            })
            .await
    }

    /// Tag-based fallback: entries in descending priority, but stubs are
    /// tried only when no real or partial implementation exists at all. The
    /// first candidate to return successfully wins.
    async fn invoke_by_tag(
        &self,
        tag: &str,
        step: &Step,
        ctx: &ExecutionContext,
        params: &serde_json::Map<String, Value>,
    ) -> Result<Envelope, ErrorEnvelope> {
        let bindings = self.registry.lookup_by_tag(tag);
        if bindings.is_empty() {
            return Err(ErrorEnvelope::new(
                ErrorKind::CapabilityNotFound,
                format!("no registered capability carries tag '{tag}'"),
            ));
        }

        let (live, stubs): (Vec<&Binding>, Vec<&Binding>) = bindings
            .into_iter()
            .partition(|b| b.contract().implementation_status != ImplementationStatus::Stub);
        let candidates = if live.is_empty() { stubs } else { live };

        let deadline = step.timeout_secs.map(Duration::from_secs);
        let mut last_err: Option<ErrorEnvelope> = None;
        for binding in candidates {
            let capability = binding.contract().name.clone();
            let fingerprint = Fingerprint::compute(&capability, params, &ctx.pricing_pack_id);
            let attempt = self
                .cache
                .single_flight(fingerprint, || async {
                    self.invoker
                        .invoke_binding(CallerModule::Executor, binding, ctx, params, deadline)
                        .await
                })
                .await;
            match attempt {
                Ok(envelope) => return Ok(envelope),
                Err(err) => {
                    debug!(
                        target: "daws.executor",
                        tag,
                        capability = %capability,
                        kind = %err.kind,
                        "fallback candidate failed"
                    );
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            ErrorEnvelope::new(
                ErrorKind::CapabilityNotFound,
                format!("every candidate for tag '{tag}' failed"),
            )
        }))
    }
}

impl std::fmt::Debug for PatternExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternExecutor")
            .field("config", &self.config)
            .finish()
    }
}
