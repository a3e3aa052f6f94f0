// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! daws-runtime
#![deny(unsafe_code)]

/// Built-in step handlers for non-registry actions.
pub mod actions;
/// The agent adapter — the single invocation chokepoint.
pub mod adapter;
/// Cancellation primitives.
pub mod cancel;
/// The pattern executor.
pub mod executor;
/// The capability registry.
pub mod registry;
/// Telemetry sink.
pub mod telemetry;

use daws_agent::{Agent, Services};
use daws_cache::FingerprintCache;
use daws_compliance::ComplianceGate;
use daws_core::{Envelope, ErrorEnvelope, ExecutionContext};
use daws_pattern::{LoadReport, Pattern, PatternLoader};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::info;

pub use actions::{ActionSet, StepHandler};
pub use adapter::{AgentInvoker, CallerModule};
pub use cancel::CancellationToken;
pub use executor::{ExecutorConfig, PatternExecutor};
pub use registry::{Binding, CapabilityRegistry, RegistryError};
pub use telemetry::{AgentMetrics, TelemetrySink, TelemetrySnapshot};

/// Errors from runtime assembly.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Agent registration failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The telemetry log file could not be opened.
    #[error("telemetry log unavailable: {0}")]
    TelemetryLog(#[from] std::io::Error),

    /// The requested pattern is not loaded.
    #[error("pattern '{0}' not found")]
    PatternNotFound(String),
}

/// The assembled execution core: registry, gate, cache, telemetry, executor,
/// and the loaded pattern corpus.
pub struct Runtime {
    registry: Arc<CapabilityRegistry>,
    gate: Arc<ComplianceGate>,
    cache: Arc<FingerprintCache>,
    telemetry: Arc<TelemetrySink>,
    executor: PatternExecutor,
    patterns: RwLock<BTreeMap<String, Pattern>>,
}

impl Runtime {
    /// Start assembling a runtime.
    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    /// Load (or reload) the pattern corpus from a directory.
    ///
    /// Each loaded pattern is pre-scanned by the compliance gate; the loader
    /// continues past individual failures so the corpus stays partially
    /// usable.
    ///
    /// # Errors
    ///
    /// Only when the directory itself cannot be read.
    pub fn load_patterns(&self, dir: &std::path::Path) -> std::io::Result<LoadReport> {
        let loader = PatternLoader::with_catalog(self.registry.catalog());
        let report = loader.load_dir(dir)?;
        for pattern in &report.patterns {
            self.gate.check_pattern(pattern);
        }
        let mut patterns = self.patterns.write().expect("pattern lock poisoned");
        for pattern in &report.patterns {
            patterns.insert(pattern.id.clone(), pattern.clone());
        }
        info!(
            target: "daws.runtime",
            loaded = report.patterns.len(),
            failed = report.failures.len(),
            "pattern corpus loaded"
        );
        Ok(report)
    }

    /// A loaded pattern by id.
    #[must_use]
    pub fn pattern(&self, id: &str) -> Option<Pattern> {
        self.patterns
            .read()
            .expect("pattern lock poisoned")
            .get(id)
            .cloned()
    }

    /// Match a user query against pattern triggers (case-insensitive
    /// substring match; hosts with smarter dispatch match upstream and call
    /// [`execute`](Self::execute) with the pattern id).
    #[must_use]
    pub fn match_trigger(&self, query: &str) -> Option<Pattern> {
        let query = query.to_lowercase();
        let patterns = self.patterns.read().expect("pattern lock poisoned");
        patterns
            .values()
            .find(|p| {
                p.triggers
                    .iter()
                    .any(|t| query.contains(&t.trim().to_lowercase()))
            })
            .cloned()
    }

    /// Execute a loaded pattern by id.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::PatternNotFound`] for unknown ids; execution failures
    /// surface as the structured envelope inside `Ok`'s error side — see
    /// [`PatternExecutor::execute`].
    pub async fn execute(
        &self,
        pattern_id: &str,
        ctx: &ExecutionContext,
    ) -> Result<Result<Envelope, ErrorEnvelope>, RuntimeError> {
        let pattern = self
            .pattern(pattern_id)
            .ok_or_else(|| RuntimeError::PatternNotFound(pattern_id.to_string()))?;
        Ok(self.executor.execute(&pattern, ctx).await)
    }

    /// Execute an ad-hoc pattern value (tests, previews).
    pub async fn execute_pattern(
        &self,
        pattern: &Pattern,
        ctx: &ExecutionContext,
    ) -> Result<Envelope, ErrorEnvelope> {
        self.executor.execute(pattern, ctx).await
    }

    /// The executor, for cancellable execution.
    #[must_use]
    pub fn executor(&self) -> &PatternExecutor {
        &self.executor
    }

    /// The shared registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// The compliance gate.
    #[must_use]
    pub fn gate(&self) -> &Arc<ComplianceGate> {
        &self.gate
    }

    /// The telemetry sink.
    #[must_use]
    pub fn telemetry(&self) -> &Arc<TelemetrySink> {
        &self.telemetry
    }

    /// The fingerprint cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<FingerprintCache> {
        &self.cache
    }

    /// Roll the active pricing pack: every cache entry keyed to another pack
    /// is invalidated.
    pub fn rollover_pricing_pack(&self, active_pack: &str) {
        self.cache.rollover(active_pack);
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("registry", &self.registry)
            .field(
                "patterns",
                &self.patterns.read().expect("pattern lock poisoned").len(),
            )
            .finish()
    }
}

/// Builder wiring agents, services, and configuration into a [`Runtime`].
#[derive(Default)]
pub struct RuntimeBuilder {
    agents: Vec<(Arc<dyn Agent>, Option<u32>)>,
    services: Option<Services>,
    strict: Option<bool>,
    telemetry_log: Option<PathBuf>,
    executor_config: Option<ExecutorConfig>,
}

impl RuntimeBuilder {
    /// Register an agent at default priority (capability names must be new).
    #[must_use]
    pub fn agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agents.push((agent, None));
        self
    }

    /// Register an agent allowing priority-ordered multi-binding.
    #[must_use]
    pub fn agent_with_priority(mut self, agent: Arc<dyn Agent>, priority: u32) -> Self {
        self.agents.push((agent, Some(priority)));
        self
    }

    /// Supply the service bundle shared with built-in actions.
    #[must_use]
    pub fn services(mut self, services: Services) -> Self {
        self.services = Some(services);
        self
    }

    /// Force strict mode on or off (default: the `STRICT_MODE` env var).
    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = Some(strict);
        self
    }

    /// Append telemetry records to a JSONL file.
    #[must_use]
    pub fn telemetry_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.telemetry_log = Some(path.into());
        self
    }

    /// Override the executor configuration.
    #[must_use]
    pub fn executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor_config = Some(config);
        self
    }

    /// Wire everything together.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Registry`] on duplicate agents/capabilities, or
    /// [`RuntimeError::TelemetryLog`] when the log file cannot be opened.
    pub fn build(self) -> Result<Runtime, RuntimeError> {
        let services = self.services.unwrap_or_else(|| Services::builder().build());
        let cache = Arc::clone(&services.cache);

        let mut registry = CapabilityRegistry::new();
        for (agent, priority) in self.agents {
            match priority {
                Some(p) => registry.register_with_priority(agent, p)?,
                None => registry.register(agent)?,
            }
        }
        let registry = Arc::new(registry);

        let strict = self
            .strict
            .unwrap_or_else(daws_compliance::strict_mode_from_env);
        let gate = Arc::new(ComplianceGate::new(strict).with_catalog(registry.catalog()));

        let telemetry = Arc::new(match &self.telemetry_log {
            Some(path) => TelemetrySink::with_log_file(path)?,
            None => TelemetrySink::new(),
        });

        let invoker = Arc::new(AgentInvoker::new(
            Arc::clone(&registry),
            Arc::clone(&gate),
            Arc::clone(&telemetry),
        ));

        let executor = PatternExecutor::new(
            Arc::clone(&registry),
            invoker,
            Arc::clone(&gate),
            Arc::clone(&cache),
            services,
        )
        .with_config(self.executor_config.unwrap_or_default());

        Ok(Runtime {
            registry,
            gate,
            cache,
            telemetry,
            executor,
            patterns: RwLock::new(BTreeMap::new()),
        })
    }
}
