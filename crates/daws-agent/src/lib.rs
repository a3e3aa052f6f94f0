// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! daws-agent
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Provider handles: rate limiting, circuit breaking, dead letters.
pub mod provider;
/// The service bundle injected into every agent at construction.
pub mod services;

use async_trait::async_trait;
use daws_core::{CapabilityContract, ExecutionContext, Provenance};

pub use provider::{CircuitState, DeadLetter, ProviderError, ProviderHandle, ProviderLimits};
pub use services::{Database, DbError, KnowledgeStore, Services, ServicesBuilder};

/// A value returned from a capability method, with optional provenance.
///
/// Agents may omit provenance fields entirely; the runtime's adapter fills
/// defaults (current time, the contract's TTL, the pricing pack from the
/// execution context) before anything downstream sees the result.
#[derive(Debug, Clone)]
pub struct AgentResult {
    /// The capability's result value.
    pub payload: serde_json::Value,
    /// Provenance, when the agent stamps its own.
    pub meta: Option<Provenance>,
}

impl AgentResult {
    /// A result without provenance; the adapter fills defaults.
    #[must_use]
    pub fn bare(payload: serde_json::Value) -> Self {
        Self {
            payload,
            meta: None,
        }
    }

    /// A result with producer-stamped provenance.
    #[must_use]
    pub fn with_meta(payload: serde_json::Value, meta: Provenance) -> Self {
        Self {
            payload,
            meta: Some(meta),
        }
    }
}

/// Failures an agent method can surface.
///
/// These stay inside the agent boundary: the adapter rewrites them into
/// structured error envelopes before the executor sees them.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The agent does not implement the requested capability.
    #[error("unknown capability '{0}'")]
    UnknownCapability(String),

    /// A required parameter was missing or of the wrong shape.
    #[error("missing or invalid parameter '{0}'")]
    BadParameter(String),

    /// An upstream provider call failed.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// A database call failed.
    #[error("database error: {0}")]
    Database(#[from] DbError),

    /// Any other capability-level failure.
    #[error("{0}")]
    Failed(String),
}

/// A collection of capability methods bound to a service bundle.
///
/// Agents declare their contracts once; the registry binds each contract name
/// to this agent and all invocation flows through the single `invoke`
/// dispatch. Method resolution by name happens here, not in the caller.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable agent name (e.g. `"financial_analyst"`).
    fn name(&self) -> &str;

    /// The capability contracts this agent exposes. Every declared contract
    /// must be servable by [`invoke`](Agent::invoke).
    fn capabilities(&self) -> Vec<CapabilityContract>;

    /// Execute one capability against the given context and resolved params.
    async fn invoke(
        &self,
        capability: &str,
        ctx: &ExecutionContext,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<AgentResult, AgentError>;
}
