// SPDX-License-Identifier: MIT OR Apache-2.0
//! The capability registry.
//!
//! The registry is the single source of truth for method resolution: it maps
//! capability names to `(agent, contract)` bindings, optionally several per
//! name in priority order. It is built at startup and immutable afterwards;
//! readers share it through an `Arc` and never block.

use daws_agent::Agent;
use daws_core::{CapabilityContract, ContractCatalog};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Errors from registry construction and lookup.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The capability name is already bound and the caller did not opt into
    /// priority-ordered multi-binding.
    #[error("capability '{0}' is already bound; use register_with_priority to multi-bind")]
    DuplicateCapability(String),

    /// An agent with this name is already registered.
    #[error("agent '{0}' is already registered")]
    DuplicateAgent(String),

    /// No binding exists for the requested capability name.
    #[error("capability '{0}' not found in registry")]
    CapabilityNotFound(String),
}

/// One `(agent, contract)` binding for a capability name.
///
/// The agent handle is deliberately crate-private: the only path from a
/// binding to an agent method is the adapter, which makes registry bypass a
/// compile-time impossibility rather than a convention.
pub struct Binding {
    pub(crate) agent: Arc<dyn Agent>,
    contract: CapabilityContract,
    priority: u32,
}

impl Binding {
    /// The bound contract.
    #[must_use]
    pub fn contract(&self) -> &CapabilityContract {
        &self.contract
    }

    /// Name of the agent serving this binding.
    #[must_use]
    pub fn agent_name(&self) -> &str {
        self.agent.name()
    }

    /// Declared priority (higher wins).
    #[must_use]
    pub fn priority(&self) -> u32 {
        self.priority
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("capability", &self.contract.name)
            .field("agent", &self.agent.name())
            .field("priority", &self.priority)
            .finish()
    }
}

/// Typed directory of capability bindings.
#[derive(Default)]
pub struct CapabilityRegistry {
    agents: BTreeSet<String>,
    bindings: HashMap<String, Vec<Binding>>,
}

impl CapabilityRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent, binding every declared capability at priority 0.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateAgent`] when the agent name is taken, or
    /// [`RegistryError::DuplicateCapability`] when any capability name is
    /// already bound.
    pub fn register(&mut self, agent: Arc<dyn Agent>) -> Result<(), RegistryError> {
        for contract in agent.capabilities() {
            if self.bindings.contains_key(&contract.name) {
                return Err(RegistryError::DuplicateCapability(contract.name));
            }
        }
        self.bind(agent, 0)
    }

    /// Register an agent whose capabilities may share names with existing
    /// bindings; entries for one name are kept in descending priority order.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateAgent`] when the agent name is taken.
    pub fn register_with_priority(
        &mut self,
        agent: Arc<dyn Agent>,
        priority: u32,
    ) -> Result<(), RegistryError> {
        self.bind(agent, priority)
    }

    fn bind(&mut self, agent: Arc<dyn Agent>, priority: u32) -> Result<(), RegistryError> {
        let name = agent.name().to_string();
        if !self.agents.insert(name.clone()) {
            return Err(RegistryError::DuplicateAgent(name));
        }
        for contract in agent.capabilities() {
            debug!(
                target: "daws.registry",
                capability = %contract.name,
                agent = %name,
                priority,
                "bound"
            );
            let entry = Binding {
                agent: Arc::clone(&agent),
                contract,
                priority,
            };
            let slot = self.bindings.entry(entry.contract.name.clone()).or_default();
            slot.push(entry);
            slot.sort_by(|a, b| b.priority.cmp(&a.priority));
        }
        Ok(())
    }

    /// Resolve a capability name to its highest-priority binding.
    ///
    /// # Errors
    ///
    /// [`RegistryError::CapabilityNotFound`] when no binding exists.
    pub fn lookup(&self, capability: &str) -> Result<&Binding, RegistryError> {
        self.bindings
            .get(capability)
            .and_then(|v| v.first())
            .ok_or_else(|| RegistryError::CapabilityNotFound(capability.to_string()))
    }

    /// All bindings whose contract carries `tag`, in descending priority.
    ///
    /// An empty result is not an error; the caller decides how to degrade.
    #[must_use]
    pub fn lookup_by_tag(&self, tag: &str) -> Vec<&Binding> {
        let mut found: Vec<&Binding> = self
            .bindings
            .values()
            .flatten()
            .filter(|b| b.contract.has_tag(tag))
            .collect();
        found.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.contract.name.cmp(&b.contract.name))
        });
        found
    }

    /// Every bound contract, for introspection and compliance reports.
    #[must_use]
    pub fn contracts(&self) -> Vec<&CapabilityContract> {
        self.bindings.values().flatten().map(Binding::contract).collect()
    }

    /// Read-only catalog view for the loader and the gate.
    #[must_use]
    pub fn catalog(&self) -> ContractCatalog {
        let mut catalog = ContractCatalog {
            agents: self.agents.clone(),
            ..ContractCatalog::default()
        };
        for bindings in self.bindings.values() {
            if let Some(first) = bindings.first() {
                catalog
                    .contracts
                    .insert(first.contract.name.clone(), first.contract.clone());
            }
        }
        catalog
    }

    /// Registered agent names, sorted.
    #[must_use]
    pub fn agent_names(&self) -> Vec<&str> {
        self.agents.iter().map(String::as_str).collect()
    }

    /// Number of distinct capability names bound.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// `true` when nothing is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("agents", &self.agents)
            .field("capabilities", &self.bindings.len())
            .finish()
    }
}
