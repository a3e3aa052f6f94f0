// SPDX-License-Identifier: MIT OR Apache-2.0
//! Capability contract declarations.
//!
//! A contract is the declarative half of a capability: its dotted name, field
//! types, implementation status, dependencies, and routing tags. Agents
//! declare contracts at registration; the loader and the compliance gate
//! validate patterns against the resulting catalog.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::envelope::ImplementationStatus;
use crate::DEFAULT_TTL_SECONDS;

/// Semantic field types used in contract input/output declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Opaque identifier (portfolio id, symbol, pack id).
    Identifier,
    /// Calendar date.
    Date,
    /// Fixed-point numeric value.
    Decimal,
    /// Whole number.
    Integer,
    /// Free-form text.
    Text,
    /// One of a closed set of values.
    Enum,
    /// Key-value mapping.
    Mapping,
    /// Ordered sequence of values.
    Sequence,
    /// Boolean flag.
    Flag,
}

/// Declarative contract for a single capability.
///
/// ```
/// use daws_core::{CapabilityContract, FieldType};
///
/// let contract = CapabilityContract::new("metrics.compute_twr")
///     .input("portfolio_id", FieldType::Identifier)
///     .input("asof_date", FieldType::Date)
///     .output("twr_ytd", FieldType::Decimal)
///     .tag("can_compute_returns")
///     .describe("Time-weighted return from the metrics database");
///
/// assert_eq!(contract.name, "metrics.compute_twr");
/// assert!(contract.tags.contains(&"can_compute_returns".to_string()));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CapabilityContract {
    /// Dotted capability name, unique across the registry.
    pub name: String,

    /// Named input fields and their semantic types.
    #[serde(default)]
    pub inputs: BTreeMap<String, FieldType>,

    /// Named output fields and their semantic types.
    #[serde(default)]
    pub outputs: BTreeMap<String, FieldType>,

    /// Whether the capability acquires holdings internally rather than
    /// expecting them from a prior step.
    #[serde(default)]
    pub fetches_positions: bool,

    /// Completeness of the implementation behind this contract.
    #[serde(default)]
    pub implementation_status: ImplementationStatus,

    /// Names of capabilities this one depends on.
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Semantic grouping tags used for fallback routing
    /// (e.g. `can_calculate_dcf`).
    #[serde(default)]
    pub tags: Vec<String>,

    /// Free-form description.
    #[serde(default)]
    pub description: String,

    /// Per-capability timeout override in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Default TTL stamped on results when the agent omits one.
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
}

fn default_ttl() -> u64 {
    DEFAULT_TTL_SECONDS
}

impl CapabilityContract {
    /// Create a contract with the given name and `Real` status.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            fetches_positions: false,
            implementation_status: ImplementationStatus::Real,
            dependencies: Vec::new(),
            tags: Vec::new(),
            description: String::new(),
            timeout_secs: None,
            ttl_seconds: DEFAULT_TTL_SECONDS,
        }
    }

    /// Declare an input field.
    #[must_use]
    pub fn input(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.inputs.insert(name.into(), ty);
        self
    }

    /// Declare an output field.
    #[must_use]
    pub fn output(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.outputs.insert(name.into(), ty);
        self
    }

    /// Mark the capability as fetching positions internally.
    #[must_use]
    pub fn fetches_positions(mut self) -> Self {
        self.fetches_positions = true;
        self
    }

    /// Set the implementation status.
    #[must_use]
    pub fn status(mut self, status: ImplementationStatus) -> Self {
        self.implementation_status = status;
        self
    }

    /// Shorthand for `status(ImplementationStatus::Stub)`.
    #[must_use]
    pub fn stub(self) -> Self {
        self.status(ImplementationStatus::Stub)
    }

    /// Add a dependency on another capability.
    #[must_use]
    pub fn dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }

    /// Add a routing tag.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Set the description.
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Override the per-invocation timeout.
    #[must_use]
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Override the default result TTL.
    #[must_use]
    pub fn ttl_seconds(mut self, secs: u64) -> Self {
        self.ttl_seconds = secs;
        self
    }

    /// `true` when the contract carries the given routing tag.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Read-only view of the registry used by the loader and the gate.
///
/// Holds the registered agent names and, per capability name, the
/// highest-priority contract.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ContractCatalog {
    /// Names of all registered agents.
    pub agents: BTreeSet<String>,
    /// Highest-priority contract per capability name.
    pub contracts: BTreeMap<String, CapabilityContract>,
}

impl ContractCatalog {
    /// `true` when an agent with this name is registered.
    #[must_use]
    pub fn has_agent(&self, name: &str) -> bool {
        self.agents.contains(name)
    }

    /// `true` when a capability with this name is registered.
    #[must_use]
    pub fn has_capability(&self, name: &str) -> bool {
        self.contracts.contains_key(name)
    }

    /// Look up a capability's contract.
    #[must_use]
    pub fn contract(&self, name: &str) -> Option<&CapabilityContract> {
        self.contracts.get(name)
    }

    /// Whether the named capability fetches positions internally.
    /// Unknown capabilities report `false`.
    #[must_use]
    pub fn fetches_positions(&self, name: &str) -> bool {
        self.contracts
            .get(name)
            .is_some_and(|c| c.fetches_positions)
    }
}
