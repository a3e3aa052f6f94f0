// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pattern and step model.

use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// What a step does.
///
/// Registry actions route through the capability registry; the remaining
/// variants are built-in handlers owned by the executor. Unknown action
/// strings are preserved as [`StepAction::Legacy`] so the compliance gate can
/// flag them instead of the parser rejecting the whole file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// Invoke a named capability through the registry.
    ExecuteThroughRegistry,
    /// Invoke by capability tag, with priority-ordered fallback.
    ExecuteByCapability,
    /// Read a document from the knowledge store.
    KnowledgeLookup,
    /// Score a checklist of criteria.
    Evaluate,
    /// Coerce a prior output into the standard `{response, data}` shape.
    NormalizeResponse,
    /// Record a portfolio position.
    AddPosition,
    /// Merge named prior outputs into one result.
    Synthesize,
    /// Unrecognized action string, kept verbatim for the compliance gate.
    Legacy(String),
}

impl StepAction {
    /// Parse from the wire spelling.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "execute_through_registry" => Self::ExecuteThroughRegistry,
            "execute_by_capability" => Self::ExecuteByCapability,
            "knowledge_lookup" => Self::KnowledgeLookup,
            "evaluate" => Self::Evaluate,
            "normalize_response" => Self::NormalizeResponse,
            "add_position" => Self::AddPosition,
            "synthesize" => Self::Synthesize,
            other => Self::Legacy(other.to_string()),
        }
    }

    /// The wire spelling.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::ExecuteThroughRegistry => "execute_through_registry",
            Self::ExecuteByCapability => "execute_by_capability",
            Self::KnowledgeLookup => "knowledge_lookup",
            Self::Evaluate => "evaluate",
            Self::NormalizeResponse => "normalize_response",
            Self::AddPosition => "add_position",
            Self::Synthesize => "synthesize",
            Self::Legacy(s) => s,
        }
    }

    /// `true` for the two actions that route through the registry.
    #[must_use]
    pub fn is_registry_action(&self) -> bool {
        matches!(self, Self::ExecuteThroughRegistry | Self::ExecuteByCapability)
    }
}

impl fmt::Display for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for StepAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StepAction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.trim().is_empty() {
            return Err(D::Error::custom("step action must not be empty"));
        }
        Ok(Self::parse(&s))
    }
}

impl JsonSchema for StepAction {
    fn schema_name() -> std::borrow::Cow<'static, str> {
        "StepAction".into()
    }

    fn json_schema(generator: &mut schemars::SchemaGenerator) -> schemars::Schema {
        String::json_schema(generator)
    }
}

/// One step of a pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Step {
    /// Step name, unique within the pattern. Results bind under this name
    /// and under each entry of `outputs`.
    pub name: String,

    /// What the step does.
    pub action: StepAction,

    /// Capability name, for `execute_through_registry`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,

    /// Capability tag, for `execute_by_capability` fallback routing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_tag: Option<String>,

    /// Agent hint. Only legal on registry actions; the compliance gate
    /// rejects anything else.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,

    /// Parameter templates (`{user_input}`, `{SYMBOL}`, `{step.field}`).
    /// `parameters` is accepted as a deprecated alias; a step carrying both
    /// spellings fails to parse.
    #[serde(default, alias = "parameters")]
    pub params: serde_json::Map<String, serde_json::Value>,

    /// Extra names to bind the result under.
    #[serde(default)]
    pub outputs: Vec<String>,

    /// Whether a failure of this step aborts the pattern. Defaults to true.
    #[serde(default = "default_required")]
    pub required: bool,

    /// Step-level timeout override in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_required() -> bool {
    true
}

impl Step {
    /// Names this step's result binds under: its own name plus `outputs`.
    pub fn binding_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.outputs.iter().map(String::as_str))
    }
}

/// A declarative pattern: triggers, ordered steps, optional output template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Pattern {
    /// Unique pattern identifier.
    pub id: String,

    /// Pattern version string. The gate warns when empty.
    #[serde(default)]
    pub version: String,

    /// Date of last edit. The gate warns when missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<NaiveDate>,

    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Grouping category.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Natural-language phrases the host matches requests against.
    #[serde(default)]
    pub triggers: Vec<String>,

    /// Ordered steps.
    #[serde(default)]
    pub steps: Vec<Step>,

    /// Output-formatting template rendered against step outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

impl Pattern {
    /// Look up a step by name.
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }
}
