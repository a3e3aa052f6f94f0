// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-request execution context.

use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Mutable per-request state threaded through every step of a pattern.
///
/// The context doubles as the substitution environment for `{var}` templates:
/// its named fields and the free-form `vars` mapping resolve first, then the
/// executor's step outputs.
///
/// Contexts exist only for the duration of one request. Within one pattern
/// execution every step sees the same `pricing_pack_id`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionContext {
    /// Unique request identifier, stamped on telemetry records.
    pub request_id: Uuid,

    /// The user's natural-language query, when the request came from one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_input: Option<String>,

    /// Portfolio under analysis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portfolio_id: Option<String>,

    /// As-of date for the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_of_date: Option<NaiveDate>,

    /// Pricing pack every market-data step must price against.
    pub pricing_pack_id: String,

    /// Commit hash of the ledger snapshot, when positions come from one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_commit_hash: Option<String>,

    /// Additional substitution variables (e.g. `SYMBOL`).
    #[serde(default)]
    pub vars: BTreeMap<String, serde_json::Value>,
}

impl ExecutionContext {
    /// Create a context bound to a pricing pack, with a fresh request id.
    #[must_use]
    pub fn new(pricing_pack_id: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            user_input: None,
            portfolio_id: None,
            as_of_date: None,
            pricing_pack_id: pricing_pack_id.into(),
            ledger_commit_hash: None,
            vars: BTreeMap::new(),
        }
    }

    /// Set the user input.
    #[must_use]
    pub fn user_input(mut self, input: impl Into<String>) -> Self {
        self.user_input = Some(input.into());
        self
    }

    /// Set the portfolio id.
    #[must_use]
    pub fn portfolio(mut self, id: impl Into<String>) -> Self {
        self.portfolio_id = Some(id.into());
        self
    }

    /// Set the as-of date.
    #[must_use]
    pub fn as_of(mut self, date: NaiveDate) -> Self {
        self.as_of_date = Some(date);
        self
    }

    /// Set the ledger commit hash.
    #[must_use]
    pub fn ledger_commit(mut self, hash: impl Into<String>) -> Self {
        self.ledger_commit_hash = Some(hash.into());
        self
    }

    /// Add a free-form substitution variable.
    #[must_use]
    pub fn var(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.vars.insert(key.into(), value);
        self
    }

    /// Resolve a substitution key against the context's fields and `vars`.
    ///
    /// Named fields win over `vars` entries of the same name.
    #[must_use]
    pub fn substitution_value(&self, key: &str) -> Option<serde_json::Value> {
        match key {
            "user_input" => self.user_input.clone().map(serde_json::Value::String),
            "portfolio_id" => self.portfolio_id.clone().map(serde_json::Value::String),
            "as_of_date" => self
                .as_of_date
                .map(|d| serde_json::Value::String(d.to_string())),
            "pricing_pack_id" => Some(serde_json::Value::String(self.pricing_pack_id.clone())),
            "ledger_commit_hash" => self
                .ledger_commit_hash
                .clone()
                .map(serde_json::Value::String),
            other => self.vars.get(other).cloned(),
        }
    }
}
