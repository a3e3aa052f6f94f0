// SPDX-License-Identifier: MIT OR Apache-2.0
//! Built-in step handlers.
//!
//! Non-registry actions (`evaluate`, `normalize_response`, `knowledge_lookup`,
//! `add_position`, `synthesize`) run inside the executor through a
//! [`StepHandler`] trait object. Handlers never reach agents; anything that
//! needs market data goes through a registry action instead.

use async_trait::async_trait;
use chrono::Utc;
use daws_core::{
    DEFAULT_TTL_SECONDS, Envelope, ErrorEnvelope, ErrorKind, ExecutionContext,
    ImplementationStatus, Provenance,
};
use daws_agent::Services;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use daws_pattern::StepAction;

/// A built-in action executed by the executor itself.
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Action name this handler serves.
    fn name(&self) -> &str;

    /// Run the action against resolved params and prior outputs.
    async fn run(
        &self,
        params: &serde_json::Map<String, Value>,
        ctx: &ExecutionContext,
        outputs: &BTreeMap<String, Value>,
    ) -> Result<Envelope, ErrorEnvelope>;
}

/// The executor's handler table.
pub struct ActionSet {
    handlers: HashMap<String, Box<dyn StepHandler>>,
}

impl ActionSet {
    /// The default built-ins, bound to the given service bundle.
    #[must_use]
    pub fn defaults(services: Services) -> Self {
        let mut set = Self {
            handlers: HashMap::new(),
        };
        set.register(EvaluateHandler);
        set.register(NormalizeResponseHandler);
        set.register(KnowledgeLookupHandler { services });
        set.register(AddPositionHandler);
        set.register(SynthesizeHandler);
        set
    }

    /// Add or replace a handler.
    pub fn register<H: StepHandler + 'static>(&mut self, handler: H) {
        self.handlers
            .insert(handler.name().to_string(), Box::new(handler));
    }

    /// Look up the handler for an action, if it is a built-in.
    #[must_use]
    pub fn get(&self, action: &StepAction) -> Option<&dyn StepHandler> {
        self.handlers.get(action.as_str()).map(Box::as_ref)
    }
}

impl std::fmt::Debug for ActionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("ActionSet").field("handlers", &names).finish()
    }
}

fn wrap(action: &str, ctx: &ExecutionContext, payload: Value) -> Envelope {
    Envelope::wrap(
        payload,
        Provenance {
            source: format!("executor:{action}"),
            as_of: ctx.as_of_date,
            ttl_seconds: DEFAULT_TTL_SECONDS,
            pricing_pack_id: ctx.pricing_pack_id.clone(),
            computed_at: Utc::now(),
            confidence: None,
            status: ImplementationStatus::Real,
            stale: false,
        },
    )
}

fn str_param<'a>(params: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

// ---------------------------------------------------------------------------
// evaluate
// ---------------------------------------------------------------------------

/// Scores a checklist of business criteria (moats, network effects, ...).
///
/// Scoring starts from a base of 7, adds a per-criterion weight for each
/// check present, and caps at 10.
struct EvaluateHandler;

const BASE_SCORE: f64 = 7.0;
const MAX_SCORE: f64 = 10.0;

fn criterion_weights(eval_type: &str) -> Option<&'static [(&'static str, f64)]> {
    match eval_type {
        "brand_moat" => Some(&[
            ("premium_pricing_ability", 1.0),
            ("customer_loyalty", 0.5),
            ("mind_share_leadership", 1.5),
        ]),
        "network_effects" => Some(&[
            ("value_increases_with_users", 2.0),
            ("high_switching_costs", 1.0),
            ("winner_take_all_dynamics", 1.0),
        ]),
        "cost_advantages" => Some(&[
            ("lowest_cost_producer", 1.5),
            ("economies_of_scale", 1.0),
            ("unique_assets", 1.5),
        ]),
        "switching_costs" => Some(&[
            ("painful_to_switch", 2.0),
            ("embedded_in_operations", 1.0),
            ("long_term_contracts", 1.0),
        ]),
        _ => None,
    }
}

#[async_trait]
impl StepHandler for EvaluateHandler {
    fn name(&self) -> &str {
        "evaluate"
    }

    async fn run(
        &self,
        params: &serde_json::Map<String, Value>,
        ctx: &ExecutionContext,
        _outputs: &BTreeMap<String, Value>,
    ) -> Result<Envelope, ErrorEnvelope> {
        let Some(eval_type) = str_param(params, "type").filter(|t| !t.is_empty()) else {
            return Ok(wrap(
                self.name(),
                ctx,
                json!({
                    "score": 0,
                    "type": "unknown",
                    "checks_passed": 0,
                    "total_checks": 0,
                    "error": "evaluation type required"
                }),
            ));
        };

        let checks: Vec<&str> = params
            .get("checks")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut score = BASE_SCORE;
        let mut checks_passed = 0u64;
        if let Some(weights) = criterion_weights(eval_type) {
            for (criterion, weight) in weights {
                if checks.contains(criterion) {
                    score += weight;
                    checks_passed += 1;
                }
            }
        } else {
            debug!(target: "daws.actions", eval_type, "unknown evaluation type");
        }
        score = score.min(MAX_SCORE);

        Ok(wrap(
            self.name(),
            ctx,
            json!({
                "score": score,
                "type": eval_type,
                "checks_passed": checks_passed,
                "total_checks": checks.len()
            }),
        ))
    }
}

// ---------------------------------------------------------------------------
// normalize_response
// ---------------------------------------------------------------------------

/// Coerces a prior output into the standard `{response, data}` shape.
struct NormalizeResponseHandler;

#[async_trait]
impl StepHandler for NormalizeResponseHandler {
    fn name(&self) -> &str {
        "normalize_response"
    }

    async fn run(
        &self,
        params: &serde_json::Map<String, Value>,
        ctx: &ExecutionContext,
        outputs: &BTreeMap<String, Value>,
    ) -> Result<Envelope, ErrorEnvelope> {
        let key = str_param(params, "response_key").unwrap_or("agent_response");
        let normalized = match outputs.get(key) {
            None | Some(Value::Null) => json!({
                "response": "No response available",
                "data": Value::Null
            }),
            Some(Value::String(s)) => json!({"response": s, "data": s}),
            Some(Value::Object(map)) => {
                let mut out = map.clone();
                if !out.contains_key("response") {
                    let text = out
                        .get("data")
                        .or_else(|| out.get("result"))
                        .map_or_else(|| "Operation completed".to_string(), summarize);
                    out.insert("response".into(), Value::String(text));
                }
                Value::Object(out)
            }
            Some(other) => json!({"response": summarize(other), "data": other}),
        };
        Ok(wrap(self.name(), ctx, normalized))
    }
}

fn summarize(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// knowledge_lookup
// ---------------------------------------------------------------------------

/// Reads a document from the knowledge store. A missing key is a stub
/// result, not a failure: downstream steps see the marker and may
/// short-circuit, and the cache retries it on a short TTL.
struct KnowledgeLookupHandler {
    services: Services,
}

#[async_trait]
impl StepHandler for KnowledgeLookupHandler {
    fn name(&self) -> &str {
        "knowledge_lookup"
    }

    async fn run(
        &self,
        params: &serde_json::Map<String, Value>,
        ctx: &ExecutionContext,
        _outputs: &BTreeMap<String, Value>,
    ) -> Result<Envelope, ErrorEnvelope> {
        let Some(key) = str_param(params, "key") else {
            return Err(ErrorEnvelope::new(
                ErrorKind::CapabilityError,
                "knowledge_lookup requires a 'key' parameter",
            ));
        };
        match self.services.knowledge.get(key) {
            Some(doc) => {
                let mut envelope = wrap(self.name(), ctx, doc);
                envelope.meta.source = format!("knowledge:{key}");
                Ok(envelope)
            }
            None => {
                let absent = ErrorEnvelope::new(
                    ErrorKind::DataAbsent,
                    format!("no knowledge document under '{key}'"),
                );
                Ok(Envelope::from_error(&absent, &ctx.pricing_pack_id))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// add_position
// ---------------------------------------------------------------------------

/// Builds a position record with a confirmation line. Persistence is the
/// owning agent's concern; this handler only shapes the record.
struct AddPositionHandler;

#[async_trait]
impl StepHandler for AddPositionHandler {
    fn name(&self) -> &str {
        "add_position"
    }

    async fn run(
        &self,
        params: &serde_json::Map<String, Value>,
        ctx: &ExecutionContext,
        _outputs: &BTreeMap<String, Value>,
    ) -> Result<Envelope, ErrorEnvelope> {
        let symbol = str_param(params, "symbol")
            .map(str::to_string)
            .or_else(|| {
                ctx.substitution_value("SYMBOL")
                    .and_then(|v| v.as_str().map(str::to_string))
            });
        let Some(symbol) = symbol.filter(|s| !s.is_empty()) else {
            return Err(ErrorEnvelope::new(
                ErrorKind::CapabilityError,
                "add_position requires a 'symbol' parameter",
            ));
        };

        let quantity = params.get("quantity").and_then(Value::as_i64).unwrap_or(100);
        let action_type = str_param(params, "action_type").unwrap_or("buy");
        let portfolio = str_param(params, "portfolio")
            .map(str::to_string)
            .or_else(|| ctx.portfolio_id.clone())
            .unwrap_or_else(|| "default".to_string());

        Ok(wrap(
            self.name(),
            ctx,
            json!({
                "status": "position_added",
                "symbol": symbol,
                "quantity": quantity,
                "action": action_type,
                "portfolio": portfolio,
                "timestamp": Utc::now().to_rfc3339(),
                "confirmation":
                    format!("Added {quantity} shares of {symbol} to {portfolio} portfolio")
            }),
        ))
    }
}

// ---------------------------------------------------------------------------
// synthesize
// ---------------------------------------------------------------------------

/// Merges named prior outputs into one object with a combined summary.
struct SynthesizeHandler;

#[async_trait]
impl StepHandler for SynthesizeHandler {
    fn name(&self) -> &str {
        "synthesize"
    }

    async fn run(
        &self,
        params: &serde_json::Map<String, Value>,
        ctx: &ExecutionContext,
        outputs: &BTreeMap<String, Value>,
    ) -> Result<Envelope, ErrorEnvelope> {
        let names: Vec<String> = params
            .get("inputs")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_else(|| outputs.keys().cloned().collect());

        let mut sections = serde_json::Map::new();
        let mut missing = Vec::new();
        for name in &names {
            match outputs.get(name) {
                Some(value) => {
                    sections.insert(name.clone(), value.clone());
                }
                None => missing.push(name.clone()),
            }
        }
        if let Some(first_missing) = missing.first() {
            return Err(ErrorEnvelope::new(
                ErrorKind::UnresolvedReference,
                format!("synthesize input '{first_missing}' was never produced"),
            ));
        }

        let summary = format!(
            "Synthesized {} result{}: {}",
            sections.len(),
            if sections.len() == 1 { "" } else { "s" },
            names.join(", ")
        );
        Ok(wrap(
            self.name(),
            ctx,
            json!({"summary": summary, "sections": Value::Object(sections)}),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("PP_2025-10-21").var("SYMBOL", json!("AAPL"))
    }

    fn params(v: Value) -> serde_json::Map<String, Value> {
        v.as_object().cloned().expect("object literal")
    }

    #[tokio::test]
    async fn evaluate_scores_known_checklists() {
        let set = ActionSet::defaults(Services::builder().build());
        let handler = set.get(&StepAction::Evaluate).unwrap();
        let env = handler
            .run(
                &params(json!({
                    "type": "network_effects",
                    "checks": ["value_increases_with_users", "high_switching_costs"]
                })),
                &ctx(),
                &BTreeMap::new(),
            )
            .await
            .unwrap();
        assert_eq!(env.payload["score"], json!(10.0));
        assert_eq!(env.payload["checks_passed"], json!(2));
        assert_eq!(env.payload["total_checks"], json!(2));
    }

    #[tokio::test]
    async fn evaluate_caps_at_ten() {
        let set = ActionSet::defaults(Services::builder().build());
        let handler = set.get(&StepAction::Evaluate).unwrap();
        let env = handler
            .run(
                &params(json!({
                    "type": "brand_moat",
                    "checks": [
                        "premium_pricing_ability",
                        "customer_loyalty",
                        "mind_share_leadership"
                    ]
                })),
                &ctx(),
                &BTreeMap::new(),
            )
            .await
            .unwrap();
        assert_eq!(env.payload["score"], json!(10.0));
    }

    #[tokio::test]
    async fn normalize_wraps_bare_strings() {
        let set = ActionSet::defaults(Services::builder().build());
        let handler = set.get(&StepAction::NormalizeResponse).unwrap();
        let mut outputs = BTreeMap::new();
        outputs.insert("agent_response".to_string(), json!("all good"));
        let env = handler
            .run(&params(json!({})), &ctx(), &outputs)
            .await
            .unwrap();
        assert_eq!(env.payload, json!({"response": "all good", "data": "all good"}));
    }

    #[tokio::test]
    async fn knowledge_lookup_miss_is_a_stub_not_an_error() {
        let set = ActionSet::defaults(Services::builder().build());
        let handler = set.get(&StepAction::KnowledgeLookup).unwrap();
        let env = handler
            .run(&params(json!({"key": "sector_map"})), &ctx(), &BTreeMap::new())
            .await
            .unwrap();
        assert!(env.is_stub());
        assert_eq!(env.payload["kind"], json!("data_absent"));
    }

    #[tokio::test]
    async fn add_position_falls_back_to_context_symbol() {
        let set = ActionSet::defaults(Services::builder().build());
        let handler = set.get(&StepAction::AddPosition).unwrap();
        let env = handler
            .run(&params(json!({"quantity": 25})), &ctx(), &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(env.payload["symbol"], json!("AAPL"));
        assert_eq!(env.payload["quantity"], json!(25));
        assert_eq!(env.payload["status"], json!("position_added"));
    }

    #[tokio::test]
    async fn synthesize_rejects_missing_inputs() {
        let set = ActionSet::defaults(Services::builder().build());
        let handler = set.get(&StepAction::Synthesize).unwrap();
        let err = handler
            .run(
                &params(json!({"inputs": ["never_ran"]})),
                &ctx(),
                &BTreeMap::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnresolvedReference);
    }
}
