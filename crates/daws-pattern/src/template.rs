// SPDX-License-Identifier: MIT OR Apache-2.0
//! `{var}` substitution.
//!
//! References resolve from the execution context's fields and vars first,
//! then from prior step outputs. A dotted reference `{step.field}` reaches
//! into the named step's payload. A parameter that consists of exactly one
//! reference substitutes the typed value; references embedded in longer
//! strings interpolate as text.

use daws_core::ExecutionContext;
use serde_json::Value;
use std::collections::BTreeMap;

/// A reference that did not resolve.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unresolved reference '{{{reference}}}'")]
pub struct ResolveError {
    /// The reference text, without braces.
    pub reference: String,
}

/// Extract the `{...}` references in a string, in order of appearance.
#[must_use]
pub fn references(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = s;
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start + 1..].find('}') else {
            break;
        };
        let inner = &rest[start + 1..start + 1 + len];
        if !inner.is_empty() && !inner.contains('{') {
            out.push(inner.to_string());
        }
        rest = &rest[start + 1 + len + 1..];
    }
    out
}

fn lookup(
    reference: &str,
    ctx: &ExecutionContext,
    outputs: &BTreeMap<String, Value>,
) -> Option<Value> {
    if let Some((step, field)) = reference.split_once('.') {
        let payload = outputs.get(step)?;
        return payload.get(field).cloned();
    }
    ctx.substitution_value(reference)
        .or_else(|| outputs.get(reference).cloned())
}

fn interpolate(
    s: &str,
    ctx: &ExecutionContext,
    outputs: &BTreeMap<String, Value>,
) -> Result<String, ResolveError> {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start + 1..].find('}') else {
            result.push_str(rest);
            return Ok(result);
        };
        let inner = &rest[start + 1..start + 1 + len];
        result.push_str(&rest[..start]);
        if inner.is_empty() || inner.contains('{') {
            // Literal braces, not a reference.
            result.push('{');
            result.push_str(inner);
            result.push('}');
        } else {
            let value = lookup(inner, ctx, outputs).ok_or_else(|| ResolveError {
                reference: inner.to_string(),
            })?;
            result.push_str(&value_to_text(&value));
        }
        rest = &rest[start + 1 + len + 1..];
    }
    result.push_str(rest);
    Ok(result)
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Resolve one template value.
///
/// # Errors
///
/// [`ResolveError`] naming the first reference that does not resolve.
pub fn resolve_value(
    value: &Value,
    ctx: &ExecutionContext,
    outputs: &BTreeMap<String, Value>,
) -> Result<Value, ResolveError> {
    match value {
        Value::String(s) => {
            // A lone reference keeps the substituted value's type.
            let trimmed = s.trim();
            if trimmed.len() > 2 && trimmed.starts_with('{') && trimmed.ends_with('}') {
                let inner = &trimmed[1..trimmed.len() - 1];
                if !inner.contains('{') && !inner.contains('}') {
                    return lookup(inner, ctx, outputs).ok_or_else(|| ResolveError {
                        reference: inner.to_string(),
                    });
                }
            }
            Ok(Value::String(interpolate(s, ctx, outputs)?))
        }
        Value::Array(items) => items
            .iter()
            .map(|v| resolve_value(v, ctx, outputs))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve_value(v, ctx, outputs)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Resolve every value of a step's parameter map.
///
/// # Errors
///
/// [`ResolveError`] naming the first reference that does not resolve.
pub fn resolve_params(
    params: &serde_json::Map<String, Value>,
    ctx: &ExecutionContext,
    outputs: &BTreeMap<String, Value>,
) -> Result<serde_json::Map<String, Value>, ResolveError> {
    let mut out = serde_json::Map::with_capacity(params.len());
    for (k, v) in params {
        out.insert(k.clone(), resolve_value(v, ctx, outputs)?);
    }
    Ok(out)
}

/// Render a pattern's output template against the step outputs.
///
/// # Errors
///
/// [`ResolveError`] naming the first reference that does not resolve.
pub fn render_template(
    template: &str,
    ctx: &ExecutionContext,
    outputs: &BTreeMap<String, Value>,
) -> Result<String, ResolveError> {
    interpolate(template, ctx, outputs)
}
