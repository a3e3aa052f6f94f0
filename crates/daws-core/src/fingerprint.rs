// SPDX-License-Identifier: MIT OR Apache-2.0
//! Deterministic fingerprints over capability inputs.
//!
//! A fingerprint keys the result cache and the single-flight table. It is the
//! SHA-256 of `capability \n canonical(params) \n pricing_pack_id`, where
//! canonicalization sorts mapping keys, renders decimals as fixed-precision
//! strings, and normalizes date-like strings to ISO-8601. Two requests for
//! the same computation against the same pack therefore always collide.

use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::sha256_hex;

/// Decimal places kept when normalizing floating-point params.
const DECIMAL_PRECISION: usize = 10;

/// Date formats accepted in string params and rewritten to ISO-8601.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

/// Cache/single-flight key for one capability computation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of `(capability, params, pricing_pack_id)`.
    #[must_use]
    pub fn compute(
        capability: &str,
        params: &serde_json::Map<String, Value>,
        pricing_pack_id: &str,
    ) -> Self {
        let canonical = canonicalize(&Value::Object(params.clone()));
        let preimage = format!("{capability}\n{canonical}\n{pricing_pack_id}");
        Self(sha256_hex(preimage.as_bytes()))
    }

    /// The hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Render a JSON value in canonical form.
///
/// - object keys are emitted in sorted order;
/// - floats become fixed-precision strings with trailing zeros trimmed;
/// - strings that parse as dates are rewritten to `YYYY-MM-DD`.
#[must_use]
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                out.push_str(&i.to_string());
            } else if let Some(u) = n.as_u64() {
                out.push_str(&u.to_string());
            } else {
                out.push('"');
                out.push_str(&normalize_decimal(n.as_f64().unwrap_or(0.0)));
                out.push('"');
            }
        }
        Value::String(s) => {
            let normalized = normalize_date(s).unwrap_or_else(|| s.clone());
            // serde_json handles the escaping.
            out.push_str(&serde_json::to_string(&normalized).unwrap_or_default());
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
    }
}

/// Fixed-precision rendering with trailing zeros trimmed. `-0` collapses
/// to `0`.
fn normalize_decimal(f: f64) -> String {
    let mut s = format!("{f:.prec$}", prec = DECIMAL_PRECISION);
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
    if s == "-0" { "0".to_string() } else { s }
}

fn normalize_date(s: &str) -> Option<String> {
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d.format("%Y-%m-%d").to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn params(v: Value) -> serde_json::Map<String, Value> {
        v.as_object().cloned().expect("object literal")
    }

    #[test]
    fn key_order_does_not_change_fingerprint() {
        let a = params(json!({"portfolio_id": "P1", "asof_date": "2025-10-21"}));
        let b = params(json!({"asof_date": "2025-10-21", "portfolio_id": "P1"}));
        assert_eq!(
            Fingerprint::compute("metrics.compute_twr", &a, "PP1"),
            Fingerprint::compute("metrics.compute_twr", &b, "PP1"),
        );
    }

    #[test]
    fn pack_id_is_part_of_the_key() {
        let p = params(json!({"portfolio_id": "P1"}));
        assert_ne!(
            Fingerprint::compute("metrics.compute_twr", &p, "PP_2025-10-20"),
            Fingerprint::compute("metrics.compute_twr", &p, "PP_2025-10-21"),
        );
    }

    #[test]
    fn date_spellings_normalize_to_iso() {
        let a = params(json!({"asof": "2025/10/21"}));
        let b = params(json!({"asof": "2025-10-21"}));
        assert_eq!(
            Fingerprint::compute("c", &a, "PP1"),
            Fingerprint::compute("c", &b, "PP1"),
        );
    }

    #[test]
    fn decimals_trim_trailing_zeros() {
        assert_eq!(normalize_decimal(0.085), "0.085");
        assert_eq!(normalize_decimal(1.0), "1");
        assert_eq!(normalize_decimal(-0.0), "0");
        let a = params(json!({"weight": 0.25}));
        let b = params(json!({"weight": 0.250}));
        assert_eq!(
            Fingerprint::compute("c", &a, "PP1"),
            Fingerprint::compute("c", &b, "PP1"),
        );
    }

    #[test]
    fn nested_structures_canonicalize_recursively() {
        let a = params(json!({"filter": {"b": 1, "a": [1, 2.50]}}));
        let b = params(json!({"filter": {"a": [1, 2.5], "b": 1}}));
        assert_eq!(canonicalize(&Value::Object(a)), canonicalize(&Value::Object(b)));
    }

    proptest! {
        #[test]
        fn canonicalize_is_deterministic(keys in proptest::collection::vec("[a-z]{1,8}", 1..6)) {
            let mut map = serde_json::Map::new();
            for (i, k) in keys.iter().enumerate() {
                map.insert(k.clone(), json!(i));
            }
            let forward = canonicalize(&Value::Object(map.clone()));
            let mut reversed = serde_json::Map::new();
            for (k, v) in map.iter().collect::<Vec<_>>().into_iter().rev() {
                reversed.insert(k.clone(), v.clone());
            }
            prop_assert_eq!(forward, canonicalize(&Value::Object(reversed)));
        }

        #[test]
        fn fingerprints_are_hex_sha256(cap in "[a-z.]{1,20}", pack in "[A-Z0-9_]{1,12}") {
            let fp = Fingerprint::compute(&cap, &serde_json::Map::new(), &pack);
            prop_assert_eq!(fp.as_str().len(), 64);
            prop_assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        }
    }
}
