// SPDX-License-Identifier: MIT OR Apache-2.0
//! Provenance envelopes.
//!
//! Every capability result is wrapped in an [`Envelope`]: the payload plus a
//! [`Provenance`] record naming the data source, the as-of date, the TTL, and
//! the pricing pack that produced it. When results are combined, provenance
//! merges pessimistically — the oldest as-of, the shortest TTL, and the worst
//! implementation status win, so staleness at any leaf is visible at the top.

use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::ErrorEnvelope;

/// How complete the implementation behind a result is.
///
/// The ordering matters: merged provenance takes the *maximum* status under
/// `Stub > Partial > Real`, so a single stub input poisons the merge upward.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum ImplementationStatus {
    /// Fully implemented, backed by real data.
    #[default]
    Real,
    /// Implemented but incomplete (some inputs approximated or missing).
    Partial,
    /// Placeholder implementation; the payload is synthetic.
    Stub,
}

impl fmt::Display for ImplementationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Real => "real",
            Self::Partial => "partial",
            Self::Stub => "stub",
        };
        f.write_str(s)
    }
}

/// Metadata binding a result to a reproducible data snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Provenance {
    /// Identifies the data origin, typically `"<service>:<pack>"`.
    pub source: String,

    /// Date the underlying data is valid for. `None` means unknown, which is
    /// treated as older-than-everything by the merge rules.
    pub as_of: Option<NaiveDate>,

    /// Seconds the result may be cached before it must be recomputed.
    pub ttl_seconds: u64,

    /// Identifier of the immutable pricing snapshot this result was priced
    /// against.
    pub pricing_pack_id: String,

    /// Instant the result was computed.
    pub computed_at: DateTime<Utc>,

    /// Producer-supplied confidence, if the capability computes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,

    /// Completeness of the producing implementation.
    #[serde(default)]
    pub status: ImplementationStatus,

    /// Set when the merged as-of fell behind the configured staleness
    /// threshold. Informational; the result is still returned.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stale: bool,
}

impl Provenance {
    /// Build a provenance record with status `Real` and no confidence.
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        as_of: Option<NaiveDate>,
        ttl_seconds: u64,
        pricing_pack_id: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            as_of,
            ttl_seconds,
            pricing_pack_id: pricing_pack_id.into(),
            computed_at: Utc::now(),
            confidence: None,
            status: ImplementationStatus::Real,
            stale: false,
        }
    }

    /// Set the implementation status.
    #[must_use]
    pub fn status(mut self, status: ImplementationStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the producer-supplied confidence.
    #[must_use]
    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Absolute instant at which this result expires.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.computed_at + chrono::Duration::seconds(self.ttl_seconds as i64)
    }
}

/// A capability result plus its provenance.
///
/// Serialized with the metadata under the reserved `__meta__` key, so the
/// envelope survives any JSON transport:
///
/// ```
/// use daws_core::{Envelope, Provenance};
/// use serde_json::json;
///
/// let env = Envelope::wrap(
///     json!({"twr_ytd": 0.085}),
///     Provenance::new("metrics_database:PP_2025-10-21", None, 3600, "PP_2025-10-21"),
/// );
/// let wire = serde_json::to_value(&env).unwrap();
/// assert!(wire.get("__meta__").is_some());
///
/// let back: Envelope = serde_json::from_value(wire).unwrap();
/// let (payload, meta) = back.extract();
/// assert_eq!(payload, json!({"twr_ytd": 0.085}));
/// assert_eq!(meta.pricing_pack_id, "PP_2025-10-21");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Envelope {
    /// The capability's result value. Sequences of records carry a single
    /// envelope at the outer level, not one per record.
    pub payload: serde_json::Value,

    /// Provenance for the payload.
    #[serde(rename = "__meta__")]
    pub meta: Provenance,
}

impl Envelope {
    /// Wrap a payload with its provenance.
    #[must_use]
    pub fn wrap(payload: serde_json::Value, meta: Provenance) -> Self {
        Self { payload, meta }
    }

    /// Unwrap into `(payload, meta)`.
    #[must_use]
    pub fn extract(self) -> (serde_json::Value, Provenance) {
        (self.payload, self.meta)
    }

    /// `true` when the producing implementation is a stub.
    #[must_use]
    pub fn is_stub(&self) -> bool {
        self.meta.status == ImplementationStatus::Stub
    }

    /// Build a stub-status envelope carrying a structured error as payload.
    ///
    /// Used for soft failures on optional steps: downstream consumers see the
    /// stub marker and may short-circuit.
    #[must_use]
    pub fn from_error(err: &ErrorEnvelope, pricing_pack_id: impl Into<String>) -> Self {
        let meta = Provenance {
            source: format!("error:{}", err.kind),
            as_of: None,
            ttl_seconds: 0,
            pricing_pack_id: pricing_pack_id.into(),
            computed_at: Utc::now(),
            confidence: None,
            status: ImplementationStatus::Stub,
            stale: false,
        };
        Self {
            payload: serde_json::to_value(err).unwrap_or(serde_json::Value::Null),
            meta,
        }
    }
}

/// Merge failed because the inputs disagree on fundamentals.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MergeError {
    /// No provenance was absorbed before `finish`.
    #[error("no provenance to merge")]
    Empty,

    /// Inputs were priced against different packs; the result would not be
    /// reproducible against any single snapshot.
    #[error("inconsistent pricing_pack_id across inputs: {packs:?}")]
    InconsistentPricingPack {
        /// The distinct pack identifiers observed.
        packs: Vec<String>,
    },
}

/// Accumulator implementing the envelope merge rules.
///
/// Absorption is associative and commutative: `as_of` takes the minimum
/// (unknown counts as minimal), `ttl` the minimum, `status` the maximum under
/// `Stub > Partial > Real`, and sources concatenate de-duplicated. A
/// sub-result with no envelope at all is absorbed via [`absorb_missing`]
/// (stub, ttl 0, unknown as-of), poisoning the merge upward.
///
/// [`absorb_missing`]: ProvenanceMerge::absorb_missing
///
/// ```
/// use daws_core::{ImplementationStatus, Provenance, ProvenanceMerge};
/// use chrono::NaiveDate;
///
/// let a = Provenance::new("ledger:abc123", NaiveDate::from_ymd_opt(2025, 10, 20), 3600, "PP1");
/// let b = Provenance::new("metrics_database:PP1", NaiveDate::from_ymd_opt(2025, 10, 21), 600, "PP1")
///     .status(ImplementationStatus::Partial);
///
/// let mut merge = ProvenanceMerge::new();
/// merge.absorb(&a);
/// merge.absorb(&b);
/// let merged = merge.finish().unwrap();
///
/// assert_eq!(merged.as_of, NaiveDate::from_ymd_opt(2025, 10, 20));
/// assert_eq!(merged.ttl_seconds, 600);
/// assert_eq!(merged.status, ImplementationStatus::Partial);
/// ```
#[derive(Debug, Default)]
pub struct ProvenanceMerge {
    sources: Vec<String>,
    packs: BTreeSet<String>,
    as_of: Option<NaiveDate>,
    unknown_as_of: bool,
    ttl_seconds: Option<u64>,
    status: ImplementationStatus,
    confidence: Option<f64>,
    missing_confidence: bool,
    absorbed: usize,
}

impl ProvenanceMerge {
    /// Start an empty merge.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of provenance records absorbed so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.absorbed
    }

    /// `true` when nothing has been absorbed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.absorbed == 0
    }

    /// Fold one provenance record into the accumulator.
    pub fn absorb(&mut self, p: &Provenance) {
        self.absorbed += 1;
        if !self.sources.contains(&p.source) {
            self.sources.push(p.source.clone());
        }
        self.packs.insert(p.pricing_pack_id.clone());
        match p.as_of {
            Some(d) => {
                self.as_of = Some(match self.as_of {
                    Some(prev) => prev.min(d),
                    None => d,
                });
            }
            None => self.unknown_as_of = true,
        }
        self.ttl_seconds = Some(match self.ttl_seconds {
            Some(prev) => prev.min(p.ttl_seconds),
            None => p.ttl_seconds,
        });
        self.status = self.status.max(p.status);
        match p.confidence {
            Some(c) => {
                self.confidence = Some(match self.confidence {
                    Some(prev) => prev.min(c),
                    None => c,
                });
            }
            None => self.missing_confidence = true,
        }
    }

    /// Absorb a sub-result that carried no envelope at all.
    ///
    /// Treated as `status = stub, ttl = 0, as_of = unknown` so the omission
    /// is visible at the top of the merge.
    pub fn absorb_missing(&mut self) {
        self.absorbed += 1;
        let unknown = "unknown".to_string();
        if !self.sources.contains(&unknown) {
            self.sources.push(unknown);
        }
        self.unknown_as_of = true;
        self.ttl_seconds = Some(0);
        self.status = ImplementationStatus::Stub;
        self.missing_confidence = true;
    }

    /// Complete the merge.
    ///
    /// # Errors
    ///
    /// [`MergeError::Empty`] when nothing was absorbed, and
    /// [`MergeError::InconsistentPricingPack`] when the inputs were priced
    /// against more than one pack.
    pub fn finish(self) -> Result<Provenance, MergeError> {
        if self.absorbed == 0 {
            return Err(MergeError::Empty);
        }
        if self.packs.len() > 1 {
            return Err(MergeError::InconsistentPricingPack {
                packs: self.packs.into_iter().collect(),
            });
        }
        let pricing_pack_id = self.packs.into_iter().next().unwrap_or_default();
        Ok(Provenance {
            source: self.sources.join(" + "),
            as_of: if self.unknown_as_of { None } else { self.as_of },
            ttl_seconds: self.ttl_seconds.unwrap_or(0),
            pricing_pack_id,
            computed_at: Utc::now(),
            confidence: if self.missing_confidence {
                None
            } else {
                self.confidence
            },
            status: self.status,
            stale: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn prov(source: &str, day: u32, ttl: u64, pack: &str) -> Provenance {
        Provenance::new(
            source,
            NaiveDate::from_ymd_opt(2025, 10, day),
            ttl,
            pack,
        )
    }

    #[test]
    fn status_order_prefers_stub_on_merge() {
        assert!(ImplementationStatus::Stub > ImplementationStatus::Partial);
        assert!(ImplementationStatus::Partial > ImplementationStatus::Real);
    }

    #[test]
    fn wrap_extract_roundtrip_preserves_meta_exactly() {
        let meta = prov("metrics_database:PP1", 21, 3600, "PP1").confidence(0.9);
        let env = Envelope::wrap(json!({"twr_ytd": 0.085}), meta.clone());
        let (payload, out) = env.extract();
        assert_eq!(payload, json!({"twr_ytd": 0.085}));
        assert_eq!(out, meta);
    }

    #[test]
    fn serde_keeps_meta_under_reserved_key() {
        let env = Envelope::wrap(json!([1, 2, 3]), prov("ledger:abc", 20, 60, "PP1"));
        let v = serde_json::to_value(&env).unwrap();
        assert!(v["__meta__"]["pricing_pack_id"].as_str() == Some("PP1"));
        let back: Envelope = serde_json::from_value(v).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn merge_takes_min_as_of_min_ttl_max_status() {
        let mut m = ProvenanceMerge::new();
        m.absorb(&prov("a", 21, 3600, "PP1"));
        m.absorb(&prov("b", 19, 600, "PP1").status(ImplementationStatus::Partial));
        m.absorb(&prov("c", 22, 7200, "PP1").status(ImplementationStatus::Stub));
        let merged = m.finish().unwrap();
        assert_eq!(merged.as_of, NaiveDate::from_ymd_opt(2025, 10, 19));
        assert_eq!(merged.ttl_seconds, 600);
        assert_eq!(merged.status, ImplementationStatus::Stub);
        assert_eq!(merged.source, "a + b + c");
    }

    #[test]
    fn missing_envelope_poisons_merge() {
        let mut m = ProvenanceMerge::new();
        m.absorb(&prov("a", 21, 3600, "PP1"));
        m.absorb_missing();
        let merged = m.finish().unwrap();
        assert_eq!(merged.status, ImplementationStatus::Stub);
        assert_eq!(merged.ttl_seconds, 0);
        assert_eq!(merged.as_of, None);
    }

    #[test]
    fn unknown_as_of_wins_over_known() {
        let mut m = ProvenanceMerge::new();
        let mut no_date = prov("a", 21, 3600, "PP1");
        no_date.as_of = None;
        m.absorb(&no_date);
        m.absorb(&prov("b", 19, 600, "PP1"));
        assert_eq!(m.finish().unwrap().as_of, None);
    }

    #[test]
    fn merge_rejects_mixed_packs() {
        let mut m = ProvenanceMerge::new();
        m.absorb(&prov("a", 21, 3600, "PP_2025-10-20"));
        m.absorb(&prov("b", 21, 3600, "PP_2025-10-21"));
        match m.finish() {
            Err(MergeError::InconsistentPricingPack { packs }) => {
                assert_eq!(packs.len(), 2);
            }
            other => panic!("expected pack mismatch, got {other:?}"),
        }
    }

    #[test]
    fn empty_merge_is_an_error() {
        assert_eq!(ProvenanceMerge::new().finish(), Err(MergeError::Empty));
    }

    #[test]
    fn confidence_is_min_only_when_all_inputs_carry_one() {
        let mut m = ProvenanceMerge::new();
        m.absorb(&prov("a", 21, 60, "PP1").confidence(0.9));
        m.absorb(&prov("b", 21, 60, "PP1").confidence(0.4));
        assert_eq!(m.finish().unwrap().confidence, Some(0.4));

        let mut m = ProvenanceMerge::new();
        m.absorb(&prov("a", 21, 60, "PP1").confidence(0.9));
        m.absorb(&prov("b", 21, 60, "PP1"));
        assert_eq!(m.finish().unwrap().confidence, None);
    }

    #[test]
    fn merge_is_commutative_up_to_source_order() {
        let a = prov("a", 21, 3600, "PP1");
        let b = prov("b", 19, 600, "PP1").status(ImplementationStatus::Partial);

        let mut ab = ProvenanceMerge::new();
        ab.absorb(&a);
        ab.absorb(&b);
        let ab = ab.finish().unwrap();

        let mut ba = ProvenanceMerge::new();
        ba.absorb(&b);
        ba.absorb(&a);
        let ba = ba.finish().unwrap();

        assert_eq!(ab.as_of, ba.as_of);
        assert_eq!(ab.ttl_seconds, ba.ttl_seconds);
        assert_eq!(ab.status, ba.status);
    }

    #[test]
    fn error_envelope_payload_is_stub() {
        let err = crate::ErrorEnvelope::new(crate::ErrorKind::Timeout, "deadline exceeded");
        let env = Envelope::from_error(&err, "PP1");
        assert!(env.is_stub());
        assert_eq!(env.meta.ttl_seconds, 0);
        assert_eq!(env.payload["kind"], json!("timeout"));
    }
}
