// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! daws-core
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Per-request execution context threaded through every capability call.
pub mod context;
/// Capability contract declarations and the registry catalog view.
pub mod contract;
/// Provenance envelopes and the merge rules that propagate staleness.
pub mod envelope;
/// Structured error taxonomy shared across component boundaries.
pub mod error;
/// Deterministic fingerprints over canonicalized capability inputs.
pub mod fingerprint;
/// Telemetry record types emitted by the agent adapter.
pub mod telemetry;

use serde::Serialize;
use sha2::{Digest, Sha256};

pub use context::ExecutionContext;
pub use contract::{CapabilityContract, ContractCatalog, FieldType};
pub use envelope::{Envelope, ImplementationStatus, MergeError, Provenance, ProvenanceMerge};
pub use error::{ErrorEnvelope, ErrorKind};
pub use fingerprint::{Fingerprint, canonicalize};
pub use telemetry::{InvocationOutcome, TelemetryRecord};

/// Reserved key under which provenance metadata rides on serialized results.
pub const META_KEY: &str = "__meta__";

/// Default TTL applied when a capability does not declare its own.
pub const DEFAULT_TTL_SECONDS: u64 = 3600;

/// Default per-invocation timeout applied by the adapter.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Hard cap on the cache lifetime of stub results, so real data replaces
/// them promptly regardless of the declared TTL.
pub const STUB_TTL_CAP_SECS: u64 = 60;

/// Errors from contract-level operations (serialization, hashing).
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    /// JSON serialization or deserialization failed.
    #[error("failed to serialize JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Produce a deterministic JSON string for hashing.
///
/// Not a full JCS implementation, but stable for our types: keys are sorted
/// (serde_json's map is a BTreeMap by default) and numbers serialize
/// consistently. For fingerprinting capability inputs, prefer
/// [`fingerprint::canonicalize`], which additionally normalizes decimals and
/// date strings.
///
/// # Errors
///
/// Returns [`ContractError::Json`] if the value cannot be serialized.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, ContractError> {
    let v = serde_json::to_value(value)?;
    Ok(serde_json::to_string(&v)?)
}

/// Compute the hex-encoded SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
