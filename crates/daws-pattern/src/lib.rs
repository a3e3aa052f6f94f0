// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! daws-pattern
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Directory loader with per-file failure tolerance.
pub mod loader;
/// Pattern and step model types.
pub mod model;
/// `{var}` and `{step.field}` substitution.
pub mod template;
/// Corpus validation rules.
pub mod validate;

pub use loader::{LoadFailure, LoadReport, PatternLoader};
pub use model::{Pattern, Step, StepAction};
pub use template::{ResolveError, render_template, resolve_params, resolve_value};
pub use validate::{PatternReport, Validator};
