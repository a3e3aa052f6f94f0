// SPDX-License-Identifier: MIT OR Apache-2.0
//! Library surface of the `daws` CLI (kept separate for integration tests).
#![deny(unsafe_code)]

/// Subcommand implementations.
pub mod commands;
