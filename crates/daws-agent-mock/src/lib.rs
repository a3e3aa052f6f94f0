// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! daws-agent-mock
#![deny(unsafe_code)]

use async_trait::async_trait;
use chrono::Utc;
use daws_agent::{Agent, AgentError, AgentResult};
use daws_core::{CapabilityContract, ExecutionContext, Provenance};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

/// Canned behavior for one mock capability.
#[derive(Debug, Clone)]
pub struct MockResponse {
    payload: Value,
    meta: Option<Provenance>,
    delay: Option<Duration>,
    fail_with: Option<String>,
}

impl MockResponse {
    /// Succeed with the given payload; provenance left to the adapter.
    #[must_use]
    pub fn payload(payload: Value) -> Self {
        Self {
            payload,
            meta: None,
            delay: None,
            fail_with: None,
        }
    }

    /// Stamp producer provenance on the result (`computed_at` is refreshed
    /// per invocation).
    #[must_use]
    pub fn with_meta(mut self, meta: Provenance) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Sleep before responding (for timeout and coalescing tests).
    #[must_use]
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every invocation with the given message.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            payload: Value::Null,
            meta: None,
            delay: None,
            fail_with: Some(message.into()),
        }
    }
}

/// A mock agent with scripted per-capability responses.
pub struct MockAgent {
    name: String,
    capabilities: Vec<(CapabilityContract, MockResponse)>,
    calls: Mutex<BTreeMap<String, u64>>,
}

impl MockAgent {
    /// Create an empty mock agent.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: Vec::new(),
            calls: Mutex::new(BTreeMap::new()),
        }
    }

    /// Script one capability.
    #[must_use]
    pub fn capability(mut self, contract: CapabilityContract, response: MockResponse) -> Self {
        self.capabilities.push((contract, response));
        self
    }

    /// How many times a capability has been invoked.
    #[must_use]
    pub fn call_count(&self, capability: &str) -> u64 {
        self.calls
            .lock()
            .expect("mock call lock poisoned")
            .get(capability)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Agent for MockAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Vec<CapabilityContract> {
        self.capabilities.iter().map(|(c, _)| c.clone()).collect()
    }

    async fn invoke(
        &self,
        capability: &str,
        _ctx: &ExecutionContext,
        _params: &serde_json::Map<String, Value>,
    ) -> Result<AgentResult, AgentError> {
        let Some((_, response)) = self
            .capabilities
            .iter()
            .find(|(c, _)| c.name == capability)
        else {
            return Err(AgentError::UnknownCapability(capability.to_string()));
        };

        {
            let mut calls = self.calls.lock().expect("mock call lock poisoned");
            *calls.entry(capability.to_string()).or_default() += 1;
        }

        if let Some(delay) = response.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &response.fail_with {
            return Err(AgentError::Failed(message.clone()));
        }

        let meta = response.meta.clone().map(|mut m| {
            m.computed_at = Utc::now();
            m
        });
        Ok(AgentResult {
            payload: response.payload.clone(),
            meta,
        })
    }
}

impl std::fmt::Debug for MockAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockAgent")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities.len())
            .finish()
    }
}
