// SPDX-License-Identifier: MIT OR Apache-2.0
//! Provider handles.
//!
//! The core does not ship HTTP clients; it ships the contract every provider
//! integration must satisfy: a token-bucket rate limit (60–120 req/min), a
//! circuit breaker (3 consecutive failures open the circuit for 60s, with a
//! half-open probe), and a bounded dead-letter queue for retryable failures.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Rate-limit and breaker settings for one provider.
#[derive(Debug, Clone)]
pub struct ProviderLimits {
    /// Token-bucket refill rate. Clamped to the 60–120 contract range.
    pub requests_per_minute: u32,
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Seconds the circuit stays open before a half-open probe.
    pub open_secs: u64,
    /// Maximum dead letters retained (FIFO eviction).
    pub dead_letter_capacity: usize,
}

impl Default for ProviderLimits {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            failure_threshold: 3,
            open_secs: 60,
            dead_letter_capacity: 256,
        }
    }
}

/// Failures surfaced by a provider call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// The circuit is open; the call was refused without going upstream.
    #[error("circuit open for provider '{provider}', retry in {retry_in_secs}s")]
    CircuitOpen {
        /// Provider whose circuit is open.
        provider: String,
        /// Seconds until a half-open probe is allowed.
        retry_in_secs: u64,
    },

    /// The upstream request failed.
    #[error("request to '{provider}' failed: {reason}")]
    Request {
        /// Provider the request went to.
        provider: String,
        /// Human-readable failure reason.
        reason: String,
        /// Whether a retry could reasonably succeed.
        retryable: bool,
    },
}

impl ProviderError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Request { retryable: true, .. })
    }
}

/// A request that failed retryably, parked for later replay.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    /// When the failure happened.
    pub occurred_at: DateTime<Utc>,
    /// Why the request failed.
    pub reason: String,
    /// Request descriptor, as supplied by the caller.
    pub request: serde_json::Value,
}

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Failing; calls are refused.
    Open,
    /// Cooling-off elapsed; one probe call is allowed through.
    HalfOpen,
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

struct CircuitBreaker {
    failure_threshold: u32,
    open_for: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    fn new(failure_threshold: u32, open_for: Duration) -> Self {
        Self {
            failure_threshold,
            open_for,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    fn try_acquire(&self, provider: &str) -> Result<(), ProviderError> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(self.open_for);
                if elapsed >= self.open_for {
                    inner.state = CircuitState::HalfOpen;
                    debug!(target: "daws.provider", provider, "circuit half-open, allowing probe");
                    Ok(())
                } else {
                    let retry_in_secs = (self.open_for - elapsed).as_secs().max(1);
                    Err(ProviderError::CircuitOpen {
                        provider: provider.to_string(),
                        retry_in_secs,
                    })
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    fn record_failure(&self, provider: &str) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.consecutive_failures += 1;
        if matches!(inner.state, CircuitState::HalfOpen)
            || inner.consecutive_failures >= self.failure_threshold
        {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            warn!(
                target: "daws.provider",
                provider,
                failures = inner.consecutive_failures,
                "circuit opened"
            );
        }
    }

    fn state(&self) -> CircuitState {
        self.inner.lock().expect("breaker lock poisoned").state
    }
}

/// Token bucket refilled continuously at the configured per-minute rate.
struct RateLimiter {
    capacity: f64,
    per_second: f64,
    inner: Mutex<LimiterInner>,
}

struct LimiterInner {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    fn new(requests_per_minute: u32) -> Self {
        let capacity = f64::from(requests_per_minute);
        Self {
            capacity,
            per_second: capacity / 60.0,
            inner: Mutex::new(LimiterInner {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    async fn acquire(&self) {
        loop {
            let wait = {
                let mut inner = self.inner.lock().expect("limiter lock poisoned");
                let elapsed = inner.last_refill.elapsed().as_secs_f64();
                inner.tokens = (inner.tokens + elapsed * self.per_second).min(self.capacity);
                inner.last_refill = Instant::now();
                if inner.tokens >= 1.0 {
                    inner.tokens -= 1.0;
                    None
                } else {
                    Some(Duration::from_secs_f64((1.0 - inner.tokens) / self.per_second))
                }
            };
            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }
}

/// Guarded entry point to one upstream data provider.
///
/// Every call flows limiter → breaker → upstream closure. Retryable failures
/// are parked in the dead-letter queue for later replay.
pub struct ProviderHandle {
    name: String,
    api_key: Option<String>,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    dead_letters: Mutex<VecDeque<DeadLetter>>,
    dead_letter_capacity: usize,
}

impl ProviderHandle {
    /// Create a handle with the given limits.
    #[must_use]
    pub fn new(name: impl Into<String>, limits: ProviderLimits) -> Self {
        let rpm = limits.requests_per_minute.clamp(60, 120);
        Self {
            name: name.into(),
            api_key: None,
            limiter: RateLimiter::new(rpm),
            breaker: CircuitBreaker::new(
                limits.failure_threshold,
                Duration::from_secs(limits.open_secs),
            ),
            dead_letters: Mutex::new(VecDeque::new()),
            dead_letter_capacity: limits.dead_letter_capacity,
        }
    }

    /// Attach the provider's API key (read from the environment at startup).
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Provider name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configured API key, if any.
    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// Current breaker state.
    #[must_use]
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Run one upstream call under the rate-limit and breaker contract.
    ///
    /// `request` is an opaque descriptor recorded on dead letters.
    ///
    /// # Errors
    ///
    /// [`ProviderError::CircuitOpen`] when the breaker refuses the call, or
    /// the closure's own [`ProviderError::Request`].
    pub async fn call<F, Fut>(
        &self,
        request: serde_json::Value,
        op: F,
    ) -> Result<serde_json::Value, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<serde_json::Value, ProviderError>>,
    {
        self.breaker.try_acquire(&self.name)?;
        self.limiter.acquire().await;
        match op().await {
            Ok(value) => {
                self.breaker.record_success();
                Ok(value)
            }
            Err(err) => {
                self.breaker.record_failure(&self.name);
                if err.is_retryable() {
                    self.park(request, err.to_string());
                }
                Err(err)
            }
        }
    }

    /// Snapshot the dead-letter queue.
    #[must_use]
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters
            .lock()
            .expect("dead-letter lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    fn park(&self, request: serde_json::Value, reason: String) {
        let mut queue = self.dead_letters.lock().expect("dead-letter lock poisoned");
        if queue.len() == self.dead_letter_capacity {
            queue.pop_front();
        }
        queue.push_back(DeadLetter {
            occurred_at: Utc::now(),
            reason,
            request,
        });
    }
}

impl std::fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("name", &self.name)
            .field("circuit", &self.circuit_state())
            .finish()
    }
}
