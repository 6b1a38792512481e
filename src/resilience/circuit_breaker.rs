//! Circuit breaker for dependency protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: dependency assumed down, calls fail fast
//! - Half-Open: a bounded number of probes test whether it recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//!                or (total >= minimum_throughput and failure rate >= failure_rate_threshold)
//! Open → Half-Open: first admission check recovery_timeout after the last failure
//! Half-Open → Closed: a probe succeeds (call counters reset)
//! Half-Open → Open: any failure (recovery timer restarts)
//! ```
//!
//! # Design Decisions
//! - One breaker per named dependency, never shared
//! - State and counters live behind one mutex that is never held across an await
//! - Admission hands out an RAII [`CallPermit`]; dropping it unresolved
//!   (cancellation) frees its half-open slot without recording an outcome
//! - Half-open slots carry a generation so permits from an earlier cycle
//!   cannot free slots of a later one
//! - A late failure from a call admitted before the trip restarts the
//!   recovery timer

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::clock::Clock;
use crate::config::validation::{join_errors, validate_circuit, ValidationError};
use crate::observability::metrics;

pub use crate::config::schema::CircuitConfig;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    fn code(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

/// Call accounting for one breaker.
///
/// `total_calls == success_calls + failure_calls`; rejected calls never reach
/// the dependency and are counted apart.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CircuitMetrics {
    pub total_calls: u64,
    pub success_calls: u64,
    pub failure_calls: u64,
    pub rejected_calls: u64,
    /// Recorded calls slower than half the call timeout.
    pub slow_calls: u64,
    pub average_response_ms: f64,
    pub last_success_time: Option<DateTime<Utc>>,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub state_changes: u64,
    #[serde(skip)]
    latency_sum_ms: u64,
}

impl CircuitMetrics {
    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.failure_calls as f64 / self.total_calls as f64
        }
    }

    fn record_latency(&mut self, latency: Duration, slow_threshold: Duration) {
        self.latency_sum_ms = self.latency_sum_ms.saturating_add(latency.as_millis() as u64);
        if latency >= slow_threshold {
            self.slow_calls += 1;
        }
        self.average_response_ms = self.latency_sum_ms as f64 / self.total_calls.max(1) as f64;
    }

    fn reset_calls(&mut self) {
        self.total_calls = 0;
        self.success_calls = 0;
        self.failure_calls = 0;
        self.slow_calls = 0;
        self.latency_sum_ms = 0;
        self.average_response_ms = 0.0;
    }
}

/// Point-in-time view of a breaker, for health endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub metrics: CircuitMetrics,
    pub consecutive_failures: u32,
    pub half_open_in_flight: u32,
    pub config: CircuitConfig,
}

/// Circuit policy failed validation.
#[derive(Debug, Clone, Error)]
#[error("invalid circuit configuration for '{name}': {}", join_errors(.errors))]
pub struct InvalidCircuitConfig {
    pub name: String,
    pub errors: Vec<ValidationError>,
}

/// A call was rejected without reaching the dependency.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit '{name}' is {}, call rejected", .state.as_str())]
pub struct CircuitOpenError {
    pub name: String,
    pub state: CircuitState,
    /// Time until a probe may be attempted, when OPEN.
    pub retry_after: Option<Duration>,
}

/// Failure of a call wrapped by [`CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum CallError<E> {
    #[error(transparent)]
    Rejected(CircuitOpenError),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Inner(E),
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    metrics: CircuitMetrics,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
    generation: u64,
}

/// Per-dependency circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    /// Create a breaker, rejecting out-of-range policies.
    pub fn new(
        name: impl Into<String>,
        config: CircuitConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, InvalidCircuitConfig> {
        let name = name.into();
        validate_circuit(&name, &config).map_err(|errors| InvalidCircuitConfig {
            name: name.clone(),
            errors,
        })?;
        Ok(Self::from_validated(name, config, clock))
    }

    pub(crate) fn from_validated(name: String, config: CircuitConfig, clock: Arc<dyn Clock>) -> Self {
        metrics::record_circuit_state(&name, CircuitState::Closed.code());
        Self {
            name,
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                metrics: CircuitMetrics::default(),
                consecutive_failures: 0,
                opened_at: None,
                half_open_in_flight: 0,
                generation: 0,
            }),
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    pub fn call_timeout(&self) -> Duration {
        self.config.call_timeout()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stored state. An elapsed OPEN circuit moves to HALF_OPEN on the next
    /// admission check, not here.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn metrics(&self) -> CircuitMetrics {
        self.lock().metrics.clone()
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            name: self.name.clone(),
            state: inner.state,
            metrics: inner.metrics.clone(),
            consecutive_failures: inner.consecutive_failures,
            half_open_in_flight: inner.half_open_in_flight,
            config: self.config.clone(),
        }
    }

    /// Ask to make one call.
    pub fn try_acquire(self: &Arc<Self>) -> Result<CallPermit, CircuitOpenError> {
        let now = self.clock.now();
        let mut inner = self.lock();

        if inner.state == CircuitState::Open {
            let opened_at = inner.opened_at.unwrap_or(now);
            let elapsed = now.saturating_duration_since(opened_at);
            if elapsed >= self.config.recovery_timeout() {
                self.transition(&mut inner, CircuitState::HalfOpen, now);
            } else {
                let retry_after = self.config.recovery_timeout() - elapsed;
                return Err(self.reject(&mut inner, Some(retry_after)));
            }
        }

        match inner.state {
            CircuitState::Closed => Ok(CallPermit::new(self.clone(), None)),
            CircuitState::HalfOpen => {
                if inner.half_open_in_flight < self.config.half_open_max_calls {
                    inner.half_open_in_flight += 1;
                    Ok(CallPermit::new(self.clone(), Some(inner.generation)))
                } else {
                    Err(self.reject(&mut inner, None))
                }
            }
            CircuitState::Open => Err(self.reject(&mut inner, None)),
        }
    }

    fn reject(&self, inner: &mut Inner, retry_after: Option<Duration>) -> CircuitOpenError {
        inner.metrics.rejected_calls += 1;
        metrics::record_circuit_rejection(&self.name);
        tracing::debug!(circuit = %self.name, state = inner.state.as_str(), "Call rejected");
        CircuitOpenError {
            name: self.name.clone(),
            state: inner.state,
            retry_after,
        }
    }

    /// Run `fut` under this breaker with the per-call timeout.
    ///
    /// `Err` and timeouts count as failures. If the returned future is
    /// dropped early, no outcome is recorded.
    pub async fn call<F, T, E>(self: &Arc<Self>, fut: F) -> Result<T, CallError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire().map_err(CallError::Rejected)?;
        let timeout = self.call_timeout();
        let started = Instant::now();

        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(value)) => {
                permit.success(started.elapsed());
                Ok(value)
            }
            Ok(Err(e)) => {
                permit.failure(started.elapsed());
                Err(CallError::Inner(e))
            }
            Err(_) => {
                permit.failure(started.elapsed());
                Err(CallError::Timeout(timeout))
            }
        }
    }

    fn release_slot(&self, inner: &mut Inner, probe: Option<u64>) {
        if probe == Some(inner.generation) && inner.state == CircuitState::HalfOpen {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }

    fn on_success(&self, probe: Option<u64>, latency: Duration) {
        let now = self.clock.now();
        let mut inner = self.lock();
        let is_current_probe = probe.is_some() && probe == Some(inner.generation);
        self.release_slot(&mut inner, probe);

        inner.metrics.total_calls += 1;
        inner.metrics.success_calls += 1;
        inner.metrics.last_success_time = Some(Utc::now());
        inner
            .metrics
            .record_latency(latency, self.config.call_timeout() / 2);
        inner.consecutive_failures = 0;

        if inner.state == CircuitState::HalfOpen && is_current_probe {
            self.transition(&mut inner, CircuitState::Closed, now);
        }
    }

    fn on_failure(&self, probe: Option<u64>, latency: Duration) {
        let now = self.clock.now();
        let mut inner = self.lock();
        self.release_slot(&mut inner, probe);

        inner.metrics.total_calls += 1;
        inner.metrics.failure_calls += 1;
        inner.metrics.last_failure_time = Some(Utc::now());
        inner
            .metrics
            .record_latency(latency, self.config.call_timeout() / 2);
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        match inner.state {
            CircuitState::Closed => {
                let by_count = inner.consecutive_failures >= self.config.failure_threshold;
                let by_rate = inner.metrics.total_calls >= self.config.minimum_throughput
                    && inner.metrics.failure_rate() >= self.config.failure_rate_threshold;
                if by_count || by_rate {
                    tracing::warn!(
                        circuit = %self.name,
                        consecutive_failures = inner.consecutive_failures,
                        failure_rate = inner.metrics.failure_rate(),
                        "Failure threshold reached"
                    );
                    self.transition(&mut inner, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => self.transition(&mut inner, CircuitState::Open, now),
            CircuitState::Open => inner.opened_at = Some(now),
        }
    }

    fn on_release(&self, probe: Option<u64>) {
        let mut inner = self.lock();
        self.release_slot(&mut inner, probe);
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState, now: Instant) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        inner.metrics.state_changes += 1;

        match to {
            CircuitState::Open => {
                inner.opened_at = Some(now);
                inner.half_open_in_flight = 0;
            }
            CircuitState::HalfOpen => {
                inner.generation += 1;
                inner.half_open_in_flight = 0;
            }
            CircuitState::Closed => {
                inner.generation += 1;
                inner.opened_at = None;
                inner.half_open_in_flight = 0;
                inner.consecutive_failures = 0;
                inner.metrics.reset_calls();
            }
        }

        if to == CircuitState::Open {
            tracing::warn!(circuit = %self.name, from = from.as_str(), to = to.as_str(), "Circuit state transition");
        } else {
            tracing::info!(circuit = %self.name, from = from.as_str(), to = to.as_str(), "Circuit state transition");
        }
        metrics::record_circuit_state(&self.name, to.code());
        metrics::record_circuit_transition(&self.name, from.as_str(), to.as_str());
    }

    /// Trip the circuit manually. The recovery timer starts now.
    pub fn force_open(&self) {
        let now = self.clock.now();
        let mut inner = self.lock();
        tracing::warn!(circuit = %self.name, "Circuit forced open");
        self.transition(&mut inner, CircuitState::Open, now);
        inner.opened_at = Some(now);
    }

    /// Close the circuit manually. In-flight probes become stale.
    pub fn force_close(&self) {
        let now = self.clock.now();
        let mut inner = self.lock();
        tracing::warn!(circuit = %self.name, "Circuit forced closed");
        self.transition(&mut inner, CircuitState::Closed, now);
        inner.consecutive_failures = 0;
    }

    /// Zero every counter, keeping the current state.
    pub fn reset_metrics(&self) {
        let mut inner = self.lock();
        inner.metrics = CircuitMetrics::default();
        inner.consecutive_failures = 0;
        tracing::info!(circuit = %self.name, "Circuit metrics reset");
    }
}

/// Permission to make one call through a [`CircuitBreaker`].
///
/// Resolve it with [`success`](Self::success), [`failure`](Self::failure) or
/// [`release`](Self::release). Dropping it unresolved behaves like `release`.
#[derive(Debug)]
pub struct CallPermit {
    breaker: Arc<CircuitBreaker>,
    probe: Option<u64>,
    resolved: bool,
}

impl CallPermit {
    fn new(breaker: Arc<CircuitBreaker>, probe: Option<u64>) -> Self {
        Self {
            breaker,
            probe,
            resolved: false,
        }
    }

    /// True if this permit holds a half-open probe slot.
    pub fn is_probe(&self) -> bool {
        self.probe.is_some()
    }

    /// The dependency answered correctly.
    pub fn success(mut self, latency: Duration) {
        self.resolved = true;
        self.breaker.on_success(self.probe, latency);
    }

    /// The dependency failed (error, 5xx, timeout).
    pub fn failure(mut self, latency: Duration) {
        self.resolved = true;
        self.breaker.on_failure(self.probe, latency);
    }

    /// Neither success nor failure (self-inflicted throttling, caller error).
    pub fn release(mut self) {
        self.resolved = true;
        self.breaker.on_release(self.probe);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.on_release(self.probe);
        }
    }
}
