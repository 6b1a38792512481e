//! Sliding-window admission control for outbound registry calls.
//!
//! Keeps the timestamps of admissions inside the current window. Each check
//! discards timestamps older than the window, then compares the remaining
//! count to the limit. The limiter knows nothing about call outcomes; it only
//! bounds attempt volume.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::Clock;
use crate::config::RateLimitConfig;
use crate::observability::metrics;

/// How a caller reacts when the window is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionPolicy {
    /// Deny immediately (interactive requests).
    FailFast,
    /// Suspend until a slot frees up, bounded by `max_wait` (bulk jobs).
    #[default]
    Wait,
}

/// Admission was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("rate limit exceeded, next slot in {retry_after:?}")]
pub struct RateLimitExceeded {
    pub retry_after: Duration,
}

/// Sliding-window rate limiter.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    window: Duration,
    limit: usize,
    max_wait: Duration,
    admissions: Mutex<VecDeque<Instant>>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    pub fn new(window: Duration, limit: usize, max_wait: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            window,
            limit: limit.max(1),
            max_wait,
            admissions: Mutex::new(VecDeque::with_capacity(limit.max(1))),
            clock,
        }
    }

    pub fn from_config(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            Duration::from_millis(config.window_ms),
            config.effective_limit(),
            Duration::from_millis(config.max_wait_ms),
            clock,
        )
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Admit now or return how long until the oldest admission leaves the window.
    fn check(&self) -> Result<(), Duration> {
        let now = self.clock.now();
        let mut admissions = self
            .admissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        while let Some(&oldest) = admissions.front() {
            if now.duration_since(oldest) >= self.window {
                admissions.pop_front();
            } else {
                break;
            }
        }

        if admissions.len() < self.limit {
            admissions.push_back(now);
            return Ok(());
        }

        let oldest = admissions.front().copied().unwrap_or(now);
        Err((oldest + self.window).saturating_duration_since(now))
    }

    /// Non-blocking admission.
    pub fn try_admit(&self) -> bool {
        match self.check() {
            Ok(()) => true,
            Err(retry_after) => {
                tracing::debug!(?retry_after, limit = self.limit, "Rate limiter denied admission");
                metrics::record_rate_limited();
                false
            }
        }
    }

    /// Suspend until admitted, or fail once the next slot is beyond `max_wait`.
    ///
    /// Cancel-safe: nothing is recorded until admission actually happens.
    pub async fn admit_or_wait(&self) -> Result<(), RateLimitExceeded> {
        let started = self.clock.now();
        loop {
            let retry_after = match self.check() {
                Ok(()) => return Ok(()),
                Err(retry_after) => retry_after,
            };

            let waited = self.clock.now().saturating_duration_since(started);
            if waited + retry_after > self.max_wait {
                tracing::warn!(
                    ?retry_after,
                    max_wait = ?self.max_wait,
                    "Rate limiter wait budget exhausted"
                );
                metrics::record_rate_limited();
                return Err(RateLimitExceeded { retry_after });
            }

            tracing::debug!(?retry_after, "Waiting for rate limiter slot");
            // A zero wait would spin; the slot is free on the next check.
            tokio::time::sleep(retry_after.max(Duration::from_millis(1))).await;
        }
    }

    /// Admit according to the caller's policy.
    pub async fn admit(&self, policy: AdmissionPolicy) -> Result<(), RateLimitExceeded> {
        match policy {
            AdmissionPolicy::FailFast => {
                if self.try_admit() {
                    Ok(())
                } else {
                    Err(RateLimitExceeded {
                        retry_after: self.time_until_slot(),
                    })
                }
            }
            AdmissionPolicy::Wait => self.admit_or_wait().await,
        }
    }

    /// Admissions currently counted in the window.
    pub fn in_window(&self) -> usize {
        let now = self.clock.now();
        let admissions = self
            .admissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        admissions
            .iter()
            .filter(|t| now.duration_since(**t) < self.window)
            .count()
    }

    /// Time until an admission would succeed (zero if one would now).
    pub fn time_until_slot(&self) -> Duration {
        let now = self.clock.now();
        let admissions = self
            .admissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let live: Vec<&Instant> = admissions
            .iter()
            .filter(|t| now.duration_since(**t) < self.window)
            .collect();
        if live.len() < self.limit {
            return Duration::ZERO;
        }
        live.first()
            .map(|oldest| (**oldest + self.window).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }
}
