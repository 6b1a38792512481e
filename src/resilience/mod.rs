//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound call to a dependency:
//!     → manager.rs (look up the dependency's breaker)
//!     → circuit_breaker.rs (admit, or fail fast while OPEN)
//!     → rate_limiter.rs (sliding-window admission)
//!     → call with per-call timeout
//!     → On upstream throttling: backoff.rs (Retry-After or jittered backoff)
//!     → outcome recorded on the breaker
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Throttling is neither success nor failure for the breaker
//! - Every wait is a tokio sleep, so cancellation propagates through it
//! - Breakers are per dependency and owned by an injected manager

pub mod backoff;
pub mod circuit_breaker;
pub mod manager;
pub mod rate_limiter;

pub use circuit_breaker::{
    CallError, CallPermit, CircuitBreaker, CircuitMetrics, CircuitOpenError, CircuitSnapshot,
    CircuitState,
};
pub use manager::{CircuitBreakerManager, HealthSummary};
pub use rate_limiter::{AdmissionPolicy, RateLimitExceeded, SlidingWindowLimiter};
