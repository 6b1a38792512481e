//! Resilient validation of national business identifiers against an
//! external registry.
//!
//! # Architecture
//! ```text
//! validate_identifier(id)
//!     → identifier   (format + Luhn, no I/O)
//!     → cache        (in-process LRU → Redis → durable file)
//!     → resilience   (circuit breaker → sliding-window limiter)
//!     → registry     (HTTP GET, classification, audit trail)
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod identifier;
pub mod observability;
pub mod registry;
pub mod resilience;
pub mod service;

pub use config::schema::AppConfig;
pub use registry::{LookupError, Verdict};
pub use service::{ServiceDeps, ServiceError, ValidationService};
