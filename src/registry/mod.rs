//! Upstream business-registry access.
//!
//! # Responsibilities
//! - Resolve identifiers against the cache, then the registry
//! - Classify registry answers into found, not found, or a typed error
//! - Write one audit record per attempt

pub mod audit;
pub mod client;
pub mod response;
pub mod types;

pub use audit::{
    AuditError, AuditOutcome, AuditRecord, AuditSink, JsonLinesAuditSink, MemoryAuditSink,
    TracingAuditSink,
};
pub use client::RegistryClient;
pub use types::{
    Address, CachedLookup, LookupError, RateLimitOrigin, RecordKind, RegistryRecord, Verdict,
};
