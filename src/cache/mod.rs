//! Multi-layer cache subsystem.
//!
//! # Data Flow
//! ```text
//! get(category, key):
//!     → memory.rs (L1, in-process LRU, lazy TTL)
//!     → distributed.rs (L2, Redis, behind its own circuit breaker)
//!         → hit written back to L1 with its remaining TTL
//!     → durable.rs (L3, only for durable-backed categories)
//!         → hit written through to L2 and L1
//! ```
//!
//! # Design Decisions
//! - Cache failures degrade to a miss; they never fail a lookup
//! - Each category owns its default TTL, overridable per call
//! - No lock is held across a distributed or durable round trip

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::schema::CacheTtlConfig;

pub mod distributed;
pub mod durable;
pub mod entry;
pub mod layered;
pub mod memory;
pub mod metrics;
pub mod pattern;

pub use distributed::{DistributedCache, InMemoryDistributedCache, RedisCache};
pub use durable::{DurableStore, JsonFileStore};
pub use entry::{CacheEntry, EntryInfo};
pub use layered::{MultiLayerCache, WarmReport};
pub use metrics::LayerMetricsSnapshot;

/// Kinds of cached data, each with its own TTL policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheCategory {
    /// Legal-unit lookups (9 digits). Rarely change.
    Company,
    /// Establishment lookups (14 digits). Change more often.
    Establishment,
    /// Supplier profiles persisted by the application.
    Supplier,
}

impl CacheCategory {
    pub const ALL: [CacheCategory; 3] = [
        CacheCategory::Company,
        CacheCategory::Establishment,
        CacheCategory::Supplier,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CacheCategory::Company => "company",
            CacheCategory::Establishment => "establishment",
            CacheCategory::Supplier => "supplier",
        }
    }

    /// Whether the durable layer can reconstruct this category.
    pub fn durable_backed(self) -> bool {
        matches!(self, CacheCategory::Supplier)
    }

    pub fn default_ttl(self, ttl: &CacheTtlConfig) -> Duration {
        let secs = match self {
            CacheCategory::Company => ttl.company_secs,
            CacheCategory::Establishment => ttl.establishment_secs,
            CacheCategory::Supplier => ttl.supplier_secs,
        };
        Duration::from_secs(secs)
    }
}

impl fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown category name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown cache category '{0}'")]
pub struct UnknownCategory(pub String);

impl FromStr for CacheCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CacheCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// Cache layer failures. Logged and counted, never surfaced to lookups.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Circuit '{0}' is open")]
    CircuitOpen(String),

    #[error("Cache call timed out after {0:?}")]
    Timeout(Duration),
}
