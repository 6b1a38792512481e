//! Registry domain types and the lookup error taxonomy.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identifier::FormatError;

/// Which registry table a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    LegalUnit,
    Establishment,
}

/// Postal address of an establishment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
}

/// A successful registry answer. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub identifier: String,
    pub kind: RecordKind,
    pub name: Option<String>,
    pub is_active: bool,
    /// Raw administrative status code (`A` active, anything else closed).
    pub status_code: String,
    pub created_on: Option<NaiveDate>,
    pub closed_on: Option<NaiveDate>,
    pub address: Option<Address>,
    pub retrieved_at: DateTime<Utc>,
}

/// What the cache stores for an identifier: a record, or confirmed absence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CachedLookup {
    Found(RegistryRecord),
    NotFound,
}

/// Answer of the public validation API.
///
/// `NotFound` means "this identifier likely does not exist". Inability to
/// verify is a [`LookupError`], never a `NotFound`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Verdict {
    Found(RegistryRecord),
    NotFound { identifier: String },
}

impl Verdict {
    pub(crate) fn from_cached(identifier: &str, cached: CachedLookup) -> Self {
        match cached {
            CachedLookup::Found(record) => Verdict::Found(record),
            CachedLookup::NotFound => Verdict::NotFound {
                identifier: identifier.to_string(),
            },
        }
    }

    pub fn record(&self) -> Option<&RegistryRecord> {
        match self {
            Verdict::Found(record) => Some(record),
            Verdict::NotFound { .. } => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Verdict::Found(_))
    }
}

/// Who throttled the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitOrigin {
    /// Our own sliding window.
    Local,
    /// The registry answered 429 until retries ran out.
    Upstream,
}

impl fmt::Display for RateLimitOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitOrigin::Local => f.write_str("local"),
            RateLimitOrigin::Upstream => f.write_str("upstream"),
        }
    }
}

/// Why a lookup produced no verdict.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    /// Rejected locally; never reached the cache or the network.
    #[error("malformed identifier: {0}")]
    Malformed(#[from] FormatError),

    /// Network failure or 5xx.
    #[error("registry unavailable: {0}")]
    Transient(String),

    #[error("registry call timed out after {0:?}")]
    Timeout(Duration),

    /// 200 without a usable body.
    #[error("invalid registry response: {0}")]
    InvalidResponse(String),

    /// The breaker is OPEN (or HALF_OPEN and saturated).
    #[error("circuit '{name}' is open")]
    CircuitOpen {
        name: String,
        retry_after: Option<Duration>,
    },

    #[error("rate limited ({origin})")]
    RateLimited {
        origin: RateLimitOrigin,
        retry_after: Option<Duration>,
    },

    /// Credentials rejected. Needs an operator, not a retry.
    #[error("fatal configuration error: {0}")]
    FatalConfiguration(String),

    #[error("unexpected registry status {0}")]
    UnexpectedStatus(u16),
}

impl LookupError {
    /// True when retrying later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LookupError::Transient(_)
                | LookupError::Timeout(_)
                | LookupError::InvalidResponse(_)
                | LookupError::CircuitOpen { .. }
                | LookupError::RateLimited { .. }
        )
    }

    /// Stable machine-readable category.
    pub fn kind(&self) -> &'static str {
        match self {
            LookupError::Malformed(e) => e.reason(),
            LookupError::Transient(_) => "transient",
            LookupError::Timeout(_) => "timeout",
            LookupError::InvalidResponse(_) => "invalid_response",
            LookupError::CircuitOpen { .. } => "circuit_open",
            LookupError::RateLimited { .. } => "rate_limited",
            LookupError::FatalConfiguration(_) => "fatal_configuration",
            LookupError::UnexpectedStatus(_) => "unexpected_status",
        }
    }
}
