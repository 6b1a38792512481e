//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! validation pipeline. All types derive Serde traits for deserialization
//! from config files.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resilience::rate_limiter::AdmissionPolicy;

/// Root configuration for the registry validation pipeline.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Upstream registry endpoint and request policy.
    pub registry: RegistryConfig,

    /// Outbound admission control.
    pub rate_limit: RateLimitConfig,

    /// Default circuit policy, used for any dependency without an override.
    pub circuit_breaker: CircuitConfig,

    /// Per-dependency circuit overrides, keyed by dependency name.
    pub circuits: HashMap<String, CircuitConfig>,

    /// Cache layers and TTLs.
    pub cache: CacheConfig,

    /// Audit sink selection.
    pub audit: AuditConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Circuit policy for a named dependency (override or default).
    pub fn circuit_for(&self, name: &str) -> CircuitConfig {
        self.circuits
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.circuit_breaker.clone())
    }
}

/// Upstream registry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Base URL, without trailing slash.
    pub base_url: String,

    /// Path segment for 9-digit company lookups.
    pub company_path: String,

    /// Path segment for 14-digit establishment lookups.
    pub establishment_path: String,

    /// Name of the environment variable holding the API key.
    pub api_key_env: String,

    /// Header carrying the API key.
    pub api_key_header: String,

    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Retries after an upstream 429 before giving up.
    pub max_rate_limit_retries: u32,

    /// Base delay for 429 backoff when no Retry-After header is sent.
    pub backoff_base_ms: u64,

    /// Upper bound for any 429 backoff, including Retry-After.
    pub backoff_max_ms: u64,

    /// Circuit breaker name for the registry dependency.
    pub circuit_name: String,

    /// Admission policy used by `validate_identifier`.
    pub admission: AdmissionPolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.insee.fr/entreprises/sirene/V3.11".to_string(),
            company_path: "siren".to_string(),
            establishment_path: "siret".to_string(),
            api_key_env: "REGISTRY_API_KEY".to_string(),
            api_key_header: "X-INSEE-Api-Key-Integration".to_string(),
            connect_timeout_ms: 2_000,
            max_rate_limit_retries: 2,
            backoff_base_ms: 500,
            backoff_max_ms: 5_000,
            circuit_name: "registry".to_string(),
            admission: AdmissionPolicy::Wait,
        }
    }
}

/// Sliding-window rate limit configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Window width in milliseconds.
    pub window_ms: u64,

    /// Limit advertised by the upstream for one window.
    pub upstream_limit: u32,

    /// Fraction of the advertised limit actually used (0 < margin < 1).
    pub safety_margin: f64,

    /// Longest a waiting caller may be suspended, in milliseconds.
    pub max_wait_ms: u64,
}

impl RateLimitConfig {
    /// Admissions allowed per window after applying the safety margin.
    pub fn effective_limit(&self) -> usize {
        let limit = (self.upstream_limit as f64 * self.safety_margin).floor() as usize;
        limit.max(1)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            upstream_limit: 30,
            safety_margin: 0.8,
            max_wait_ms: 5_000,
        }
    }
}

/// Immutable circuit policy for one dependency.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitConfig {
    /// Consecutive failures that trip the circuit.
    pub failure_threshold: u32,

    /// Failure ratio that trips the circuit once `minimum_throughput` is reached.
    pub failure_rate_threshold: f64,

    /// Time spent OPEN before a probe is allowed, in milliseconds.
    pub recovery_timeout_ms: u64,

    /// Concurrent probes allowed while HALF_OPEN.
    pub half_open_max_calls: u32,

    /// Per-call deadline, in milliseconds. Exceeding it counts as a failure.
    pub call_timeout_ms: u64,

    /// Recorded calls required before the failure rate is considered.
    pub minimum_throughput: u64,
}

impl CircuitConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_rate_threshold: 0.5,
            recovery_timeout_ms: 60_000,
            half_open_max_calls: 1,
            call_timeout_ms: 10_000,
            minimum_throughput: 10,
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Capacity of the in-process layer.
    pub max_entries: usize,

    /// Namespace prefix for distributed keys (`prefix:category:key`).
    pub key_prefix: String,

    /// Redis URL. When absent an in-process stand-in is used.
    pub redis_url: Option<String>,

    /// JSON file backing the durable layer.
    pub durable_path: Option<String>,

    /// Pre-populate durable-backed categories at startup.
    pub warm_on_startup: bool,

    /// Circuit breaker name guarding the distributed layer.
    pub distributed_circuit_name: String,

    /// Per-category TTLs.
    pub ttl: CacheTtlConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            key_prefix: "registry".to_string(),
            redis_url: None,
            durable_path: None,
            warm_on_startup: true,
            distributed_circuit_name: "distributed_cache".to_string(),
            ttl: CacheTtlConfig::default(),
        }
    }
}

/// Default TTLs, in seconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheTtlConfig {
    pub company_secs: u64,
    pub establishment_secs: u64,
    pub supplier_secs: u64,
    /// Confirmed not-found markers, whatever their category.
    pub not_found_secs: u64,
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            company_secs: 86_400,
            establishment_secs: 21_600,
            supplier_secs: 3_600,
            not_found_secs: 3_600,
        }
    }
}

/// Where audit records are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuditSinkKind {
    /// Structured log line on the `audit` target.
    #[default]
    Log,
    /// Append-only JSON lines file at `audit.path`.
    JsonLines,
}

/// Audit configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuditConfig {
    pub sink: AuditSinkKind,
    pub path: Option<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub log_level: String,

    /// Emit JSON log lines instead of the human format.
    pub json_logs: bool,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Prometheus listener address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "registry_guard=info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9464".to_string(),
        }
    }
}
