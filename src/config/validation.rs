//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds, margins, timeouts)
//! - Check cross-field consistency (audit file sink needs a path)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;
use url::Url;

use crate::config::schema::{AppConfig, AuditSinkKind, CircuitConfig};

/// A single semantic violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Render violations as one comma-separated line.
pub fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Validate a whole configuration.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Err(e) = Url::parse(&config.registry.base_url) {
        errors.push(ValidationError::new(
            "registry.base_url",
            format!("invalid URL: {}", e),
        ));
    }
    if config.registry.api_key_header.trim().is_empty() {
        errors.push(ValidationError::new("registry.api_key_header", "must not be empty"));
    }
    if config.registry.backoff_base_ms > config.registry.backoff_max_ms {
        errors.push(ValidationError::new(
            "registry.backoff_base_ms",
            "must not exceed registry.backoff_max_ms",
        ));
    }

    let rl = &config.rate_limit;
    if rl.window_ms == 0 {
        errors.push(ValidationError::new("rate_limit.window_ms", "must be > 0"));
    }
    // The effective limit must stay strictly below the upstream quota.
    if rl.upstream_limit < 2 {
        errors.push(ValidationError::new("rate_limit.upstream_limit", "must be >= 2"));
    }
    if !(rl.safety_margin > 0.0 && rl.safety_margin < 1.0) {
        errors.push(ValidationError::new(
            "rate_limit.safety_margin",
            "must be in (0, 1)",
        ));
    }

    collect_circuit_errors("circuit_breaker", &config.circuit_breaker, &mut errors);
    for (name, circuit) in &config.circuits {
        collect_circuit_errors(&format!("circuits.{}", name), circuit, &mut errors);
    }

    if config.cache.max_entries == 0 {
        errors.push(ValidationError::new("cache.max_entries", "must be > 0"));
    }
    if config.cache.key_prefix.contains(':') || config.cache.key_prefix.is_empty() {
        errors.push(ValidationError::new(
            "cache.key_prefix",
            "must be non-empty and must not contain ':'",
        ));
    }
    let ttl = &config.cache.ttl;
    for (field, secs) in [
        ("cache.ttl.company_secs", ttl.company_secs),
        ("cache.ttl.establishment_secs", ttl.establishment_secs),
        ("cache.ttl.supplier_secs", ttl.supplier_secs),
        ("cache.ttl.not_found_secs", ttl.not_found_secs),
    ] {
        if secs == 0 {
            errors.push(ValidationError::new(field, "must be > 0"));
        }
    }
    if ttl.not_found_secs >= ttl.company_secs.min(ttl.establishment_secs) {
        errors.push(ValidationError::new(
            "cache.ttl.not_found_secs",
            "must be shorter than the positive-hit TTLs",
        ));
    }

    if config.audit.sink == AuditSinkKind::JsonLines && config.audit.path.is_none() {
        errors.push(ValidationError::new("audit.path", "required for the json_lines sink"));
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "must be a socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate one circuit policy.
pub fn validate_circuit(field: &str, config: &CircuitConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    collect_circuit_errors(field, config, &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn collect_circuit_errors(field: &str, config: &CircuitConfig, errors: &mut Vec<ValidationError>) {
    if config.failure_threshold == 0 {
        errors.push(ValidationError::new(
            format!("{}.failure_threshold", field),
            "must be >= 1",
        ));
    }
    if !(config.failure_rate_threshold > 0.0 && config.failure_rate_threshold <= 1.0) {
        errors.push(ValidationError::new(
            format!("{}.failure_rate_threshold", field),
            "must be in (0, 1]",
        ));
    }
    if config.recovery_timeout_ms == 0 {
        errors.push(ValidationError::new(
            format!("{}.recovery_timeout_ms", field),
            "must be > 0",
        ));
    }
    if config.half_open_max_calls == 0 {
        errors.push(ValidationError::new(
            format!("{}.half_open_max_calls", field),
            "must be >= 1",
        ));
    }
    if config.call_timeout_ms == 0 {
        errors.push(ValidationError::new(
            format!("{}.call_timeout_ms", field),
            "must be > 0",
        ));
    }
    if config.minimum_throughput == 0 {
        errors.push(ValidationError::new(
            format!("{}.minimum_throughput", field),
            "must be >= 1",
        ));
    }
}
