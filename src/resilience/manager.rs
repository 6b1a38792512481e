//! Registry of circuit breakers, one per named dependency.
//!
//! # Responsibilities
//! - Create breakers lazily on first use (override config or default)
//! - Keep dependencies isolated: two names never share state
//! - Aggregate health for observability

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::clock::Clock;
use crate::config::validation::validate_circuit;
use crate::resilience::circuit_breaker::{
    CircuitBreaker, CircuitConfig, CircuitSnapshot, CircuitState, InvalidCircuitConfig,
};

/// Aggregate health across every breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthSummary {
    /// Breakers currently CLOSED.
    pub healthy: usize,
    pub total: usize,
    /// Names of breakers that are OPEN or HALF_OPEN, sorted.
    pub degraded: Vec<String>,
}

impl HealthSummary {
    pub fn is_healthy(&self) -> bool {
        self.degraded.is_empty()
    }
}

/// Manages circuit breakers by dependency name.
#[derive(Debug)]
pub struct CircuitBreakerManager {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_config: CircuitConfig,
    overrides: HashMap<String, CircuitConfig>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerManager {
    /// Create a manager. Every policy is validated up front.
    pub fn new(
        default_config: CircuitConfig,
        overrides: HashMap<String, CircuitConfig>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, InvalidCircuitConfig> {
        validate_circuit("circuit_breaker", &default_config).map_err(|errors| {
            InvalidCircuitConfig {
                name: "default".to_string(),
                errors,
            }
        })?;
        for (name, config) in &overrides {
            validate_circuit(name, config).map_err(|errors| InvalidCircuitConfig {
                name: name.clone(),
                errors,
            })?;
        }

        Ok(Self {
            breakers: DashMap::new(),
            default_config,
            overrides,
            clock,
        })
    }

    /// Breaker for `name`, created on first use.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return existing.value().clone();
        }
        let config = self
            .overrides
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone());
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::info!(circuit = %name, "Circuit breaker created");
                Arc::new(CircuitBreaker::from_validated(
                    name.to_string(),
                    config,
                    self.clock.clone(),
                ))
            })
            .value()
            .clone()
    }

    /// Breaker for `name` with a caller-supplied policy.
    ///
    /// If the breaker already exists it is returned unchanged.
    pub fn get_or_create_with(
        &self,
        name: &str,
        config: CircuitConfig,
    ) -> Result<Arc<CircuitBreaker>, InvalidCircuitConfig> {
        if let Some(existing) = self.breakers.get(name) {
            return Ok(existing.value().clone());
        }
        let breaker = Arc::new(CircuitBreaker::new(name, config, self.clock.clone())?);
        Ok(self
            .breakers
            .entry(name.to_string())
            .or_insert(breaker)
            .value()
            .clone())
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| b.value().clone())
    }

    pub fn health_summary(&self) -> HealthSummary {
        let mut degraded: Vec<String> = self
            .breakers
            .iter()
            .filter(|b| b.value().state() != CircuitState::Closed)
            .map(|b| b.key().clone())
            .collect();
        degraded.sort();
        let total = self.breakers.len();

        HealthSummary {
            healthy: total - degraded.len(),
            total,
            degraded,
        }
    }

    /// Snapshot of every breaker, keyed by name.
    pub fn snapshots(&self) -> BTreeMap<String, CircuitSnapshot> {
        self.breakers
            .iter()
            .map(|b| (b.key().clone(), b.value().snapshot()))
            .collect()
    }

    /// Zero the metrics of every breaker.
    pub fn reset_all(&self) {
        for breaker in self.breakers.iter() {
            breaker.value().reset_metrics();
        }
    }
}
