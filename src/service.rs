//! Public validation API.
//!
//! [`ValidationService`] is built once at startup from an [`AppConfig`] and
//! explicit [`ServiceDeps`], then shared by reference. It owns the breaker
//! manager, the rate limiter, the cache and the registry client; nothing is
//! global, so tests build isolated instances.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::cache::{
    CacheCategory, DistributedCache, DurableStore, InMemoryDistributedCache, JsonFileStore,
    LayerMetricsSnapshot, MultiLayerCache, RedisCache, WarmReport,
};
use crate::clock::{Clock, SystemClock};
use crate::config::schema::{AppConfig, AuditSinkKind};
use crate::config::validation::{join_errors, validate_config, ValidationError};
use crate::identifier::{normalize, Identifier};
use crate::registry::{
    AuditError, AuditSink, CachedLookup, JsonLinesAuditSink, LookupError, RegistryClient,
    TracingAuditSink, Verdict,
};
use crate::resilience::circuit_breaker::{CircuitSnapshot, InvalidCircuitConfig};
use crate::resilience::manager::{CircuitBreakerManager, HealthSummary};
use crate::resilience::rate_limiter::{AdmissionPolicy, SlidingWindowLimiter};

/// Service construction failed.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid configuration: {}", join_errors(.0))]
    Config(Vec<ValidationError>),

    #[error(transparent)]
    Circuit(#[from] InvalidCircuitConfig),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Audit sink error: {0}")]
    Audit(#[from] AuditError),
}

/// External collaborators, injected at construction.
#[derive(Debug)]
pub struct ServiceDeps {
    pub clock: Arc<dyn Clock>,
    /// Layer 2. `None` runs with the in-process layer only.
    pub distributed: Option<Arc<dyn DistributedCache>>,
    /// Layer 3 for durable-backed categories.
    pub durable: Option<Arc<dyn DurableStore<CachedLookup>>>,
    pub audit: Arc<dyn AuditSink>,
    pub api_key: Option<String>,
}

impl Default for ServiceDeps {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            distributed: None,
            durable: None,
            audit: Arc::new(TracingAuditSink),
            api_key: None,
        }
    }
}

impl ServiceDeps {
    /// Wire collaborators from configuration and the environment.
    ///
    /// An unreachable Redis or unreadable durable file degrades to the
    /// in-process stand-in or no durable layer; only the audit sink is
    /// mandatory.
    pub async fn from_config(config: &AppConfig) -> Result<Self, ServiceError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let distributed: Arc<dyn DistributedCache> = match &config.cache.redis_url {
            Some(url) => match RedisCache::connect(url).await {
                Ok(redis) => Arc::new(redis),
                Err(e) => {
                    tracing::error!(error = %e, "Redis unreachable, using in-process distributed cache");
                    Arc::new(InMemoryDistributedCache::new(clock.clone()))
                }
            },
            None => Arc::new(InMemoryDistributedCache::new(clock.clone())),
        };

        let durable = match &config.cache.durable_path {
            Some(path) => match JsonFileStore::<CachedLookup>::load(path) {
                Ok(store) => Some(Arc::new(store) as Arc<dyn DurableStore<CachedLookup>>),
                Err(e) => {
                    tracing::error!(error = %e, path = %path, "Durable cache unavailable");
                    None
                }
            },
            None => None,
        };

        let audit: Arc<dyn AuditSink> = match (config.audit.sink, &config.audit.path) {
            (AuditSinkKind::JsonLines, Some(path)) => Arc::new(JsonLinesAuditSink::open(path).await?),
            _ => Arc::new(TracingAuditSink),
        };

        let api_key = std::env::var(&config.registry.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty());

        Ok(Self {
            clock,
            distributed: Some(distributed),
            durable,
            audit,
            api_key,
        })
    }
}

/// Validates business identifiers against the registry.
#[derive(Debug)]
pub struct ValidationService {
    default_policy: AdmissionPolicy,
    breakers: Arc<CircuitBreakerManager>,
    limiter: Arc<SlidingWindowLimiter>,
    cache: Arc<MultiLayerCache<CachedLookup>>,
    client: RegistryClient,
}

impl ValidationService {
    pub fn new(config: &AppConfig, deps: ServiceDeps) -> Result<Self, ServiceError> {
        validate_config(config).map_err(ServiceError::Config)?;

        let breakers = Arc::new(CircuitBreakerManager::new(
            config.circuit_breaker.clone(),
            config.circuits.clone(),
            deps.clock.clone(),
        )?);
        let limiter = Arc::new(SlidingWindowLimiter::from_config(
            &config.rate_limit,
            deps.clock.clone(),
        ));

        let mut cache = MultiLayerCache::new(&config.cache, deps.clock.clone());
        if let Some(distributed) = deps.distributed {
            let breaker = breakers.get_or_create(&config.cache.distributed_circuit_name);
            cache = cache.with_distributed(distributed, Some(breaker));
        }
        if let Some(durable) = deps.durable {
            cache = cache.with_durable(durable);
        }
        let cache = Arc::new(cache);

        let client = RegistryClient::new(
            config.registry.clone(),
            deps.api_key,
            limiter.clone(),
            breakers.get_or_create(&config.registry.circuit_name),
            cache.clone(),
            deps.audit,
        )?;

        tracing::info!(
            registry = %config.registry.base_url,
            rate_limit = limiter.limit(),
            cache_entries = config.cache.max_entries,
            "Validation service ready"
        );

        Ok(Self {
            default_policy: config.registry.admission,
            breakers,
            limiter,
            cache,
            client,
        })
    }

    /// Validate with the configured admission policy.
    pub async fn validate_identifier(&self, id: &str) -> Result<Verdict, LookupError> {
        self.validate_identifier_with(id, self.default_policy).await
    }

    /// Validate with an explicit admission policy. Grouping spaces are ignored.
    pub async fn validate_identifier_with(
        &self,
        id: &str,
        policy: AdmissionPolicy,
    ) -> Result<Verdict, LookupError> {
        self.client.lookup(&normalize(id), policy).await
    }

    /// State and metrics of every circuit breaker, keyed by dependency name.
    pub fn get_circuit_health(&self) -> BTreeMap<String, CircuitSnapshot> {
        self.breakers.snapshots()
    }

    /// Hit/miss counters per cache layer.
    pub fn get_cache_metrics(&self) -> BTreeMap<String, LayerMetricsSnapshot> {
        self.cache.metrics()
    }

    pub fn health_summary(&self) -> HealthSummary {
        self.breakers.health_summary()
    }

    /// Pre-populate durable-backed categories. Best effort.
    pub async fn warm_cache(&self) -> WarmReport {
        self.cache.warm(&CacheCategory::ALL).await
    }

    /// Forget the cached answer for `id`.
    pub async fn invalidate(&self, id: &str) -> Result<(), LookupError> {
        let id = Identifier::parse(&normalize(id))?;
        self.cache
            .invalidate(id.class().cache_category(), id.as_str())
            .await;
        Ok(())
    }

    pub fn breakers(&self) -> &CircuitBreakerManager {
        &self.breakers
    }

    pub fn limiter(&self) -> &SlidingWindowLimiter {
        &self.limiter
    }

    /// The shared cache, for collaborators reading durable-backed categories.
    pub fn cache(&self) -> &MultiLayerCache<CachedLookup> {
        &self.cache
    }
}
