//! Layered cache orchestration.
//!
//! # Responsibilities
//! - Read through L1 → L2 → L3, promoting hits to the faster layers
//! - Write L1 and L2 together
//! - Invalidate single keys and glob patterns on every writable layer
//! - Warm durable-backed categories at startup
//!
//! # Key Format
//! - L1: `category:key`
//! - L2: `prefix:category:key`, value `{"value": .., "ttl_secs": .., "stored_at": ..}`

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::cache::distributed::DistributedCache;
use crate::cache::durable::DurableStore;
use crate::cache::entry::{CacheEntry, EntryInfo};
use crate::cache::memory::{Lookup, LruStore};
use crate::cache::metrics::{LayerMetrics, LayerMetricsSnapshot};
use crate::cache::pattern::glob_match;
use crate::cache::{CacheCategory, CacheError};
use crate::clock::Clock;
use crate::config::schema::{CacheConfig, CacheTtlConfig};
use crate::resilience::circuit_breaker::{CallError, CircuitBreaker};

/// Outcome of a warm-up run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WarmReport {
    /// Entries loaded into the cache.
    pub loaded: usize,
    /// Categories whose durable read failed.
    pub failed: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope<V> {
    value: V,
    ttl_secs: u64,
    stored_at: DateTime<Utc>,
}

impl<V> Envelope<V> {
    fn remaining(&self) -> Option<Duration> {
        let age = Utc::now()
            .signed_duration_since(self.stored_at)
            .to_std()
            .unwrap_or_default();
        Duration::from_secs(self.ttl_secs)
            .checked_sub(age)
            .filter(|d| !d.is_zero())
    }
}

#[derive(Debug)]
struct DistributedLayer {
    cache: Arc<dyn DistributedCache>,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl DistributedLayer {
    async fn guarded<R, F>(&self, op: F) -> Result<R, CacheError>
    where
        F: Future<Output = Result<R, CacheError>>,
    {
        match &self.breaker {
            Some(breaker) => breaker.call(op).await.map_err(|e| match e {
                CallError::Rejected(open) => CacheError::CircuitOpen(open.name),
                CallError::Timeout(after) => CacheError::Timeout(after),
                CallError::Inner(e) => e,
            }),
            None => op.await,
        }
    }
}

#[derive(Debug)]
struct CacheMetrics {
    memory: LayerMetrics,
    distributed: LayerMetrics,
    durable: LayerMetrics,
}

/// Three-layer cache for values of type `T`.
#[derive(Debug)]
pub struct MultiLayerCache<T> {
    memory: Mutex<LruStore<T>>,
    distributed: Option<DistributedLayer>,
    durable: Option<Arc<dyn DurableStore<T>>>,
    prefix: String,
    ttl: CacheTtlConfig,
    clock: Arc<dyn Clock>,
    metrics: CacheMetrics,
}

impl<T> MultiLayerCache<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// In-process layer only; attach the others with the `with_*` builders.
    pub fn new(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            memory: Mutex::new(LruStore::new(config.max_entries)),
            distributed: None,
            durable: None,
            prefix: config.key_prefix.clone(),
            ttl: config.ttl.clone(),
            clock,
            metrics: CacheMetrics {
                memory: LayerMetrics::new("memory"),
                distributed: LayerMetrics::new("distributed"),
                durable: LayerMetrics::new("durable"),
            },
        }
    }

    /// Attach a distributed layer, optionally guarded by a circuit breaker.
    pub fn with_distributed(
        mut self,
        cache: Arc<dyn DistributedCache>,
        breaker: Option<Arc<CircuitBreaker>>,
    ) -> Self {
        self.distributed = Some(DistributedLayer { cache, breaker });
        self
    }

    pub fn with_durable(mut self, store: Arc<dyn DurableStore<T>>) -> Self {
        self.durable = Some(store);
        self
    }

    pub fn ttl_for(&self, category: CacheCategory) -> Duration {
        category.default_ttl(&self.ttl)
    }

    /// TTL applied to confirmed not-found markers.
    pub fn not_found_ttl(&self) -> Duration {
        Duration::from_secs(self.ttl.not_found_secs)
    }

    fn memory(&self) -> MutexGuard<'_, LruStore<T>> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn memory_key(category: CacheCategory, key: &str) -> String {
        format!("{}:{}", category.as_str(), key)
    }

    fn distributed_key(&self, category: CacheCategory, key: &str) -> String {
        format!("{}:{}:{}", self.prefix, category.as_str(), key)
    }

    fn store_local(&self, category: CacheCategory, key: &str, value: T, ttl: Duration) {
        let entry = CacheEntry::new(value, ttl, self.clock.now());
        let evicted = self.memory().insert(Self::memory_key(category, key), entry);
        self.metrics.memory.set();
        if let Some(evicted) = evicted {
            self.metrics.memory.eviction();
            tracing::trace!(key = %evicted, "Evicted least recently used entry");
        }
    }

    /// Read through every layer. Layer failures are logged and treated as misses.
    pub async fn get(&self, category: CacheCategory, key: &str) -> Option<T> {
        let lookup = self
            .memory()
            .get(&Self::memory_key(category, key), self.clock.now());
        match lookup {
            Lookup::Hit(value) => {
                self.metrics.memory.hit();
                return Some(value);
            }
            Lookup::Expired => {
                self.metrics.memory.expiration();
                self.metrics.memory.miss();
            }
            Lookup::Miss => self.metrics.memory.miss(),
        }

        if let Some(value) = self.get_distributed(category, key).await {
            return Some(value);
        }

        if category.durable_backed() {
            if let Some(value) = self.get_durable(category, key).await {
                return Some(value);
            }
        }

        None
    }

    async fn get_distributed(&self, category: CacheCategory, key: &str) -> Option<T> {
        let layer = self.distributed.as_ref()?;
        let dkey = self.distributed_key(category, key);

        let raw = match layer.guarded(layer.cache.get(&dkey)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.metrics.distributed.miss();
                return None;
            }
            Err(e) => {
                self.metrics.distributed.error();
                tracing::warn!(category = %category, error = %e, "Distributed cache read failed");
                return None;
            }
        };

        let envelope: Envelope<T> = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                self.metrics.distributed.error();
                tracing::warn!(category = %category, error = %e, "Dropping corrupt distributed cache value");
                if let Err(e) = layer.guarded(layer.cache.del(&dkey)).await {
                    tracing::debug!(error = %e, "Failed to delete corrupt value");
                }
                return None;
            }
        };

        match envelope.remaining() {
            Some(remaining) => {
                self.metrics.distributed.hit();
                self.store_local(category, key, envelope.value.clone(), remaining);
                Some(envelope.value)
            }
            None => {
                self.metrics.distributed.miss();
                None
            }
        }
    }

    async fn get_durable(&self, category: CacheCategory, key: &str) -> Option<T> {
        let store = self.durable.as_ref()?;
        match store.fetch(category, key).await {
            Ok(Some(value)) => {
                self.metrics.durable.hit();
                self.set(category, key, value.clone(), None).await;
                Some(value)
            }
            Ok(None) => {
                self.metrics.durable.miss();
                None
            }
            Err(e) => {
                self.metrics.durable.error();
                tracing::warn!(category = %category, error = %e, "Durable store read failed");
                None
            }
        }
    }

    /// Write to L1 and L2. `ttl` overrides the category default.
    pub async fn set(&self, category: CacheCategory, key: &str, value: T, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or_else(|| self.ttl_for(category));

        let encoded = self.distributed.as_ref().map(|_| {
            serde_json::to_string(&Envelope {
                value: &value,
                ttl_secs: ttl.as_secs().max(1),
                stored_at: Utc::now(),
            })
        });

        self.store_local(category, key, value, ttl);

        let Some(layer) = &self.distributed else {
            return;
        };
        let result = match encoded {
            Some(Ok(raw)) => {
                let dkey = self.distributed_key(category, key);
                layer.guarded(layer.cache.set_ex(&dkey, &raw, ttl)).await
            }
            Some(Err(e)) => Err(CacheError::from(e)),
            None => Ok(()),
        };
        match result {
            Ok(()) => self.metrics.distributed.set(),
            Err(e) => {
                self.metrics.distributed.error();
                tracing::warn!(category = %category, error = %e, "Distributed cache write failed");
            }
        }
    }

    /// Drop `key` from L1 and L2.
    pub async fn invalidate(&self, category: CacheCategory, key: &str) {
        self.memory().remove(&Self::memory_key(category, key));

        if let Some(layer) = &self.distributed {
            let dkey = self.distributed_key(category, key);
            if let Err(e) = layer.guarded(layer.cache.del(&dkey)).await {
                self.metrics.distributed.error();
                tracing::warn!(category = %category, error = %e, "Distributed cache delete failed");
            }
        }
    }

    /// Drop every key of `category` matching the glob `pattern` from L1 and
    /// L2. Returns the number of entries removed across both layers.
    pub async fn invalidate_pattern(&self, category: CacheCategory, pattern: &str) -> u64 {
        let scope = format!("{}:", category.as_str());
        let local = self.memory().remove_matching(|k| {
            k.strip_prefix(&scope)
                .map_or(false, |rest| glob_match(pattern, rest))
        }) as u64;

        let mut remote = 0;
        if let Some(layer) = &self.distributed {
            let dpattern = self.distributed_key(category, pattern);
            match layer.guarded(layer.cache.del_matching(&dpattern)).await {
                Ok(n) => remote = n,
                Err(e) => {
                    self.metrics.distributed.error();
                    tracing::warn!(category = %category, error = %e, "Distributed pattern delete failed");
                }
            }
        }

        tracing::info!(category = %category, pattern, local, remote, "Cache pattern invalidated");
        local + remote
    }

    /// L1 metadata for `key`, without touching recency.
    pub fn peek(&self, category: CacheCategory, key: &str) -> Option<EntryInfo> {
        let now = self.clock.now();
        self.memory()
            .peek(&Self::memory_key(category, key))
            .map(|entry| entry.info(now))
    }

    /// Entries currently held in L1.
    pub fn local_len(&self) -> usize {
        self.memory().len()
    }

    /// Bulk-load durable-backed categories. Never fails; problems are
    /// reported in the returned [`WarmReport`].
    pub async fn warm(&self, categories: &[CacheCategory]) -> WarmReport {
        let mut report = WarmReport::default();
        let Some(store) = &self.durable else {
            return report;
        };

        for &category in categories.iter().filter(|c| c.durable_backed()) {
            match store.fetch_all(category).await {
                Ok(entries) => {
                    for (key, value) in entries {
                        self.set(category, &key, value, None).await;
                        report.loaded += 1;
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    self.metrics.durable.error();
                    tracing::warn!(category = %category, error = %e, "Cache warm-up failed");
                }
            }
        }

        tracing::info!(loaded = report.loaded, failed = report.failed, "Cache warm-up finished");
        report
    }

    /// Counters per layer, keyed `memory`, `distributed`, `durable`.
    pub fn metrics(&self) -> BTreeMap<String, LayerMetricsSnapshot> {
        let mut out = BTreeMap::new();
        out.insert("memory".to_string(), self.metrics.memory.snapshot());
        out.insert("distributed".to_string(), self.metrics.distributed.snapshot());
        out.insert("durable".to_string(), self.metrics.durable.snapshot());
        out
    }
}
