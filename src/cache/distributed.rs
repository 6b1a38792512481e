//! Distributed (layer 2) cache backends.
//!
//! Backends store opaque strings under fully qualified keys
//! (`prefix:category:key`); envelope encoding and TTL bookkeeping belong to
//! the layered cache.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use crate::cache::pattern::glob_match;
use crate::cache::CacheError;
use crate::clock::Clock;

/// Key-value store shared by every process instance.
#[async_trait]
pub trait DistributedCache: Send + Sync + fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store `value` under `key` for `ttl` (whole seconds, at least one).
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    async fn del(&self, key: &str) -> Result<bool, CacheError>;

    /// Delete every key matching the glob `pattern`. Returns how many went.
    async fn del_matching(&self, pattern: &str) -> Result<u64, CacheError>;
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

/// Redis-backed layer 2.
#[derive(Clone)]
pub struct RedisCache {
    connection: ConnectionManager,
}

impl fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCache").finish_non_exhaustive()
    }
}

impl RedisCache {
    /// Connect to Redis. The connection manager reconnects on its own after
    /// transient failures.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        tracing::info!("Connected to distributed cache");
        Ok(Self { connection })
    }
}

#[async_trait]
impl DistributedCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection.clone();
        let _: () = redis::cmd("SETEX")
            .arg(key)
            .arg(ttl_secs(ttl))
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.connection.clone();
        let removed: u64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn del_matching(&self, pattern: &str) -> Result<u64, CacheError> {
        let mut conn = self.connection.clone();
        let mut cursor: u64 = 0;
        let mut removed = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let n: u64 = conn.del(&keys).await?;
                removed += n;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(removed)
    }
}

/// Process-local stand-in for deployments without Redis, and for tests.
///
/// Honors TTLs through the injected clock. [`set_available`](Self::set_available)
/// simulates an outage: every call fails with [`CacheError::Backend`].
#[derive(Debug)]
pub struct InMemoryDistributedCache {
    entries: DashMap<String, (String, Instant)>,
    available: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl InMemoryDistributedCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            available: AtomicBool::new(true),
            clock,
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Live entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries.iter().filter(|e| e.value().1 > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::Backend("distributed cache unavailable".to_string()))
        }
    }
}

#[async_trait]
impl DistributedCache for InMemoryDistributedCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check()?;
        let now = self.clock.now();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.value().1 > now => return Ok(Some(entry.value().0.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.check()?;
        let expires = self.clock.now() + Duration::from_secs(ttl_secs(ttl));
        self.entries
            .insert(key.to_string(), (value.to_string(), expires));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, CacheError> {
        self.check()?;
        Ok(self.entries.remove(key).is_some())
    }

    async fn del_matching(&self, pattern: &str) -> Result<u64, CacheError> {
        self.check()?;
        let before = self.entries.len();
        self.entries.retain(|key, _| !glob_match(pattern, key));
        Ok((before - self.entries.len()) as u64)
    }
}
