//! Cache entries with lazy TTL.

use std::time::{Duration, Instant};

use serde::Serialize;

/// A cached value with its expiry and access bookkeeping.
///
/// Expired iff `now > created_at + ttl`. Expired entries are never returned,
/// only evicted.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub created_at: Instant,
    pub ttl: Duration,
    pub access_count: u64,
    pub last_access: Instant,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, ttl: Duration, now: Instant) -> Self {
        Self {
            value,
            created_at: now,
            ttl,
            access_count: 0,
            last_access: now,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now > self.created_at + self.ttl
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        (self.created_at + self.ttl).saturating_duration_since(now)
    }

    pub fn touch(&mut self, now: Instant) {
        self.access_count += 1;
        self.last_access = now;
    }

    pub fn info(&self, now: Instant) -> EntryInfo {
        EntryInfo {
            ttl: self.ttl,
            remaining: self.remaining(now),
            age: now.saturating_duration_since(self.created_at),
            access_count: self.access_count,
            since_last_access: now.saturating_duration_since(self.last_access),
        }
    }
}

/// Metadata about an in-process entry, read without touching recency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryInfo {
    pub ttl: Duration,
    pub remaining: Duration,
    pub age: Duration,
    pub access_count: u64,
    pub since_last_access: Duration,
}
