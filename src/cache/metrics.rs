//! Per-layer cache counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::observability::metrics;

/// Live counters for one cache layer.
#[derive(Debug)]
pub struct LayerMetrics {
    layer: &'static str,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    errors: AtomicU64,
}

impl LayerMetrics {
    pub fn new(layer: &'static str) -> Self {
        Self {
            layer,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    fn bump(&self, counter: &AtomicU64, op: &'static str) {
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_op(self.layer, op);
    }

    pub fn hit(&self) {
        self.bump(&self.hits, "hit");
    }

    pub fn miss(&self) {
        self.bump(&self.misses, "miss");
    }

    pub fn set(&self) {
        self.bump(&self.sets, "set");
    }

    pub fn eviction(&self) {
        self.bump(&self.evictions, "eviction");
    }

    pub fn expiration(&self) {
        self.bump(&self.expirations, "expiration");
    }

    pub fn error(&self) {
        self.bump(&self.errors, "error");
    }

    pub fn snapshot(&self) -> LayerMetricsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        LayerMetricsSnapshot {
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }
}

/// Point-in-time counters for one layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LayerMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub errors: u64,
    /// hits / (hits + misses), 0 when nothing was looked up.
    pub hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let m = LayerMetrics::new("memory");
        assert_eq!(m.snapshot().hit_rate, 0.0);
        m.hit();
        m.hit();
        m.hit();
        m.miss();
        m.error();
        let snap = m.snapshot();
        assert_eq!(snap.hits, 3);
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.errors, 1);
        assert!((snap.hit_rate - 0.75).abs() < f64::EPSILON);
    }
}
