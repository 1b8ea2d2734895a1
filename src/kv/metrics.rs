use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// Process-local operation counters for the KV façade.
///
/// Reset once a day. They describe this instance only and will drift from
/// any persisted aggregate.
#[derive(Debug)]
pub struct KvMetrics {
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    last_reset: Mutex<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct KvMetricsSnapshot {
    pub reads: u64,
    pub writes: u64,
    pub deletes: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub hit_rate: f64,
    pub last_reset: DateTime<Utc>,
}

impl Default for KvMetrics {
    fn default() -> Self {
        Self {
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            last_reset: Mutex::new(Utc::now()),
        }
    }
}

impl KvMetrics {
    pub fn record_read(&self) {
        self.bump(&self.reads);
    }

    pub fn record_write(&self) {
        self.bump(&self.writes);
    }

    pub fn record_delete(&self) {
        self.bump(&self.deletes);
    }

    pub fn record_hit(&self) {
        self.bump(&self.cache_hits);
    }

    pub fn record_miss(&self) {
        self.bump(&self.cache_misses);
    }

    pub fn snapshot(&self) -> KvMetricsSnapshot {
        self.roll_over(Utc::now());
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.cache_misses.load(Ordering::Relaxed);
        let lookups = cache_hits + cache_misses;

        KvMetricsSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            cache_hits,
            cache_misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                cache_hits as f64 / lookups as f64
            },
            last_reset: *self.last_reset.lock(),
        }
    }

    pub fn reset(&self) {
        self.reset_at(Utc::now());
    }

    fn bump(&self, counter: &AtomicU64) {
        self.roll_over(Utc::now());
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn roll_over(&self, now: DateTime<Utc>) {
        let due = now - *self.last_reset.lock() >= Duration::days(1);
        if due {
            self.reset_at(now);
        }
    }

    fn reset_at(&self, now: DateTime<Utc>) {
        let mut last_reset = self.last_reset.lock();
        for counter in [
            &self.reads,
            &self.writes,
            &self.deletes,
            &self.cache_hits,
            &self.cache_misses,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *last_reset = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let metrics = KvMetrics::default();
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_miss();

        let snap = metrics.snapshot();
        assert_eq!(snap.cache_hits, 3);
        assert_eq!(snap.cache_misses, 1);
        assert!((snap.hit_rate - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_counters_roll_over_after_a_day() {
        let metrics = KvMetrics::default();
        metrics.record_write();
        *metrics.last_reset.lock() = Utc::now() - Duration::days(2);

        metrics.record_read();
        let snap = metrics.snapshot();
        assert_eq!(snap.writes, 0);
        assert_eq!(snap.reads, 1);
    }
}
