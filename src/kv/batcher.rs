use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{KvMetrics, KvStore};

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Queue length that triggers a flush without waiting for the timer,
    /// and the number of entries written per flush.
    pub max_batch: usize,
    pub flush_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch: 25,
            flush_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuedWrite {
    pub key: String,
    pub value: String,
    pub ttl: Option<Duration>,
    pub enqueued_at: Instant,
}

/// Delayed-flush queue for writes that may be lost.
///
/// Entries are written in enqueue order. A failed write is logged and
/// dropped, never retried: delivery is at-most-once.
pub struct WriteBatcher {
    store: Arc<dyn KvStore>,
    metrics: Arc<KvMetrics>,
    config: BatchConfig,
    queue: Mutex<VecDeque<QueuedWrite>>,
    timer_armed: AtomicBool,
    // serializes drains so two flushes cannot reorder writes to one key
    flush_lock: tokio::sync::Mutex<()>,
}

impl WriteBatcher {
    pub fn new(store: Arc<dyn KvStore>, metrics: Arc<KvMetrics>, config: BatchConfig) -> Self {
        Self {
            store,
            metrics,
            config: BatchConfig {
                max_batch: config.max_batch.max(1),
                ..config
            },
            queue: Mutex::new(VecDeque::new()),
            timer_armed: AtomicBool::new(false),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Queues a write. Reaching `max_batch` flushes inline; otherwise a
    /// single delayed flush is armed.
    pub async fn enqueue(self: &Arc<Self>, key: String, value: String, ttl: Option<Duration>) {
        let len = {
            let mut queue = self.queue.lock();
            queue.push_back(QueuedWrite {
                key,
                value,
                ttl,
                enqueued_at: Instant::now(),
            });
            queue.len()
        };

        if len >= self.config.max_batch {
            self.flush().await;
        } else {
            self.arm_timer();
        }
    }

    /// Drops queued writes for `key` so they cannot land after a newer
    /// immediate write or a delete. A batch already being flushed is not
    /// affected.
    pub fn discard(&self, key: &str) -> usize {
        let mut queue = self.queue.lock();
        let before = queue.len();
        queue.retain(|w| w.key != key);
        before - queue.len()
    }

    /// Drains up to one batch. Returns how many entries were taken off the
    /// queue, whether or not their writes succeeded.
    pub async fn flush(self: &Arc<Self>) -> usize {
        let _guard = self.flush_lock.lock().await;

        let batch: Vec<QueuedWrite> = {
            let mut queue = self.queue.lock();
            let n = queue.len().min(self.config.max_batch);
            queue.drain(..n).collect()
        };
        let taken = batch.len();

        for write in batch {
            match self.store.put(&write.key, write.value, write.ttl).await {
                Ok(()) => {
                    self.metrics.record_write();
                    debug!(
                        key = %write.key,
                        queued_ms = write.enqueued_at.elapsed().as_millis() as u64,
                        "batched write flushed"
                    );
                }
                Err(e) => warn!(key = %write.key, error = %e, "batched write dropped"),
            }
        }

        if self.pending() > 0 {
            self.arm_timer();
        }

        taken
    }

    /// Drains the whole queue, batch by batch.
    pub async fn flush_all(self: &Arc<Self>) -> usize {
        let mut total = 0;
        loop {
            let taken = self.flush().await;
            if taken == 0 {
                return total;
            }
            total += taken;
        }
    }

    fn arm_timer(self: &Arc<Self>) {
        if self.timer_armed.swap(true, Ordering::AcqRel) {
            return;
        }

        let batcher = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(batcher.config.flush_delay).await;
            batcher.timer_armed.store(false, Ordering::Release);
            batcher.flush().await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{MemoryKv, testing::FlakyKv};

    fn batcher(store: Arc<dyn KvStore>, max_batch: usize) -> Arc<WriteBatcher> {
        Arc::new(WriteBatcher::new(
            store,
            Arc::new(KvMetrics::default()),
            BatchConfig {
                max_batch,
                flush_delay: Duration::from_millis(100),
            },
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_flushes_inline_and_timer_flushes_rest() {
        let store = Arc::new(MemoryKv::new());
        let batcher = batcher(store.clone(), 3);

        for i in 0..5 {
            batcher
                .enqueue(format!("k{i}"), i.to_string(), None)
                .await;
        }

        // first three went out without waiting for the delay
        assert_eq!(store.len().await, 3);
        assert_eq!(batcher.pending(), 2);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(store.len().await, 5);
        assert_eq!(batcher.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_is_armed_once() {
        let store = Arc::new(MemoryKv::new());
        let batcher = batcher(store.clone(), 10);

        batcher.enqueue("a".into(), "1".into(), None).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        batcher.enqueue("b".into(), "2".into(), None).await;

        // the first timer fires at 100ms and carries both writes
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_writes_are_dropped() {
        let inner = Arc::new(MemoryKv::new());
        let store = Arc::new(FlakyKv::failing_puts(inner.clone(), "bad"));
        let batcher = batcher(store, 10);

        batcher.enqueue("good:1".into(), "1".into(), None).await;
        batcher.enqueue("bad:1".into(), "x".into(), None).await;
        batcher.enqueue("good:2".into(), "2".into(), None).await;

        assert_eq!(batcher.flush_all().await, 3);
        assert_eq!(batcher.pending(), 0);
        assert_eq!(inner.len().await, 2);
        assert!(inner.get("bad:1").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_preserves_enqueue_order() {
        let store = Arc::new(MemoryKv::new());
        let batcher = batcher(store.clone(), 10);

        batcher.enqueue("k".into(), "first".into(), None).await;
        batcher.enqueue("k".into(), "second".into(), None).await;
        batcher.flush_all().await;

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("second"));
    }
}
