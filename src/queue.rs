//! Async batching queue
//!
//! Accumulates items and hands them to consumers in batches. A flush is
//! triggered when the queue reaches `batch_size`, by a periodic timer, or
//! explicitly.
//!
//! ```text
//!  push ──► [ VecDeque (≤ max_size) ] ──► flush ──► consumer 1
//!                                            │ ──► consumer 2
//!                                            └ ──► ...
//! ```
//!
//! # Guarantees
//!
//! - Overflow sheds the oldest item; producers never block
//! - At most one flush runs at a time; a concurrent `flush()` returns immediately
//! - Items are removed from the queue before any consumer sees them
//! - A failing (or panicking) consumer neither blocks the others nor leaves
//!   the queue stuck in the flushing state

use crate::buffer::{Pool, PoolStats};
use crate::error::{Result, ShipError};
use async_trait::async_trait;
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

/// Receives the batches formed by the queue
#[async_trait]
pub trait BatchConsumer<T>: Send + Sync {
    fn name(&self) -> &str;

    async fn consume(&self, batch: &[T]) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    pub max_size: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    /// Batch buffers kept for reuse
    pub pool_size: usize,
}

impl QueueConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(ShipError::ConfigValidation {
                field: "queue.max_size",
                reason: "must be greater than zero".into(),
            });
        }
        if self.batch_size == 0 || self.batch_size > self.max_size {
            return Err(ShipError::ConfigValidation {
                field: "queue.batch_size",
                reason: format!("must be within 1..={}", self.max_size),
            });
        }
        if self.flush_interval.is_zero() {
            return Err(ShipError::ConfigValidation {
                field: "queue.flush_interval_ms",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

/// Clears the flushing flag however the flush ends
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct AsyncQueue<T> {
    config: QueueConfig,
    items: Mutex<VecDeque<T>>,
    consumers: RwLock<Vec<Arc<dyn BatchConsumer<T>>>>,
    flushing: AtomicBool,
    stopped: AtomicBool,
    flush_requested: Notify,
    shutdown: Notify,
    pool: Pool<VecDeque<T>>,
    shed: AtomicU64,
    flushes: AtomicU64,
}

impl<T: Send + Sync + 'static> AsyncQueue<T> {
    pub fn new(config: QueueConfig) -> Result<Self> {
        config.validate()?;
        let batch_size = config.batch_size;
        Ok(Self {
            config,
            items: Mutex::new(VecDeque::with_capacity(batch_size)),
            consumers: RwLock::new(Vec::new()),
            flushing: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            flush_requested: Notify::new(),
            shutdown: Notify::new(),
            pool: Pool::new(
                config.pool_size,
                move || VecDeque::with_capacity(batch_size),
                |buf: &mut VecDeque<T>| buf.clear(),
            ),
            shed: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
        })
    }

    /// Register a consumer; every later batch is fanned out to it
    pub fn add_consumer(&self, consumer: Arc<dyn BatchConsumer<T>>) {
        self.consumers.write().push(consumer);
    }

    /// Append an item. Returns `false` if the oldest item was shed to make room.
    pub fn push(&self, item: T) -> bool {
        let (len, shed) = {
            let mut items = self.items.lock();
            let shed = if items.len() >= self.config.max_size {
                items.pop_front();
                true
            } else {
                false
            };
            items.push_back(item);
            (items.len(), shed)
        };

        if shed {
            let total = self.shed.fetch_add(1, Ordering::Relaxed) + 1;
            if total.is_power_of_two() {
                warn!("Queue full ({}), shed {} items so far", self.config.max_size, total);
            }
        }
        if len >= self.config.batch_size {
            self.flush_requested.notify_one();
        }
        !shed
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::Acquire)
    }

    /// Items dropped by overflow shedding
    pub fn shed_count(&self) -> u64 {
        self.shed.load(Ordering::Relaxed)
    }

    /// Completed flushes that delivered a non-empty batch
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Remove everything currently queued without delivering it
    pub fn take_all(&self) -> Vec<T> {
        self.items.lock().drain(..).collect()
    }

    /// Hand the current contents to every consumer.
    ///
    /// Returns `false` without doing anything if another flush is running.
    pub async fn flush(&self) -> bool {
        if self.flushing.swap(true, Ordering::AcqRel) {
            return false;
        }
        let _guard = FlushGuard(&self.flushing);

        let mut batch = {
            let mut items = self.items.lock();
            if items.is_empty() {
                return true;
            }
            std::mem::replace(&mut *items, self.pool.acquire())
        };

        let consumers: Vec<_> = self.consumers.read().iter().cloned().collect();
        let slice = batch.make_contiguous();
        for consumer in consumers {
            match AssertUnwindSafe(consumer.consume(slice)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Consumer {} failed: {}", consumer.name(), e),
                Err(_) => error!("Consumer {} panicked during flush", consumer.name()),
            }
        }
        debug!("Flushed batch of {}", slice.len());
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.pool.release(batch);
        true
    }

    /// Flush until the queue is empty and no flush is running
    pub async fn drain(&self) {
        loop {
            let ran = self.flush().await;
            if ran && self.is_empty() {
                return;
            }
            if !ran {
                // Another flush owns the queue; let it finish.
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
    }

    /// Start the background task serving size and timer triggers
    pub fn spawn_worker(self: &Arc<Self>) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(queue.config.flush_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = queue.shutdown.notified() => break,
                    _ = queue.flush_requested.notified() => {}
                    _ = ticker.tick() => {}
                }
                if queue.stopped.load(Ordering::Acquire) {
                    break;
                }
                if !queue.is_empty() {
                    queue.flush().await;
                }
            }
            debug!("Queue worker stopped");
        })
    }

    /// Stop the background task; queued items stay in place
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.shutdown.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        batches: Mutex<Vec<Vec<u32>>>,
        fail: bool,
    }

    impl Recorder {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                batches: Mutex::new(Vec::new()),
                fail,
            })
        }
    }

    #[async_trait]
    impl BatchConsumer<u32> for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn consume(&self, batch: &[u32]) -> Result<()> {
            self.batches.lock().push(batch.to_vec());
            if self.fail {
                return Err(ShipError::NotConnected);
            }
            Ok(())
        }
    }

    struct Panicker;

    #[async_trait]
    impl BatchConsumer<u32> for Panicker {
        fn name(&self) -> &str {
            "panicker"
        }

        async fn consume(&self, _batch: &[u32]) -> Result<()> {
            panic!("consumer bug");
        }
    }

    fn config(max_size: usize, batch_size: usize) -> QueueConfig {
        QueueConfig {
            max_size,
            batch_size,
            flush_interval: Duration::from_secs(3600),
            pool_size: 2,
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(AsyncQueue::<u32>::new(config(0, 1)).is_err());
        assert!(AsyncQueue::<u32>::new(config(10, 0)).is_err());
        assert!(AsyncQueue::<u32>::new(config(10, 11)).is_err());
    }

    #[test]
    fn test_overflow_sheds_oldest() {
        let queue = AsyncQueue::new(config(3, 3)).unwrap();
        assert!(queue.push(1));
        assert!(queue.push(2));
        assert!(queue.push(3));
        assert!(!queue.push(4));

        assert_eq!(queue.take_all(), vec![2, 3, 4]);
        assert_eq!(queue.shed_count(), 1);
    }

    #[tokio::test]
    async fn test_batch_size_triggers_single_flush() {
        let queue = Arc::new(AsyncQueue::new(config(100, 3)).unwrap());
        let recorder = Recorder::new(false);
        queue.add_consumer(recorder.clone());
        let worker = queue.spawn_worker();

        queue.push(1);
        queue.push(2);
        queue.push(3);

        tokio::time::timeout(Duration::from_secs(1), async {
            while recorder.batches.lock().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("flush not triggered");

        assert_eq!(*recorder.batches.lock(), vec![vec![1, 2, 3]]);
        assert!(queue.is_empty());

        queue.stop();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_timer_triggers_flush() {
        let queue = Arc::new(
            AsyncQueue::new(QueueConfig {
                flush_interval: Duration::from_millis(20),
                ..config(100, 50)
            })
            .unwrap(),
        );
        let recorder = Recorder::new(false);
        queue.add_consumer(recorder.clone());
        let worker = queue.spawn_worker();

        queue.push(7);
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(*recorder.batches.lock(), vec![vec![7]]);
        queue.stop();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_reentrant_flush_is_noop() {
        let queue = AsyncQueue::new(config(10, 10)).unwrap();
        queue.push(1);
        queue.flushing.store(true, Ordering::Release);

        assert!(!queue.flush().await);
        assert_eq!(queue.len(), 1);

        queue.flushing.store(false, Ordering::Release);
        assert!(queue.flush().await);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_failing_consumer_does_not_block_others() {
        let queue = AsyncQueue::new(config(10, 10)).unwrap();
        let bad = Recorder::new(true);
        let good = Recorder::new(false);
        queue.add_consumer(bad.clone());
        queue.add_consumer(Arc::new(Panicker));
        queue.add_consumer(good.clone());

        queue.push(1);
        queue.push(2);
        assert!(queue.flush().await);

        assert_eq!(*bad.batches.lock(), vec![vec![1, 2]]);
        assert_eq!(*good.batches.lock(), vec![vec![1, 2]]);
        assert!(!queue.is_flushing());

        // Still usable after a consumer panicked
        queue.push(3);
        assert!(queue.flush().await);
        assert_eq!(good.batches.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_batch_buffers_are_recycled() {
        let queue = AsyncQueue::new(config(10, 10)).unwrap();
        for round in 0..3 {
            queue.push(round);
            queue.flush().await;
        }
        let stats = queue.pool_stats();
        assert!(stats.hits >= 1, "{:?}", stats);
    }
}
