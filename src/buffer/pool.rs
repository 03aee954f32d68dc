//! Object pool
//!
//! Recycles objects that are expensive to allocate on a hot path.
//! Counters are lock-free atomics; the free list sits behind a short mutex.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;
type Reset<T> = Box<dyn Fn(&mut T) + Send + Sync>;

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// `acquire` served from the free list
    pub hits: u64,
    /// `acquire` had to construct a new object
    pub misses: u64,
    /// `release` dropped the object because the pool was full
    pub discarded: u64,
    /// Objects currently idle in the pool
    pub available: usize,
}

/// Bounded pool of reusable objects.
///
/// The reset function runs on `release`; it must clear everything the
/// previous user left behind. A stale object is a caller bug.
pub struct Pool<T> {
    items: Mutex<Vec<T>>,
    max_size: usize,
    factory: Factory<T>,
    reset: Reset<T>,
    hits: AtomicU64,
    misses: AtomicU64,
    discarded: AtomicU64,
}

impl<T> Pool<T> {
    pub fn new(
        max_size: usize,
        factory: impl Fn() -> T + Send + Sync + 'static,
        reset: impl Fn(&mut T) + Send + Sync + 'static,
    ) -> Self {
        Self {
            items: Mutex::new(Vec::with_capacity(max_size)),
            max_size,
            factory: Box::new(factory),
            reset: Box::new(reset),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Take an idle object, or build a fresh one if none is available
    pub fn acquire(&self) -> T {
        let pooled = self.items.lock().pop();
        match pooled {
            Some(item) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                item
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                (self.factory)()
            }
        }
    }

    /// Reset an object and return it to the pool (dropped if the pool is full)
    pub fn release(&self, mut item: T) {
        (self.reset)(&mut item);
        let mut items = self.items.lock();
        if items.len() < self.max_size {
            items.push(item);
        } else {
            drop(items);
            self.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            available: self.items.lock().len(),
        }
    }
}
