//! Pipeline counters
//!
//! Lock-free atomics, bumped on the hot path and read as a snapshot.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Minimum spacing between two delivery-rate computations (seconds)
const RATE_UPDATE_MIN_INTERVAL_SECS: f64 = 0.1;

/// What happened to an entry (or batch) at some stage of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    /// Passed every gate and entered history and the queue
    Accepted,
    /// Below the minimum level or rejected by a filter
    Filtered,
    /// Dropped by a plugin's `before_log`
    PluginDropped,
    SampledOut,
    RateLimited,
    Deduplicated,
    /// Entries a sink reports as sent
    Delivered,
    /// Entries a sink stored offline instead of sending
    Parked,
    /// Batches a sink returned an error for
    FailedBatches,
}

const COUNTERS: usize = 9;

impl Counter {
    fn index(self) -> usize {
        self as usize
    }
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub filtered: u64,
    pub plugin_dropped: u64,
    pub sampled_out: u64,
    pub rate_limited: u64,
    pub deduplicated: u64,
    pub delivered: u64,
    pub parked: u64,
    pub failed_batches: u64,
    pub queue_shed: u64,
    pub offline_enqueued: u64,
    pub offline_pending: u64,
    pub offline_replayed: u64,
    pub offline_dropped: u64,
    /// Delivered entries per second since the previous snapshot
    pub delivery_rate: f64,
}

pub struct Stats {
    counters: [AtomicU64; COUNTERS],
    /// Delivered total at last rate calculation
    delivered_snapshot: AtomicU64,
    start_time: Instant,
    /// Nanoseconds since start_time at last rate calculation
    last_calc_nanos: AtomicU64,
    /// Cached rate in entries/sec (stored as f64 bits)
    rate: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            counters: Default::default(),
            delivered_snapshot: AtomicU64::new(0),
            start_time: Instant::now(),
            last_calc_nanos: AtomicU64::new(0),
            rate: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn incr(&self, counter: Counter) {
        self.add(counter, 1);
    }

    #[inline]
    pub fn add(&self, counter: Counter, n: u64) {
        self.counters[counter.index()].fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }

    /// Delivered entries per second since the last call
    pub fn delivery_rate(&self) -> f64 {
        let now_nanos = self.start_time.elapsed().as_nanos() as u64;
        let last_nanos = self.last_calc_nanos.load(Ordering::Relaxed);
        let elapsed = now_nanos.saturating_sub(last_nanos) as f64 / 1_000_000_000.0;

        if elapsed < RATE_UPDATE_MIN_INTERVAL_SECS {
            return f64::from_bits(self.rate.load(Ordering::Relaxed));
        }
        // Another caller is computing it; use the cached value
        if self
            .last_calc_nanos
            .compare_exchange(last_nanos, now_nanos, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return f64::from_bits(self.rate.load(Ordering::Relaxed));
        }

        let now = self.get(Counter::Delivered);
        let prev = self.delivered_snapshot.swap(now, Ordering::Relaxed);
        let rate = now.saturating_sub(prev) as f64 / elapsed;
        self.rate.store(rate.to_bits(), Ordering::Relaxed);
        rate
    }

    /// Snapshot of the local counters; queue and offline figures are left at zero
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.get(Counter::Accepted),
            filtered: self.get(Counter::Filtered),
            plugin_dropped: self.get(Counter::PluginDropped),
            sampled_out: self.get(Counter::SampledOut),
            rate_limited: self.get(Counter::RateLimited),
            deduplicated: self.get(Counter::Deduplicated),
            delivered: self.get(Counter::Delivered),
            parked: self.get(Counter::Parked),
            failed_batches: self.get(Counter::FailedBatches),
            delivery_rate: self.delivery_rate(),
            ..StatsSnapshot::default()
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_counters_are_independent() {
        let stats = Stats::new();
        stats.incr(Counter::Accepted);
        stats.incr(Counter::Accepted);
        stats.add(Counter::Delivered, 5);
        stats.add(Counter::Parked, 3);

        let snap = stats.snapshot();
        assert_eq!(snap.accepted, 2);
        assert_eq!(snap.delivered, 5);
        assert_eq!(snap.parked, 3);
        assert_eq!(snap.filtered, 0);
    }

    #[test]
    fn test_concurrent_increments() {
        let stats = std::sync::Arc::new(Stats::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let stats = stats.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.incr(Counter::RateLimited);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.get(Counter::RateLimited), 4000);
    }

    #[test]
    fn test_delivery_rate() {
        let stats = Stats::new();
        thread::sleep(Duration::from_millis(150));
        stats.add(Counter::Delivered, 300);
        let rate = stats.delivery_rate();
        assert!(rate > 0.0 && rate <= 300.0 / 0.15, "rate = {}", rate);

        // Cached until the minimum interval has passed
        stats.add(Counter::Delivered, 300);
        assert_eq!(stats.delivery_rate(), rate);
    }
}
