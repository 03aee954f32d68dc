//! Durable offline queue
//!
//! Backlog for entries a sink could not deliver. Every change is mirrored to
//! an `OfflineStore` before the call returns, so the backlog survives a
//! restart. Replay goes through the handler each sink registers for its
//! own name.
//!
//! # Replay
//!
//! ```text
//!  set_online(true) ──┐
//!  retry timer ───────┼──► retry() ──► handler(transport).replay(batch)
//!                     │                    │ Ok  ──► remove + persist
//!                     │                    └ Err ──► retry_count += 1, move to back
//!                     │                              (past max_retries: drop, counted)
//! ```
//!
//! Records leave the store only after their handler succeeded.
//!
//! # Network state
//!
//! `set_online` is the explicit input (a connectivity listener). A sink
//! that runs out of retries calls `mark_unreachable` instead: the queue
//! goes offline, and the retry timer replays a single batch per tick until
//! a replay succeeds and brings it back online.

pub mod store;

pub use store::{FileStore, MemoryStore, OfflineStore};

use crate::error::{Result, ShipError};
use crate::logging::LogEntry;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Persisted record: `{ entry, queuedAt, retryCount, transport }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineLogEntry {
    pub entry: LogEntry,
    /// Milliseconds since the Unix epoch
    pub queued_at: i64,
    pub retry_count: u32,
    /// Name of the sink that should deliver this entry
    pub transport: String,
}

/// Redelivers backlog entries for one sink
#[async_trait]
pub trait ReplayHandler: Send + Sync {
    async fn replay(&self, entries: &[LogEntry]) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct OfflineConfig {
    pub max_size: usize,
    pub retry_batch_size: usize,
    pub retry_interval: Duration,
    pub max_retries: u32,
}

impl OfflineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(ShipError::ConfigValidation {
                field: "offline.max_size",
                reason: "must be greater than zero".into(),
            });
        }
        if self.retry_batch_size == 0 {
            return Err(ShipError::ConfigValidation {
                field: "offline.retry_batch_size",
                reason: "must be greater than zero".into(),
            });
        }
        if self.retry_interval.is_zero() {
            return Err(ShipError::ConfigValidation {
                field: "offline.retry_interval_ms",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

/// Outcome of one `retry()` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub replayed: usize,
    pub failed: usize,
    pub dropped: usize,
}

/// Clears the retrying flag however the pass ends
struct RetryGuard<'a>(&'a AtomicBool);

impl Drop for RetryGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct OfflineQueue {
    config: OfflineConfig,
    store: Box<dyn OfflineStore>,
    /// In-memory mirror of the store; the lock serializes every write-through
    records: Mutex<Vec<OfflineLogEntry>>,
    handlers: RwLock<HashMap<String, Arc<dyn ReplayHandler>>>,
    online: AtomicBool,
    /// Offline because a sink gave up, not because we were told
    unreachable: AtomicBool,
    retrying: AtomicBool,
    stopped: AtomicBool,
    shutdown: Notify,
    enqueued: AtomicU64,
    dropped: AtomicU64,
    replayed: AtomicU64,
}

impl OfflineQueue {
    /// Open the queue, restoring whatever the store holds
    pub fn new(config: OfflineConfig, store: Box<dyn OfflineStore>) -> Result<Self> {
        config.validate()?;
        let mut records = match store.load() {
            Ok(records) => records,
            Err(e) => {
                warn!("Offline store unreadable, starting empty: {}", e);
                Vec::new()
            }
        };
        if records.len() > config.max_size {
            let excess = records.len() - config.max_size;
            records.drain(..excess);
        }
        if !records.is_empty() {
            info!("Restored {} offline entries", records.len());
        }

        Ok(Self {
            config,
            store,
            records: Mutex::new(records),
            handlers: RwLock::new(HashMap::new()),
            online: AtomicBool::new(true),
            unreachable: AtomicBool::new(false),
            retrying: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            shutdown: Notify::new(),
            enqueued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            replayed: AtomicU64::new(0),
        })
    }

    /// Register the replay handler for records addressed to `transport`
    pub fn on_online(&self, transport: impl Into<String>, handler: Arc<dyn ReplayHandler>) {
        self.handlers.write().insert(transport.into(), handler);
    }

    pub fn enqueue(&self, entry: LogEntry, transport: &str) -> Result<()> {
        self.enqueue_batch(vec![entry], transport)
    }

    /// Append entries for `transport` and persist before returning.
    ///
    /// An entry whose id is already queued replaces the old record.
    pub fn enqueue_batch(&self, entries: Vec<LogEntry>, transport: &str) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let queued_at = LogEntry::now_ms();
        self.enqueued.fetch_add(entries.len() as u64, Ordering::Relaxed);
        let mut records = self.records.lock();

        let incoming: HashSet<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        records.retain(|r| !incoming.contains(r.entry.id.as_str()));
        records.extend(entries.into_iter().map(|entry| OfflineLogEntry {
            entry,
            queued_at,
            retry_count: 0,
            transport: transport.to_string(),
        }));

        if records.len() > self.config.max_size {
            let excess = records.len() - self.config.max_size;
            records.drain(..excess);
            self.dropped.fetch_add(excess as u64, Ordering::Relaxed);
            warn!("Offline queue full, dropped {} oldest entries", excess);
        }

        self.store.save(&records)
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Copy of the current backlog, oldest first
    pub fn snapshot(&self) -> Vec<OfflineLogEntry> {
        self.records.lock().clone()
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Entries handed to the queue since it was opened
    pub fn enqueued_count(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Entries permanently dropped (overflow or retry ceiling)
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Entries delivered through replay
    pub fn replayed_count(&self) -> u64 {
        self.replayed.load(Ordering::Relaxed)
    }

    /// Network-state input. Going online starts a replay in the background.
    pub fn set_online(self: &Arc<Self>, online: bool) {
        self.unreachable.store(false, Ordering::Release);
        let was_online = self.online.swap(online, Ordering::AcqRel);
        if online && !was_online {
            info!("Back online, replaying {} offline entries", self.len());
            let queue = Arc::clone(self);
            tokio::spawn(async move {
                queue.retry().await;
            });
        } else if !online && was_online {
            info!("Offline, holding deliveries");
        }
    }

    /// A sink exhausted its retries: hold deliveries until a trial replay succeeds
    pub fn mark_unreachable(&self) {
        self.unreachable.store(true, Ordering::Release);
        if self.online.swap(false, Ordering::AcqRel) {
            info!("Collector unreachable, holding deliveries");
        }
    }

    /// Offline after `mark_unreachable` and waiting for a trial replay
    pub fn is_unreachable(&self) -> bool {
        self.unreachable.load(Ordering::Acquire)
    }

    /// Replay one batch whatever the online flag says. If it goes through,
    /// the queue is back online and the rest of the backlog follows.
    pub async fn try_reconnect(&self) -> RetryReport {
        if self.is_online() {
            return self.retry().await;
        }
        let first = {
            if self.retrying.swap(true, Ordering::AcqRel) {
                return RetryReport::default();
            }
            let _guard = RetryGuard(&self.retrying);
            let batch = self.next_batch();
            if batch.is_empty() {
                return RetryReport::default();
            }
            self.replay_batch(batch).await
        };
        if first.failed > 0 || first.replayed == 0 {
            return first;
        }

        self.unreachable.store(false, Ordering::Release);
        if !self.online.swap(true, Ordering::AcqRel) {
            info!("Trial replay succeeded, back online");
        }
        let rest = self.retry().await;
        RetryReport {
            replayed: first.replayed + rest.replayed,
            failed: rest.failed,
            dropped: first.dropped + rest.dropped,
        }
    }

    /// Replay batches until the backlog is empty, a batch fails, or no
    /// registered handler matches the remaining records.
    ///
    /// Does nothing while offline or if another replay is running.
    pub async fn retry(&self) -> RetryReport {
        let mut report = RetryReport::default();
        if !self.is_online() || self.retrying.swap(true, Ordering::AcqRel) {
            return report;
        }
        let _guard = RetryGuard(&self.retrying);

        loop {
            let batch = self.next_batch();
            if batch.is_empty() {
                break;
            }
            let pass = self.replay_batch(batch).await;
            report.replayed += pass.replayed;
            report.failed += pass.failed;
            report.dropped += pass.dropped;
            if pass.failed > 0 || !self.is_online() {
                break;
            }
        }

        if report != RetryReport::default() {
            debug!(
                "Offline replay: {} delivered, {} failed, {} dropped",
                report.replayed, report.failed, report.dropped
            );
        }
        report
    }

    /// Up to `retry_batch_size` records that have a handler, oldest first
    fn next_batch(&self) -> Vec<OfflineLogEntry> {
        let handlers = self.handlers.read();
        self.records
            .lock()
            .iter()
            .filter(|r| handlers.contains_key(&r.transport))
            .take(self.config.retry_batch_size)
            .cloned()
            .collect()
    }

    async fn replay_batch(&self, batch: Vec<OfflineLogEntry>) -> RetryReport {
        // Group by transport, keeping first-seen order
        let mut groups: Vec<(String, Vec<LogEntry>)> = Vec::new();
        for record in batch {
            match groups.iter_mut().find(|(t, _)| *t == record.transport) {
                Some((_, entries)) => entries.push(record.entry),
                None => groups.push((record.transport, vec![record.entry])),
            }
        }

        let mut report = RetryReport::default();
        for (transport, entries) in groups {
            let handler = self.handlers.read().get(&transport).cloned();
            let Some(handler) = handler else { continue };

            let ids: HashSet<String> = entries.iter().map(|e| e.id.clone()).collect();
            match handler.replay(&entries).await {
                Ok(()) => {
                    report.replayed += ids.len();
                    self.replayed.fetch_add(ids.len() as u64, Ordering::Relaxed);
                    self.commit(|records| records.retain(|r| !ids.contains(&r.entry.id)));
                }
                Err(e) => {
                    warn!("Replay to {} failed: {}", transport, e);
                    report.failed += ids.len();
                    report.dropped += self.record_failure(&ids);
                }
            }
        }
        report
    }

    /// Bump retry counts, drop records past the ceiling, move the rest to the back.
    fn record_failure(&self, ids: &HashSet<String>) -> usize {
        let max_retries = self.config.max_retries;
        let mut dropped = 0;
        self.commit(|records| {
            let (mut failed, rest): (Vec<_>, Vec<_>) = records
                .drain(..)
                .partition(|r| ids.contains(&r.entry.id));
            *records = rest;
            failed.retain_mut(|r| {
                if r.retry_count >= max_retries {
                    warn!(
                        "Dropping entry {} for {} after {} failed replays",
                        r.entry.id, r.transport, r.retry_count
                    );
                    dropped += 1;
                    false
                } else {
                    r.retry_count += 1;
                    true
                }
            });
            records.extend(failed);
        });
        self.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
        dropped
    }

    /// Apply a change to the backlog and persist it under the same lock
    fn commit(&self, change: impl FnOnce(&mut Vec<OfflineLogEntry>)) {
        let mut records = self.records.lock();
        change(&mut records);
        if let Err(e) = self.store.save(&records) {
            warn!("Offline store write failed: {}", e);
        }
    }

    /// Start the safety-net timer: `retry()` while online, `try_reconnect()` after
    /// `mark_unreachable`, nothing while explicitly offline
    pub fn spawn_worker(self: &Arc<Self>) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(queue.config.retry_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = queue.shutdown.notified() => break,
                    _ = ticker.tick() => {}
                }
                if queue.stopped.load(Ordering::Acquire) {
                    break;
                }
                if queue.is_empty() {
                    continue;
                }
                if queue.is_online() {
                    queue.retry().await;
                } else if queue.is_unreachable() {
                    queue.try_reconnect().await;
                }
            }
            debug!("Offline worker stopped");
        })
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.shutdown.notify_one();
    }
}
