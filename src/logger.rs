//! Pipeline orchestrator
//!
//! ```text
//! log() ─► level ─► filters ─► sanitize ─► plugins.before ─► gates ─┐
//!                                                                   │
//!            ┌──────────────────────────────────────────────────────┘
//!            ▼
//!   history ring + async queue ─► plugins.after
//!                     │
//!                     └─ flush ─► sink 1, sink 2, ... ─► (failure) offline queue
//! ```
//!
//! `log()` never fails and never blocks on I/O. Only `LoggerBuilder::build`
//! reports errors, and only for invalid configuration.

use crate::buffer::RingBuffer;
use crate::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL_MS, DEFAULT_HISTORY_CAPACITY,
    DEFAULT_LOGGER_NAME, DEFAULT_POOL_SIZE, DEFAULT_QUEUE_MAX_SIZE,
};
use crate::error::{Result, ShipError};
use crate::flow::{Admission, DedupField, Deduplicator, Gates, RateLimiter, Sampler, SamplingStrategy};
use crate::logging::{ErrorInfo, Filter, LogEntry, LogLevel, Sanitizer};
use crate::offline::OfflineQueue;
use crate::plugin::{Plugin, PluginChain};
use crate::queue::{AsyncQueue, BatchConsumer, QueueConfig};
use crate::stats::{Counter, Stats, StatsSnapshot};
use crate::transport::{Delivery, Sink};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Tracing identifiers stamped on every entry of a logger
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogContext {
    pub correlation_id: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

/// Queue consumer delivering batches to one sink
struct SinkConsumer {
    sink: Arc<dyn Sink>,
    plugins: PluginChain,
    stats: Arc<Stats>,
}

#[async_trait]
impl BatchConsumer<LogEntry> for SinkConsumer {
    fn name(&self) -> &str {
        self.sink.name()
    }

    async fn consume(&self, batch: &[LogEntry]) -> Result<()> {
        match self.sink.deliver(batch).await {
            Ok(Delivery::Sent) => {
                self.stats.add(Counter::Delivered, batch.len() as u64);
                Ok(())
            }
            Ok(Delivery::Parked) => {
                self.stats.add(Counter::Parked, batch.len() as u64);
                Ok(())
            }
            Err(e) => {
                self.stats.incr(Counter::FailedBatches);
                self.plugins.on_error(self.sink.name(), &e, batch);
                Err(e)
            }
        }
    }
}

/// State shared by a logger and all its children
struct Core {
    min_level: LogLevel,
    filters: Vec<Arc<dyn Filter>>,
    sanitizer: Sanitizer,
    plugins: PluginChain,
    gates: Mutex<Gates>,
    history: Mutex<RingBuffer<LogEntry>>,
    queue: Arc<AsyncQueue<LogEntry>>,
    sinks: Vec<Arc<dyn Sink>>,
    offline: Option<Arc<OfflineQueue>>,
    stats: Arc<Stats>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Drop for Core {
    fn drop(&mut self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.queue.stop();
        if let Some(offline) = &self.offline {
            offline.stop();
        }
        let remainder = self.queue.take_all();
        if !remainder.is_empty() {
            debug!("Logger dropped unclosed, unloading {} entries", remainder.len());
        }
        for sink in &self.sinks {
            sink.unload(&remainder);
        }
    }
}

/// Entry point of the pipeline.
///
/// Cheap to clone; clones and children share one pipeline.
#[derive(Clone)]
pub struct Logger {
    core: Arc<Core>,
    source: String,
    tags: Vec<String>,
    context: LogContext,
}

impl Logger {
    pub fn builder(name: impl Into<String>) -> LoggerBuilder {
        LoggerBuilder::new(name)
    }

    /// Dot-joined logger path, e.g. `app.db.pool`
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn offline(&self) -> Option<&Arc<OfflineQueue>> {
        self.core.offline.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.core.closed.load(Ordering::Acquire)
    }

    /// Sub-logger whose entries carry `source = "<parent>.<name>"`
    pub fn child(&self, name: &str) -> Logger {
        Logger {
            source: format!("{}.{}", self.source, name),
            ..self.clone()
        }
    }

    pub fn with_context(&self, context: LogContext) -> Logger {
        Logger {
            context,
            ..self.clone()
        }
    }

    /// Logger adding `tags` to every entry (existing tags kept first)
    pub fn with_tags<I, S>(&self, tags: I) -> Logger
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut merged = self.tags.clone();
        for tag in tags {
            let tag = tag.into();
            if !merged.contains(&tag) {
                merged.push(tag);
            }
        }
        Logger {
            tags: merged,
            ..self.clone()
        }
    }

    /// Accept one entry. Never fails; rejected entries are only counted.
    pub fn log(
        &self,
        level: LogLevel,
        message: impl Into<String>,
        data: Option<Value>,
        error: Option<ErrorInfo>,
    ) {
        let core = &*self.core;
        if core.closed.load(Ordering::Acquire) {
            return;
        }
        if level == LogLevel::Silent || level < core.min_level {
            core.stats.incr(Counter::Filtered);
            return;
        }

        let mut builder = LogEntry::builder(level, message)
            .source(self.source.clone())
            .tags(self.tags.iter().cloned())
            .correlation_id(self.context.correlation_id.clone())
            .user_id(self.context.user_id.clone())
            .session_id(self.context.session_id.clone());
        if let Some(data) = data {
            let data = if core.sanitizer.is_empty() {
                data
            } else {
                core.sanitizer.sanitize(&data)
            };
            builder = builder.data(data);
        }
        if let Some(error) = error {
            builder = builder.error(error);
        }
        let entry = builder.build();

        if !core.filters.iter().all(|f| f.matches(&entry)) {
            core.stats.incr(Counter::Filtered);
            return;
        }
        let Some(entry) = core.plugins.before_log(entry) else {
            core.stats.incr(Counter::PluginDropped);
            return;
        };

        let admission = core.gates.lock().admit(&entry);
        match admission {
            Admission::Admitted => {}
            Admission::SampledOut => return core.stats.incr(Counter::SampledOut),
            Admission::RateLimited => return core.stats.incr(Counter::RateLimited),
            Admission::Duplicate => return core.stats.incr(Counter::Deduplicated),
        }

        core.history.lock().push(entry.clone());
        core.queue.push(entry.clone());
        core.stats.incr(Counter::Accepted);
        core.plugins.after_log(&entry);
    }

    pub fn trace(&self, message: impl Into<String>) {
        self.log(LogLevel::Trace, message, None, None);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message, None, None);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message, None, None);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message, None, None);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message, None, None);
    }

    pub fn fatal(&self, message: impl Into<String>) {
        self.log(LogLevel::Fatal, message, None, None);
    }

    /// Log with a structured payload
    pub fn log_data(&self, level: LogLevel, message: impl Into<String>, data: Value) {
        self.log(level, message, Some(data), None);
    }

    /// Log an `ERROR` entry carrying `err` and its source chain
    pub fn error_from(&self, message: impl Into<String>, err: &(dyn std::error::Error + 'static)) {
        self.log(LogLevel::Error, message, None, Some(ErrorInfo::from_error(err)));
    }

    /// History, oldest first
    pub fn history(&self) -> Vec<LogEntry> {
        self.core.history.lock().to_vec()
    }

    /// The `n` most recent entries, oldest first
    pub fn recent(&self, n: usize) -> Vec<LogEntry> {
        self.core.history.lock().last(n)
    }

    pub fn clear_history(&self) {
        self.core.history.lock().clear();
    }

    pub fn stats(&self) -> StatsSnapshot {
        let core = &*self.core;
        let mut snap = core.stats.snapshot();
        snap.queue_shed = core.queue.shed_count();
        if let Some(offline) = &core.offline {
            snap.offline_enqueued = offline.enqueued_count();
            snap.offline_pending = offline.len() as u64;
            snap.offline_replayed = offline.replayed_count();
            snap.offline_dropped = offline.dropped_count();
        }
        snap
    }

    /// Deliver everything queued, then flush every sink
    pub async fn flush(&self) {
        let core = &*self.core;
        core.queue.drain().await;
        for sink in &core.sinks {
            if let Err(e) = sink.flush().await {
                warn!("Sink {} flush failed: {}", sink.name(), e);
            }
        }
    }

    /// Stop timers, deliver what is left, then close every sink.
    ///
    /// Later calls (from any clone) do nothing.
    pub async fn close(&self) {
        let core = &*self.core;
        if core.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        core.queue.stop();
        if let Some(offline) = &core.offline {
            offline.stop();
        }
        let workers: Vec<_> = core.workers.lock().drain(..).collect();
        for worker in workers {
            let _ = worker.await;
        }

        self.flush().await;
        for sink in &core.sinks {
            if let Err(e) = sink.close().await {
                warn!("Sink {} close failed: {}", sink.name(), e);
            }
        }
        info!("Logger {} closed", self.source);
    }
}

pub struct LoggerBuilder {
    name: String,
    min_level: LogLevel,
    history_capacity: usize,
    queue: QueueConfig,
    sampling: Option<(f64, SamplingStrategy)>,
    rate_limit: Option<(Duration, usize)>,
    dedup: Option<(Duration, Vec<DedupField>, usize)>,
    sanitizer: Sanitizer,
    sinks: Vec<Arc<dyn Sink>>,
    filters: Vec<Arc<dyn Filter>>,
    plugins: PluginChain,
    offline: Option<Arc<OfflineQueue>>,
    tags: Vec<String>,
    context: LogContext,
}

impl Default for LoggerBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_LOGGER_NAME)
    }
}

impl LoggerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            min_level: LogLevel::default(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            queue: QueueConfig {
                max_size: DEFAULT_QUEUE_MAX_SIZE,
                batch_size: DEFAULT_BATCH_SIZE,
                flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
                pool_size: DEFAULT_POOL_SIZE,
            },
            sampling: None,
            rate_limit: None,
            dedup: None,
            sanitizer: Sanitizer::default(),
            sinks: Vec::new(),
            filters: Vec::new(),
            plugins: PluginChain::default(),
            offline: None,
            tags: Vec::new(),
            context: LogContext::default(),
        }
    }

    pub fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn queue(mut self, config: QueueConfig) -> Self {
        self.queue = config;
        self
    }

    pub fn sampling(mut self, rate: f64, strategy: SamplingStrategy) -> Self {
        self.sampling = Some((rate, strategy));
        self
    }

    pub fn rate_limit(mut self, window: Duration, max_logs: usize) -> Self {
        self.rate_limit = Some((window, max_logs));
        self
    }

    pub fn dedup(mut self, window: Duration, fields: Vec<DedupField>, max_cache_size: usize) -> Self {
        self.dedup = Some((window, fields, max_cache_size));
        self
    }

    /// Replace the redacted key set (an empty set disables redaction)
    pub fn sensitive_fields<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.sanitizer = Sanitizer::new(keys);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Offline queue to run the replay timer for (sinks hold their own handle)
    pub fn offline(mut self, offline: Arc<OfflineQueue>) -> Self {
        self.offline = Some(offline);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn context(mut self, context: LogContext) -> Self {
        self.context = context;
        self
    }

    /// Validate, wire the pipeline and start its timers.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn build(self) -> Result<Logger> {
        if self.name.is_empty() {
            return Err(ShipError::ConfigValidation {
                field: "logger.name",
                reason: "must not be empty".into(),
            });
        }

        let gates = Gates {
            sampler: self
                .sampling
                .map(|(rate, strategy)| Sampler::new(rate, strategy))
                .transpose()?,
            rate_limiter: self
                .rate_limit
                .map(|(window, max)| RateLimiter::new(window, max))
                .transpose()?,
            deduplicator: self
                .dedup
                .map(|(window, fields, max)| Deduplicator::new(window, fields, max))
                .transpose()?,
        };
        let history = RingBuffer::new(self.history_capacity)?;

        let stats = Arc::new(Stats::new());
        let queue = Arc::new(AsyncQueue::new(self.queue)?);
        for sink in &self.sinks {
            queue.add_consumer(Arc::new(SinkConsumer {
                sink: Arc::clone(sink),
                plugins: self.plugins.clone(),
                stats: Arc::clone(&stats),
            }));
        }

        let mut workers = vec![queue.spawn_worker()];
        if let Some(offline) = &self.offline {
            workers.push(offline.spawn_worker());
        }
        debug!(
            "Logger {} ready: {} sinks, {} filters, {} plugins",
            self.name,
            self.sinks.len(),
            self.filters.len(),
            self.plugins.len()
        );

        let core = Core {
            min_level: self.min_level,
            filters: self.filters,
            sanitizer: self.sanitizer,
            plugins: self.plugins,
            gates: Mutex::new(gates),
            history: Mutex::new(history),
            queue,
            sinks: self.sinks,
            offline: self.offline,
            stats,
            workers: Mutex::new(workers),
            closed: AtomicBool::new(false),
        };

        let mut tags = Vec::new();
        for tag in self.tags {
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        Ok(Logger {
            core: Arc::new(core),
            source: self.name,
            tags,
            context: self.context,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::BeforeLog;
    use serde_json::json;

    #[derive(Default)]
    struct MemorySink {
        name: String,
        fail: bool,
        batches: Mutex<Vec<Vec<LogEntry>>>,
        unloaded: Arc<Mutex<Vec<LogEntry>>>,
        closed: AtomicBool,
    }

    impl MemorySink {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                ..Default::default()
            })
        }

        fn failing(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                fail: true,
                ..Default::default()
            })
        }

        fn messages(&self) -> Vec<String> {
            self.batches
                .lock()
                .iter()
                .flatten()
                .map(|e| e.message.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Sink for MemorySink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn write(&self, entry: &LogEntry) -> Result<()> {
            self.write_batch(std::slice::from_ref(entry)).await
        }

        async fn write_batch(&self, entries: &[LogEntry]) -> Result<()> {
            if self.fail {
                return Err(ShipError::Sink {
                    sink: self.name.clone(),
                    reason: "down".into(),
                });
            }
            self.batches.lock().push(entries.to_vec());
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::Release);
            Ok(())
        }

        fn unload(&self, entries: &[LogEntry]) {
            self.unloaded.lock().extend_from_slice(entries);
        }
    }

    #[derive(Default)]
    struct ErrorRecorder(Mutex<Vec<String>>);

    impl Plugin for ErrorRecorder {
        fn name(&self) -> &str {
            "errors"
        }

        fn on_error(&self, sink: &str, _error: &ShipError, entries: &[LogEntry]) {
            self.0.lock().push(format!("{}:{}", sink, entries.len()));
        }
    }

    struct Stamp;

    impl Plugin for Stamp {
        fn name(&self) -> &str {
            "stamp"
        }

        fn before_log(&self, entry: &LogEntry) -> Result<BeforeLog> {
            if entry.message == "drop me" {
                return Ok(BeforeLog::Drop);
            }
            let mut next = entry.clone();
            next.tags.push("stamped".into());
            Ok(BeforeLog::Replace(next))
        }
    }

    fn builder() -> LoggerBuilder {
        Logger::builder("app").queue(QueueConfig {
            max_size: 1000,
            batch_size: 100,
            flush_interval: Duration::from_secs(3600),
            pool_size: 2,
        })
    }

    #[tokio::test]
    async fn test_entries_reach_sink_on_flush() {
        let sink = MemorySink::new("mem");
        let logger = builder().sink(sink.clone()).build().unwrap();

        logger.info("one");
        logger.warn("two");
        assert!(sink.messages().is_empty());

        logger.flush().await;
        assert_eq!(sink.messages(), vec!["one", "two"]);
        assert_eq!(logger.stats().delivered, 2);
        logger.close().await;
    }

    #[tokio::test]
    async fn test_min_level_and_silent() {
        let sink = MemorySink::new("mem");
        let logger = builder()
            .min_level(LogLevel::Warn)
            .sink(sink.clone())
            .build()
            .unwrap();

        logger.debug("hidden");
        logger.info("hidden");
        logger.error("shown");
        logger.log(LogLevel::Silent, "never", None, None);
        logger.flush().await;

        assert_eq!(sink.messages(), vec!["shown"]);
        assert_eq!(logger.stats().filtered, 3);

        let silent = builder().min_level(LogLevel::Silent).build().unwrap();
        silent.fatal("nothing");
        assert!(silent.history().is_empty());
    }

    #[tokio::test]
    async fn test_child_context_and_tags() {
        let sink = MemorySink::new("mem");
        let logger = builder()
            .tags(["svc"])
            .sink(sink.clone())
            .build()
            .unwrap();

        let child = logger
            .child("db")
            .child("pool")
            .with_tags(["svc", "sql"])
            .with_context(LogContext {
                correlation_id: Some("req-1".into()),
                ..Default::default()
            });
        child.info("query");
        logger.flush().await;

        let entry = &sink.batches.lock()[0][0];
        assert_eq!(entry.source, "app.db.pool");
        assert_eq!(entry.tags, vec!["svc", "sql"]);
        assert_eq!(entry.correlation_id.as_deref(), Some("req-1"));
        assert_eq!(child.source(), "app.db.pool");
    }

    #[tokio::test]
    async fn test_data_is_sanitized_at_creation() {
        let logger = builder().build().unwrap();
        logger.log_data(
            LogLevel::Info,
            "login",
            json!({"user": "ann", "Password": "hunter2", "nested": {"token": "t"}}),
        );

        let data = logger.history()[0].data.clone().unwrap();
        assert_eq!(data["user"], "ann");
        assert_eq!(data["Password"], "[REDACTED]");
        assert_eq!(data["nested"]["token"], "[REDACTED]");
    }

    #[tokio::test]
    async fn test_filters_and_plugins() {
        let sink = MemorySink::new("mem");
        let logger = builder()
            .filter(Arc::new(|e: &LogEntry| !e.message.starts_with("noise")))
            .plugin(Arc::new(Stamp))
            .sink(sink.clone())
            .build()
            .unwrap();

        logger.info("noise: ignored");
        logger.info("drop me");
        logger.info("kept");
        logger.flush().await;

        assert_eq!(sink.messages(), vec!["kept"]);
        assert_eq!(sink.batches.lock()[0][0].tags, vec!["stamped"]);
        let stats = logger.stats();
        assert_eq!(stats.filtered, 1);
        assert_eq!(stats.plugin_dropped, 1);
        assert_eq!(stats.accepted, 1);
    }

    #[tokio::test]
    async fn test_gates_reject_before_history() {
        let logger = builder()
            .rate_limit(Duration::from_secs(60), 3)
            .build()
            .unwrap();
        for i in 0..5 {
            logger.info(format!("burst {}", i));
        }
        assert_eq!(logger.history().len(), 3);
        assert_eq!(logger.stats().rate_limited, 2);

        let deduped = builder()
            .dedup(Duration::from_secs(60), DedupField::defaults(), 100)
            .build()
            .unwrap();
        deduped.error("same");
        deduped.error("same");
        deduped.error("different");
        assert_eq!(deduped.history().len(), 2);
        assert_eq!(deduped.stats().deduplicated, 1);
    }

    #[tokio::test]
    async fn test_invalid_sample_rate_fails_build() {
        let err = builder()
            .sampling(1.5, SamplingStrategy::Random)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ShipError::ConfigValidation { .. }));
        assert!(builder().history_capacity(0).build().is_err());
    }

    #[tokio::test]
    async fn test_failing_sink_is_isolated() {
        let bad = MemorySink::failing("bad");
        let good = MemorySink::new("good");
        let errors = Arc::new(ErrorRecorder::default());
        let logger = builder()
            .sink(bad)
            .sink(good.clone())
            .plugin(errors.clone())
            .build()
            .unwrap();

        logger.info("a");
        logger.info("b");
        logger.flush().await;

        assert_eq!(good.messages(), vec!["a", "b"]);
        assert_eq!(*errors.0.lock(), vec!["bad:2"]);
        let stats = logger.stats();
        assert_eq!(stats.failed_batches, 1);
        assert_eq!(stats.delivered, 2);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let logger = builder().history_capacity(3).build().unwrap();
        for i in 0..5 {
            logger.info(format!("m{}", i));
        }
        let messages: Vec<_> = logger.history().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["m2", "m3", "m4"]);
        assert_eq!(logger.recent(1)[0].message, "m4");

        logger.clear_history();
        assert!(logger.history().is_empty());
    }

    #[tokio::test]
    async fn test_close_delivers_and_closes_sinks() {
        let sink = MemorySink::new("mem");
        let logger = builder().sink(sink.clone()).build().unwrap();

        logger.info("last words");
        logger.close().await;

        assert_eq!(sink.messages(), vec!["last words"]);
        assert!(sink.closed.load(Ordering::Acquire));
        assert!(logger.is_closed());

        logger.info("after close");
        assert_eq!(logger.history().len(), 1);
        logger.close().await;
    }

    #[tokio::test]
    async fn test_drop_without_close_unloads_remainder() {
        let sink = MemorySink::new("mem");
        let unloaded = Arc::clone(&sink.unloaded);
        let logger = builder().sink(sink.clone()).build().unwrap();
        let child = logger.child("worker");

        child.info("pending");
        drop(logger);
        assert!(unloaded.lock().is_empty(), "child still holds the pipeline");

        drop(child);
        let messages: Vec<_> = unloaded.lock().iter().map(|e| e.message.clone()).collect();
        assert_eq!(messages, vec!["pending"]);
    }
}
