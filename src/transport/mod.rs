//! Delivery sinks
//!
//! A sink is anything that can take entries out of the pipeline:
//! an HTTP collector, a WebSocket server, a local file.
//!
//! The pipeline drives sinks; sinks never call back into it. The only
//! reverse channel is the offline queue's replay-handler registration
//! (`OfflineQueue::on_online`).
//!
//! # Adding a new sink
//!
//! 1. Create `transport/my_sink.rs`
//! 2. Implement the `Sink` trait (`write` is the only required method)
//! 3. Add `pub mod my_sink;` here
//! 4. Register it with `LoggerBuilder::sink`

pub mod http;
pub mod websocket;

pub use http::HttpSink;
pub use websocket::{ConnectionState, WebSocketSink};

use crate::error::Result;
use crate::logging::LogEntry;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// What happened to a batch a sink accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Reached the destination
    Sent,
    /// Stored in the offline queue for a later replay
    Parked,
}

/// Delivery target for log entries
///
/// # Lifecycle
///
/// 1. Registered with the logger at build time
/// 2. Receives batches formed by the async queue (`deliver`)
/// 3. `flush()` on logger flush, `close()` once on logger close
/// 4. `unload()` if the logger is dropped without being closed
#[async_trait]
pub trait Sink: Send + Sync + 'static {
    /// Stable name, used in diagnostics and offline records
    fn name(&self) -> &str;

    /// Deliver a single entry
    async fn write(&self, entry: &LogEntry) -> Result<()>;

    /// Deliver a batch. Defaults to one `write` per entry, in order.
    async fn write_batch(&self, entries: &[LogEntry]) -> Result<()> {
        for entry in entries {
            self.write(entry).await?;
        }
        Ok(())
    }

    /// Deliver a batch and say whether it went out or was parked offline.
    ///
    /// The pipeline calls this. Sinks that can park override it.
    async fn deliver(&self, entries: &[LogEntry]) -> Result<Delivery> {
        self.write_batch(entries).await.map(|()| Delivery::Sent)
    }

    /// Push out anything the sink buffers internally
    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Release connections and background tasks
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Best-effort, fire-and-forget hand-off on process teardown.
    ///
    /// Must not block. Called from `Drop`, possibly outside a runtime.
    fn unload(&self, _entries: &[LogEntry]) {}
}

/// HTTP request body: `{ "logs": [...], "timestamp": <ms> }`
#[derive(Debug, Serialize)]
pub struct LogsPayload<'a> {
    pub logs: &'a [LogEntry],
    pub timestamp: i64,
}

impl<'a> LogsPayload<'a> {
    pub fn new(logs: &'a [LogEntry]) -> Self {
        Self {
            logs,
            timestamp: LogEntry::now_ms(),
        }
    }
}

/// Exponential backoff: `base * 2^attempt`, capped at `ceiling`
pub fn backoff(base: Duration, ceiling: Duration, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(ceiling)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_ceiling() {
        let base = Duration::from_millis(100);
        let ceiling = Duration::from_millis(1000);
        let delays: Vec<u64> = (0..6)
            .map(|n| backoff(base, ceiling, n).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn test_backoff_large_attempt_saturates() {
        let ceiling = Duration::from_secs(30);
        assert_eq!(backoff(Duration::from_secs(1), ceiling, 64), ceiling);
    }

    #[test]
    fn test_payload_shape() {
        let entries = vec![LogEntry::new(crate::logging::LogLevel::Info, "x")];
        let json = serde_json::to_value(LogsPayload::new(&entries)).unwrap();
        assert_eq!(json["logs"][0]["message"], "x");
        assert!(json["timestamp"].as_i64().unwrap() > 0);
    }
}
