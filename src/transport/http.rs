//! HTTP collector sink
//!
//! POSTs batches as `{ "logs": [...], "timestamp": <ms> }`. A failed send
//! (non-2xx, network error, timeout) is retried with exponential backoff;
//! once retries are exhausted the batch goes to the offline queue, which is
//! told the collector is unreachable. Until a replay gets through, later
//! batches are parked there without touching the network.
//!
//! At most one request is in flight per sink. Batches formed while a send
//! is running wait for it, so delivery order matches batch order.

use super::{backoff, Delivery, LogsPayload, Sink};
use crate::compress::{Compressed, Compressor, Encoding};
use crate::constants::{
    DEFAULT_COMPRESSION_THRESHOLD, DEFAULT_HTTP_MAX_RETRY_DELAY_MS, DEFAULT_HTTP_RETRY_COUNT,
    DEFAULT_HTTP_RETRY_DELAY_MS, DEFAULT_HTTP_TIMEOUT_MS, HTTP_SINK_NAME,
};
use crate::error::{Result, ShipError};
use crate::logging::LogEntry;
use crate::offline::{OfflineQueue, ReplayHandler};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub url: String,
    /// Retries after the first attempt
    pub retry_count: u32,
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub timeout: Duration,
    pub compress: bool,
    pub compression_threshold: usize,
    /// Extra headers sent with every request
    pub headers: BTreeMap<String, String>,
}

impl HttpConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            retry_count: DEFAULT_HTTP_RETRY_COUNT,
            retry_delay: Duration::from_millis(DEFAULT_HTTP_RETRY_DELAY_MS),
            max_retry_delay: Duration::from_millis(DEFAULT_HTTP_MAX_RETRY_DELAY_MS),
            timeout: Duration::from_millis(DEFAULT_HTTP_TIMEOUT_MS),
            compress: false,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            headers: BTreeMap::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(ShipError::ConfigValidation {
                field: "http.url",
                reason: format!("expected an http(s) URL, got '{}'", self.url),
            });
        }
        if self.timeout.is_zero() {
            return Err(ShipError::ConfigValidation {
                field: "http.timeout_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.max_retry_delay < self.retry_delay {
            return Err(ShipError::ConfigValidation {
                field: "http.max_retry_delay_ms",
                reason: "must not be below retry_delay_ms".into(),
            });
        }
        self.header_map().map(|_| ())
    }

    fn header_map(&self) -> Result<HeaderMap> {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            let invalid = |reason: String| ShipError::ConfigValidation {
                field: "http.headers",
                reason,
            };
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| invalid(format!("{}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| invalid(format!("{}: {}", name.as_str(), e)))?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

struct HttpInner {
    config: HttpConfig,
    client: reqwest::Client,
    headers: HeaderMap,
    compressor: Option<Compressor>,
    offline: Option<Arc<OfflineQueue>>,
    /// One request in flight per sink
    send_lock: tokio::sync::Mutex<()>,
    attempts: AtomicU64,
    closed: AtomicBool,
}

impl HttpInner {
    /// Single POST, no retry
    async fn post(&self, entries: &[LogEntry]) -> Result<()> {
        let body = serde_json::to_vec(&LogsPayload::new(entries))?;
        let payload = match &self.compressor {
            Some(c) => c.compress(&body),
            None => Compressed {
                encoding: Encoding::Identity,
                bytes: Bytes::from(body),
            },
        };

        let mut request = self
            .client
            .post(&self.config.url)
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json");
        if let Some(encoding) = payload.encoding.header_value() {
            request = request.header(CONTENT_ENCODING, encoding);
        }

        self.attempts.fetch_add(1, Ordering::Relaxed);
        let response = tokio::time::timeout(self.config.timeout, request.body(payload.bytes).send())
            .await
            .map_err(|_| ShipError::Timeout {
                after: self.config.timeout,
            })??;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ShipError::HttpStatus {
                status: status.as_u16(),
            })
        }
    }

    async fn send_with_retry(&self, entries: &[LogEntry]) -> Result<Delivery> {
        let _in_flight = self.send_lock.lock().await;

        if let Some(offline) = &self.offline {
            if !offline.is_online() {
                debug!("Offline, parking {} entries", entries.len());
                offline.enqueue_batch(entries.to_vec(), HTTP_SINK_NAME)?;
                return Ok(Delivery::Parked);
            }
        }

        let mut attempt = 0;
        let err = loop {
            match self.post(entries).await {
                Ok(()) => {
                    debug!("Delivered {} entries to {}", entries.len(), self.config.url);
                    return Ok(Delivery::Sent);
                }
                Err(e) if attempt < self.config.retry_count => {
                    let delay = backoff(self.config.retry_delay, self.config.max_retry_delay, attempt);
                    debug!(
                        "HTTP send failed (attempt {}): {}, retrying in {} ms",
                        attempt + 1,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => break e,
            }
        };

        match &self.offline {
            Some(offline) => {
                warn!(
                    "HTTP send failed after {} attempts ({}), {} entries moved offline",
                    attempt + 1,
                    err,
                    entries.len()
                );
                offline.enqueue_batch(entries.to_vec(), HTTP_SINK_NAME)?;
                offline.mark_unreachable();
                Ok(Delivery::Parked)
            }
            None => Err(err),
        }
    }
}

/// Replay path registered with the offline queue.
///
/// Holds the sink weakly so the queue does not keep a closed sink alive.
struct HttpReplay(Weak<HttpInner>);

#[async_trait]
impl ReplayHandler for HttpReplay {
    async fn replay(&self, entries: &[LogEntry]) -> Result<()> {
        let inner = self.0.upgrade().ok_or(ShipError::Closed)?;
        if inner.closed.load(Ordering::Acquire) {
            return Err(ShipError::Closed);
        }
        let _in_flight = inner.send_lock.lock().await;
        inner.post(entries).await
    }
}

pub struct HttpSink {
    inner: Arc<HttpInner>,
}

impl HttpSink {
    /// Build the sink and register its replay handler with `offline`, if given
    pub fn new(config: HttpConfig, offline: Option<Arc<OfflineQueue>>) -> Result<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        let headers = config.header_map()?;
        let compressor = config
            .compress
            .then(|| Compressor::new(config.compression_threshold));

        let inner = Arc::new(HttpInner {
            config,
            client,
            headers,
            compressor,
            offline,
            send_lock: tokio::sync::Mutex::new(()),
            attempts: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });
        if let Some(offline) = &inner.offline {
            offline.on_online(HTTP_SINK_NAME, Arc::new(HttpReplay(Arc::downgrade(&inner))));
        }
        Ok(Self { inner })
    }

    pub fn url(&self) -> &str {
        &self.inner.config.url
    }

    /// Requests issued so far, retries and replays included
    pub fn attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Sink for HttpSink {
    fn name(&self) -> &str {
        HTTP_SINK_NAME
    }

    async fn write(&self, entry: &LogEntry) -> Result<()> {
        self.write_batch(std::slice::from_ref(entry)).await
    }

    async fn write_batch(&self, entries: &[LogEntry]) -> Result<()> {
        self.deliver(entries).await.map(|_| ())
    }

    async fn deliver(&self, entries: &[LogEntry]) -> Result<Delivery> {
        if entries.is_empty() {
            return Ok(Delivery::Sent);
        }
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(ShipError::Closed);
        }
        self.inner.send_with_retry(entries).await
    }

    async fn close(&self) -> Result<()> {
        // Wait for an in-flight send to complete or time out
        let _in_flight = self.inner.send_lock.lock().await;
        self.inner.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn unload(&self, entries: &[LogEntry]) {
        if entries.is_empty() || self.inner.closed.load(Ordering::Acquire) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime at unload, {} entries not sent", entries.len());
            return;
        };
        let inner = Arc::clone(&self.inner);
        let entries = entries.to_vec();
        handle.spawn(async move {
            if let Err(e) = inner.post(&entries).await {
                debug!("Unload send failed: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogLevel;
    use crate::offline::{MemoryStore, OfflineConfig};
    use mockito::{Matcher, Server};
    use std::time::Instant;

    fn config(url: String) -> HttpConfig {
        HttpConfig {
            retry_count: 2,
            retry_delay: Duration::from_millis(10),
            max_retry_delay: Duration::from_millis(100),
            timeout: Duration::from_secs(2),
            ..HttpConfig::new(url)
        }
    }

    fn offline_queue() -> Arc<OfflineQueue> {
        Arc::new(
            OfflineQueue::new(
                OfflineConfig {
                    max_size: 100,
                    retry_batch_size: 10,
                    retry_interval: Duration::from_secs(3600),
                    max_retries: 5,
                },
                Box::new(MemoryStore::new()),
            )
            .unwrap(),
        )
    }

    fn entries(n: usize) -> Vec<LogEntry> {
        (0..n)
            .map(|i| LogEntry::new(LogLevel::Info, format!("message {}", i)))
            .collect()
    }

    #[test]
    fn test_config_validation() {
        assert!(HttpConfig::new("ftp://x").validate().is_err());
        assert!(HttpConfig::new("http://localhost/logs").validate().is_ok());

        let mut bad_header = HttpConfig::new("http://localhost/logs");
        bad_header.headers.insert("bad header".into(), "v".into());
        assert!(bad_header.validate().is_err());
    }

    #[tokio::test]
    async fn test_posts_payload() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/logs")
            .match_header("content-type", "application/json")
            .match_header("x-api-key", "k")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#""message":"message 0""#.into()),
                Matcher::Regex(r#""timestamp":\d+"#.into()),
            ]))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let mut cfg = config(format!("{}/logs", server.url()));
        cfg.headers.insert("x-api-key".into(), "k".into());
        let sink = HttpSink::new(cfg, None).unwrap();
        sink.write_batch(&entries(1)).await.unwrap();

        mock.assert_async().await;
        assert_eq!(sink.attempts(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_move_batch_offline() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/logs")
            .with_status(500)
            .expect(3)
            .create_async()
            .await;

        let offline = offline_queue();
        let sink = HttpSink::new(config(format!("{}/logs", server.url())), Some(offline.clone()))
            .unwrap();

        let started = Instant::now();
        assert_eq!(sink.deliver(&entries(2)).await.unwrap(), Delivery::Parked);

        // 10 ms + 20 ms of backoff between the three attempts
        assert!(started.elapsed() >= Duration::from_millis(30));
        mock.assert_async().await;
        assert_eq!(sink.attempts(), 3);

        let parked = offline.snapshot();
        assert_eq!(parked.len(), 2);
        assert!(parked.iter().all(|r| r.transport == "http" && r.retry_count == 0));
        assert!(!offline.is_online());
        assert!(offline.is_unreachable());
    }

    #[tokio::test]
    async fn test_unreachable_collector_recovers_through_trial_replay() {
        let mut server = Server::new_async().await;
        let down = server
            .mock("POST", "/logs")
            .with_status(502)
            .expect(1)
            .create_async()
            .await;

        let offline = offline_queue();
        let mut cfg = config(format!("{}/logs", server.url()));
        cfg.retry_count = 0;
        let sink = HttpSink::new(cfg, Some(offline.clone())).unwrap();

        assert_eq!(sink.deliver(&entries(1)).await.unwrap(), Delivery::Parked);
        // Held without a request while unreachable
        assert_eq!(sink.deliver(&entries(1)).await.unwrap(), Delivery::Parked);
        down.assert_async().await;
        assert_eq!(sink.attempts(), 1);
        assert_eq!(offline.len(), 2);
        down.remove_async().await;

        let up = server
            .mock("POST", "/logs")
            .with_status(200)
            .expect(2)
            .create_async()
            .await;
        let report = offline.try_reconnect().await;
        assert_eq!(report.replayed, 2);
        assert!(offline.is_online());
        assert!(offline.is_empty());

        assert_eq!(sink.deliver(&entries(1)).await.unwrap(), Delivery::Sent);
        up.assert_async().await;
    }

    #[tokio::test]
    async fn test_failure_without_offline_queue_is_reported() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/logs")
            .with_status(503)
            .create_async()
            .await;

        let mut cfg = config(format!("{}/logs", server.url()));
        cfg.retry_count = 0;
        let sink = HttpSink::new(cfg, None).unwrap();

        let err = sink.write_batch(&entries(1)).await.unwrap_err();
        assert!(matches!(err, ShipError::HttpStatus { status: 503 }));
    }

    #[tokio::test]
    async fn test_large_batch_is_compressed() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/logs")
            .match_header("content-encoding", "lz4")
            .with_status(202)
            .expect(1)
            .create_async()
            .await;

        let mut cfg = config(format!("{}/logs", server.url()));
        cfg.compress = true;
        cfg.compression_threshold = 256;
        let sink = HttpSink::new(cfg, None).unwrap();
        sink.write_batch(&entries(50)).await.unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_offline_backlog_replays_through_sink() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/logs")
            .match_body(Matcher::Regex("parked".into()))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let offline = offline_queue();
        let _sink =
            HttpSink::new(config(format!("{}/logs", server.url())), Some(offline.clone())).unwrap();
        offline
            .enqueue(LogEntry::new(LogLevel::Warn, "parked"), HTTP_SINK_NAME)
            .unwrap();

        let report = offline.retry().await;
        assert_eq!(report.replayed, 1);
        assert!(offline.is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_offline_state_skips_network() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/logs")
            .with_status(200)
            .expect(0)
            .create_async()
            .await;

        let offline = offline_queue();
        offline.set_online(false);
        let sink = HttpSink::new(config(format!("{}/logs", server.url())), Some(offline.clone()))
            .unwrap();
        assert_eq!(sink.deliver(&entries(3)).await.unwrap(), Delivery::Parked);

        assert_eq!(offline.len(), 3);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let sink = HttpSink::new(HttpConfig::new("http://127.0.0.1:9/logs"), None).unwrap();
        sink.close().await.unwrap();
        assert!(matches!(
            sink.write_batch(&entries(1)).await,
            Err(ShipError::Closed)
        ));
    }
}
