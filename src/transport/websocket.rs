//! WebSocket collector sink
//!
//! Keeps one persistent connection to the collector and sends JSON frames:
//!
//! ```text
//! { "type": "logs", "payload": [LogEntry...], "timestamp": <ms> }
//! { "type": "ping", "timestamp": <ms> }
//! ```
//!
//! State machine:
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected
//!                      ▲              │ close / error
//!                      │              ▼
//!                 Reconnecting ◄── Disconnected ──► Failed (attempts exhausted)
//! ```
//!
//! The connection task owns the socket. Writers only push batches into a
//! bounded pending list and wake the task, so a write never waits on the
//! network and batches queued while disconnected go out on reconnect.
//!
//! Once the task stops for good (reconnect disabled or attempts exhausted)
//! the sink is `Failed`: anything still pending and every later write goes
//! to the offline queue. Offline replays are acknowledged by the task only
//! after the frame was written to the socket.

use super::{backoff, Delivery, Sink};
use crate::constants::{
    DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_MAX_RECONNECT_DELAY_MS,
    DEFAULT_RECONNECT_INTERVAL_MS, DEFAULT_WS_MAX_PENDING, WEBSOCKET_SINK_NAME,
};
use crate::error::{Result, ShipError};
use crate::logging::LogEntry;
use crate::offline::{OfflineQueue, ReplayHandler};
use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Time `close()` waits for the connection task to drain and exit
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Time a replay waits for the connection task to write its frame
const REPLAY_ACK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// The connection task stopped for good; writes go offline
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub url: String,
    pub auto_reconnect: bool,
    pub reconnect_interval: Duration,
    pub max_reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval: Duration,
    /// Batches kept while disconnected (oldest dropped beyond this)
    pub max_pending: usize,
}

impl WebSocketConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auto_reconnect: true,
            reconnect_interval: Duration::from_millis(DEFAULT_RECONNECT_INTERVAL_MS),
            max_reconnect_delay: Duration::from_millis(DEFAULT_MAX_RECONNECT_DELAY_MS),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            max_pending: DEFAULT_WS_MAX_PENDING,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(ShipError::ConfigValidation {
                field: "websocket.url",
                reason: format!("expected a ws(s) URL, got '{}'", self.url),
            });
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ShipError::ConfigValidation {
                field: "websocket.heartbeat_interval_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.max_pending == 0 {
            return Err(ShipError::ConfigValidation {
                field: "websocket.max_pending",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// Delay before reconnect attempt `attempt` (0-based)
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        backoff(self.reconnect_interval, self.max_reconnect_delay, attempt)
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum OutFrame<'a> {
    Logs {
        payload: &'a [LogEntry],
        timestamp: i64,
    },
    Ping {
        timestamp: i64,
    },
}

#[derive(Deserialize)]
struct InFrame {
    #[serde(rename = "type")]
    kind: String,
}

/// Offline batch waiting to be written by the connection task
struct ReplayFrame {
    frame: String,
    /// Answered once the frame is on the socket; dropped on failure
    written: oneshot::Sender<()>,
}

struct Shared {
    config: WebSocketConfig,
    offline: Option<Arc<OfflineQueue>>,
    state: RwLock<ConnectionState>,
    pending: Mutex<VecDeque<Vec<LogEntry>>>,
    replays: Mutex<VecDeque<ReplayFrame>>,
    outbound: Notify,
    shutdown: Notify,
    closed: AtomicBool,
    reconnect_attempts: AtomicU32,
    connect_attempts: AtomicU64,
    dropped: AtomicU64,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn set_state(&self, next: ConnectionState) {
        let prev = std::mem::replace(&mut *self.state.write(), next);
        if prev != next {
            debug!("WebSocket {} -> {}", prev, next);
        }
    }

    /// Queue a batch for the connection task.
    ///
    /// Hands the batch back if the task has already given up. The state is
    /// read under the pending lock, which the task holds while moving to
    /// `Failed`, so nothing is stranded.
    fn enqueue(&self, batch: Vec<LogEntry>) -> std::result::Result<(), Vec<LogEntry>> {
        let overflow = {
            let mut pending = self.pending.lock();
            if self.state() == ConnectionState::Failed {
                return Err(batch);
            }
            let overflow = if pending.len() >= self.config.max_pending {
                pending.pop_front();
                true
            } else {
                false
            };
            pending.push_back(batch);
            overflow
        };
        if overflow {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if total.is_power_of_two() {
                warn!("WebSocket pending list full, dropped {} batches so far", total);
            }
        }
        self.outbound.notify_one();
        Ok(())
    }

    /// Store a batch the connection cannot take
    fn park(&self, batch: Vec<LogEntry>) -> Result<Delivery> {
        match &self.offline {
            Some(offline) => {
                offline.enqueue_batch(batch, WEBSOCKET_SINK_NAME)?;
                Ok(Delivery::Parked)
            }
            None => Err(ShipError::NotConnected),
        }
    }

    /// Move every pending batch to the offline queue (or count it lost)
    fn park_pending(&self, stranded: Vec<Vec<LogEntry>>) {
        let mut lost = 0;
        for batch in stranded {
            let len = batch.len();
            if let Err(e) = self.park(batch) {
                debug!("Cannot park {} entries: {}", len, e);
                lost += len;
            }
        }
        if lost > 0 {
            warn!("WebSocket stopped with {} undeliverable entries", lost);
        }
    }

    /// Fail every waiting replay; their records stay in the offline store
    fn abandon_replays(&self) {
        let abandoned = std::mem::take(&mut *self.replays.lock());
        if !abandoned.is_empty() {
            debug!("Connection lost with {} replays in flight", abandoned.len());
        }
    }
}

pub struct WebSocketSink {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketSink {
    /// Start the connection task. Must be called inside a Tokio runtime.
    pub fn spawn(config: WebSocketConfig, offline: Option<Arc<OfflineQueue>>) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(Shared {
            config,
            offline,
            state: RwLock::new(ConnectionState::Disconnected),
            pending: Mutex::new(VecDeque::new()),
            replays: Mutex::new(VecDeque::new()),
            outbound: Notify::new(),
            shutdown: Notify::new(),
            closed: AtomicBool::new(false),
            reconnect_attempts: AtomicU32::new(0),
            connect_attempts: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });
        if let Some(offline) = &shared.offline {
            offline.on_online(
                WEBSOCKET_SINK_NAME,
                Arc::new(WsReplay(Arc::downgrade(&shared))),
            );
        }
        let task = tokio::spawn(run_connection(Arc::clone(&shared)));
        Ok(Self {
            shared,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Consecutive reconnect attempts since the last successful connect
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Every connect call made, the first one included
    pub fn connect_attempts(&self) -> u64 {
        self.shared.connect_attempts.load(Ordering::Relaxed)
    }

    pub fn pending_len(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Batches dropped from the pending list on overflow
    pub fn dropped_count(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

fn logs_frame(entries: &[LogEntry]) -> Result<String> {
    Ok(serde_json::to_string(&OutFrame::Logs {
        payload: entries,
        timestamp: LogEntry::now_ms(),
    })?)
}

#[async_trait]
impl Sink for WebSocketSink {
    fn name(&self) -> &str {
        WEBSOCKET_SINK_NAME
    }

    async fn write(&self, entry: &LogEntry) -> Result<()> {
        self.write_batch(std::slice::from_ref(entry)).await
    }

    async fn write_batch(&self, entries: &[LogEntry]) -> Result<()> {
        self.deliver(entries).await.map(|_| ())
    }

    /// `Sent` means handed to the connection task
    async fn deliver(&self, entries: &[LogEntry]) -> Result<Delivery> {
        if entries.is_empty() {
            return Ok(Delivery::Sent);
        }
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(ShipError::Closed);
        }
        match self.shared.enqueue(entries.to_vec()) {
            Ok(()) => Ok(Delivery::Sent),
            Err(batch) => self.shared.park(batch),
        }
    }

    async fn flush(&self) -> Result<()> {
        self.shared.outbound.notify_one();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shared.shutdown.notify_one();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if tokio::time::timeout(CLOSE_TIMEOUT, task).await.is_err() {
                warn!("WebSocket task did not stop within {:?}", CLOSE_TIMEOUT);
            }
        }
        let left: Vec<_> = self.shared.pending.lock().drain(..).collect();
        if !left.is_empty() {
            debug!("WebSocket closed with {} unsent batches", left.len());
            self.shared.park_pending(left);
        }
        self.shared.set_state(ConnectionState::Disconnected);
        Ok(())
    }

    fn unload(&self, entries: &[LogEntry]) {
        if entries.is_empty() || self.shared.closed.load(Ordering::Acquire) {
            return;
        }
        // The connection task sends it if it is still running
        if let Err(batch) = self.shared.enqueue(entries.to_vec()) {
            let _ = self.shared.park(batch);
        }
    }
}

impl Drop for WebSocketSink {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

/// Replays offline entries over the live connection.
///
/// Succeeds only once the connection task has written the frame.
struct WsReplay(Weak<Shared>);

#[async_trait]
impl ReplayHandler for WsReplay {
    async fn replay(&self, entries: &[LogEntry]) -> Result<()> {
        let shared = self.0.upgrade().ok_or(ShipError::Closed)?;
        let frame = logs_frame(entries)?;
        let (written, ack) = oneshot::channel();
        {
            let mut replays = shared.replays.lock();
            if shared.state() != ConnectionState::Connected {
                return Err(ShipError::NotConnected);
            }
            replays.push_back(ReplayFrame { frame, written });
        }
        shared.outbound.notify_one();

        match tokio::time::timeout(REPLAY_ACK_TIMEOUT, ack).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ShipError::NotConnected),
            Err(_) => Err(ShipError::Timeout {
                after: REPLAY_ACK_TIMEOUT,
            }),
        }
    }
}

/// Connect, serve, and reconnect with backoff until closed or out of attempts
async fn run_connection(shared: Arc<Shared>) {
    let config = shared.config.clone();
    let mut attempts: u32 = 0;

    loop {
        if shared.closed.load(Ordering::Acquire) {
            break;
        }
        shared.set_state(ConnectionState::Connecting);
        shared.connect_attempts.fetch_add(1, Ordering::Relaxed);

        match connect_async(config.url.as_str()).await {
            Ok((ws, _response)) => {
                info!("WebSocket connected to {}", config.url);
                attempts = 0;
                shared.reconnect_attempts.store(0, Ordering::Relaxed);
                shared.set_state(ConnectionState::Connected);
                replay_backlog(&shared);

                if let Err(e) = serve(&shared, ws).await {
                    debug!("WebSocket connection error: {}", e);
                }
                shared.set_state(ConnectionState::Disconnected);
                shared.abandon_replays();
                if shared.closed.load(Ordering::Acquire) {
                    break;
                }
                info!("WebSocket disconnected from {}", config.url);
            }
            Err(e) => warn!("WebSocket connect to {} failed: {}", config.url, e),
        }

        shared.set_state(ConnectionState::Disconnected);
        if !config.auto_reconnect {
            warn!("WebSocket to {} is down and auto reconnect is off", config.url);
            break;
        }
        if attempts >= config.max_reconnect_attempts {
            error!(
                "WebSocket gave up on {} after {} reconnect attempts",
                config.url, attempts
            );
            break;
        }

        let delay = config.reconnect_delay(attempts);
        attempts += 1;
        shared.reconnect_attempts.store(attempts, Ordering::Relaxed);
        shared.set_state(ConnectionState::Reconnecting);
        debug!(
            "WebSocket reconnect {}/{} in {} ms",
            attempts,
            config.max_reconnect_attempts,
            delay.as_millis()
        );
        tokio::select! {
            _ = shared.shutdown.notified() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.abandon_replays();
    if !shared.closed.load(Ordering::Acquire) {
        let stranded: Vec<_> = {
            let mut pending = shared.pending.lock();
            shared.set_state(ConnectionState::Failed);
            pending.drain(..).collect()
        };
        shared.park_pending(stranded);
    }
}

/// Start an offline replay when a connection comes up with a backlog waiting
fn replay_backlog(shared: &Shared) {
    if let Some(offline) = &shared.offline {
        if offline.is_online() && !offline.is_empty() {
            let offline = Arc::clone(offline);
            tokio::spawn(async move {
                offline.retry().await;
            });
        }
    }
}

/// Drive one live connection. Returns when it closes or the sink shuts down.
async fn serve(shared: &Shared, ws: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Result<()> {
    let (mut writer, mut reader) = ws.split();

    let mut heartbeat = tokio::time::interval(shared.config.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;

    drain_replays(shared, &mut writer).await?;
    drain_pending(shared, &mut writer).await?;

    loop {
        tokio::select! {
            _ = shared.shutdown.notified() => {
                let drained = drain_pending(shared, &mut writer).await;
                let _ = writer.send(Message::Close(None)).await;
                return drained;
            }
            _ = shared.outbound.notified() => {
                drain_replays(shared, &mut writer).await?;
                drain_pending(shared, &mut writer).await?;
            }
            _ = heartbeat.tick() => {
                let ping = serde_json::to_string(&OutFrame::Ping {
                    timestamp: LogEntry::now_ms(),
                })?;
                writer.send(Message::Text(ping.into())).await?;
            }
            msg = reader.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(frame) = serde_json::from_str::<InFrame>(text.as_str()) {
                        if frame.kind == "pong" {
                            debug!("WebSocket pong");
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}

/// Write waiting replay frames, acknowledging each one after it went out
async fn drain_replays(shared: &Shared, writer: &mut WsWriter) -> Result<()> {
    loop {
        let next = shared.replays.lock().pop_front();
        let Some(replay) = next else {
            return Ok(());
        };
        // On error the sender is dropped and the replay sees the failure
        writer.send(Message::Text(replay.frame.into())).await?;
        let _ = replay.written.send(());
    }
}

/// Send queued batches in order. A batch that fails to send goes back to the front.
async fn drain_pending(shared: &Shared, writer: &mut WsWriter) -> Result<()> {
    loop {
        let next = shared.pending.lock().pop_front();
        let Some(batch) = next else {
            return Ok(());
        };
        let frame = match logs_frame(&batch) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping {} entries that cannot be encoded: {}", batch.len(), e);
                continue;
            }
        };
        if let Err(e) = writer.send(Message::Text(frame.into())).await {
            shared.pending.lock().push_front(batch);
            return Err(e.into());
        }
    }
}
