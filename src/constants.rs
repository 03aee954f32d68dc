//! Pipeline-wide constants
//!
//! Centralized defaults for every configuration knob.

// =============================================================================
// Logger
// =============================================================================

/// Default logger name (root of every `source` path)
pub const DEFAULT_LOGGER_NAME: &str = "app";

/// Entries kept in the in-memory history ring
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Batch buffers retained by the queue's object pool
pub const DEFAULT_POOL_SIZE: usize = 8;

/// Keys redacted from structured data at entry creation
pub const DEFAULT_SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "token",
    "secret",
    "api_key",
    "authorization",
    "cookie",
];

/// Replacement value for redacted keys
pub const REDACTED: &str = "[REDACTED]";

// =============================================================================
// Async queue
// =============================================================================

/// Hard cap on queued entries (oldest shed beyond this)
pub const DEFAULT_QUEUE_MAX_SIZE: usize = 10_000;

/// Entries that trigger an immediate flush
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Timer-driven flush period (milliseconds)
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 5_000;

// =============================================================================
// Flow control
// =============================================================================

/// Fraction of entries admitted by the sampler
pub const DEFAULT_SAMPLE_RATE: f64 = 1.0;

/// Rate limiter sliding window (milliseconds)
pub const DEFAULT_RATE_WINDOW_MS: u64 = 1_000;

/// Entries admitted per rate limiter window
pub const DEFAULT_RATE_MAX_LOGS: usize = 100;

/// Deduplication TTL window (milliseconds)
pub const DEFAULT_DEDUP_WINDOW_MS: u64 = 1_000;

/// Fingerprints kept before the oldest half is evicted
pub const DEFAULT_DEDUP_MAX_CACHE_SIZE: usize = 1_000;

// =============================================================================
// HTTP transport
// =============================================================================

/// Retries after the initial attempt
pub const DEFAULT_HTTP_RETRY_COUNT: u32 = 3;

/// Base delay for exponential backoff (milliseconds)
pub const DEFAULT_HTTP_RETRY_DELAY_MS: u64 = 1_000;

/// Ceiling for a single backoff delay (milliseconds)
pub const DEFAULT_HTTP_MAX_RETRY_DELAY_MS: u64 = 30_000;

/// Hard abort for a single request (milliseconds)
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 10_000;

/// Bodies smaller than this are sent uncompressed (bytes)
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 1024;

/// Sink name used for offline records
pub const HTTP_SINK_NAME: &str = "http";

// =============================================================================
// WebSocket transport
// =============================================================================

/// Base reconnect delay (milliseconds)
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 1_000;

/// Ceiling for a single reconnect delay (milliseconds)
pub const DEFAULT_MAX_RECONNECT_DELAY_MS: u64 = 30_000;

/// Reconnect attempts before giving up permanently
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Heartbeat ping period (milliseconds)
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// Frames kept while disconnected
pub const DEFAULT_WS_MAX_PENDING: usize = 1_000;

/// Sink name used for offline records
pub const WEBSOCKET_SINK_NAME: &str = "websocket";

// =============================================================================
// Offline queue
// =============================================================================

/// Hard cap on persisted entries (oldest dropped beyond this)
pub const DEFAULT_OFFLINE_MAX_SIZE: usize = 5_000;

/// Entries replayed per retry pass
pub const DEFAULT_RETRY_BATCH_SIZE: usize = 50;

/// Safety-net retry period while online (milliseconds)
pub const DEFAULT_OFFLINE_RETRY_INTERVAL_MS: u64 = 30_000;

/// Replay failures tolerated before an entry is dropped
pub const DEFAULT_OFFLINE_MAX_RETRIES: u32 = 5;

/// File name of the persisted backlog inside the offline directory
pub const OFFLINE_STORE_FILE: &str = "offline-queue.json";

// =============================================================================
// File sink
// =============================================================================

/// Rotate the active file once it reaches this size (bytes)
pub const DEFAULT_FILE_MAX_BYTES: u64 = 10 * 1024 * 1024;

/// Rotated files kept next to the active one
pub const DEFAULT_FILE_MAX_FILES: usize = 5;

/// Writer thread flush period (milliseconds)
pub const DEFAULT_FILE_FLUSH_INTERVAL_MS: u64 = 1_000;

// =============================================================================
// Buffers
// =============================================================================

/// Channel capacity for async message passing
pub const CHANNEL_CAPACITY: usize = 256;
