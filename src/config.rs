//! Configuration management
//!
//! TOML file with one table per pipeline stage. Every table is optional and
//! every field has a default, so partial files work. Delivery targets
//! (`[http]`, `[websocket]`, `[file]`) and `[offline]` are only enabled when
//! their table is present.

use crate::constants::*;
use crate::error::{Result, ShipError};
use crate::flow::{DedupField, Deduplicator, RateLimiter, Sampler, SamplingStrategy};
use crate::logger::LoggerBuilder;
use crate::logging::{FileSink, FileSinkConfig, LogLevel};
use crate::offline::{FileStore, OfflineConfig, OfflineQueue};
use crate::queue::QueueConfig;
use crate::transport::http::{HttpConfig, HttpSink};
use crate::transport::websocket::{WebSocketConfig, WebSocketSink};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

// =============================================================================
// Sections
// =============================================================================

/// Full pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logger: LoggerSection,
    pub queue: QueueSection,
    pub sampling: SamplingSection,
    pub rate_limit: RateLimitSection,
    pub dedup: DedupSection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub websocket: Option<WebSocketSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offline: Option<OfflineSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<FileSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerSection {
    /// Root of every entry's `source`
    pub name: String,
    /// Entries below this level are dropped; `silent` drops everything
    pub min_level: LogLevel,
    pub history_capacity: usize,
    /// Batch buffers kept by the queue's pool
    pub pool_size: usize,
    /// Keys redacted from entry data (case-insensitive)
    pub sensitive_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    pub max_size: usize,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingSection {
    /// Fraction of entries kept, in `[0, 1]`
    pub sample_rate: f64,
    pub strategy: SamplingStrategy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub enabled: bool,
    pub window_ms: u64,
    pub max_logs: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupSection {
    pub enabled: bool,
    pub window_ms: u64,
    /// Entry fields making up the fingerprint
    pub fields: Vec<DedupField>,
    pub max_cache_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    pub url: String,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub timeout_ms: u64,
    pub compress: bool,
    pub compression_threshold: usize,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketSection {
    pub url: String,
    pub auto_reconnect: bool,
    pub reconnect_interval_ms: u64,
    pub max_reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval_ms: u64,
    pub max_pending: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineSection {
    /// Directory holding the persisted backlog
    pub path: PathBuf,
    pub max_size: usize,
    pub retry_batch_size: usize,
    pub retry_interval_ms: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSection {
    pub path: PathBuf,
    pub max_bytes: u64,
    pub max_files: usize,
}

// =============================================================================
// Defaults
// =============================================================================

impl Default for LoggerSection {
    fn default() -> Self {
        Self {
            name: DEFAULT_LOGGER_NAME.to_string(),
            min_level: LogLevel::default(),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            pool_size: DEFAULT_POOL_SIZE,
            sensitive_fields: DEFAULT_SENSITIVE_FIELDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_QUEUE_MAX_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
        }
    }
}

impl Default for SamplingSection {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            strategy: SamplingStrategy::default(),
        }
    }
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            enabled: false,
            window_ms: DEFAULT_RATE_WINDOW_MS,
            max_logs: DEFAULT_RATE_MAX_LOGS,
        }
    }
}

impl Default for DedupSection {
    fn default() -> Self {
        Self {
            enabled: false,
            window_ms: DEFAULT_DEDUP_WINDOW_MS,
            fields: DedupField::defaults(),
            max_cache_size: DEFAULT_DEDUP_MAX_CACHE_SIZE,
        }
    }
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            url: String::new(),
            retry_count: DEFAULT_HTTP_RETRY_COUNT,
            retry_delay_ms: DEFAULT_HTTP_RETRY_DELAY_MS,
            max_retry_delay_ms: DEFAULT_HTTP_MAX_RETRY_DELAY_MS,
            timeout_ms: DEFAULT_HTTP_TIMEOUT_MS,
            compress: false,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            headers: BTreeMap::new(),
        }
    }
}

impl Default for WebSocketSection {
    fn default() -> Self {
        Self {
            url: String::new(),
            auto_reconnect: true,
            reconnect_interval_ms: DEFAULT_RECONNECT_INTERVAL_MS,
            max_reconnect_delay_ms: DEFAULT_MAX_RECONNECT_DELAY_MS,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            max_pending: DEFAULT_WS_MAX_PENDING,
        }
    }
}

impl Default for OfflineSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("offline"),
            max_size: DEFAULT_OFFLINE_MAX_SIZE,
            retry_batch_size: DEFAULT_RETRY_BATCH_SIZE,
            retry_interval_ms: DEFAULT_OFFLINE_RETRY_INTERVAL_MS,
            max_retries: DEFAULT_OFFLINE_MAX_RETRIES,
        }
    }
}

impl Default for FileSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("logs/app.log"),
            max_bytes: DEFAULT_FILE_MAX_BYTES,
            max_files: DEFAULT_FILE_MAX_FILES,
        }
    }
}

// =============================================================================
// Runtime settings
// =============================================================================

impl QueueSection {
    pub fn to_queue_config(&self, pool_size: usize) -> QueueConfig {
        QueueConfig {
            max_size: self.max_size,
            batch_size: self.batch_size,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            pool_size,
        }
    }
}

impl HttpSection {
    pub fn to_http_config(&self) -> HttpConfig {
        HttpConfig {
            url: self.url.clone(),
            retry_count: self.retry_count,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            max_retry_delay: Duration::from_millis(self.max_retry_delay_ms),
            timeout: Duration::from_millis(self.timeout_ms),
            compress: self.compress,
            compression_threshold: self.compression_threshold,
            headers: self.headers.clone(),
        }
    }
}

impl WebSocketSection {
    pub fn to_websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            url: self.url.clone(),
            auto_reconnect: self.auto_reconnect,
            reconnect_interval: Duration::from_millis(self.reconnect_interval_ms),
            max_reconnect_delay: Duration::from_millis(self.max_reconnect_delay_ms),
            max_reconnect_attempts: self.max_reconnect_attempts,
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            max_pending: self.max_pending,
        }
    }
}

impl OfflineSection {
    pub fn to_offline_config(&self) -> OfflineConfig {
        OfflineConfig {
            max_size: self.max_size,
            retry_batch_size: self.retry_batch_size,
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            max_retries: self.max_retries,
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.path.join(OFFLINE_STORE_FILE)
    }
}

impl FileSection {
    pub fn to_file_config(&self) -> FileSinkConfig {
        FileSinkConfig {
            path: self.path.clone(),
            max_bytes: self.max_bytes,
            max_files: self.max_files,
            flush_interval: Duration::from_millis(DEFAULT_FILE_FLUSH_INTERVAL_MS),
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

impl Config {
    /// Check every range. Misconfiguration is the only error the pipeline raises.
    pub fn validate(&self) -> Result<()> {
        if self.logger.name.is_empty() {
            return Err(ShipError::ConfigValidation {
                field: "logger.name",
                reason: "must not be empty".into(),
            });
        }
        if self.logger.history_capacity == 0 {
            return Err(ShipError::ConfigValidation {
                field: "logger.history_capacity",
                reason: "must be greater than zero".into(),
            });
        }
        self.queue.to_queue_config(self.logger.pool_size).validate()?;
        Sampler::new(self.sampling.sample_rate, self.sampling.strategy)?;
        if self.rate_limit.enabled {
            RateLimiter::new(
                Duration::from_millis(self.rate_limit.window_ms),
                self.rate_limit.max_logs,
            )?;
        }
        if self.dedup.enabled {
            Deduplicator::new(
                Duration::from_millis(self.dedup.window_ms),
                self.dedup.fields.clone(),
                self.dedup.max_cache_size,
            )?;
        }
        if let Some(http) = &self.http {
            http.to_http_config().validate()?;
        }
        if let Some(ws) = &self.websocket {
            ws.to_websocket_config().validate()?;
        }
        if let Some(offline) = &self.offline {
            offline.to_offline_config().validate()?;
        }
        if let Some(file) = &self.file {
            if file.max_bytes == 0 {
                return Err(ShipError::ConfigValidation {
                    field: "file.max_bytes",
                    reason: "must be greater than zero".into(),
                });
            }
        }
        Ok(())
    }
}

// =============================================================================
// File I/O
// =============================================================================

/// Load and validate a config file
pub fn load(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path).map_err(|e| ShipError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let config: Config = toml::from_str(&content).map_err(|e| ShipError::ConfigParse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}

/// Write `config` as pretty TOML
pub fn save(config: &Config, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config).map_err(|e| ShipError::ConfigParse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    fs::write(path, content).map_err(|e| ShipError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

// =============================================================================
// Pipeline assembly
// =============================================================================

/// Build the pipeline described by `config`: gates, offline queue and sinks.
///
/// The returned builder can still take filters, plugins and extra sinks.
/// Must be called inside a Tokio runtime (sinks start background tasks).
pub fn logger_builder(config: &Config) -> Result<LoggerBuilder> {
    config.validate()?;

    let mut builder = LoggerBuilder::new(config.logger.name.clone())
        .min_level(config.logger.min_level)
        .history_capacity(config.logger.history_capacity)
        .sensitive_fields(&config.logger.sensitive_fields)
        .queue(config.queue.to_queue_config(config.logger.pool_size))
        .sampling(config.sampling.sample_rate, config.sampling.strategy);
    if config.rate_limit.enabled {
        builder = builder.rate_limit(
            Duration::from_millis(config.rate_limit.window_ms),
            config.rate_limit.max_logs,
        );
    }
    if config.dedup.enabled {
        builder = builder.dedup(
            Duration::from_millis(config.dedup.window_ms),
            config.dedup.fields.clone(),
            config.dedup.max_cache_size,
        );
    }

    let offline = match &config.offline {
        Some(section) => {
            let store = FileStore::new(section.store_path())?;
            info!("Offline backlog at {}", store.path().display());
            let queue = Arc::new(OfflineQueue::new(section.to_offline_config(), Box::new(store))?);
            builder = builder.offline(Arc::clone(&queue));
            Some(queue)
        }
        None => None,
    };

    if let Some(section) = &config.http {
        let sink = HttpSink::new(section.to_http_config(), offline.clone())?;
        info!("HTTP sink -> {}", sink.url());
        builder = builder.sink(Arc::new(sink));
    }
    if let Some(section) = &config.websocket {
        let sink = WebSocketSink::spawn(section.to_websocket_config(), offline.clone())?;
        info!("WebSocket sink -> {}", section.url);
        builder = builder.sink(Arc::new(sink));
    }
    if let Some(section) = &config.file {
        let sink = FileSink::spawn(section.to_file_config())?;
        info!("File sink -> {}", section.path.display());
        builder = builder.sink(Arc::new(sink));
    }

    Ok(builder)
}

// ============================================================================
// Tests
// ============================================================================
