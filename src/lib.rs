//! logship - reliable log delivery pipeline
//!
//! Takes structured log entries from the application and delivers them to
//! local storage and remote collectors under network loss, collector
//! outages and bursty traffic.
//!
//! ```text
//! Logger ─► gates ─► history + AsyncQueue ─► sinks (HTTP, WebSocket, file)
//!                                               │ failure
//!                                               ▼
//!                                         OfflineQueue ─► replay on reconnect
//! ```

pub mod buffer;
pub mod cli;
pub mod compress;
pub mod config;
pub mod constants;
pub mod error;
pub mod flow;
pub mod logger;
pub mod logging;
pub mod offline;
pub mod plugin;
pub mod queue;
pub mod registry;
pub mod stats;
pub mod transport;

pub use error::{Result, ShipError};
pub use logger::{LogContext, Logger, LoggerBuilder};
pub use logging::{init_tracing, ErrorInfo, LogEntry, LogLevel};
pub use offline::{OfflineLogEntry, OfflineQueue};
pub use plugin::{BeforeLog, Plugin};
pub use registry::LoggerRegistry;
pub use transport::{HttpSink, Sink, WebSocketSink};
