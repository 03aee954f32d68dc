//! Centralized error types for the delivery pipeline
//!
//! All pipeline errors are represented by the `ShipError` enum.
//! Use `Result<T>` as shorthand for `std::result::Result<T, ShipError>`.
//!
//! Only configuration errors ever reach the caller of the logging API.
//! Everything else is recovered (retry, reconnect, offline queue) or
//! logged and counted by the component that hit it.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// All pipeline errors
#[derive(Debug)]
pub enum ShipError {
    // === Configuration ===
    /// Invalid config value
    ConfigValidation { field: &'static str, reason: String },
    /// Config file could not be parsed
    ConfigParse { path: PathBuf, reason: String },

    // === IO ===
    /// File system operation failed
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Entry or frame could not be (de)serialized
    Serialize { source: serde_json::Error },

    // === Network ===
    /// HTTP request failed before a response was received
    Http { source: reqwest::Error },
    /// HTTP endpoint answered with a non-2xx status
    HttpStatus { status: u16 },
    /// Request did not complete in time
    Timeout { after: Duration },
    /// WebSocket protocol or connection error
    WebSocket {
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },
    /// Transport has no live connection
    NotConnected,
    /// Component was already closed
    Closed,

    // === Codec ===
    /// Compressed payload could not be restored
    Decompress { reason: String },

    // === Extension points ===
    /// A sink reported a failure
    Sink { sink: String, reason: String },
    /// A plugin hook reported a failure
    Plugin { plugin: String, reason: String },
}

impl std::error::Error for ShipError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Serialize { source } => Some(source),
            Self::Http { source } => Some(source),
            Self::WebSocket { source } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl fmt::Display for ShipError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigValidation { field, reason } => {
                write!(f, "Invalid {}: {}", field, reason)
            }
            Self::ConfigParse { path, reason } => {
                write!(f, "Cannot parse config {}: {}", path.display(), reason)
            }
            Self::Io { path, .. } => write!(f, "IO error: {}", path.display()),
            Self::Serialize { source } => write!(f, "Serialization failed: {}", source),
            Self::Http { source } => write!(f, "HTTP request failed: {}", source),
            Self::HttpStatus { status } => write!(f, "HTTP endpoint returned {}", status),
            Self::Timeout { after } => write!(f, "Timed out after {} ms", after.as_millis()),
            Self::WebSocket { source } => write!(f, "WebSocket error: {}", source),
            Self::NotConnected => write!(f, "Transport not connected"),
            Self::Closed => write!(f, "Already closed"),
            Self::Decompress { reason } => write!(f, "Cannot decompress payload: {}", reason),
            Self::Sink { sink, reason } => write!(f, "Sink {} failed: {}", sink, reason),
            Self::Plugin { plugin, reason } => write!(f, "Plugin {} failed: {}", plugin, reason),
        }
    }
}

impl From<serde_json::Error> for ShipError {
    fn from(source: serde_json::Error) -> Self {
        Self::Serialize { source }
    }
}

impl From<reqwest::Error> for ShipError {
    fn from(source: reqwest::Error) -> Self {
        Self::Http { source }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ShipError {
    fn from(source: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket {
            source: Box::new(source),
        }
    }
}

/// Alias for Result with ShipError
pub type Result<T> = std::result::Result<T, ShipError>;
