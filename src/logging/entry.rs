//! Log entry types
//!
//! Core types for representing a structured log record as it travels
//! through the pipeline and over the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ShipError;

/// Per-process sequence used to build entry ids
static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Severity of an entry, ordered from most to least verbose.
///
/// `Silent` is only meaningful as a minimum level: nothing is logged at it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
    Silent,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
            Self::Silent => "SILENT",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ShipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "fatal" => Ok(Self::Fatal),
            "silent" => Ok(Self::Silent),
            other => Err(ShipError::ConfigValidation {
                field: "level",
                reason: format!("unknown level '{}'", other),
            }),
        }
    }
}

/// Error attached to an entry (name / message / stack triple)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorInfo {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Capture a Rust error and its `source()` chain as the stack.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut cur = err.source();
        while let Some(cause) = cur {
            chain.push(format!("caused by: {}", cause));
            cur = cause.source();
        }
        Self {
            name: "Error".to_string(),
            message: err.to_string(),
            stack: (!chain.is_empty()).then(|| chain.join("\n")),
        }
    }
}

/// One structured log record.
///
/// Built once by the logger and never mutated afterwards; sanitization
/// produces the final value before the entry enters the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl LogEntry {
    /// Current time in milliseconds since the Unix epoch
    #[inline]
    pub fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Start building an entry stamped with the current time
    pub fn builder(level: LogLevel, message: impl Into<String>) -> EntryBuilder {
        EntryBuilder::new(level, message)
    }

    /// Shorthand for an entry with no optional fields
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        EntryBuilder::new(level, message).build()
    }
}

/// Generate an entry id: millisecond timestamp plus a process-wide sequence.
///
/// Ids sort by creation time within a process.
pub fn next_id(timestamp: i64) -> String {
    let seq = NEXT_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{:011x}-{:08x}", timestamp, seq)
}

/// Builder for `LogEntry`
#[derive(Debug, Clone)]
pub struct EntryBuilder {
    entry: LogEntry,
}

impl EntryBuilder {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        let timestamp = LogEntry::now_ms();
        Self {
            entry: LogEntry {
                id: next_id(timestamp),
                timestamp,
                level,
                message: message.into(),
                data: None,
                error: None,
                tags: Vec::new(),
                source: String::new(),
                correlation_id: None,
                user_id: None,
                session_id: None,
            },
        }
    }

    pub fn data(mut self, data: Value) -> Self {
        self.entry.data = Some(data);
        self
    }

    pub fn error(mut self, error: ErrorInfo) -> Self {
        self.entry.error = Some(error);
        self
    }

    /// Add a tag, keeping insertion order and ignoring duplicates
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !self.entry.tags.contains(&tag) {
            self.entry.tags.push(tag);
        }
        self
    }

    pub fn tags<I, S>(self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        tags.into_iter().fold(self, |b, t| b.tag(t))
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.entry.source = source.into();
        self
    }

    pub fn correlation_id(mut self, id: Option<String>) -> Self {
        self.entry.correlation_id = id;
        self
    }

    pub fn user_id(mut self, id: Option<String>) -> Self {
        self.entry.user_id = id;
        self
    }

    pub fn session_id(mut self, id: Option<String>) -> Self {
        self.entry.session_id = id;
        self
    }

    pub fn timestamp(mut self, timestamp: i64) -> Self {
        self.entry.timestamp = timestamp;
        self
    }

    pub fn build(self) -> LogEntry {
        self.entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Warn < LogLevel::Error);
        assert!(LogLevel::Fatal < LogLevel::Silent);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("FATAL".parse::<LogLevel>().unwrap(), LogLevel::Fatal);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_ids_are_unique_and_ordered() {
        let a = LogEntry::new(LogLevel::Info, "a");
        let b = LogEntry::new(LogLevel::Info, "b");
        assert_ne!(a.id, b.id);
        assert!(a.id < b.id);
    }

    #[test]
    fn test_tags_keep_order_without_duplicates() {
        let entry = LogEntry::builder(LogLevel::Info, "tagged")
            .tags(["net", "retry", "net"])
            .build();
        assert_eq!(entry.tags, vec!["net", "retry"]);
    }

    #[test]
    fn test_wire_field_names() {
        let entry = LogEntry::builder(LogLevel::Error, "boom")
            .data(json!({"k": 1}))
            .error(ErrorInfo::new("IoError", "disk full"))
            .source("app.db")
            .correlation_id(Some("c-1".into()))
            .build();
        let json = serde_json::to_string(&entry).unwrap();

        assert!(json.contains("\"level\":\"ERROR\""));
        assert!(json.contains("\"correlationId\":\"c-1\""));
        assert!(json.contains("\"source\":\"app.db\""));
        assert!(!json.contains("userId"));
    }

    #[test]
    fn test_error_info_from_error_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "inner");
        let outer = ShipError::Io {
            path: "/tmp/x".into(),
            source: io,
        };
        let info = ErrorInfo::from_error(&outer);
        assert_eq!(info.message, "IO error: /tmp/x");
        assert_eq!(info.stack.as_deref(), Some("caused by: inner"));
    }
}
