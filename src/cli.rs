//! Command-line interface definition using clap
//!
//! Provides structured argument parsing with automatic help generation.

use crate::config::{Config, HttpSection, OfflineSection, WebSocketSection};
use crate::logging::LogLevel;
use clap::Parser;
use serde_json::{Map, Value};
use std::path::PathBuf;

// =============================================================================
// CLI Definition
// =============================================================================

/// Ship log lines from stdin to HTTP / WebSocket collectors
#[derive(Parser, Debug, Default)]
#[command(name = "logship")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose debug output
    #[arg(short, long)]
    pub verbose: bool,

    /// TOML config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// HTTP collector URL (overrides config)
    #[arg(long, value_name = "URL")]
    pub url: Option<String>,

    /// WebSocket collector URL (overrides config)
    #[arg(long, value_name = "URL")]
    pub ws_url: Option<String>,

    /// Directory for the persisted offline backlog (overrides config)
    #[arg(long, value_name = "DIR")]
    pub offline_dir: Option<PathBuf>,

    /// Minimum level to ship (overrides config)
    #[arg(long, value_name = "LEVEL")]
    pub level: Option<LogLevel>,

    /// Logger name used as entry source (overrides config)
    #[arg(long, value_name = "NAME")]
    pub source: Option<String>,
}

impl Cli {
    /// Apply command-line overrides on top of a loaded config
    pub fn apply(&self, config: &mut Config) {
        if let Some(url) = &self.url {
            config.http.get_or_insert_with(HttpSection::default).url = url.clone();
        }
        if let Some(url) = &self.ws_url {
            config
                .websocket
                .get_or_insert_with(WebSocketSection::default)
                .url = url.clone();
        }
        if let Some(dir) = &self.offline_dir {
            config.offline.get_or_insert_with(OfflineSection::default).path = dir.clone();
        }
        if let Some(level) = self.level {
            config.logger.min_level = level;
        }
        if let Some(source) = &self.source {
            config.logger.name = source.clone();
        }
    }
}

// =============================================================================
// Input lines
// =============================================================================

/// One stdin line turned into log call arguments
#[derive(Debug, Clone, PartialEq)]
pub struct InputLine {
    pub level: LogLevel,
    pub message: String,
    pub data: Option<Value>,
}

/// Interpret a stdin line.
///
/// A JSON object with a string `message` keeps its `level` (default INFO)
/// and passes the remaining fields as data. Anything else is an INFO entry
/// with the raw line as message. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Option<InputLine> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.starts_with('{') {
        if let Ok(Value::Object(mut fields)) = serde_json::from_str::<Value>(trimmed) {
            if let Some(Value::String(message)) = fields.remove("message") {
                let level = match fields.remove("level") {
                    Some(Value::String(s)) => s.parse().unwrap_or_default(),
                    _ => LogLevel::default(),
                };
                return Some(InputLine {
                    level,
                    message,
                    data: non_empty(fields),
                });
            }
        }
    }

    Some(InputLine {
        level: LogLevel::Info,
        message: trimmed.to_string(),
        data: None,
    })
}

fn non_empty(fields: Map<String, Value>) -> Option<Value> {
    if fields.is_empty() {
        None
    } else {
        Some(Value::Object(fields))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cli_parse_defaults() {
        let cli = Cli::parse_from(["logship"]);
        assert!(!cli.verbose);
        assert!(cli.config.is_none());
        assert!(cli.url.is_none());
        assert!(cli.level.is_none());
    }

    #[test]
    fn test_cli_parse_verbose() {
        let cli = Cli::parse_from(["logship", "-v"]);
        assert!(cli.verbose);

        let cli = Cli::parse_from(["logship", "--verbose"]);
        assert!(cli.verbose);
    }

    #[test]
    fn test_cli_parse_level() {
        let cli = Cli::parse_from(["logship", "--level", "warning"]);
        assert_eq!(cli.level, Some(LogLevel::Warn));
        assert!(Cli::try_parse_from(["logship", "--level", "loud"]).is_err());
    }

    #[test]
    fn test_overrides_create_sections() {
        let cli = Cli::parse_from([
            "logship",
            "--url",
            "http://localhost:8080/logs",
            "--offline-dir",
            "/tmp/backlog",
            "--source",
            "batch-job",
        ]);
        let mut config = Config::default();
        cli.apply(&mut config);

        let http = config.http.unwrap();
        assert_eq!(http.url, "http://localhost:8080/logs");
        assert_eq!(http.retry_count, crate::constants::DEFAULT_HTTP_RETRY_COUNT);
        assert_eq!(config.offline.unwrap().path, PathBuf::from("/tmp/backlog"));
        assert_eq!(config.logger.name, "batch-job");
        assert!(config.websocket.is_none());
    }

    #[test]
    fn test_parse_plain_line() {
        let line = parse_line("  server started  ").unwrap();
        assert_eq!(line.level, LogLevel::Info);
        assert_eq!(line.message, "server started");
        assert!(line.data.is_none());
        assert!(parse_line("   ").is_none());
    }

    #[test]
    fn test_parse_json_line() {
        let line = parse_line(r#"{"level":"error","message":"db down","retries":3}"#).unwrap();
        assert_eq!(line.level, LogLevel::Error);
        assert_eq!(line.message, "db down");
        assert_eq!(line.data, Some(json!({"retries": 3})));

        let unknown_level = parse_line(r#"{"level":"loud","message":"x"}"#).unwrap();
        assert_eq!(unknown_level.level, LogLevel::Info);
    }

    #[test]
    fn test_json_without_message_is_raw() {
        let line = parse_line(r#"{"msg":"x"}"#).unwrap();
        assert_eq!(line.message, r#"{"msg":"x"}"#);
    }
}
