//! Entry model and local logging concerns
//!
//! Centralizes the log-record types and the pieces that act on a single entry:
//! - `LogEntry` - Individual structured records (level, message, data, context)
//! - `Filter` - Relevance predicates applied before flow control
//! - `Sanitizer` - Redaction of sensitive keys at creation time
//! - `FileSink` - Local JSON-lines storage with rotation

pub mod entry;
pub mod file;
pub mod filter;
pub mod sanitize;

pub use entry::{EntryBuilder, ErrorInfo, LogEntry, LogLevel};
pub use file::{FileSink, FileSinkConfig};
pub use filter::{Filter, LevelFilter, SourceFilter, TagFilter};
pub use sanitize::Sanitizer;

/// Initialize internal tracing for pipeline diagnostics
///
/// Call early in main() before any logging occurs. Library code never
/// installs a subscriber on its own.
/// Set `verbose` to true for debug-level output.
pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let level = if verbose { "debug" } else { "warn" };

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_file(false)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .with(tracing_subscriber::EnvFilter::new(level))
        .try_init();
}
