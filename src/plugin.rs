//! Lifecycle hooks
//!
//! Plugins run in registration order. A plugin that fails (or panics) is
//! logged and skipped for that call; the entry continues with the remaining
//! plugins as if the failing one had returned `Keep`.

use crate::error::{Result, ShipError};
use crate::logging::LogEntry;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

/// Decision returned by `Plugin::before_log`
#[derive(Debug, Clone, PartialEq)]
pub enum BeforeLog {
    Keep,
    /// Continue with a rewritten entry
    Replace(LogEntry),
    /// Stop here; the entry never reaches flow control
    Drop,
}

pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Runs after filters and sanitization, before the admission gates
    fn before_log(&self, _entry: &LogEntry) -> Result<BeforeLog> {
        Ok(BeforeLog::Keep)
    }

    /// Runs once an entry is in history and queued for delivery
    fn after_log(&self, _entry: &LogEntry) -> Result<()> {
        Ok(())
    }

    /// A sink failed to deliver `entries`
    fn on_error(&self, _sink: &str, _error: &ShipError, _entries: &[LogEntry]) {}
}

/// Ordered plugin list with per-plugin isolation
#[derive(Default, Clone)]
pub struct PluginChain {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginChain {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self { plugins }
    }

    pub fn push(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Returns `None` if a plugin dropped the entry
    pub fn before_log(&self, mut entry: LogEntry) -> Option<LogEntry> {
        for plugin in &self.plugins {
            match catch_unwind(AssertUnwindSafe(|| plugin.before_log(&entry))) {
                Ok(Ok(BeforeLog::Keep)) => {}
                Ok(Ok(BeforeLog::Replace(next))) => entry = next,
                Ok(Ok(BeforeLog::Drop)) => return None,
                Ok(Err(e)) => warn!("Plugin {} before_log failed: {}", plugin.name(), e),
                Err(_) => warn!("Plugin {} panicked in before_log", plugin.name()),
            }
        }
        Some(entry)
    }

    pub fn after_log(&self, entry: &LogEntry) {
        for plugin in &self.plugins {
            match catch_unwind(AssertUnwindSafe(|| plugin.after_log(entry))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Plugin {} after_log failed: {}", plugin.name(), e),
                Err(_) => warn!("Plugin {} panicked in after_log", plugin.name()),
            }
        }
    }

    pub fn on_error(&self, sink: &str, error: &ShipError, entries: &[LogEntry]) {
        for plugin in &self.plugins {
            if catch_unwind(AssertUnwindSafe(|| plugin.on_error(sink, error, entries))).is_err() {
                warn!("Plugin {} panicked in on_error", plugin.name());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogLevel;
    use parking_lot::Mutex;

    struct Upper;

    impl Plugin for Upper {
        fn name(&self) -> &str {
            "upper"
        }

        fn before_log(&self, entry: &LogEntry) -> Result<BeforeLog> {
            let mut next = entry.clone();
            next.message = next.message.to_uppercase();
            Ok(BeforeLog::Replace(next))
        }
    }

    struct Broken;

    impl Plugin for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn before_log(&self, _entry: &LogEntry) -> Result<BeforeLog> {
            Err(ShipError::Plugin {
                plugin: "broken".into(),
                reason: "nope".into(),
            })
        }

        fn after_log(&self, _entry: &LogEntry) -> Result<()> {
            panic!("after_log bug");
        }
    }

    struct DropDebug;

    impl Plugin for DropDebug {
        fn name(&self) -> &str {
            "drop-debug"
        }

        fn before_log(&self, entry: &LogEntry) -> Result<BeforeLog> {
            Ok(if entry.level == LogLevel::Debug {
                BeforeLog::Drop
            } else {
                BeforeLog::Keep
            })
        }
    }

    #[derive(Default)]
    struct Seen(Mutex<Vec<String>>);

    impl Plugin for Seen {
        fn name(&self) -> &str {
            "seen"
        }

        fn after_log(&self, entry: &LogEntry) -> Result<()> {
            self.0.lock().push(entry.message.clone());
            Ok(())
        }
    }

    #[test]
    fn test_plugins_run_in_order() {
        let chain = PluginChain::new(vec![Arc::new(Broken), Arc::new(Upper)]);
        let out = chain.before_log(LogEntry::new(LogLevel::Info, "hi")).unwrap();
        assert_eq!(out.message, "HI");
    }

    #[test]
    fn test_drop_short_circuits() {
        let chain = PluginChain::new(vec![Arc::new(DropDebug), Arc::new(Upper)]);
        assert!(chain.before_log(LogEntry::new(LogLevel::Debug, "x")).is_none());
        assert!(chain.before_log(LogEntry::new(LogLevel::Info, "x")).is_some());
    }

    #[test]
    fn test_panicking_plugin_is_isolated() {
        let seen = Arc::new(Seen::default());
        let chain = PluginChain::new(vec![Arc::new(Broken), seen.clone()]);
        chain.after_log(&LogEntry::new(LogLevel::Info, "kept"));
        assert_eq!(*seen.0.lock(), vec!["kept"]);
    }
}
