//! Named logger registry
//!
//! Owned by the application root and passed around explicitly; there is no
//! process-global logger table.

use crate::error::Result;
use crate::logger::Logger;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

#[derive(Default)]
pub struct LoggerRegistry {
    loggers: RwLock<HashMap<String, Logger>>,
}

impl LoggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the logger registered as `name`, building it with `build` if absent.
    ///
    /// `build` runs at most once per name, even under concurrent callers.
    pub fn get_or_create<F>(&self, name: &str, build: F) -> Result<Logger>
    where
        F: FnOnce(&str) -> Result<Logger>,
    {
        if let Some(logger) = self.get(name) {
            return Ok(logger);
        }
        let mut loggers = self.loggers.write();
        if let Some(logger) = loggers.get(name) {
            return Ok(logger.clone());
        }
        let logger = build(name)?;
        loggers.insert(name.to_string(), logger.clone());
        debug!("Registered logger {}", name);
        Ok(logger)
    }

    pub fn get(&self, name: &str) -> Option<Logger> {
        self.loggers.read().get(name).cloned()
    }

    /// Unregister `name`. The logger stays usable by whoever holds it.
    pub fn remove(&self, name: &str) -> Option<Logger> {
        self.loggers.write().remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.loggers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.loggers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.loggers.read().is_empty()
    }

    /// Close and unregister every logger
    pub async fn close_all(&self) {
        let loggers: Vec<_> = self.loggers.write().drain().collect();
        for (name, logger) in loggers {
            logger.close().await;
            debug!("Closed logger {}", name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_get_or_create_builds_once() {
        let registry = LoggerRegistry::new();
        let builds = AtomicUsize::new(0);
        let build = |name: &str| {
            builds.fetch_add(1, Ordering::Relaxed);
            Logger::builder(name).build()
        };

        let a = registry.get_or_create("api", build).unwrap();
        let b = registry.get_or_create("api", build).unwrap();
        assert_eq!(builds.load(Ordering::Relaxed), 1);
        assert_eq!(a.source(), "api");
        assert_eq!(b.source(), "api");
        assert_eq!(registry.names(), vec!["api"]);
    }

    #[tokio::test]
    async fn test_failed_build_registers_nothing() {
        let registry = LoggerRegistry::new();
        let result = registry.get_or_create("bad", |name| {
            Logger::builder(name).history_capacity(0).build()
        });
        assert!(result.is_err());
        assert!(registry.get("bad").is_none());
    }

    #[tokio::test]
    async fn test_remove_and_close_all() {
        let registry = LoggerRegistry::new();
        let a = registry
            .get_or_create("a", |n| Logger::builder(n).build())
            .unwrap();
        registry
            .get_or_create("b", |n| Logger::builder(n).build())
            .unwrap();

        assert!(registry.remove("b").is_some());
        assert_eq!(registry.len(), 1);

        registry.close_all().await;
        assert!(registry.is_empty());
        assert!(a.is_closed());
    }
}
