//! Log filtering
//!
//! Filters decide whether an entry is relevant at all. They run after the
//! minimum-level check and before plugins and flow control, so a filtered
//! entry never reaches history or delivery.

use super::{LogEntry, LogLevel};
use std::collections::HashSet;

/// Predicate over entries. Returning `false` drops the entry.
pub trait Filter: Send + Sync {
    fn matches(&self, entry: &LogEntry) -> bool;
}

impl<F> Filter for F
where
    F: Fn(&LogEntry) -> bool + Send + Sync,
{
    fn matches(&self, entry: &LogEntry) -> bool {
        self(entry)
    }
}

/// Level window filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelFilter {
    pub min: LogLevel,
    /// None = no upper bound
    pub max: Option<LogLevel>,
}

impl LevelFilter {
    pub fn at_least(min: LogLevel) -> Self {
        Self { min, max: None }
    }

    pub fn between(min: LogLevel, max: LogLevel) -> Self {
        Self {
            min,
            max: Some(max),
        }
    }
}

impl Filter for LevelFilter {
    fn matches(&self, entry: &LogEntry) -> bool {
        if entry.level < self.min {
            return false;
        }
        match self.max {
            Some(max) => entry.level <= max,
            None => true,
        }
    }
}

/// Source path filter.
///
/// Prefixes match on whole path segments: `app.db` matches `app.db` and
/// `app.db.pool`, not `app.dbx`.
#[derive(Debug, Clone, Default)]
pub struct SourceFilter {
    pub include: Vec<String>, // Empty = all allowed
    pub exclude: Vec<String>,
}

impl SourceFilter {
    fn prefix_matches(prefix: &str, source: &str) -> bool {
        source == prefix
            || (source.starts_with(prefix) && source.as_bytes().get(prefix.len()) == Some(&b'.'))
    }
}

impl Filter for SourceFilter {
    fn matches(&self, entry: &LogEntry) -> bool {
        if self
            .exclude
            .iter()
            .any(|p| Self::prefix_matches(p, &entry.source))
        {
            return false;
        }
        self.include.is_empty()
            || self
                .include
                .iter()
                .any(|p| Self::prefix_matches(p, &entry.source))
    }
}

/// Tag filter
#[derive(Debug, Clone, Default)]
pub struct TagFilter {
    pub any_of: HashSet<String>, // Empty = all allowed
    pub none_of: HashSet<String>,
}

impl Filter for TagFilter {
    fn matches(&self, entry: &LogEntry) -> bool {
        if entry.tags.iter().any(|t| self.none_of.contains(t)) {
            return false;
        }
        self.any_of.is_empty() || entry.tags.iter().any(|t| self.any_of.contains(t))
    }
}
