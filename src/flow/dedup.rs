//! Fingerprint deduplication
//!
//! The cache maps a fingerprint to its first-seen instant. When it outgrows
//! `max_cache_size` the oldest half is evicted in one sweep; this is an
//! approximation of LRU, not an exact one.

use crate::error::{Result, ShipError};
use crate::logging::LogEntry;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

/// Entry field contributing to a fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupField {
    Level,
    Message,
    Source,
    Tags,
    Data,
    Error,
    CorrelationId,
    UserId,
    SessionId,
}

impl DedupField {
    pub fn defaults() -> Vec<DedupField> {
        vec![Self::Level, Self::Message, Self::Source]
    }
}

/// Compute the fingerprint of `entry` over `fields`
pub fn fingerprint(entry: &LogEntry, fields: &[DedupField]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for field in fields {
        field.hash(&mut hasher);
        match field {
            DedupField::Level => entry.level.hash(&mut hasher),
            DedupField::Message => entry.message.hash(&mut hasher),
            DedupField::Source => entry.source.hash(&mut hasher),
            DedupField::Tags => entry.tags.hash(&mut hasher),
            DedupField::Data => entry
                .data
                .as_ref()
                .map(|d| d.to_string())
                .hash(&mut hasher),
            DedupField::Error => entry
                .error
                .as_ref()
                .map(|e| (&e.name, &e.message))
                .hash(&mut hasher),
            DedupField::CorrelationId => entry.correlation_id.hash(&mut hasher),
            DedupField::UserId => entry.user_id.hash(&mut hasher),
            DedupField::SessionId => entry.session_id.hash(&mut hasher),
        }
    }
    hasher.finish()
}

/// Drops entries whose fingerprint was already seen within the TTL window
#[derive(Debug, Clone)]
pub struct Deduplicator {
    window: Duration,
    fields: Vec<DedupField>,
    max_cache_size: usize,
    seen: HashMap<u64, Instant>,
    /// Fingerprints in first-seen order
    order: VecDeque<u64>,
}

impl Deduplicator {
    pub fn new(window: Duration, fields: Vec<DedupField>, max_cache_size: usize) -> Result<Self> {
        if window.is_zero() {
            return Err(ShipError::ConfigValidation {
                field: "dedup.window_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if fields.is_empty() {
            return Err(ShipError::ConfigValidation {
                field: "dedup.fields",
                reason: "at least one field is required".into(),
            });
        }
        if max_cache_size < 2 {
            return Err(ShipError::ConfigValidation {
                field: "dedup.max_cache_size",
                reason: "must be at least 2".into(),
            });
        }
        Ok(Self {
            window,
            fields,
            max_cache_size,
            seen: HashMap::new(),
            order: VecDeque::new(),
        })
    }

    pub fn is_duplicate(&mut self, entry: &LogEntry) -> bool {
        self.is_duplicate_at(entry, Instant::now())
    }

    /// Check `entry` at `now`; a non-duplicate is recorded.
    pub fn is_duplicate_at(&mut self, entry: &LogEntry, now: Instant) -> bool {
        self.prune(now);

        let fp = fingerprint(entry, &self.fields);
        if self.seen.contains_key(&fp) {
            return true;
        }

        self.seen.insert(fp, now);
        self.order.push_back(fp);
        if self.seen.len() > self.max_cache_size {
            self.evict_oldest_half();
        }
        false
    }

    pub fn cache_len(&self) -> usize {
        self.seen.len()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
        self.order.clear();
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&fp) = self.order.front() {
            let expired = self
                .seen
                .get(&fp)
                .map(|&t| now.saturating_duration_since(t) >= self.window)
                .unwrap_or(true);
            if !expired {
                break;
            }
            self.order.pop_front();
            self.seen.remove(&fp);
        }
    }

    fn evict_oldest_half(&mut self) {
        let evict = self.order.len() / 2;
        for fp in self.order.drain(..evict) {
            self.seen.remove(&fp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogLevel;

    fn entry(level: LogLevel, message: &str, source: &str) -> LogEntry {
        LogEntry::builder(level, message).source(source).build()
    }

    fn dedup(window_ms: u64, max: usize) -> Deduplicator {
        Deduplicator::new(Duration::from_millis(window_ms), DedupField::defaults(), max).unwrap()
    }

    #[test]
    fn test_second_identical_entry_is_duplicate() {
        let mut d = dedup(1000, 100);
        let a = entry(LogLevel::Error, "db down", "app.db");
        let b = entry(LogLevel::Error, "db down", "app.db");

        assert!(!d.is_duplicate(&a));
        assert!(d.is_duplicate(&b));
    }

    #[test]
    fn test_expires_after_window() {
        let mut d = dedup(1000, 100);
        let e = entry(LogLevel::Warn, "slow", "app");
        let t0 = Instant::now();

        assert!(!d.is_duplicate_at(&e, t0));
        assert!(d.is_duplicate_at(&e, t0 + Duration::from_millis(500)));
        assert!(!d.is_duplicate_at(&e, t0 + Duration::from_millis(1000)));
    }

    #[test]
    fn test_expires_after_sleep() {
        let mut d = dedup(40, 100);
        let e = entry(LogLevel::Info, "tick", "app");
        assert!(!d.is_duplicate(&e));
        assert!(d.is_duplicate(&e));

        std::thread::sleep(Duration::from_millis(50));
        assert!(!d.is_duplicate(&e));
    }

    #[test]
    fn test_fields_subset() {
        let mut d = dedup(1000, 100);
        // Differs only in data, which is not part of the default fingerprint
        let a = LogEntry::builder(LogLevel::Info, "m")
            .data(serde_json::json!({"n": 1}))
            .build();
        let b = LogEntry::builder(LogLevel::Info, "m")
            .data(serde_json::json!({"n": 2}))
            .build();
        assert!(!d.is_duplicate(&a));
        assert!(d.is_duplicate(&b));

        let mut with_data = Deduplicator::new(
            Duration::from_secs(1),
            vec![DedupField::Message, DedupField::Data],
            100,
        )
        .unwrap();
        assert!(!with_data.is_duplicate(&a));
        assert!(!with_data.is_duplicate(&b));
    }

    #[test]
    fn test_different_level_is_not_duplicate() {
        let mut d = dedup(1000, 100);
        assert!(!d.is_duplicate(&entry(LogLevel::Info, "x", "app")));
        assert!(!d.is_duplicate(&entry(LogLevel::Warn, "x", "app")));
    }

    #[test]
    fn test_cache_bounded_by_half_eviction() {
        let mut d = dedup(60_000, 10);
        for i in 0..11 {
            assert!(!d.is_duplicate(&entry(LogLevel::Info, &format!("m{}", i), "app")));
        }
        // 11 > 10 -> oldest half (5) evicted
        assert_eq!(d.cache_len(), 6);
        assert!(!d.is_duplicate(&entry(LogLevel::Info, "m0", "app")));
        assert!(d.is_duplicate(&entry(LogLevel::Info, "m10", "app")));
    }

    #[test]
    fn test_rejects_invalid_config() {
        assert!(Deduplicator::new(Duration::ZERO, DedupField::defaults(), 10).is_err());
        assert!(Deduplicator::new(Duration::from_secs(1), vec![], 10).is_err());
        assert!(Deduplicator::new(Duration::from_secs(1), DedupField::defaults(), 1).is_err());
    }
}
