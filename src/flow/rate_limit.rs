//! Sliding-window rate limiting

use crate::error::{Result, ShipError};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Admits at most `max_logs` entries in any `window`.
///
/// Only admitted events are recorded, so the timestamp list never holds
/// more than `max_logs` items.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    window: Duration,
    max_logs: usize,
    timestamps: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_logs: usize) -> Result<Self> {
        if window.is_zero() {
            return Err(ShipError::ConfigValidation {
                field: "rate_limit.window_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if max_logs == 0 {
            return Err(ShipError::ConfigValidation {
                field: "rate_limit.max_logs",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(Self {
            window,
            max_logs,
            timestamps: VecDeque::with_capacity(max_logs),
        })
    }

    /// Decide for an event happening now
    pub fn allow_log(&mut self) -> bool {
        self.allow_log_at(Instant::now())
    }

    /// Decide for an event at `now`
    pub fn allow_log_at(&mut self, now: Instant) -> bool {
        self.prune(now);
        if self.timestamps.len() < self.max_logs {
            self.timestamps.push_back(now);
            true
        } else {
            false
        }
    }

    /// Events still counted in the current window
    pub fn current_count(&mut self) -> usize {
        self.prune(Instant::now());
        self.timestamps.len()
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}
