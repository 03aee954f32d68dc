//! Admission gates
//!
//! Composable flow controllers evaluated in a fixed order before an entry
//! enters history or delivery:
//!
//! ```text
//! entry ──► Sampler ──► RateLimiter ──► Deduplicator ──► admitted
//!              │             │                │
//!              └─────────────┴────────────────┴──► dropped (short-circuit)
//! ```

pub mod dedup;
pub mod rate_limit;
pub mod sampler;

pub use dedup::{fingerprint, DedupField, Deduplicator};
pub use rate_limit::RateLimiter;
pub use sampler::{Sampler, SamplingStrategy};

use crate::logging::LogEntry;

/// Outcome of running an entry through the gates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    SampledOut,
    RateLimited,
    Duplicate,
}

/// The gate chain. Absent gates admit everything.
#[derive(Debug, Default)]
pub struct Gates {
    pub sampler: Option<Sampler>,
    pub rate_limiter: Option<RateLimiter>,
    pub deduplicator: Option<Deduplicator>,
}

impl Gates {
    /// Evaluate the gates in order; the first rejection wins.
    ///
    /// Later gates do not see (or record) an entry an earlier gate rejected.
    pub fn admit(&mut self, entry: &LogEntry) -> Admission {
        if let Some(sampler) = self.sampler.as_mut() {
            if !sampler.should_sample() {
                return Admission::SampledOut;
            }
        }
        if let Some(limiter) = self.rate_limiter.as_mut() {
            if !limiter.allow_log() {
                return Admission::RateLimited;
            }
        }
        if let Some(dedup) = self.deduplicator.as_mut() {
            if dedup.is_duplicate(entry) {
                return Admission::Duplicate;
            }
        }
        Admission::Admitted
    }
}
