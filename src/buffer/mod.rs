//! Bounded in-memory buffers
//!
//! - `RingBuffer` - fixed-capacity recency window (entry history)
//! - `Pool` - reusable objects for the flush hot path

pub mod pool;
pub mod ring;

pub use pool::{Pool, PoolStats};
pub use ring::RingBuffer;
