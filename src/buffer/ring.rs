//! Fixed-capacity ring buffer
//!
//! Pure data structure with no I/O side effects. Storage is allocated once
//! at construction; once full, each push overwrites the oldest element.

use crate::error::{Result, ShipError};

/// Fixed-capacity recency window.
///
/// # Invariants
///
/// - `len() <= capacity()` at all times
/// - iteration order is insertion order (oldest → newest) regardless of wrap
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    /// Index of the next write
    head: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    /// Create a buffer holding at most `capacity` elements
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(ShipError::ConfigValidation {
                field: "history_capacity",
                reason: "must be greater than zero".into(),
            });
        }
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Ok(Self {
            slots,
            head: 0,
            len: 0,
        })
    }

    /// Append an element, overwriting the oldest one when full
    pub fn push(&mut self, item: T) {
        let cap = self.slots.len();
        self.slots[self.head] = Some(item);
        self.head = (self.head + 1) % cap;
        if self.len < cap {
            self.len += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    /// Drop all elements, keeping the allocation
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.head = 0;
        self.len = 0;
    }

    /// Iterate oldest → newest
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        let cap = self.slots.len();
        let start = (self.head + cap - self.len) % cap;
        (0..self.len).filter_map(move |i| self.slots[(start + i) % cap].as_ref())
    }
}

impl<T: Clone> RingBuffer<T> {
    /// All elements, oldest → newest
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }

    /// The `n` most recent elements, oldest → newest
    pub fn last(&self, n: usize) -> Vec<T> {
        let skip = self.len.saturating_sub(n);
        self.iter().skip(skip).cloned().collect()
    }
}
