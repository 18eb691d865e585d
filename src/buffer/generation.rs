//! Generation tracking for buffer lifecycle management.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counter bumped on every buffer lock transition and clear.
///
/// Pipelines remember the generation they locked a buffer at and only touch
/// it while the value still matches, so a buffer that was detached and
/// re-locked in between is never written by a stale fill or drain cycle.
/// Iterators compare generations so cursors from different fill cycles never
/// compare equal.
///
/// # Examples
///
/// ```rust
/// use safer_rawcap::buffer::GenerationCounter;
///
/// let counter = GenerationCounter::new();
/// assert_eq!(counter.get(), 0);
/// assert_eq!(counter.increment(), 1);
/// assert_eq!(counter.get(), 1);
/// ```
#[derive(Debug)]
pub struct GenerationCounter {
    counter: AtomicU64,
}

impl GenerationCounter {
    /// Creates a new generation counter starting at 0.
    #[inline]
    pub const fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// Returns the current generation value.
    #[inline]
    pub fn get(&self) -> u64 {
        // Writers hold the buffer mutex, which orders the value for readers.
        self.counter.load(Ordering::Relaxed)
    }

    /// Increments the counter and returns the new generation.
    #[inline]
    pub fn increment(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl Default for GenerationCounter {
    fn default() -> Self {
        Self::new()
    }
}
