//! Pool of capture buffers for reuse without reallocation.
//!
//! Every pooled [`Buffer`] shares one geometry. A [`PooledBuffer`] goes back
//! to the pool when dropped; a buffer still attached to a receiver or
//! queued on a transmitter at that point stays in the pool but is skipped
//! until the pipeline lets go of it.

mod buffer_pool;
mod pooled_buffer;
mod stats;


pub use buffer_pool::BufferPool;
pub use pooled_buffer::PooledBuffer;
pub use stats::PoolStats;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::buffer::Buffer;
use crate::error::{RawcapError, Result};

/// Mutable pool state; geometry lives on [`BufferPool`] itself.
pub(crate) struct PoolInner {
    /// Buffers not handed out, in return order
    pub(crate) available: VecDeque<Buffer>,
    pub(crate) in_use: usize,
    pub(crate) handed_out: u64,
    pub(crate) exhausted: u64,
}

impl PoolInner {
    pub(crate) fn lock(inner: &Arc<Mutex<PoolInner>>) -> Result<MutexGuard<'_, PoolInner>> {
        inner.lock().map_err(|_| RawcapError::LockPoisoned)
    }
}
