//! RAII wrapper for pool-managed buffers.

use std::ops::Deref;
use std::sync::{Arc, Mutex};

use crate::buffer::Buffer;

use super::PoolInner;

/// A buffer borrowed from a pool that automatically returns on drop.
///
/// Dereferences to [`Buffer`], so it can be attached or sent directly.
pub struct PooledBuffer {
    /// The buffer (None after being detached)
    buffer: Option<Buffer>,
    /// Reference to the pool for return on drop
    pool: Arc<Mutex<PoolInner>>,
}

impl PooledBuffer {
    pub(super) fn new(buffer: Buffer, pool: Arc<Mutex<PoolInner>>) -> Self {
        Self {
            buffer: Some(buffer),
            pool,
        }
    }

    /// Remove the buffer from pool management.
    pub fn detach(mut self) -> Option<Buffer> {
        let buffer = self.buffer.take();
        if let Ok(mut inner) = self.pool.lock() {
            inner.in_use = inner.in_use.saturating_sub(1);
        }
        buffer
    }
}

impl Deref for PooledBuffer {
    type Target = Buffer;

    fn deref(&self) -> &Buffer {
        match &self.buffer {
            Some(buffer) => buffer,
            // `buffer` is only taken by `detach`, which consumes self.
            None => unreachable!("pooled buffer used after detach"),
        }
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            // A poisoned pool just lets the buffer drop.
            if let Ok(mut inner) = self.pool.lock() {
                inner.available.push_back(buffer);
                inner.in_use = inner.in_use.saturating_sub(1);
            }
        }
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("buffer", &self.buffer)
            .finish()
    }
}
