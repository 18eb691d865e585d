//! The buffer pool itself.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::{PoolInner, PoolStats, PooledBuffer};
use crate::buffer::Buffer;
use crate::error::Result;

/// Fixed set of identically sized capture buffers.
///
/// # Example
///
/// ```rust
/// use safer_rawcap::pool::BufferPool;
///
/// let pool = BufferPool::new(2, 1514, 64)?;
/// let first = pool.get().expect("pool has buffers");
/// let second = pool.get().expect("pool has buffers");
/// assert!(pool.get().is_none());
///
/// drop(first);
/// assert!(pool.get().is_some());
/// # drop(second);
/// # Ok::<(), safer_rawcap::RawcapError>(())
/// ```
pub struct BufferPool {
    inner: Arc<Mutex<PoolInner>>,
    capacity: usize,
    max_payload_size: u16,
    packets_per_buffer: u32,
}

impl BufferPool {
    /// Pre-create `capacity` buffers of `packets_per_buffer` slots each.
    ///
    /// # Errors
    ///
    /// Fails with the same errors as [`Buffer::new`].
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize, max_payload_size: u16, packets_per_buffer: u32) -> Result<Self> {
        assert!(capacity > 0, "Pool capacity must be greater than zero");

        let available = (0..capacity)
            .map(|_| Buffer::new(max_payload_size, packets_per_buffer))
            .collect::<Result<VecDeque<_>>>()?;

        log::debug!(
            target: "safer_rawcap::pool",
            "pool of {capacity} buffers ({packets_per_buffer} x {max_payload_size} bytes)"
        );
        Ok(Self {
            inner: Arc::new(Mutex::new(PoolInner {
                available,
                in_use: 0,
                handed_out: 0,
                exhausted: 0,
            })),
            capacity,
            max_payload_size,
            packets_per_buffer,
        })
    }

    /// Take an unlocked buffer, cleared, or `None` if none is free.
    ///
    /// # Errors
    ///
    /// Returns [`RawcapError::LockPoisoned`](crate::RawcapError::LockPoisoned)
    /// if the pool mutex was poisoned.
    pub fn try_get(&self) -> Result<Option<PooledBuffer>> {
        let mut inner = PoolInner::lock(&self.inner)?;

        // Buffers returned while a pipeline still holds them stay queued
        // until it lets go.
        let ready = inner
            .available
            .iter()
            .position(|buffer| !buffer.in_pipeline() && buffer.clear().is_ok());

        match ready.and_then(|index| inner.available.remove(index)) {
            Some(buffer) => {
                inner.in_use += 1;
                inner.handed_out += 1;
                Ok(Some(PooledBuffer::new(buffer, Arc::clone(&self.inner))))
            }
            None => {
                inner.exhausted += 1;
                Ok(None)
            }
        }
    }

    /// Like [`try_get`](Self::try_get), treating a poisoned pool as empty.
    pub fn get(&self) -> Option<PooledBuffer> {
        self.try_get().ok().flatten()
    }

    /// Number of buffers the pool was built with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slot payload size of every buffer.
    pub fn max_payload_size(&self) -> u16 {
        self.max_payload_size
    }

    /// Slots per buffer.
    pub fn packets_per_buffer(&self) -> u32 {
        self.packets_per_buffer
    }

    /// Buffers currently in the pool, including ones still locked.
    pub fn available(&self) -> Result<usize> {
        Ok(PoolInner::lock(&self.inner)?.available.len())
    }

    /// Buffers currently handed out.
    pub fn in_use(&self) -> Result<usize> {
        Ok(PoolInner::lock(&self.inner)?.in_use)
    }

    /// `(available, in_use, is_empty, is_full)` under one lock.
    pub fn snapshot(&self) -> Result<(usize, usize, bool, bool)> {
        let inner = PoolInner::lock(&self.inner)?;
        let available = inner.available.len();
        Ok((
            available,
            inner.in_use,
            available == 0,
            available == self.capacity,
        ))
    }

    /// Usage statistics.
    pub fn stats(&self) -> Result<PoolStats> {
        let inner = PoolInner::lock(&self.inner)?;
        Ok(PoolStats {
            capacity: self.capacity,
            available: inner.available.len(),
            in_use: inner.in_use,
            max_payload_size: self.max_payload_size,
            packets_per_buffer: self.packets_per_buffer,
            handed_out: inner.handed_out,
            exhausted: inner.exhausted,
        })
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.capacity)
            .field("max_payload_size", &self.max_payload_size)
            .field("packets_per_buffer", &self.packets_per_buffer)
            .finish()
    }
}
