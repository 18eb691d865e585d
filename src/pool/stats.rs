//! Pool usage snapshot.

/// Usage of a [`BufferPool`](super::BufferPool) at one point in time.
///
/// ```rust
/// use safer_rawcap::pool::BufferPool;
///
/// let pool = BufferPool::new(4, 1514, 32)?;
/// let held = pool.get();
/// let stats = pool.stats()?;
///
/// assert_eq!(stats.in_use, 1);
/// assert_eq!(stats.packet_slots(), 4 * 32);
/// assert_eq!(stats.slots_in_use(), 32);
/// # drop(held);
/// # Ok::<(), safer_rawcap::RawcapError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolStats {
    /// Buffers owned by the pool
    pub capacity: usize,
    /// Buffers waiting in the pool, locked ones included
    pub available: usize,
    /// Buffers handed out
    pub in_use: usize,
    /// Slot size of every pooled buffer
    pub max_payload_size: u16,
    /// Slots per pooled buffer
    pub packets_per_buffer: u32,
    /// Successful `get`/`try_get` calls
    pub handed_out: u64,
    /// Calls that found no unlocked buffer
    pub exhausted: u64,
}

impl PoolStats {
    /// Share of buffers handed out, `0.0..=1.0`.
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.in_use as f64 / self.capacity as f64
    }

    /// [`utilization`](Self::utilization) as a percentage.
    pub fn utilization_percent(&self) -> f64 {
        self.utilization() * 100.0
    }

    /// Share of requests served, as a percentage. 100 before any request.
    pub fn success_rate_percent(&self) -> f64 {
        let requests = self.handed_out + self.exhausted;
        if requests == 0 {
            return 100.0;
        }
        self.handed_out as f64 * 100.0 / requests as f64
    }

    /// Packet slots across the whole pool.
    pub fn packet_slots(&self) -> usize {
        self.capacity * self.packets_per_buffer as usize
    }

    /// Packet slots in buffers handed out.
    pub fn slots_in_use(&self) -> usize {
        self.in_use * self.packets_per_buffer as usize
    }

    /// Payload arena bytes across the whole pool.
    pub fn arena_bytes(&self) -> usize {
        self.packet_slots() * usize::from(self.max_payload_size)
    }

    /// More than 80% of the buffers are handed out.
    pub fn is_under_pressure(&self) -> bool {
        self.utilization() > 0.8
    }

    /// Some request found the pool empty.
    pub fn was_exhausted(&self) -> bool {
        self.exhausted > 0
    }
}
