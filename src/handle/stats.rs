//! Per-handle traffic counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters updated by the intake path and the pipelines.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    rx_received: AtomicU64,
    rx_matched: AtomicU64,
    rx_captured: AtomicU64,
    rx_bytes: AtomicU64,
    rx_dropped_queue: AtomicU64,
    rx_dropped_too_long: AtomicU64,
    tx_initiated: AtomicU64,
    tx_completed: AtomicU64,
    tx_failed: AtomicU64,
    tx_canceled: AtomicU64,
    tx_bytes: AtomicU64,
}

#[inline]
fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl Counters {
    pub(crate) fn frame_received(&self) {
        bump(&self.rx_received, 1);
    }

    pub(crate) fn frame_matched(&self) {
        bump(&self.rx_matched, 1);
    }

    pub(crate) fn frame_captured(&self, bytes: usize) {
        bump(&self.rx_captured, 1);
        bump(&self.rx_bytes, bytes as u64);
    }

    pub(crate) fn dropped_queue(&self) {
        bump(&self.rx_dropped_queue, 1);
    }

    pub(crate) fn dropped_too_long(&self) {
        bump(&self.rx_dropped_too_long, 1);
    }

    pub(crate) fn tx_initiated(&self) {
        bump(&self.tx_initiated, 1);
    }

    pub(crate) fn tx_completed(&self, bytes: usize) {
        bump(&self.tx_completed, 1);
        bump(&self.tx_bytes, bytes as u64);
    }

    pub(crate) fn tx_failed(&self) {
        bump(&self.tx_failed, 1);
    }

    pub(crate) fn tx_canceled(&self, packets: u64) {
        bump(&self.tx_canceled, packets);
    }

    pub(crate) fn receive_snapshot(&self) -> ReceiveStats {
        let queue = self.rx_dropped_queue.load(Ordering::Relaxed);
        let too_long = self.rx_dropped_too_long.load(Ordering::Relaxed);
        ReceiveStats {
            received: self.rx_received.load(Ordering::Relaxed),
            matched: self.rx_matched.load(Ordering::Relaxed),
            captured: self.rx_captured.load(Ordering::Relaxed),
            bytes: self.rx_bytes.load(Ordering::Relaxed),
            dropped: queue + too_long,
            dropped_queue: queue,
            dropped_too_long: too_long,
        }
    }

    pub(crate) fn transmit_snapshot(&self) -> TransmitStats {
        TransmitStats {
            initiated: self.tx_initiated.load(Ordering::Relaxed),
            completed: self.tx_completed.load(Ordering::Relaxed),
            failed: self.tx_failed.load(Ordering::Relaxed),
            canceled: self.tx_canceled.load(Ordering::Relaxed),
            bytes: self.tx_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Receive counters of a handle at one point in time.
///
/// # Examples
///
/// ```rust
/// # use safer_rawcap::ReceiveStats;
/// let stats = ReceiveStats {
///     received: 200,
///     matched: 100,
///     captured: 90,
///     bytes: 90 * 60,
///     dropped: 10,
///     dropped_queue: 4,
///     dropped_too_long: 6,
/// };
/// assert_eq!(stats.match_rate_percent(), 50.0);
/// assert_eq!(stats.drop_rate_percent(), 10.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReceiveStats {
    /// Frames offered to the handle in its capture direction
    pub received: u64,
    /// Frames that passed the applied filter
    pub matched: u64,
    /// Frames stored into a packet or buffer slot
    pub captured: u64,
    /// Payload bytes stored
    pub bytes: u64,
    /// Matched frames lost, all causes
    pub dropped: u64,
    /// Matched frames dropped because the receive queue is disabled
    pub dropped_queue: u64,
    /// Matched frames longer than the destination slot
    pub dropped_too_long: u64,
}

impl ReceiveStats {
    /// Share of received frames that matched the filter, in percent.
    ///
    /// Returns 100.0 before any frame was received.
    pub fn match_rate_percent(&self) -> f64 {
        if self.received == 0 {
            100.0
        } else {
            self.matched as f64 / self.received as f64 * 100.0
        }
    }

    /// Share of matched frames that were dropped, in percent.
    pub fn drop_rate_percent(&self) -> f64 {
        if self.matched == 0 {
            0.0
        } else {
            self.dropped as f64 / self.matched as f64 * 100.0
        }
    }
}

/// Transmit counters of a handle at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransmitStats {
    /// Packets handed to the engine
    pub initiated: u64,
    /// Packets put on the wire
    pub completed: u64,
    /// Packets rejected by the engine or the MTU check
    pub failed: u64,
    /// Packets canceled before they were sent
    pub canceled: u64,
    /// Payload bytes sent
    pub bytes: u64,
}

impl TransmitStats {
    /// Share of initiated packets that made it onto the wire, in percent.
    ///
    /// Returns 100.0 before anything was sent.
    pub fn success_rate_percent(&self) -> f64 {
        if self.initiated == 0 {
            100.0
        } else {
            self.completed as f64 / self.initiated as f64 * 100.0
        }
    }
}
