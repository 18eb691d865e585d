//! Backend abstraction for the capture engine behind an adapter.
//!
//! A [`Backend`] is the link a set of handles captures from and transmits
//! on. The pipelines never touch a device directly: they pull [`Frame`]s
//! through [`Backend::receive`] and push raw bytes through
//! [`Backend::transmit`], so the same buffering logic runs over a kernel
//! driver, a capture file or the in-memory [`LoopbackBackend`].
//!
//! Every open handle is a *port* on its backend. Ports see every frame the
//! link carries; a frame taken by one port is not taken from the others.

use std::time::{Duration, SystemTime};

use crate::error::Result;
use crate::timestamp::{TimestampCapabilities, TimestampMode};

mod loopback;

pub use loopback::LoopbackBackend;

/// Default link MTU in bytes (Ethernet).
pub const DEFAULT_MTU: usize = 1500;

/// Traffic direction of a captured frame, and the receive direction filter
/// of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Direction {
    /// Unknown for frames; captures nothing as a handle setting.
    Unknown = 0,
    /// Received from the wire.
    In = 1,
    /// Sent by the local host.
    Out = 2,
    /// Both directions.
    #[default]
    Both = 3,
}

impl Direction {
    /// Whether a handle set to `self` captures a frame travelling `frame`.
    pub fn admits(self, frame: Direction) -> bool {
        match self {
            Direction::Unknown => false,
            Direction::Both => matches!(frame, Direction::In | Direction::Out),
            wanted => wanted == frame,
        }
    }
}

/// A raw frame handed up by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame bytes starting at the Ethernet header
    pub data: Vec<u8>,
    /// Which way the frame travelled
    pub direction: Direction,
    /// When the backend saw the frame
    pub captured_at: SystemTime,
}

impl Frame {
    /// Frame seen now.
    pub fn new(data: Vec<u8>, direction: Direction) -> Self {
        Self {
            data,
            direction,
            captured_at: SystemTime::now(),
        }
    }

    /// Length on the wire.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// `true` for a zero-length frame.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Capture engine behind an [`Adapter`](crate::Adapter).
///
/// Implementations are shared between every handle of an adapter and the
/// pipeline worker threads, so all methods take `&self` and the trait
/// requires `Send + Sync`.
///
/// # Ports
///
/// [`open_port`](Self::open_port) is called once per handle before the
/// handle receives anything, and [`close_port`](Self::close_port) when the
/// handle is dropped. Frames arriving while no port is open may be
/// discarded.
pub trait Backend: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Link MTU in bytes, excluding the Ethernet header.
    fn mtu(&self) -> usize;

    /// Start queueing frames for `port`.
    ///
    /// # Errors
    ///
    /// Returns [`RawcapError::DriverNotAvailable`](crate::RawcapError::DriverNotAvailable)
    /// if the engine cannot serve another port.
    fn open_port(&self, port: u64) -> Result<()>;

    /// Stop queueing frames for `port` and drop the ones still queued.
    fn close_port(&self, port: u64);

    /// Wait up to `timeout` for the next frame on `port`.
    ///
    /// A zero timeout polls. `Ok(None)` means nothing arrived in time.
    ///
    /// # Errors
    ///
    /// Engine failures are returned verbatim and never retried here.
    fn receive(&self, port: u64, timeout: Duration) -> Result<Option<Frame>>;

    /// Put one frame on the wire.
    ///
    /// # Errors
    ///
    /// Returns [`RawcapError::DriverIo`](crate::RawcapError::DriverIo) if
    /// the engine rejected the frame.
    fn transmit(&self, frame: &[u8]) -> Result<()>;

    /// Timestamp modes the engine can provide.
    fn timestamp_capabilities(&self) -> TimestampCapabilities;

    /// Resolution of `mode` in nanoseconds, `0` when unknown.
    fn timestamp_resolution_ns(&self, mode: TimestampMode) -> u32 {
        match mode {
            TimestampMode::None => 0,
            TimestampMode::SystemLowPrec => 1_000_000,
            TimestampMode::SystemHighPrec | TimestampMode::Software => 1_000,
            TimestampMode::AdapterSystem
            | TimestampMode::AdapterSoftware
            | TimestampMode::AdapterHardware => 1,
        }
    }

    /// Switch the link in or out of promiscuous mode.
    fn set_promiscuous(&self, enabled: bool) -> Result<()>;

    /// Pass a captured frame on to the host network stack.
    fn indicate_to_stack(&self, _frame: &Frame) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_gate() {
        assert!(Direction::Both.admits(Direction::In));
        assert!(Direction::Both.admits(Direction::Out));
        assert!(!Direction::Both.admits(Direction::Unknown));
        assert!(Direction::In.admits(Direction::In));
        assert!(!Direction::In.admits(Direction::Out));
        assert!(!Direction::Out.admits(Direction::In));
        assert!(!Direction::Unknown.admits(Direction::In));
    }

    #[test]
    fn frame_length() {
        let frame = Frame::new(vec![0; 60], Direction::In);
        assert_eq!(frame.len(), 60);
        assert!(!frame.is_empty());
    }
}
