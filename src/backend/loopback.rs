//! In-memory backend.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{Backend, Direction, Frame, DEFAULT_MTU};
use crate::error::{RawcapError, Result};
use crate::timestamp::TimestampCapabilities;

#[derive(Default)]
struct LoopbackState {
    ports: HashMap<u64, VecDeque<Frame>>,
    sent: Vec<Vec<u8>>,
}

/// Backend that keeps frames in memory.
///
/// Frames are injected by the test or demo driving it and fanned out to
/// every open port. Transmitted frames are recorded, and with
/// [`with_echo`](Self::with_echo) they are also looped back to every port
/// as outbound captures.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use safer_rawcap::backend::{Backend, Direction, LoopbackBackend};
///
/// let backend = LoopbackBackend::new("lo0");
/// backend.open_port(1)?;
/// backend.inject(vec![0u8; 60]);
///
/// let frame = backend.receive(1, Duration::ZERO)?.expect("frame queued");
/// assert_eq!(frame.direction, Direction::In);
/// # Ok::<(), safer_rawcap::RawcapError>(())
/// ```
pub struct LoopbackBackend {
    name: String,
    mtu: usize,
    echo: bool,
    capabilities: TimestampCapabilities,
    state: Mutex<LoopbackState>,
    arrived: Condvar,
    promiscuous: AtomicBool,
    fail_transmit: AtomicBool,
    indicated: AtomicU64,
}

impl LoopbackBackend {
    /// Loopback link with an Ethernet MTU and system clock timestamps.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mtu: DEFAULT_MTU,
            echo: false,
            capabilities: TimestampCapabilities::system(),
            state: Mutex::new(LoopbackState::default()),
            arrived: Condvar::new(),
            promiscuous: AtomicBool::new(false),
            fail_transmit: AtomicBool::new(false),
            indicated: AtomicU64::new(0),
        }
    }

    /// Override the MTU.
    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Loop transmitted frames back as outbound captures.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Override the advertised timestamp modes.
    pub fn with_timestamp_capabilities(mut self, capabilities: TimestampCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, LoopbackState>> {
        self.state.lock().map_err(|_| RawcapError::LockPoisoned)
    }

    fn deliver(&self, frame: Frame) {
        // A poisoned state only happens after a panic elsewhere; drop the frame.
        let Ok(mut state) = self.lock() else {
            return;
        };
        for queue in state.ports.values_mut() {
            queue.push_back(frame.clone());
        }
        self.arrived.notify_all();
    }

    /// Deliver an inbound frame to every open port.
    pub fn inject(&self, data: Vec<u8>) {
        self.deliver(Frame::new(data, Direction::In));
    }

    /// Deliver an outbound frame to every open port.
    pub fn inject_outbound(&self, data: Vec<u8>) {
        self.deliver(Frame::new(data, Direction::Out));
    }

    /// Frames transmitted so far, oldest first.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.lock().map(|state| state.sent.clone()).unwrap_or_default()
    }

    /// Take and clear the transmitted frames.
    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        self.lock()
            .map(|mut state| std::mem::take(&mut state.sent))
            .unwrap_or_default()
    }

    /// Frames queued for `port`.
    pub fn queued(&self, port: u64) -> usize {
        self.lock()
            .ok()
            .and_then(|state| state.ports.get(&port).map(VecDeque::len))
            .unwrap_or(0)
    }

    /// Make every following transmit fail with a driver error.
    pub fn set_transmit_failure(&self, fail: bool) {
        self.fail_transmit.store(fail, Ordering::Relaxed);
    }

    /// Whether the link is in promiscuous mode.
    pub fn is_promiscuous(&self) -> bool {
        self.promiscuous.load(Ordering::Acquire)
    }

    /// Number of captured frames passed on to the host stack.
    pub fn indicated_count(&self) -> u64 {
        self.indicated.load(Ordering::Relaxed)
    }
}

impl Backend for LoopbackBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    fn open_port(&self, port: u64) -> Result<()> {
        self.lock()?.ports.entry(port).or_default();
        Ok(())
    }

    fn close_port(&self, port: u64) {
        if let Ok(mut state) = self.lock() {
            state.ports.remove(&port);
        }
        self.arrived.notify_all();
    }

    fn receive(&self, port: u64, timeout: Duration) -> Result<Option<Frame>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock()?;
        loop {
            match state.ports.get_mut(&port) {
                Some(queue) => {
                    if let Some(frame) = queue.pop_front() {
                        return Ok(Some(frame));
                    }
                }
                None => return Err(RawcapError::NotFound),
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            state = self
                .arrived
                .wait_timeout(state, deadline - now)
                .map_err(|_| RawcapError::LockPoisoned)?
                .0;
        }
    }

    fn transmit(&self, frame: &[u8]) -> Result<()> {
        if self.fail_transmit.load(Ordering::Relaxed) {
            return Err(RawcapError::DriverIo(format!(
                "{}: transmit rejected",
                self.name
            )));
        }
        self.lock()?.sent.push(frame.to_vec());
        if self.echo {
            self.deliver(Frame::new(frame.to_vec(), Direction::Out));
        }
        Ok(())
    }

    fn timestamp_capabilities(&self) -> TimestampCapabilities {
        self.capabilities
    }

    fn set_promiscuous(&self, enabled: bool) -> Result<()> {
        self.promiscuous.store(enabled, Ordering::Release);
        log::debug!(
            target: "safer_rawcap::backend",
            "{}: promiscuous mode {}",
            self.name,
            if enabled { "on" } else { "off" }
        );
        Ok(())
    }

    fn indicate_to_stack(&self, _frame: &Frame) -> Result<()> {
        self.indicated.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl std::fmt::Debug for LoopbackBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackBackend")
            .field("name", &self.name)
            .field("mtu", &self.mtu)
            .field("echo", &self.echo)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn frames_fan_out_to_every_port() {
        let backend = LoopbackBackend::new("lo");
        backend.open_port(1).unwrap();
        backend.open_port(2).unwrap();
        backend.inject(vec![1; 20]);

        assert_eq!(backend.queued(1), 1);
        assert_eq!(backend.queued(2), 1);
        assert!(backend.receive(1, Duration::ZERO).unwrap().is_some());
        assert_eq!(backend.queued(2), 1);
    }

    #[test]
    fn frames_before_open_are_lost() {
        let backend = LoopbackBackend::new("lo");
        backend.inject(vec![1; 20]);
        backend.open_port(1).unwrap();
        assert!(backend.receive(1, Duration::ZERO).unwrap().is_none());
    }

    #[test]
    fn closed_port_is_not_found() {
        let backend = LoopbackBackend::new("lo");
        assert!(matches!(
            backend.receive(9, Duration::ZERO),
            Err(RawcapError::NotFound)
        ));
    }

    #[test]
    fn receive_times_out() {
        let backend = LoopbackBackend::new("lo");
        backend.open_port(1).unwrap();
        let start = Instant::now();
        assert!(backend
            .receive(1, Duration::from_millis(20))
            .unwrap()
            .is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn receive_wakes_on_inject() {
        let backend = Arc::new(LoopbackBackend::new("lo"));
        backend.open_port(1).unwrap();

        let injector = Arc::clone(&backend);
        let thread = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            injector.inject(vec![5; 30]);
        });

        let frame = backend.receive(1, Duration::from_secs(5)).unwrap();
        thread.join().unwrap();
        assert_eq!(frame.map(|f| f.data), Some(vec![5; 30]));
    }

    #[test]
    fn transmit_records_and_echoes() {
        let backend = LoopbackBackend::new("lo").with_echo(true);
        backend.open_port(1).unwrap();
        backend.transmit(&[9; 64]).unwrap();

        assert_eq!(backend.sent_frames(), vec![vec![9; 64]]);
        let echoed = backend.receive(1, Duration::ZERO).unwrap().unwrap();
        assert_eq!(echoed.direction, Direction::Out);
        assert_eq!(backend.take_sent().len(), 1);
        assert!(backend.sent_frames().is_empty());
    }

    #[test]
    fn transmit_failure_is_driver_io() {
        let backend = LoopbackBackend::new("lo");
        backend.set_transmit_failure(true);
        assert!(matches!(
            backend.transmit(&[0; 60]),
            Err(RawcapError::DriverIo(_))
        ));
        assert!(backend.sent_frames().is_empty());
    }
}
