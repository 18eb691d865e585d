//! Buffered capture pipeline.
//!
//! A [`Receiver`] owns up to [`RX_BUFFERS_PER_HANDLE_MAX`] attached buffers
//! of one [`Handle`]. Once started, an engine thread picks an attached
//! buffer, fills it from the backend and posts a completion onto an ordered
//! channel. A dispatch thread drains the channel: it unlocks the buffer,
//! runs the callback, and then locks the buffer again for the next cycle
//! unless the callback detached it. Callbacks therefore never overlap, and
//! with two buffers the engine fills one while the application drains the
//! other.
//!
//! # Fill cycle
//!
//! Every cycle starts by clearing the buffer, then completes as soon as one
//! of these holds:
//!
//! - the buffer is full
//! - the packet threshold (`min_packets_to_copy`, when non-zero) is met
//! - the timeout has passed and the threshold is met
//! - ten times the timeout has passed, threshold or not
//! - the receiver is stopping
//!
//! A backend error ends the cycle too. The buffer is delivered with the
//! error's status and the engine quits instead of retrying.
//!
//! A zero timeout waits for the threshold, or for a full buffer when the
//! threshold is zero too.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::buffer::{Buffer, LockState, PipelineHold, SlotWrite, Storage};
use crate::error::{RawcapError, Result};
use crate::handle::{Activity, Handle, RxSettings, POLL_INTERVAL};
use crate::status::{self, Status};
use crate::timestamp::Timestamp;

/// Most buffers attached to one receiver.
pub const RX_BUFFERS_PER_HANDLE_MAX: usize = 2;

/// Hard bound on a fill cycle, as a multiple of the timeout.
const TIMEOUT_STRETCH: u32 = 10;

type Callback = Box<dyn FnMut(&Buffer, Status) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Locked for receive, waiting for the engine.
    Ready,
    /// Being filled by the engine.
    Filling,
    /// Handed to the dispatcher; unlocked once its callback starts.
    Delivered,
    /// Callback done, but the buffer could not be locked again yet.
    Returned,
}

struct Attached {
    buffer: Buffer,
    generation: u64,
    phase: Phase,
    _hold: PipelineHold,
}

struct Completion {
    buffer: Buffer,
    generation: u64,
    status: Status,
}

struct Workers {
    engine: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

struct ReceiverInner {
    handle: Handle,
    attached: Mutex<Vec<Attached>>,
    running: AtomicBool,
    workers: Mutex<Option<Workers>>,
    // Dispatcher of a receiver stopped from inside its own callback.
    lingering: Mutex<Option<JoinHandle<()>>>,
}

/// Capture pipeline of one handle.
///
/// # Example
///
/// ```rust
/// use std::sync::{mpsc, Arc};
/// use std::time::Duration;
/// use safer_rawcap::backend::LoopbackBackend;
/// use safer_rawcap::{Adapter, Buffer, Handle, Receiver, Status};
///
/// let backend = Arc::new(LoopbackBackend::new("lo"));
/// let handle = Handle::open(&Adapter::from_shared(backend.clone()))?;
/// handle.set_min_packets_to_copy(2)?;
///
/// let receiver = Receiver::new(&handle);
/// receiver.attach(&Buffer::new(1514, 16)?)?;
///
/// let (done, seen) = mpsc::channel();
/// receiver.start(
///     move |buffer, status| {
///         assert_eq!(status, Status::Success);
///         let _ = done.send(buffer.count().unwrap_or(0));
///     },
///     false,
/// )?;
///
/// backend.inject(vec![1; 60]);
/// backend.inject(vec![2; 60]);
/// assert_eq!(seen.recv_timeout(Duration::from_secs(5)).ok(), Some(2));
/// receiver.stop()?;
/// # Ok::<(), safer_rawcap::RawcapError>(())
/// ```
pub struct Receiver {
    inner: Arc<ReceiverInner>,
}

/// Weak control over a [`Receiver`], usable from inside its callback.
#[derive(Clone)]
pub struct ReceiverControl {
    inner: Weak<ReceiverInner>,
}

impl Receiver {
    /// Capture pipeline on `handle`.
    pub fn new(handle: &Handle) -> Self {
        Self {
            inner: Arc::new(ReceiverInner {
                handle: handle.clone(),
                attached: Mutex::new(Vec::with_capacity(RX_BUFFERS_PER_HANDLE_MAX)),
                running: AtomicBool::new(false),
                workers: Mutex::new(None),
                lingering: Mutex::new(None),
            }),
        }
    }

    /// Handle the receiver captures on.
    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    /// A control that does not keep the receiver alive.
    pub fn control(&self) -> ReceiverControl {
        ReceiverControl {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Lock `buffer` for receive and add it to the fill rotation.
    ///
    /// # Errors
    ///
    /// - [`RawcapError::InUse`] if the buffer is locked, accessed or
    ///   already attached
    /// - [`RawcapError::LimitReached`] with [`RX_BUFFERS_PER_HANDLE_MAX`]
    ///   buffers attached
    /// - [`RawcapError::Freed`] for a freed buffer
    pub fn attach(&self, buffer: &Buffer) -> Result<()> {
        status::record(self.inner.attach(buffer))
    }

    /// Remove `buffer` from the rotation, unlocking it.
    ///
    /// Returns `Ok(Status::NotAttached)` if it was not attached. A buffer
    /// whose completion is already queued is unlocked by its final
    /// callback.
    pub fn detach(&self, buffer: &Buffer) -> Result<Status> {
        status::record_status(self.inner.detach(buffer))
    }

    /// Number of attached buffers.
    pub fn attached_count(&self) -> Result<usize> {
        Ok(self.inner.attached()?.len())
    }

    /// Start filling attached buffers.
    ///
    /// `callback` runs on the dispatch thread once per completed cycle, with
    /// the buffer unlocked. Empty cycles are reported with
    /// [`Status::NoData`] only when `indicate_empty` is set.
    ///
    /// If the backend fails, the buffer being filled is delivered with the
    /// failure's status (for example [`Status::DriverIoFailed`]) and the
    /// receiver stops on its own; [`is_running`](Self::is_running) turns
    /// false and the receiver can be started again.
    ///
    /// # Errors
    ///
    /// - [`RawcapError::Pending`] if already started, if a single-packet
    ///   receive is in flight on the handle, or when restarting from inside
    ///   a callback of the previous run
    /// - [`RawcapError::Io`] if a worker thread cannot be spawned
    pub fn start<F>(&self, callback: F, indicate_empty: bool) -> Result<()>
    where
        F: FnMut(&Buffer, Status) + Send + 'static,
    {
        status::record(ReceiverInner::start(
            &self.inner,
            Box::new(callback),
            indicate_empty,
        ))
    }

    /// Stop filling buffers.
    ///
    /// A cycle already completed still gets its callback before this
    /// returns, unless called from inside a callback. Returns
    /// `Ok(Status::NotRunning)` if the receiver was not started.
    pub fn stop(&self) -> Result<Status> {
        status::record_status(self.inner.stop())
    }

    /// Whether the receiver is started.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        if let Err(error) = self.inner.stop() {
            log::warn!(target: "safer_rawcap::receive", "stop on drop failed: {error}");
        }
        self.inner.detach_all();
    }
}

impl fmt::Debug for Receiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("handle", &self.inner.handle.id())
            .field("running", &self.is_running())
            .finish()
    }
}

impl ReceiverControl {
    /// [`Receiver::stop`]; `Ok(Status::NotRunning)` once the receiver is gone.
    pub fn stop(&self) -> Result<Status> {
        match self.inner.upgrade() {
            Some(inner) => status::record_status(inner.stop()),
            None => Ok(Status::NotRunning),
        }
    }

    /// [`Receiver::detach`]; `Ok(Status::NotAttached)` once the receiver is
    /// gone.
    pub fn detach(&self, buffer: &Buffer) -> Result<Status> {
        match self.inner.upgrade() {
            Some(inner) => status::record_status(inner.detach(buffer)),
            None => Ok(Status::NotAttached),
        }
    }

    /// [`Receiver::is_running`].
    pub fn is_running(&self) -> bool {
        self.inner
            .upgrade()
            .is_some_and(|inner| inner.running.load(Ordering::Acquire))
    }
}

impl fmt::Debug for ReceiverControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiverControl")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl ReceiverInner {
    fn attached(&self) -> Result<MutexGuard<'_, Vec<Attached>>> {
        self.attached.lock().map_err(|_| RawcapError::LockPoisoned)
    }

    fn owner(&self) -> u64 {
        self.handle.id()
    }

    fn attach(&self, buffer: &Buffer) -> Result<()> {
        let mut attached = self.attached()?;
        if buffer.lock_state().is_locked() || attached.iter().any(|e| e.buffer.ptr_eq(buffer)) {
            return Err(RawcapError::InUse);
        }
        if attached.len() >= RX_BUFFERS_PER_HANDLE_MAX {
            return Err(RawcapError::LimitReached {
                limit: RX_BUFFERS_PER_HANDLE_MAX,
            });
        }
        let generation = buffer.lock_for(LockState::LockedForReceive, self.owner())?;
        attached.push(Attached {
            buffer: buffer.clone(),
            generation,
            phase: Phase::Ready,
            _hold: buffer.hold(),
        });
        log::debug!(
            target: "safer_rawcap::receive",
            "handle {}: buffer {} attached ({} attached)",
            self.owner(),
            buffer.id(),
            attached.len()
        );
        Ok(())
    }

    fn detach(&self, buffer: &Buffer) -> Result<Status> {
        let entry = {
            let mut attached = self.attached()?;
            match attached.iter().position(|e| e.buffer.ptr_eq(buffer)) {
                Some(index) => attached.remove(index),
                None => return Ok(Status::NotAttached),
            }
        };
        self.release_entry(&entry)?;
        log::debug!(
            target: "safer_rawcap::receive",
            "handle {}: buffer {} detached",
            self.owner(),
            buffer.id()
        );
        Ok(Status::Success)
    }

    fn release_entry(&self, entry: &Attached) -> Result<()> {
        // Delivered buffers are unlocked by the dispatcher.
        if matches!(entry.phase, Phase::Ready | Phase::Filling) {
            entry
                .buffer
                .unlock_from(LockState::LockedForReceive, self.owner(), entry.generation)?;
        }
        Ok(())
    }

    fn detach_all(&self) {
        let entries = match self.attached() {
            Ok(mut attached) => std::mem::take(&mut *attached),
            Err(_) => return,
        };
        for entry in &entries {
            if let Err(error) = self.release_entry(entry) {
                log::warn!(
                    target: "safer_rawcap::receive",
                    "handle {}: releasing buffer {} failed: {error}",
                    self.owner(),
                    entry.buffer.id()
                );
            }
        }
    }

    fn start(this: &Arc<Self>, callback: Callback, indicate_empty: bool) -> Result<()> {
        let mut workers = this.workers.lock().map_err(|_| RawcapError::LockPoisoned)?;
        if workers.is_some() {
            if this.running.load(Ordering::Acquire) {
                return Err(RawcapError::Pending);
            }
            // The engine quit on its own after a failure.
            if let Some(finished) = workers.take() {
                this.shutdown(finished)?;
            }
        }
        this.join_lingering()?;
        this.handle.claim(Activity::Receive)?;
        this.running.store(true, Ordering::Release);

        match Self::spawn_workers(this, callback, indicate_empty) {
            Ok(spawned) => {
                *workers = Some(spawned);
                log::debug!(
                    target: "safer_rawcap::receive",
                    "handle {}: receiver started",
                    this.owner()
                );
                Ok(())
            }
            Err(error) => {
                this.running.store(false, Ordering::Release);
                this.handle.release(Activity::Receive);
                Err(error)
            }
        }
    }

    fn join_lingering(&self) -> Result<()> {
        let mut lingering = self.lingering.lock().map_err(|_| RawcapError::LockPoisoned)?;
        match lingering.take() {
            Some(dispatcher) if dispatcher.thread().id() == thread::current().id() => {
                *lingering = Some(dispatcher);
                Err(RawcapError::Pending)
            }
            Some(dispatcher) => {
                if dispatcher.join().is_err() {
                    log::error!(target: "safer_rawcap::receive", "dispatcher panicked");
                }
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn spawn_workers(this: &Arc<Self>, callback: Callback, indicate_empty: bool) -> Result<Workers> {
        let (sender, completions) = mpsc::channel();
        let id = this.owner();

        let engine_inner = Arc::clone(this);
        let engine = thread::Builder::new()
            .name(format!("rawcap-rx-engine-{id}"))
            .spawn(move || engine_inner.run_engine(&sender, indicate_empty))?;

        let dispatch_inner = Arc::clone(this);
        let dispatcher = match thread::Builder::new()
            .name(format!("rawcap-rx-dispatch-{id}"))
            .spawn(move || dispatch_inner.run_dispatcher(&completions, callback))
        {
            Ok(dispatcher) => dispatcher,
            Err(error) => {
                // The engine notices a closed channel or the cleared flag.
                this.running.store(false, Ordering::Release);
                let _ = engine.join();
                return Err(error.into());
            }
        };
        Ok(Workers { engine, dispatcher })
    }

    fn stop(&self) -> Result<Status> {
        let Some(workers) = self
            .workers
            .lock()
            .map_err(|_| RawcapError::LockPoisoned)?
            .take()
        else {
            return Ok(Status::NotRunning);
        };

        self.running.store(false, Ordering::Release);
        self.shutdown(workers)?;
        log::debug!(
            target: "safer_rawcap::receive",
            "handle {}: receiver stopped",
            self.owner()
        );
        Ok(Status::Success)
    }

    /// Join stopped workers and give the handle back.
    fn shutdown(&self, workers: Workers) -> Result<()> {
        if workers.engine.join().is_err() {
            log::error!(target: "safer_rawcap::receive", "engine thread panicked");
        }
        if workers.dispatcher.thread().id() == thread::current().id() {
            let mut lingering = self.lingering.lock().map_err(|_| RawcapError::LockPoisoned)?;
            *lingering = Some(workers.dispatcher);
        } else if workers.dispatcher.join().is_err() {
            log::error!(target: "safer_rawcap::receive", "dispatcher thread panicked");
        }
        self.handle.release(Activity::Receive);
        Ok(())
    }

    fn run_engine(&self, completions: &mpsc::Sender<Completion>, indicate_empty: bool) {
        while self.running.load(Ordering::Acquire) {
            let next = match self.select() {
                Ok(next) => next,
                Err(error) => {
                    log::error!(target: "safer_rawcap::receive", "engine stopping: {error}");
                    self.running.store(false, Ordering::Release);
                    return;
                }
            };
            let Some((buffer, generation)) = next else {
                thread::sleep(POLL_INTERVAL);
                continue;
            };

            let started = Instant::now();
            let filled = self
                .handle
                .rx_settings()
                .and_then(|settings| self.fill(&buffer, generation, &settings));
            let count = match filled {
                Ok(Some(count)) => count,
                // Detached while filling.
                Ok(None) => continue,
                Err(error) => {
                    log::error!(
                        target: "safer_rawcap::receive",
                        "handle {}: fill cycle failed, receiver stopping: {error}",
                        self.owner()
                    );
                    // Engine failures end the run; the buffer is still
                    // delivered so the callback sees the status.
                    self.running.store(false, Ordering::Release);
                    if self.set_phase(&buffer, generation, Phase::Delivered) {
                        let _ = completions.send(Completion {
                            buffer,
                            generation,
                            status: error.status(),
                        });
                    }
                    return;
                }
            };
            self.handle.record_metric("fill_cycle", started.elapsed());

            let deliver = count > 0 || (indicate_empty && self.running.load(Ordering::Acquire));
            if !deliver {
                self.set_phase(&buffer, generation, Phase::Ready);
                continue;
            }
            if !self.set_phase(&buffer, generation, Phase::Delivered) {
                continue;
            }

            let status = if count > 0 {
                Status::Success
            } else {
                Status::NoData
            };
            log::trace!(
                target: "safer_rawcap::receive",
                "handle {}: buffer {} complete with {count} packets",
                self.owner(),
                buffer.id()
            );
            if completions
                .send(Completion {
                    buffer,
                    generation,
                    status,
                })
                .is_err()
            {
                return;
            }
        }
    }

    /// Pick the next buffer to fill: a ready one, or a returned one that
    /// can be locked again now.
    fn select(&self) -> Result<Option<(Buffer, u64)>> {
        let mut attached = self.attached()?;
        if let Some(entry) = attached.iter_mut().find(|e| e.phase == Phase::Ready) {
            entry.phase = Phase::Filling;
            return Ok(Some((entry.buffer.clone(), entry.generation)));
        }

        let owner = self.owner();
        let mut freed = Vec::new();
        let mut picked = None;
        for (index, entry) in attached.iter_mut().enumerate() {
            if entry.phase != Phase::Returned || entry.buffer.lock_state().is_locked() {
                continue;
            }
            match entry.buffer.lock_for(LockState::LockedForReceive, owner) {
                Ok(generation) => {
                    entry.generation = generation;
                    entry.phase = Phase::Filling;
                    picked = Some((entry.buffer.clone(), generation));
                    break;
                }
                Err(RawcapError::Freed) => freed.push(index),
                Err(_) => {}
            }
        }
        for index in freed.into_iter().rev() {
            attached.remove(index);
        }
        Ok(picked)
    }

    /// Move the entry for `buffer` at `generation` to `phase`. `false` if
    /// it is no longer attached under that generation.
    fn set_phase(&self, buffer: &Buffer, generation: u64, phase: Phase) -> bool {
        let Ok(mut attached) = self.attached() else {
            return false;
        };
        match attached
            .iter_mut()
            .find(|e| e.buffer.ptr_eq(buffer) && e.generation == generation)
        {
            Some(entry) => {
                entry.phase = phase;
                true
            }
            None => false,
        }
    }

    /// Run one fill cycle. `Ok(None)` if the buffer was detached meanwhile.
    fn fill(&self, buffer: &Buffer, generation: u64, settings: &RxSettings) -> Result<Option<usize>> {
        let owner = self.owner();
        let started = Instant::now();
        let locked = LockState::LockedForReceive;

        let Some((capacity, slot_size)) =
            buffer.with_locked_storage(locked, owner, generation, |s: &mut Storage| {
                s.clear();
                (s.capacity(), s.slot_size())
            })?
        else {
            return Ok(None);
        };

        let mut filled = 0;
        while filled < capacity {
            if settings.min_packets > 0 && filled >= settings.min_packets {
                break;
            }
            let elapsed = started.elapsed();
            if !settings.timeout.is_zero() {
                let hard_limit = settings.timeout * TIMEOUT_STRETCH;
                if (elapsed >= settings.timeout && filled >= settings.min_packets)
                    || elapsed >= hard_limit
                {
                    break;
                }
            }
            if !self.running.load(Ordering::Acquire) {
                break;
            }

            let accepted = self
                .handle
                .next_frame(settings, slot_size, next_wait(settings.timeout, elapsed))?;
            let Some(accepted) = accepted else {
                continue;
            };

            let mut timestamp = Timestamp::default();
            timestamp.stamp(
                settings.timestamp_mode,
                settings.resolution_ns,
                accepted.captured_at,
            );
            let written = buffer.with_locked_storage(locked, owner, generation, |s| {
                s.push_captured(&accepted.payload, accepted.wire_length, timestamp)
            })?;
            match written {
                None => return Ok(None),
                Some(SlotWrite::Stored) => {
                    filled += 1;
                    self.handle.counters().frame_captured(accepted.payload.len());
                }
                Some(SlotWrite::Full) => break,
                Some(SlotWrite::TooLong) => self.handle.counters().dropped_too_long(),
            }
        }
        Ok(Some(filled))
    }

    fn run_dispatcher(&self, completions: &mpsc::Receiver<Completion>, mut callback: Callback) {
        let owner = self.owner();
        for completion in completions {
            match completion.buffer.unlock_from(
                LockState::LockedForReceive,
                owner,
                completion.generation,
            ) {
                Ok(true) => {}
                Ok(false) => {
                    log::warn!(
                        target: "safer_rawcap::receive",
                        "handle {owner}: buffer {} lost its lock before delivery",
                        completion.buffer.id()
                    );
                    continue;
                }
                Err(error) => {
                    log::error!(target: "safer_rawcap::receive", "unlock failed: {error}");
                    continue;
                }
            }

            let started = Instant::now();
            callback(&completion.buffer, completion.status);
            self.handle.record_metric("receive_callback", started.elapsed());
            self.rearm(&completion.buffer);
        }
    }

    /// Lock a buffer again after its callback, if still attached.
    fn rearm(&self, buffer: &Buffer) {
        let Ok(mut attached) = self.attached() else {
            return;
        };
        let Some(index) = attached
            .iter()
            .position(|e| e.buffer.ptr_eq(buffer) && e.phase == Phase::Delivered)
        else {
            return;
        };
        match buffer.lock_for(LockState::LockedForReceive, self.owner()) {
            Ok(generation) => {
                let entry = &mut attached[index];
                entry.generation = generation;
                entry.phase = Phase::Ready;
            }
            Err(RawcapError::Freed) => {
                attached.remove(index);
            }
            // Still accessed by the application; the engine retries later.
            Err(_) => attached[index].phase = Phase::Returned,
        }
    }
}

/// How long the next backend wait may take without overshooting a deadline.
fn next_wait(timeout: Duration, elapsed: Duration) -> Duration {
    if timeout.is_zero() {
        return POLL_INTERVAL;
    }
    let deadline = if elapsed < timeout {
        timeout
    } else {
        timeout * TIMEOUT_STRETCH
    };
    deadline.saturating_sub(elapsed).min(POLL_INTERVAL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::Adapter;
    use crate::backend::{Backend, Frame, LoopbackBackend, DEFAULT_MTU};
    use crate::packet::PacketAccess;
    use crate::timestamp::{TimestampCapabilities, TimestampMode};
    use std::sync::mpsc::RecvTimeoutError;

    const WAIT: Duration = Duration::from_secs(5);

    fn setup() -> (Arc<LoopbackBackend>, Handle) {
        let backend = Arc::new(LoopbackBackend::new("lo"));
        let handle = Handle::open(&Adapter::from_shared(backend.clone())).unwrap();
        (backend, handle)
    }

    /// Link that went away: every receive fails.
    struct DeadLink;

    impl Backend for DeadLink {
        fn name(&self) -> &str {
            "dead"
        }

        fn mtu(&self) -> usize {
            DEFAULT_MTU
        }

        fn open_port(&self, _port: u64) -> Result<()> {
            Ok(())
        }

        fn close_port(&self, _port: u64) {}

        fn receive(&self, _port: u64, _timeout: Duration) -> Result<Option<Frame>> {
            Err(RawcapError::DriverIo("link gone".into()))
        }

        fn transmit(&self, _frame: &[u8]) -> Result<()> {
            Ok(())
        }

        fn timestamp_capabilities(&self) -> TimestampCapabilities {
            TimestampCapabilities::system()
        }

        fn set_promiscuous(&self, _enabled: bool) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn next_wait_respects_deadlines() {
        let ms = Duration::from_millis;
        assert_eq!(next_wait(Duration::ZERO, ms(100)), POLL_INTERVAL);
        assert_eq!(next_wait(ms(10), ms(8)), ms(2));
        assert_eq!(next_wait(ms(10), ms(12)), POLL_INTERVAL);
        assert_eq!(next_wait(ms(10), ms(99)), ms(1));
    }

    #[test]
    fn attach_limits() {
        let (_backend, handle) = setup();
        let receiver = Receiver::new(&handle);
        let a = Buffer::new(64, 4).unwrap();
        let b = Buffer::new(64, 4).unwrap();
        let c = Buffer::new(64, 4).unwrap();

        receiver.attach(&a).unwrap();
        assert_eq!(a.lock_state(), LockState::LockedForReceive);
        assert!(matches!(receiver.attach(&a), Err(RawcapError::InUse)));
        receiver.attach(&b).unwrap();
        assert!(matches!(
            receiver.attach(&c),
            Err(RawcapError::LimitReached { limit: 2 })
        ));
        assert_eq!(c.lock_state(), LockState::Unlocked);
        assert_eq!(receiver.attached_count().unwrap(), 2);
    }

    #[test]
    fn attach_to_second_handle_is_in_use() {
        let (backend, handle) = setup();
        let other = Handle::open(&Adapter::from_shared(backend)).unwrap();
        let first = Receiver::new(&handle);
        let second = Receiver::new(&other);
        let buffer = Buffer::new(64, 4).unwrap();

        first.attach(&buffer).unwrap();
        assert!(matches!(second.attach(&buffer), Err(RawcapError::InUse)));
        assert_eq!(status::last_status(), Status::InUse);
    }

    #[test]
    fn detach_unlocks() {
        let (_backend, handle) = setup();
        let receiver = Receiver::new(&handle);
        let buffer = Buffer::new(64, 4).unwrap();

        assert_eq!(receiver.detach(&buffer).unwrap(), Status::NotAttached);
        receiver.attach(&buffer).unwrap();
        assert_eq!(receiver.detach(&buffer).unwrap(), Status::Success);
        assert_eq!(buffer.lock_state(), LockState::Unlocked);
        assert_eq!(receiver.detach(&buffer).unwrap(), Status::NotAttached);
    }

    #[test]
    fn drop_detaches_everything() {
        let (_backend, handle) = setup();
        let buffer = Buffer::new(64, 4).unwrap();
        {
            let receiver = Receiver::new(&handle);
            receiver.attach(&buffer).unwrap();
            receiver.start(|_, _| {}, false).unwrap();
        }
        assert_eq!(buffer.lock_state(), LockState::Unlocked);
        let receiver = Receiver::new(&handle);
        receiver.start(|_, _| {}, false).unwrap();
    }

    #[test]
    fn start_twice_is_pending() {
        let (_backend, handle) = setup();
        let receiver = Receiver::new(&handle);
        receiver.start(|_, _| {}, false).unwrap();
        assert!(matches!(
            receiver.start(|_, _| {}, false),
            Err(RawcapError::Pending)
        ));
        assert!(receiver.is_running());
        assert_eq!(receiver.stop().unwrap(), Status::Success);
        assert_eq!(receiver.stop().unwrap(), Status::NotRunning);
        assert!(!receiver.is_running());
    }

    #[test]
    fn single_packet_receive_excludes_pipeline() {
        let (_backend, handle) = setup();
        let receiver = Receiver::new(&handle);
        receiver.start(|_, _| {}, false).unwrap();

        let mut packet = crate::packet::Packet::new(64).unwrap();
        assert!(matches!(
            handle.receive_packet(&mut packet),
            Err(RawcapError::Pending)
        ));

        receiver.stop().unwrap();
        handle.set_rx_timeout(Duration::from_millis(1)).unwrap();
        assert_eq!(handle.receive_packet(&mut packet).unwrap(), Status::NoData);
    }

    #[test]
    fn threshold_completes_cycle() {
        let (backend, handle) = setup();
        handle.set_min_packets_to_copy(3).unwrap();
        handle.set_rx_timeout(Duration::ZERO).unwrap();
        let receiver = Receiver::new(&handle);
        receiver.attach(&Buffer::new(128, 8).unwrap()).unwrap();

        let (tx, rx) = mpsc::channel();
        receiver
            .start(
                move |buffer, status| {
                    let _ = tx.send((buffer.count().unwrap(), status));
                },
                false,
            )
            .unwrap();

        for i in 0..3u8 {
            backend.inject(vec![i; 60]);
        }
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), (3, Status::Success));
        receiver.stop().unwrap();
    }

    #[test]
    fn full_buffer_completes_cycle() {
        let (backend, handle) = setup();
        handle.set_rx_timeout(Duration::ZERO).unwrap();
        let receiver = Receiver::new(&handle);
        receiver.attach(&Buffer::new(128, 2).unwrap()).unwrap();

        let (tx, rx) = mpsc::channel();
        receiver
            .start(
                move |buffer, _| {
                    let _ = tx.send(buffer.count().unwrap());
                },
                false,
            )
            .unwrap();

        backend.inject(vec![1; 60]);
        assert_eq!(rx.recv_timeout(Duration::from_millis(100)), Err(RecvTimeoutError::Timeout));
        backend.inject(vec![2; 60]);
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), 2);
        receiver.stop().unwrap();
    }

    #[test]
    fn empty_cycles_reported_on_request() {
        let (_backend, handle) = setup();
        handle.set_rx_timeout(Duration::from_millis(5)).unwrap();
        let receiver = Receiver::new(&handle);
        receiver.attach(&Buffer::new(64, 4).unwrap()).unwrap();

        let (tx, rx) = mpsc::channel();
        receiver
            .start(
                move |_, status| {
                    let _ = tx.send(status);
                },
                true,
            )
            .unwrap();
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), Status::NoData);
        receiver.stop().unwrap();
    }

    #[test]
    fn empty_cycles_silent_by_default() {
        let (_backend, handle) = setup();
        handle.set_rx_timeout(Duration::from_millis(5)).unwrap();
        let receiver = Receiver::new(&handle);
        receiver.attach(&Buffer::new(64, 4).unwrap()).unwrap();

        let (tx, rx) = mpsc::channel();
        receiver
            .start(
                move |_, status| {
                    let _ = tx.send(status);
                },
                false,
            )
            .unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        receiver.stop().unwrap();
    }

    #[test]
    fn detach_from_callback() {
        let (backend, handle) = setup();
        handle.set_min_packets_to_copy(1).unwrap();
        let receiver = Receiver::new(&handle);
        let buffer = Buffer::new(128, 4).unwrap();
        receiver.attach(&buffer).unwrap();

        let control = receiver.control();
        let (tx, rx) = mpsc::channel();
        receiver
            .start(
                move |buffer, _| {
                    let _ = tx.send(control.detach(buffer));
                },
                false,
            )
            .unwrap();

        backend.inject(vec![1; 60]);
        assert_eq!(rx.recv_timeout(WAIT).unwrap().unwrap(), Status::Success);
        receiver.stop().unwrap();
        assert_eq!(receiver.attached_count().unwrap(), 0);
        assert_eq!(buffer.lock_state(), LockState::Unlocked);
        assert_eq!(buffer.count().unwrap(), 1);
    }

    #[test]
    fn stop_from_callback() {
        let (backend, handle) = setup();
        handle.set_min_packets_to_copy(1).unwrap();
        let receiver = Receiver::new(&handle);
        receiver.attach(&Buffer::new(128, 4).unwrap()).unwrap();

        let control = receiver.control();
        let (tx, rx) = mpsc::channel();
        receiver
            .start(
                move |_, _| {
                    let _ = tx.send(control.stop());
                },
                false,
            )
            .unwrap();

        backend.inject(vec![1; 60]);
        assert_eq!(rx.recv_timeout(WAIT).unwrap().unwrap(), Status::Success);
        assert!(!receiver.is_running());
        assert_eq!(receiver.stop().unwrap(), Status::NotRunning);

        // The old dispatcher is joined before a restart.
        receiver.start(|_, _| {}, false).unwrap();
        receiver.stop().unwrap();
    }

    #[test]
    fn captured_packets_are_stamped() {
        let (backend, handle) = setup();
        handle.set_min_packets_to_copy(1).unwrap();
        let receiver = Receiver::new(&handle);
        receiver.attach(&Buffer::new(128, 4).unwrap()).unwrap();

        let (tx, rx) = mpsc::channel();
        receiver
            .start(
                move |buffer, _| {
                    let access = buffer.access().unwrap();
                    let packet = access.front().unwrap();
                    let _ = tx.send((packet.timestamp().mode(), packet.payload_length()));
                },
                false,
            )
            .unwrap();

        backend.inject(vec![1; 60]);
        let (mode, length) = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(mode, TimestampMode::SystemLowPrec);
        assert_eq!(length, 60);
        receiver.stop().unwrap();
        assert_eq!(handle.rx_stats().captured, 1);
    }

    #[test]
    fn driver_failure_is_delivered_and_stops_receiver() {
        let handle = Handle::open(&Adapter::new(DeadLink)).unwrap();
        let receiver = Receiver::new(&handle);
        let buffer = Buffer::new(64, 4).unwrap();
        receiver.attach(&buffer).unwrap();

        let (tx, rx) = mpsc::channel();
        receiver
            .start(
                move |buffer, status| {
                    let _ = tx.send((status, buffer.lock_state()));
                },
                true,
            )
            .unwrap();

        assert_eq!(
            rx.recv_timeout(WAIT).unwrap(),
            (Status::DriverIoFailed, LockState::Unlocked)
        );
        assert!(!receiver.is_running());
        // Not retried.
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert_eq!(receiver.attached_count().unwrap(), 1);

        // A later start reaps the finished workers instead of reporting Pending.
        receiver.start(|_, _| {}, false).unwrap();
        assert_eq!(receiver.stop().unwrap(), Status::Success);
        assert_eq!(receiver.stop().unwrap(), Status::NotRunning);
    }
}
