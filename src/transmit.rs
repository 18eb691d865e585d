//! Queued transmit pipeline.
//!
//! [`Transmitter::send`] locks a buffer and appends it to a FIFO queue. Once
//! started, a drain thread takes buffers off the queue strictly in
//! submission order, puts every slot on the wire and stamps it with its send
//! time. Completed buffers go through an ordered channel to a dispatch
//! thread that unlocks each one and runs the callback.
//!
//! In synchronized mode the gaps between slot timestamps are reproduced on
//! the wire. Slots must already be sorted by timestamp; the pipeline does
//! not reorder them.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use crate::buffer::{Buffer, LockState, PipelineHold, Storage};
use crate::error::{RawcapError, Result};
use crate::handle::{Activity, Handle};
use crate::packet::{PacketAccess, PacketMut};
use crate::status::{self, Status};
use crate::timestamp::TimestampMode;

type Callback = Box<dyn FnMut(&Buffer, Status) + Send + 'static>;

struct Queued {
    buffer: Buffer,
    generation: u64,
    synchronized: bool,
    hold: PipelineHold,
}

struct Completion {
    buffer: Buffer,
    generation: u64,
    status: Status,
    // Released once the callback returns.
    _hold: PipelineHold,
}

struct Workers {
    engine: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

/// Outcome of draining one buffer.
struct Drained {
    sent: usize,
    failed: usize,
    canceled: usize,
}

impl Drained {
    fn status(&self) -> Status {
        if self.failed == 0 && self.canceled == 0 {
            Status::Success
        } else {
            Status::NotAllProcessed
        }
    }
}

struct TransmitterInner {
    handle: Handle,
    queue: Mutex<VecDeque<Queued>>,
    // Signalled on enqueue and on stop.
    wake: Condvar,
    running: AtomicBool,
    workers: Mutex<Option<Workers>>,
    lingering: Mutex<Option<JoinHandle<()>>>,
}

/// Transmit pipeline of one handle.
///
/// # Example
///
/// ```rust
/// use std::sync::{mpsc, Arc};
/// use std::time::Duration;
/// use safer_rawcap::backend::LoopbackBackend;
/// use safer_rawcap::{Adapter, Buffer, Handle, Packet, Status, Transmitter};
///
/// let backend = Arc::new(LoopbackBackend::new("lo"));
/// let handle = Handle::open(&Adapter::from_shared(backend.clone()))?;
///
/// let buffer = Buffer::new(1514, 4)?;
/// let mut packet = Packet::new(1514)?;
/// packet.payload_set(&[0xAB; 60])?;
/// buffer.push_back(&packet)?;
///
/// let transmitter = Transmitter::new(&handle);
/// let (done, completed) = mpsc::channel();
/// transmitter.start(move |_, status| {
///     let _ = done.send(status);
/// })?;
/// transmitter.send(&buffer, false)?;
///
/// assert_eq!(completed.recv_timeout(Duration::from_secs(5)).ok(), Some(Status::Success));
/// assert_eq!(backend.sent_frames().len(), 1);
/// transmitter.stop()?;
/// # Ok::<(), safer_rawcap::RawcapError>(())
/// ```
pub struct Transmitter {
    inner: Arc<TransmitterInner>,
}

/// Weak control over a [`Transmitter`], usable from inside its callback.
#[derive(Clone)]
pub struct TransmitterControl {
    inner: Weak<TransmitterInner>,
}

impl Transmitter {
    /// Transmit pipeline on `handle`.
    pub fn new(handle: &Handle) -> Self {
        Self {
            inner: Arc::new(TransmitterInner {
                handle: handle.clone(),
                queue: Mutex::new(VecDeque::new()),
                wake: Condvar::new(),
                running: AtomicBool::new(false),
                workers: Mutex::new(None),
                lingering: Mutex::new(None),
            }),
        }
    }

    /// Handle the transmitter sends on.
    pub fn handle(&self) -> &Handle {
        &self.inner.handle
    }

    /// A control that does not keep the transmitter alive.
    pub fn control(&self) -> TransmitterControl {
        TransmitterControl {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Lock `buffer` for transmit and queue it.
    ///
    /// Returns immediately. Buffers queued while stopped are sent once the
    /// transmitter starts. Each slot's timestamp is overwritten with its send
    /// time; with `synchronized` set, the recorded gaps between slot
    /// timestamps are honoured first.
    ///
    /// # Errors
    ///
    /// - [`RawcapError::InUse`] if the buffer is locked or accessed
    /// - [`RawcapError::Freed`] for a freed buffer
    pub fn send(&self, buffer: &Buffer, synchronized: bool) -> Result<()> {
        status::record(self.inner.enqueue(buffer, synchronized))
    }

    /// Number of buffers waiting in the queue.
    pub fn pending(&self) -> Result<usize> {
        Ok(self.inner.queue()?.len())
    }

    /// Start draining the queue.
    ///
    /// `callback` runs on the dispatch thread once per buffer, in submission
    /// order, with the buffer unlocked. Its status is [`Status::Success`] or
    /// [`Status::NotAllProcessed`] when some slot failed or was canceled;
    /// the slot statuses tell which.
    ///
    /// # Errors
    ///
    /// - [`RawcapError::Pending`] if already started, if a single-packet
    ///   transmit is in flight on the handle, or when restarting from inside
    ///   a callback of the previous run
    /// - [`RawcapError::Io`] if a worker thread cannot be spawned
    pub fn start<F>(&self, callback: F) -> Result<()>
    where
        F: FnMut(&Buffer, Status) + Send + 'static,
    {
        status::record(TransmitterInner::start(&self.inner, Box::new(callback)))
    }

    /// Stop draining the queue.
    ///
    /// A buffer being paced has its remaining slots canceled and still gets
    /// its callback. Queued buffers stay queued. Returns
    /// `Ok(Status::NotRunning)` if the transmitter was not started.
    pub fn stop(&self) -> Result<Status> {
        status::record_status(self.inner.stop())
    }

    /// Whether the transmitter is started.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }
}

impl Drop for Transmitter {
    fn drop(&mut self) {
        if let Err(error) = self.inner.stop() {
            log::warn!(target: "safer_rawcap::transmit", "stop on drop failed: {error}");
        }
        self.inner.cancel_queued();
    }
}

impl fmt::Debug for Transmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transmitter")
            .field("handle", &self.inner.handle.id())
            .field("running", &self.is_running())
            .finish()
    }
}

impl TransmitterControl {
    /// [`Transmitter::send`]; [`RawcapError::NotFound`] once the transmitter
    /// is gone.
    pub fn send(&self, buffer: &Buffer, synchronized: bool) -> Result<()> {
        let inner = self.inner.upgrade().ok_or(RawcapError::NotFound);
        status::record(inner.and_then(|inner| inner.enqueue(buffer, synchronized)))
    }

    /// [`Transmitter::stop`]; `Ok(Status::NotRunning)` once the transmitter
    /// is gone.
    pub fn stop(&self) -> Result<Status> {
        match self.inner.upgrade() {
            Some(inner) => status::record_status(inner.stop()),
            None => Ok(Status::NotRunning),
        }
    }

    /// [`Transmitter::is_running`].
    pub fn is_running(&self) -> bool {
        self.inner
            .upgrade()
            .is_some_and(|inner| inner.running.load(Ordering::Acquire))
    }
}

impl fmt::Debug for TransmitterControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransmitterControl")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl TransmitterInner {
    fn queue(&self) -> Result<MutexGuard<'_, VecDeque<Queued>>> {
        self.queue.lock().map_err(|_| RawcapError::LockPoisoned)
    }

    fn owner(&self) -> u64 {
        self.handle.id()
    }

    fn enqueue(&self, buffer: &Buffer, synchronized: bool) -> Result<()> {
        let generation = buffer.lock_for(LockState::LockedForTransmit, self.owner())?;
        let mut queue = match self.queue() {
            Ok(queue) => queue,
            Err(error) => {
                let _ = buffer.unlock_from(LockState::LockedForTransmit, self.owner(), generation);
                return Err(error);
            }
        };
        queue.push_back(Queued {
            buffer: buffer.clone(),
            generation,
            synchronized,
            hold: buffer.hold(),
        });
        log::trace!(
            target: "safer_rawcap::transmit",
            "handle {}: buffer {} queued ({} pending)",
            self.owner(),
            buffer.id(),
            queue.len()
        );
        self.wake.notify_all();
        Ok(())
    }

    fn start(this: &Arc<Self>, callback: Callback) -> Result<()> {
        let mut workers = this.workers.lock().map_err(|_| RawcapError::LockPoisoned)?;
        if workers.is_some() {
            return Err(RawcapError::Pending);
        }
        this.join_lingering()?;
        this.handle.claim(Activity::Transmit)?;
        this.running.store(true, Ordering::Release);

        match Self::spawn_workers(this, callback) {
            Ok(spawned) => {
                *workers = Some(spawned);
                log::debug!(
                    target: "safer_rawcap::transmit",
                    "handle {}: transmitter started",
                    this.owner()
                );
                Ok(())
            }
            Err(error) => {
                this.running.store(false, Ordering::Release);
                this.handle.release(Activity::Transmit);
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
                    log::error!(target: "safer_rawcap::transmit", "dispatcher panicked");
                }
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn spawn_workers(this: &Arc<Self>, callback: Callback) -> Result<Workers> {
        let (sender, completions) = mpsc::channel();
        let id = this.owner();

        let engine_inner = Arc::clone(this);
        let engine = thread::Builder::new()
            .name(format!("rawcap-tx-engine-{id}"))
            .spawn(move || engine_inner.run_engine(&sender))?;

        let dispatch_inner = Arc::clone(this);
        let dispatcher = match thread::Builder::new()
            .name(format!("rawcap-tx-dispatch-{id}"))
            .spawn(move || dispatch_inner.run_dispatcher(&completions, callback))
        {
            Ok(dispatcher) => dispatcher,
            Err(error) => {
                this.running.store(false, Ordering::Release);
                this.wake.notify_all();
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

        {
            // Flip the flag under the queue lock so a waiting engine cannot
            // miss the wakeup.
            let _queue = self.queue()?;
            self.running.store(false, Ordering::Release);
            self.wake.notify_all();
        }
        if workers.engine.join().is_err() {
            log::error!(target: "safer_rawcap::transmit", "engine thread panicked");
        }
        if workers.dispatcher.thread().id() == thread::current().id() {
            let mut lingering = self.lingering.lock().map_err(|_| RawcapError::LockPoisoned)?;
            *lingering = Some(workers.dispatcher);
        } else if workers.dispatcher.join().is_err() {
            log::error!(target: "safer_rawcap::transmit", "dispatcher thread panicked");
        }
        self.handle.release(Activity::Transmit);
        log::debug!(
            target: "safer_rawcap::transmit",
            "handle {}: transmitter stopped",
            self.owner()
        );
        Ok(Status::Success)
    }

    /// Cancel every queued buffer and hand it back without a callback.
    fn cancel_queued(&self) {
        let queued = match self.queue() {
            Ok(mut queue) => std::mem::take(&mut *queue),
            Err(_) => return,
        };
        let owner = self.owner();
        for item in queued {
            let canceled = item.buffer.with_locked_storage(
                LockState::LockedForTransmit,
                owner,
                item.generation,
                |storage| mark_canceled(storage, 0),
            );
            if let Ok(Some(count)) = canceled {
                self.handle.counters().tx_canceled(count as u64);
            }
            if let Err(error) =
                item.buffer
                    .unlock_from(LockState::LockedForTransmit, owner, item.generation)
            {
                log::warn!(
                    target: "safer_rawcap::transmit",
                    "handle {owner}: unlocking canceled buffer {} failed: {error}",
                    item.buffer.id()
                );
            }
        }
    }

    /// Next queued buffer, or `None` once stopping.
    fn next_queued(&self) -> Result<Option<Queued>> {
        let mut queue = self.queue()?;
        loop {
            if !self.running.load(Ordering::Acquire) {
                return Ok(None);
            }
            if let Some(item) = queue.pop_front() {
                return Ok(Some(item));
            }
            queue = self.wake.wait(queue).map_err(|_| RawcapError::LockPoisoned)?;
        }
    }

    fn run_engine(&self, completions: &mpsc::Sender<Completion>) {
        loop {
            let item = match self.next_queued() {
                Ok(Some(item)) => item,
                Ok(None) => return,
                Err(error) => {
                    log::error!(target: "safer_rawcap::transmit", "engine stopping: {error}");
                    return;
                }
            };

            let started = Instant::now();
            let status = match self.drain(&item) {
                Ok(Some(drained)) => {
                    log::trace!(
                        target: "safer_rawcap::transmit",
                        "handle {}: buffer {} drained, {} sent, {} failed, {} canceled",
                        self.owner(),
                        item.buffer.id(),
                        drained.sent,
                        drained.failed,
                        drained.canceled
                    );
                    drained.status()
                }
                Ok(None) => {
                    log::warn!(
                        target: "safer_rawcap::transmit",
                        "handle {}: buffer {} lost its lock while queued",
                        self.owner(),
                        item.buffer.id()
                    );
                    continue;
                }
                Err(error) => {
                    log::warn!(
                        target: "safer_rawcap::transmit",
                        "handle {}: draining buffer {} failed: {error}",
                        self.owner(),
                        item.buffer.id()
                    );
                    error.status()
                }
            };
            self.handle.record_metric("transmit_buffer", started.elapsed());

            let completion = Completion {
                buffer: item.buffer,
                generation: item.generation,
                status,
                _hold: item.hold,
            };
            if completions.send(completion).is_err() {
                return;
            }
        }
    }

    /// Send every slot of a queued buffer. `Ok(None)` if the lock was lost.
    fn drain(&self, item: &Queued) -> Result<Option<Drained>> {
        let owner = self.owner();
        let locked = LockState::LockedForTransmit;
        let (mode, resolution) = self.handle.tx_stamp()?;

        let Some(count) = item
            .buffer
            .with_locked_storage(locked, owner, item.generation, |s: &mut Storage| s.count())?
        else {
            return Ok(None);
        };

        let mut drained = Drained {
            sent: 0,
            failed: 0,
            canceled: 0,
        };
        // Wall time of the first send and the timestamp it carried.
        let mut origin: Option<(Instant, Duration)> = None;

        for index in 0..count {
            if item.synchronized {
                let recorded = item
                    .buffer
                    .with_locked_storage(locked, owner, item.generation, |s| {
                        s.get(index).map(|p| p.timestamp().since_epoch())
                    })?
                    .flatten();
                let Some(recorded) = recorded else {
                    return Ok(None);
                };
                match origin {
                    None => origin = Some((Instant::now(), recorded)),
                    Some((sent_first, first)) => {
                        let due = sent_first + recorded.saturating_sub(first);
                        if !self.pace_until(due)? {
                            let canceled = item
                                .buffer
                                .with_locked_storage(locked, owner, item.generation, |s| {
                                    mark_canceled(s, index)
                                })?
                                .unwrap_or(0);
                            self.handle.counters().tx_canceled(canceled as u64);
                            drained.canceled = canceled;
                            break;
                        }
                    }
                }
            }

            let sent = item
                .buffer
                .with_locked_storage(locked, owner, item.generation, |s| {
                    let mut packet = s.get_mut(index)?;
                    let result = self.handle.send_frame(packet.payload());
                    Some(stamp_slot(&mut packet, result, mode, resolution))
                })?
                .flatten();
            match sent {
                Some(true) => drained.sent += 1,
                Some(false) => drained.failed += 1,
                None => return Ok(None),
            }
        }
        Ok(Some(drained))
    }

    /// Wait until `due`. `false` if the transmitter stopped first.
    fn pace_until(&self, due: Instant) -> Result<bool> {
        let mut queue = self.queue()?;
        loop {
            if !self.running.load(Ordering::Acquire) {
                return Ok(false);
            }
            let now = Instant::now();
            if now >= due {
                return Ok(true);
            }
            queue = self
                .wake
                .wait_timeout(queue, due - now)
                .map_err(|_| RawcapError::LockPoisoned)?
                .0;
        }
    }

    fn run_dispatcher(&self, completions: &mpsc::Receiver<Completion>, mut callback: Callback) {
        let owner = self.owner();
        for completion in completions {
            match completion.buffer.unlock_from(
                LockState::LockedForTransmit,
                owner,
                completion.generation,
            ) {
                Ok(true) => {}
                Ok(false) => {
                    log::warn!(
                        target: "safer_rawcap::transmit",
                        "handle {owner}: buffer {} lost its lock before completion",
                        completion.buffer.id()
                    );
                    continue;
                }
                Err(error) => {
                    log::error!(target: "safer_rawcap::transmit", "unlock failed: {error}");
                    continue;
                }
            }

            let started = Instant::now();
            callback(&completion.buffer, completion.status);
            self.handle.record_metric("transmit_callback", started.elapsed());
        }
    }
}

/// Record the outcome of one send on its slot. Returns whether it was sent.
fn stamp_slot(
    packet: &mut PacketMut<'_>,
    result: Result<SystemTime>,
    mode: TimestampMode,
    resolution: u32,
) -> bool {
    match result {
        Ok(sent_at) => {
            packet.timestamp_mut().stamp(mode, resolution, sent_at);
            packet.set_status(Status::Success);
            true
        }
        Err(error) => {
            packet.set_status(error.status());
            false
        }
    }
}

/// Mark slots from `from` onwards as canceled; returns how many.
fn mark_canceled(storage: &mut Storage, from: usize) -> usize {
    let count = storage.count();
    for index in from..count {
        if let Some(mut packet) = storage.get_mut(index) {
            packet.set_status(Status::Canceled);
        }
    }
    count.saturating_sub(from)
}
