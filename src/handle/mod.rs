//! Capture handles.
//!
//! A [`Handle`] is one endpoint on an [`Adapter`]. It owns the receive and
//! transmit settings, the applied copy of a [`Filter`] and the traffic
//! counters, and it offers blocking single-packet receive and transmit.
//! The buffered pipelines, [`Receiver`](crate::Receiver) and
//! [`Transmitter`](crate::Transmitter), are built on top of a handle by
//! composition; each side of a handle is used either by its pipeline or by
//! single-packet calls, never both at once.

mod stats;


pub(crate) use stats::Counters;
pub use stats::{ReceiveStats, TransmitStats};

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

use crate::adapter::Adapter;
use crate::backend::{Direction, Frame};
use crate::config::{self, CaptureConfig};
use crate::error::{RawcapError, Result};
use crate::filter::Filter;
use crate::logging::PipelineMetrics;
use crate::packet::{write_payload, Packet, PacketAccess};
use crate::status::{self, Status};
use crate::timestamp::{TimestampCapabilities, TimestampMode};

/// Ethernet header length in bytes.
pub const ETHERNET_HEADER_LEN: usize = 14;
/// 802.1Q tag length in bytes.
pub const VLAN_TAG_LEN: usize = 4;

const VLAN_TPID: [u8; 2] = [0x81, 0x00];
const ETHERTYPE_OFFSET: usize = 12;

/// Longest single wait on the backend, so that stop requests and deadlines
/// are noticed promptly.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Side of a handle claimed by a pipeline or a single-packet call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Activity {
    Receive,
    Transmit,
}

/// Receive settings captured at the start of a fill cycle or receive call.
#[derive(Debug, Clone)]
pub(crate) struct RxSettings {
    pub(crate) direction: Direction,
    pub(crate) min_packets: usize,
    pub(crate) timeout: Duration,
    pub(crate) queue_size: u32,
    pub(crate) vlan_tagging: bool,
    pub(crate) timestamp_mode: TimestampMode,
    pub(crate) resolution_ns: u32,
    pub(crate) filter: Filter,
}

/// A frame that passed intake, cut down to what is kept.
#[derive(Debug)]
pub(crate) struct Accepted {
    pub(crate) payload: Vec<u8>,
    pub(crate) wire_length: usize,
    pub(crate) captured_at: SystemTime,
}

struct HandleSettings {
    config: CaptureConfig,
    filter: Filter,
}

struct HandleInner {
    id: u64,
    adapter: Adapter,
    settings: Mutex<HandleSettings>,
    rx_active: AtomicBool,
    tx_active: AtomicBool,
    counters: Counters,
    metrics: Option<Mutex<PipelineMetrics>>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        let promiscuous = self
            .settings
            .get_mut()
            .map(|settings| settings.config.receive.promiscuous)
            .unwrap_or(false);
        if promiscuous {
            if let Err(error) = self.adapter.promiscuous_release() {
                log::warn!(
                    target: "safer_rawcap::handle",
                    "handle {}: releasing promiscuous mode failed: {error}",
                    self.id
                );
            }
        }
        self.adapter.release_handle(self.id);
    }
}

/// Shared endpoint on an adapter.
///
/// Cloning is cheap; clones refer to the same endpoint, which closes when
/// the last clone and the last pipeline built on it are dropped.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use safer_rawcap::backend::LoopbackBackend;
/// use safer_rawcap::{Adapter, Handle, Packet, PacketAccess, Status};
///
/// let backend = std::sync::Arc::new(LoopbackBackend::new("lo"));
/// let adapter = Adapter::from_shared(backend.clone());
/// let handle = Handle::open(&adapter)?;
/// handle.set_rx_timeout(Duration::from_millis(50))?;
///
/// backend.inject(vec![0x42; 60]);
/// let mut packet = Packet::new(1514)?;
/// assert_eq!(handle.receive_packet(&mut packet)?, Status::Success);
/// assert_eq!(packet.payload_length(), 60);
///
/// // Nothing else queued: the timeout is an informational outcome.
/// assert_eq!(handle.receive_packet(&mut packet)?, Status::NoData);
/// # Ok::<(), safer_rawcap::RawcapError>(())
/// ```
#[derive(Clone)]
pub struct Handle {
    inner: Arc<HandleInner>,
}

/// Releases a single-packet claim on drop.
struct Claim<'a> {
    handle: &'a Handle,
    activity: Activity,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.handle.release(self.activity);
    }
}

impl Handle {
    /// Open a handle with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RawcapError::LimitReached`] if the adapter already has
    /// [`HANDLES_PER_ADAPTER_MAX`](crate::adapter::HANDLES_PER_ADAPTER_MAX)
    /// open handles.
    pub fn open(adapter: &Adapter) -> Result<Self> {
        Self::open_with_config(adapter, CaptureConfig::default())
    }

    /// Open a handle with `config`.
    ///
    /// # Errors
    ///
    /// - [`RawcapError::OutOfRange`] if the configuration does not validate
    /// - [`RawcapError::NotAvailable`] if a timestamp mode is not supported
    ///   by the backend
    /// - [`RawcapError::LimitReached`] if the adapter is full
    pub fn open_with_config(adapter: &Adapter, config: CaptureConfig) -> Result<Self> {
        status::record(Self::try_open(adapter, config))
    }

    fn try_open(adapter: &Adapter, mut config: CaptureConfig) -> Result<Self> {
        config.validate()?;
        let capabilities = adapter.backend().timestamp_capabilities();
        check_timestamp_mode(capabilities, config.receive.timestamp_mode)?;
        check_timestamp_mode(capabilities, config.transmit.timestamp_mode)?;

        let id = adapter.register_handle()?;
        let promiscuous = std::mem::replace(&mut config.receive.promiscuous, false);
        let metrics = config
            .logging
            .metrics
            .then(|| Mutex::new(PipelineMetrics::new()));

        let handle = Self {
            inner: Arc::new(HandleInner {
                id,
                adapter: adapter.clone(),
                settings: Mutex::new(HandleSettings {
                    config,
                    filter: Filter::default(),
                }),
                rx_active: AtomicBool::new(false),
                tx_active: AtomicBool::new(false),
                counters: Counters::default(),
                metrics,
            }),
        };
        if promiscuous {
            handle.set_promiscuous(true)?;
        }
        Ok(handle)
    }

    fn settings(&self) -> Result<MutexGuard<'_, HandleSettings>> {
        self.inner
            .settings
            .lock()
            .map_err(|_| RawcapError::LockPoisoned)
    }

    fn update(&self, f: impl FnOnce(&mut HandleSettings) -> Result<()>) -> Result<()> {
        status::record(self.settings().and_then(|mut settings| f(&mut settings)))
    }

    /// Process-unique handle id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Adapter the handle was opened on.
    pub fn adapter(&self) -> &Adapter {
        &self.inner.adapter
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> Result<CaptureConfig> {
        Ok(self.settings()?.config.clone())
    }

    /// Capture direction.
    pub fn direction(&self) -> Result<Direction> {
        Ok(self.settings()?.config.receive.direction)
    }

    /// Set the capture direction. [`Direction::Unknown`] captures nothing.
    pub fn set_direction(&self, direction: Direction) -> Result<()> {
        self.update(|s| {
            s.config.receive.direction = direction;
            Ok(())
        })
    }

    /// Packets a fill cycle waits for before it may complete.
    pub fn min_packets_to_copy(&self) -> Result<u32> {
        Ok(self.settings()?.config.receive.min_packets_to_copy)
    }

    /// Set the fill cycle packet threshold.
    ///
    /// # Errors
    ///
    /// Returns [`RawcapError::OutOfRange`] above
    /// [`BUFFER_PACKETS_MAX`](crate::buffer::BUFFER_PACKETS_MAX).
    pub fn set_min_packets_to_copy(&self, min_packets: u32) -> Result<()> {
        self.update(|s| {
            config::check_min_packets(min_packets)?;
            s.config.receive.min_packets_to_copy = min_packets;
            Ok(())
        })
    }

    /// Receive timeout.
    pub fn rx_timeout(&self) -> Result<Duration> {
        Ok(self.settings()?.config.receive.timeout)
    }

    /// Set the receive timeout; zero waits without bound.
    ///
    /// # Errors
    ///
    /// Returns [`RawcapError::OutOfRange`] above
    /// [`RX_TIMEOUT_MAX`](crate::config::RX_TIMEOUT_MAX).
    pub fn set_rx_timeout(&self, timeout: Duration) -> Result<()> {
        self.update(|s| {
            config::check_rx_timeout(timeout)?;
            s.config.receive.timeout = timeout;
            Ok(())
        })
    }

    /// Engine receive queue depth.
    pub fn rx_queue_size(&self) -> Result<u32> {
        Ok(self.settings()?.config.receive.queue_size)
    }

    /// Set the engine receive queue depth. Zero drops every matched frame.
    ///
    /// # Errors
    ///
    /// Returns [`RawcapError::OutOfRange`] above
    /// [`RX_QUEUE_SIZE_MAX`](crate::config::RX_QUEUE_SIZE_MAX).
    pub fn set_rx_queue_size(&self, queue_size: u32) -> Result<()> {
        self.update(|s| {
            config::check_rx_queue_size(queue_size)?;
            s.config.receive.queue_size = queue_size;
            Ok(())
        })
    }

    /// Engine transmit queue depth.
    pub fn tx_queue_size(&self) -> Result<u32> {
        Ok(self.settings()?.config.transmit.queue_size)
    }

    /// Set the engine transmit queue depth.
    ///
    /// # Errors
    ///
    /// Returns [`RawcapError::OutOfRange`] outside
    /// [`TX_QUEUE_SIZE_MIN`](crate::config::TX_QUEUE_SIZE_MIN)`..=`[`TX_QUEUE_SIZE_MAX`](crate::config::TX_QUEUE_SIZE_MAX).
    pub fn set_tx_queue_size(&self, queue_size: u32) -> Result<()> {
        self.update(|s| {
            config::check_tx_queue_size(queue_size)?;
            s.config.transmit.queue_size = queue_size;
            Ok(())
        })
    }

    /// Whether 802.1Q tags are kept on captured frames.
    pub fn vlan_tagging(&self) -> Result<bool> {
        Ok(self.settings()?.config.receive.vlan_tagging)
    }

    /// Keep or strip 802.1Q tags on captured frames.
    pub fn set_vlan_tagging(&self, enabled: bool) -> Result<()> {
        self.update(|s| {
            s.config.receive.vlan_tagging = enabled;
            Ok(())
        })
    }

    /// `(handle_enabled, adapter_enabled)`.
    ///
    /// The adapter stays promiscuous while any of its handles asks for it,
    /// so the two values can differ.
    pub fn promiscuous(&self) -> Result<(bool, bool)> {
        let requested = self.settings()?.config.receive.promiscuous;
        Ok((requested, self.inner.adapter.is_promiscuous()?))
    }

    /// Ask for or give up promiscuous mode on the adapter.
    pub fn set_promiscuous(&self, enabled: bool) -> Result<()> {
        self.update(|s| {
            if s.config.receive.promiscuous == enabled {
                return Ok(());
            }
            if enabled {
                self.inner.adapter.promiscuous_acquire()?;
            } else {
                self.inner.adapter.promiscuous_release()?;
            }
            s.config.receive.promiscuous = enabled;
            Ok(())
        })
    }

    /// Timestamp modes the backend supports.
    pub fn timestamp_capabilities(&self) -> TimestampCapabilities {
        self.inner.adapter.backend().timestamp_capabilities()
    }

    /// Clock used to stamp captured packets.
    pub fn rx_timestamp_mode(&self) -> Result<TimestampMode> {
        Ok(self.settings()?.config.receive.timestamp_mode)
    }

    /// Set the clock used to stamp captured packets.
    ///
    /// # Errors
    ///
    /// Returns [`RawcapError::NotAvailable`] if `mode` is not in
    /// [`timestamp_capabilities`](Self::timestamp_capabilities).
    pub fn set_rx_timestamp_mode(&self, mode: TimestampMode) -> Result<()> {
        let capabilities = self.timestamp_capabilities();
        self.update(|s| {
            check_timestamp_mode(capabilities, mode)?;
            s.config.receive.timestamp_mode = mode;
            Ok(())
        })
    }

    /// Clock used to stamp sent packets.
    pub fn tx_timestamp_mode(&self) -> Result<TimestampMode> {
        Ok(self.settings()?.config.transmit.timestamp_mode)
    }

    /// Set the clock used to stamp sent packets.
    ///
    /// # Errors
    ///
    /// Returns [`RawcapError::NotAvailable`] if `mode` is not supported.
    pub fn set_tx_timestamp_mode(&self, mode: TimestampMode) -> Result<()> {
        let capabilities = self.timestamp_capabilities();
        self.update(|s| {
            check_timestamp_mode(capabilities, mode)?;
            s.config.transmit.timestamp_mode = mode;
            Ok(())
        })
    }

    /// Apply a copy of `filter`. Later edits to `filter` need another call.
    pub fn set_filter(&self, filter: &Filter) -> Result<()> {
        self.update(|s| {
            s.filter = filter.clone();
            Ok(())
        })?;
        log::debug!(
            target: "safer_rawcap::handle",
            "handle {}: filter applied (active: {})",
            self.inner.id,
            filter.is_active()
        );
        Ok(())
    }

    /// The applied filter.
    pub fn filter(&self) -> Result<Filter> {
        Ok(self.settings()?.filter.clone())
    }

    /// Receive counters.
    pub fn rx_stats(&self) -> ReceiveStats {
        self.inner.counters.receive_snapshot()
    }

    /// Transmit counters.
    pub fn tx_stats(&self) -> TransmitStats {
        self.inner.counters.transmit_snapshot()
    }

    /// Recorded operation timings, if metrics are enabled.
    pub fn metrics(&self) -> Option<PipelineMetrics> {
        let metrics = self.inner.metrics.as_ref()?;
        metrics.lock().ok().map(|metrics| metrics.clone())
    }

    /// Longest frame the link accepts, with or without an 802.1Q tag.
    pub fn max_frame_length(&self, tagged: bool) -> usize {
        let tag = if tagged { VLAN_TAG_LEN } else { 0 };
        self.inner.adapter.mtu() + ETHERNET_HEADER_LEN + tag
    }

    /// Receive one packet, blocking up to the receive timeout.
    ///
    /// Returns `Ok(Status::Success)` with the packet filled in, or
    /// `Ok(Status::NoData)` if nothing arrived in time. A zero timeout waits
    /// until a packet arrives. The packet is stamped with the receive
    /// timestamp mode.
    ///
    /// # Errors
    ///
    /// - [`RawcapError::Pending`] while a [`Receiver`](crate::Receiver) runs
    ///   on this handle or another receive call is in flight
    /// - engine failures from the backend
    pub fn receive_packet(&self, packet: &mut Packet) -> Result<Status> {
        status::record_status(self.receive_one(packet))
    }

    fn receive_one(&self, packet: &mut Packet) -> Result<Status> {
        let _claim = self.claim_scoped(Activity::Receive)?;
        let started = Instant::now();
        let settings = self.rx_settings()?;
        let capacity = usize::from(packet.max_payload_size());
        let deadline = (!settings.timeout.is_zero()).then(|| started + settings.timeout);

        loop {
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(Status::NoData);
                    }
                    (deadline - now).min(POLL_INTERVAL)
                }
                None => POLL_INTERVAL,
            };

            let Some(accepted) = self.next_frame(&settings, capacity, wait)? else {
                continue;
            };
            let (meta, data) = packet.parts_mut();
            write_payload(meta, data, &accepted.payload)?;
            meta.wire_length = accepted.wire_length;
            meta.status = Status::Success;
            meta.timestamp.stamp(
                settings.timestamp_mode,
                settings.resolution_ns,
                accepted.captured_at,
            );
            self.inner.counters.frame_captured(accepted.payload.len());
            self.record_metric("receive_packet", started.elapsed());
            return Ok(Status::Success);
        }
    }

    /// Transmit one packet and stamp it with the send time.
    ///
    /// The packet's timestamp is overwritten using the transmit timestamp
    /// mode; [`TimestampMode::None`] zeroes it.
    ///
    /// # Errors
    ///
    /// - [`RawcapError::Pending`] while a [`Transmitter`](crate::Transmitter)
    ///   runs on this handle or another transmit call is in flight
    /// - [`RawcapError::BeyondMtu`] if the frame is too long for the link
    /// - engine failures from the backend
    pub fn transmit_packet(&self, packet: &mut Packet) -> Result<Status> {
        status::record_status(self.transmit_one(packet))
    }

    fn transmit_one(&self, packet: &mut Packet) -> Result<Status> {
        let _claim = self.claim_scoped(Activity::Transmit)?;
        let started = Instant::now();
        let (mode, resolution) = self.tx_stamp()?;

        match self.send_frame(packet.payload()) {
            Ok(sent_at) => {
                packet.timestamp_mut().stamp(mode, resolution, sent_at);
                packet.set_status(Status::Success);
                self.record_metric("transmit_packet", started.elapsed());
                Ok(Status::Success)
            }
            Err(error) => {
                packet.set_status(error.status());
                Err(error)
            }
        }
    }

    pub(crate) fn claim(&self, activity: Activity) -> Result<()> {
        let flag = self.activity_flag(activity);
        if flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RawcapError::Pending);
        }
        Ok(())
    }

    pub(crate) fn release(&self, activity: Activity) {
        self.activity_flag(activity).store(false, Ordering::Release);
    }

    fn claim_scoped(&self, activity: Activity) -> Result<Claim<'_>> {
        self.claim(activity)?;
        Ok(Claim {
            handle: self,
            activity,
        })
    }

    fn activity_flag(&self, activity: Activity) -> &AtomicBool {
        match activity {
            Activity::Receive => &self.inner.rx_active,
            Activity::Transmit => &self.inner.tx_active,
        }
    }

    pub(crate) fn counters(&self) -> &Counters {
        &self.inner.counters
    }

    pub(crate) fn record_metric(&self, operation: &'static str, duration: Duration) {
        if let Some(metrics) = &self.inner.metrics {
            if let Ok(mut metrics) = metrics.lock() {
                metrics.record_operation(operation, duration);
            }
        }
    }

    pub(crate) fn rx_settings(&self) -> Result<RxSettings> {
        let settings = self.settings()?;
        let receive = &settings.config.receive;
        Ok(RxSettings {
            direction: receive.direction,
            min_packets: receive.min_packets_to_copy as usize,
            timeout: receive.timeout,
            queue_size: receive.queue_size,
            vlan_tagging: receive.vlan_tagging,
            timestamp_mode: receive.timestamp_mode,
            resolution_ns: self
                .inner
                .adapter
                .backend()
                .timestamp_resolution_ns(receive.timestamp_mode),
            filter: settings.filter.clone(),
        })
    }

    /// Transmit timestamp mode and its resolution.
    pub(crate) fn tx_stamp(&self) -> Result<(TimestampMode, u32)> {
        let mode = self.settings()?.config.transmit.timestamp_mode;
        let resolution = self.inner.adapter.backend().timestamp_resolution_ns(mode);
        Ok((mode, resolution))
    }

    /// Wait up to `wait` for one frame and run it through intake.
    ///
    /// `Ok(None)` when nothing arrived or the frame is not kept; the caller
    /// decides whether to keep waiting.
    pub(crate) fn next_frame(
        &self,
        settings: &RxSettings,
        capacity: usize,
        wait: Duration,
    ) -> Result<Option<Accepted>> {
        let backend = self.inner.adapter.backend();
        let Some(frame) = backend.receive(self.inner.id, wait)? else {
            return Ok(None);
        };
        Ok(self.intake(frame, settings, capacity))
    }

    fn intake(&self, mut frame: Frame, settings: &RxSettings, capacity: usize) -> Option<Accepted> {
        let counters = &self.inner.counters;
        if !settings.direction.admits(frame.direction) {
            self.forward(&frame);
            return None;
        }
        counters.frame_received();

        let wire_length = frame.data.len();
        if !settings.vlan_tagging && is_vlan_tagged(&frame.data) {
            frame
                .data
                .drain(ETHERTYPE_OFFSET..ETHERTYPE_OFFSET + VLAN_TAG_LEN);
        }

        let filter = &settings.filter;
        if !filter.matches(&frame.data) {
            self.forward(&frame);
            return None;
        }
        if !filter.is_active() || filter.indicate() {
            self.forward(&frame);
        }
        counters.frame_matched();

        if settings.queue_size == 0 {
            counters.dropped_queue();
            log::trace!(
                target: "safer_rawcap::handle",
                "handle {}: receive queue disabled, frame dropped",
                self.inner.id
            );
            return None;
        }

        let payload = filter.apply_capture_window(&frame.data);
        if payload.len() > capacity {
            counters.dropped_too_long();
            log::trace!(
                target: "safer_rawcap::handle",
                "handle {}: {} byte frame exceeds {} byte slot",
                self.inner.id,
                payload.len(),
                capacity
            );
            return None;
        }

        Some(Accepted {
            payload: payload.to_vec(),
            wire_length,
            captured_at: frame.captured_at,
        })
    }

    fn forward(&self, frame: &Frame) {
        if frame.direction != Direction::In {
            return;
        }
        if let Err(error) = self.inner.adapter.backend().indicate_to_stack(frame) {
            log::warn!(
                target: "safer_rawcap::handle",
                "handle {}: indicating frame to stack failed: {error}",
                self.inner.id
            );
        }
    }

    /// Put one frame on the wire, returning the send completion time.
    pub(crate) fn send_frame(&self, payload: &[u8]) -> Result<SystemTime> {
        let counters = &self.inner.counters;
        counters.tx_initiated();

        let limit = self.max_frame_length(is_vlan_tagged(payload));
        if payload.len() > limit {
            counters.tx_failed();
            return Err(RawcapError::BeyondMtu {
                length: payload.len(),
                limit,
            });
        }
        if let Err(error) = self.inner.adapter.backend().transmit(payload) {
            counters.tx_failed();
            return Err(error);
        }
        counters.tx_completed(payload.len());
        Ok(SystemTime::now())
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.inner.id)
            .field("adapter", &self.inner.adapter.name())
            .field("rx_active", &self.inner.rx_active.load(Ordering::Relaxed))
            .field("tx_active", &self.inner.tx_active.load(Ordering::Relaxed))
            .finish()
    }
}

fn check_timestamp_mode(capabilities: TimestampCapabilities, mode: TimestampMode) -> Result<()> {
    if !capabilities.contains(mode) {
        return Err(RawcapError::NotAvailable("timestamp mode"));
    }
    Ok(())
}

fn is_vlan_tagged(frame: &[u8]) -> bool {
    frame.len() >= ETHERNET_HEADER_LEN + VLAN_TAG_LEN
        && frame[ETHERTYPE_OFFSET..ETHERTYPE_OFFSET + 2] == VLAN_TPID
}
