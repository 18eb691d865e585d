//! # Safer-Rawcap: buffered raw packet capture for Rust
//!
//! A safe, buffered packet capture and transmit layer on top of a pluggable
//! capture engine. Packets are captured into pre-allocated [`Buffer`]s that
//! move between the application and the engine through an explicit lock
//! state, so the two sides never touch the same slots at once.
//!
//! ## Key Features
//!
//! ### Safety Guarantees
//! - **Lock exclusivity**: a buffer is either `Unlocked` (application owns
//!   it) or locked by exactly one pipeline; every application call on a locked
//!   buffer fails with `InUse`
//! - **Borrowed views**: packets inside a buffer are borrowed through a
//!   [`BufferAccess`] guard and cannot outlive it
//! - **Stale access detection**: a generation counter on every buffer turns
//!   use after clear or relock into a detectable error
//! - **Terminal free**: a freed buffer reports `Freed` forever instead of
//!   dangling
//!
//! ### Pipelines
//! - **Double-buffered capture**: a [`Receiver`] fills one attached buffer
//!   while the application drains the other inside its callback
//! - **Ordered transmit**: a [`Transmitter`] sends queued buffers strictly in
//!   submission order, optionally reproducing recorded packet gaps
//! - **Serialized callbacks**: completions go through an ordered channel to a
//!   single dispatch thread per pipeline
//!
//! ### Developer Experience
//! - **Status codes**: every call records a four-band [`Status`], readable
//!   through [`last_status`] for diagnostics
//! - **Logging**: structured `log` output with per-component targets and
//!   optional per-operation metrics
//! - **Configuration presets**: low latency, high throughput and development
//!   setups through [`CaptureConfig`]
//! - **In-memory engine**: [`LoopbackBackend`] for tests and demos
//!
//! ## Quick Start
//!
//! ### Single packets
//!
//! ```rust
//! use std::sync::Arc;
//! use safer_rawcap::{Adapter, Handle, LoopbackBackend, Packet, PacketAccess, Status};
//!
//! let backend = Arc::new(LoopbackBackend::new("lo"));
//! let handle = Handle::open(&Adapter::from_shared(backend.clone()))?;
//!
//! backend.inject(vec![0x42; 64]);
//! let mut packet = Packet::new(1514)?;
//! assert_eq!(handle.receive_packet(&mut packet)?, Status::Success);
//! assert_eq!(packet.payload_length(), 64);
//! # Ok::<(), safer_rawcap::RawcapError>(())
//! ```
//!
//! ### Buffered capture
//!
//! ```rust
//! use std::sync::{mpsc, Arc};
//! use std::time::Duration;
//! use safer_rawcap::{Adapter, Buffer, Handle, LoopbackBackend, Receiver};
//!
//! let backend = Arc::new(LoopbackBackend::new("lo"));
//! let handle = Handle::open(&Adapter::from_shared(backend.clone()))?;
//! handle.set_min_packets_to_copy(1)?;
//!
//! let receiver = Receiver::new(&handle);
//! receiver.attach(&Buffer::new(1514, 512)?)?;
//! receiver.attach(&Buffer::new(1514, 512)?)?;
//!
//! let (tx, rx) = mpsc::channel();
//! receiver.start(
//!     move |buffer, _status| {
//!         // The buffer is unlocked here and goes back to the engine on return.
//!         if let Ok(access) = buffer.access() {
//!             let _ = tx.send(access.count());
//!         }
//!     },
//!     false,
//! )?;
//!
//! backend.inject(vec![0; 60]);
//! assert_eq!(rx.recv_timeout(Duration::from_secs(5)).ok(), Some(1));
//! receiver.stop()?;
//! # Ok::<(), safer_rawcap::RawcapError>(())
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use safer_rawcap::{Adapter, CaptureConfig, Handle, LoopbackBackend};
//!
//! let adapter = Adapter::new(LoopbackBackend::new("lo"));
//!
//! // Return every packet immediately
//! let handle = Handle::open_with_config(&adapter, CaptureConfig::low_latency())?;
//! assert_eq!(handle.min_packets_to_copy()?, 1);
//!
//! // Large batches, deep queues
//! let bulk = Handle::open_with_config(&adapter, CaptureConfig::high_throughput())?;
//! assert!(bulk.rx_queue_size()? > handle.rx_queue_size()?);
//! # Ok::<(), safer_rawcap::RawcapError>(())
//! ```
//!
//! ## Concurrency Notes
//!
//! [`Buffer`], [`Handle`] and [`Adapter`] are cheap shared handles and may be
//! cloned across threads. Freeing a buffer while another thread still works on
//! it is the caller's responsibility: the second thread sees `Freed`, never
//! freed memory, but its work is lost.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Value types
pub mod error;
pub mod filter;
pub mod packet;
pub mod status;
pub mod timestamp;

// Storage
pub mod buffer;
pub mod pool; // Buffer recycling

// Engine boundary and endpoints
pub mod adapter;
pub mod backend; // Backend trait and the in-memory loopback engine
pub mod handle;

// Pipelines
pub mod receive;
pub mod transmit;

// Ambient
pub mod config;
pub mod logging;

// Re-exports for convenience
pub use adapter::{Adapter, HANDLES_PER_ADAPTER_MAX};
pub use backend::{Backend, Direction, Frame, LoopbackBackend};
pub use buffer::{
    Buffer, BufferAccess, BufferIterator, LockState, Packets, BUFFER_PACKETS_MAX,
    BUFFER_PACKETS_MIN,
};
pub use config::{CaptureConfig, ConfigBuilder, LoggingConfig, ReceiveConfig, TransmitConfig};
pub use error::{RawcapError, Result};
pub use filter::{Filter, FilterType, FILTER_MASK_MAX_LENGTH};
pub use handle::{Handle, ReceiveStats, TransmitStats};
pub use logging::{LogLevel, PipelineMetrics};
pub use packet::{Packet, PacketAccess, PacketMut, PacketRef, PACKET_SIZE_MAX, PACKET_SIZE_MIN};
pub use pool::{BufferPool, PoolStats, PooledBuffer};
pub use receive::{Receiver, ReceiverControl, RX_BUFFERS_PER_HANDLE_MAX};
pub use status::{last_status, Status, StatusBand};
pub use timestamp::{Timestamp, TimestampCapabilities, TimestampMode};
pub use transmit::{Transmitter, TransmitterControl};
