//! Configuration options for different capture use cases.
//!
//! A [`CaptureConfig`] carries everything a [`Handle`](crate::Handle) is
//! opened with. The same ranges are enforced by [`CaptureConfig::validate`]
//! and by the individual setters on the handle, so a configuration that
//! validates can always be applied.

use std::time::Duration;

use crate::backend::Direction;
use crate::buffer::BUFFER_PACKETS_MAX;
use crate::error::{RawcapError, Result};
use crate::logging::LogLevel;
use crate::timestamp::TimestampMode;

/// Default receive timeout.
pub const RX_TIMEOUT_DEFAULT: Duration = Duration::from_millis(10);
/// Longest receive timeout.
pub const RX_TIMEOUT_MAX: Duration = Duration::from_millis(5000);
/// Default engine receive queue depth in frames.
pub const RX_QUEUE_SIZE_DEFAULT: u32 = 4096;
/// Deepest engine receive queue in frames.
pub const RX_QUEUE_SIZE_MAX: u32 = 40_000;
/// Default engine transmit queue depth in frames.
pub const TX_QUEUE_SIZE_DEFAULT: u32 = 512;
/// Shallowest engine transmit queue in frames.
pub const TX_QUEUE_SIZE_MIN: u32 = 256;
/// Deepest engine transmit queue in frames.
pub const TX_QUEUE_SIZE_MAX: u32 = 4096;

/// Complete configuration of a capture handle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureConfig {
    /// Receive side settings
    pub receive: ReceiveConfig,
    /// Transmit side settings
    pub transmit: TransmitConfig,
    /// Logging and metrics
    pub logging: LoggingConfig,
}

/// Receive side settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiveConfig {
    /// Which traffic is captured
    pub direction: Direction,
    /// Packets to collect before a fill cycle may complete (0 = no threshold)
    pub min_packets_to_copy: u32,
    /// Fill cycle and single-shot receive timeout (0 = no timeout)
    pub timeout: Duration,
    /// Engine receive queue depth; 0 drops every matched frame
    pub queue_size: u32,
    /// Keep 802.1Q tags on captured frames
    pub vlan_tagging: bool,
    /// Ask the adapter for promiscuous mode
    pub promiscuous: bool,
    /// Clock used to stamp captured packets
    pub timestamp_mode: TimestampMode,
}

/// Transmit side settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TransmitConfig {
    /// Engine transmit queue depth
    pub queue_size: u32,
    /// Clock used to stamp sent packets
    pub timestamp_mode: TimestampMode,
}

/// Logging and metrics configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Install a logger through [`logging::init`](crate::logging::init)
    pub enabled: bool,
    /// Minimum log level
    pub level: LogLevel,
    /// Record per-operation timings on each handle
    pub metrics: bool,
}

impl Default for ReceiveConfig {
    fn default() -> Self {
        Self {
            direction: Direction::Both,
            min_packets_to_copy: 0,
            timeout: RX_TIMEOUT_DEFAULT,
            queue_size: RX_QUEUE_SIZE_DEFAULT,
            vlan_tagging: false,
            promiscuous: false,
            timestamp_mode: TimestampMode::SystemLowPrec,
        }
    }
}

impl Default for TransmitConfig {
    fn default() -> Self {
        Self {
            queue_size: TX_QUEUE_SIZE_DEFAULT,
            timestamp_mode: TimestampMode::None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            level: LogLevel::Info,
            metrics: false,
        }
    }
}

impl CaptureConfig {
    /// Configuration that hands packets to the application as soon as any
    /// arrive.
    pub fn low_latency() -> Self {
        Self {
            receive: ReceiveConfig {
                min_packets_to_copy: 1,
                timeout: Duration::from_millis(1),
                timestamp_mode: TimestampMode::SystemHighPrec,
                ..ReceiveConfig::default()
            },
            transmit: TransmitConfig {
                queue_size: TX_QUEUE_SIZE_MIN,
                timestamp_mode: TimestampMode::SystemHighPrec,
            },
            logging: LoggingConfig {
                enabled: false,
                level: LogLevel::Error,
                metrics: false,
            },
        }
    }

    /// Configuration that lets buffers fill up before each callback.
    pub fn high_throughput() -> Self {
        Self {
            receive: ReceiveConfig {
                min_packets_to_copy: 256,
                timeout: Duration::from_millis(100),
                queue_size: RX_QUEUE_SIZE_MAX,
                ..ReceiveConfig::default()
            },
            transmit: TransmitConfig {
                queue_size: TX_QUEUE_SIZE_MAX,
                timestamp_mode: TimestampMode::None,
            },
            logging: LoggingConfig {
                enabled: false,
                level: LogLevel::Warn,
                metrics: false,
            },
        }
    }

    /// Configuration with verbose logging and metrics.
    pub fn development() -> Self {
        Self {
            receive: ReceiveConfig::default(),
            transmit: TransmitConfig {
                timestamp_mode: TimestampMode::SystemLowPrec,
                ..TransmitConfig::default()
            },
            logging: LoggingConfig {
                enabled: true,
                level: LogLevel::Debug,
                metrics: true,
            },
        }
    }

    /// Check every value against its permitted range.
    ///
    /// # Errors
    ///
    /// Returns [`RawcapError::OutOfRange`] naming the first offending value.
    pub fn validate(&self) -> Result<()> {
        check_min_packets(self.receive.min_packets_to_copy)?;
        check_rx_timeout(self.receive.timeout)?;
        check_rx_queue_size(self.receive.queue_size)?;
        check_tx_queue_size(self.transmit.queue_size)?;
        Ok(())
    }
}

pub(crate) fn check_min_packets(value: u32) -> Result<()> {
    if value > BUFFER_PACKETS_MAX {
        return Err(RawcapError::out_of_range(
            "min packets to copy",
            u64::from(value),
            0,
            u64::from(BUFFER_PACKETS_MAX),
        ));
    }
    Ok(())
}

pub(crate) fn check_rx_timeout(value: Duration) -> Result<()> {
    if value > RX_TIMEOUT_MAX {
        return Err(RawcapError::out_of_range(
            "receive timeout (ms)",
            value.as_millis() as u64,
            0,
            RX_TIMEOUT_MAX.as_millis() as u64,
        ));
    }
    Ok(())
}

pub(crate) fn check_rx_queue_size(value: u32) -> Result<()> {
    if value > RX_QUEUE_SIZE_MAX {
        return Err(RawcapError::out_of_range(
            "receive queue size",
            u64::from(value),
            0,
            u64::from(RX_QUEUE_SIZE_MAX),
        ));
    }
    Ok(())
}

pub(crate) fn check_tx_queue_size(value: u32) -> Result<()> {
    if !(TX_QUEUE_SIZE_MIN..=TX_QUEUE_SIZE_MAX).contains(&value) {
        return Err(RawcapError::out_of_range(
            "transmit queue size",
            u64::from(value),
            u64::from(TX_QUEUE_SIZE_MIN),
            u64::from(TX_QUEUE_SIZE_MAX),
        ));
    }
    Ok(())
}

/// Configuration builder for fluent configuration creation.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: CaptureConfig,
}

impl ConfigBuilder {
    /// Start from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set receive configuration.
    pub fn receive(mut self, receive: ReceiveConfig) -> Self {
        self.config.receive = receive;
        self
    }

    /// Set transmit configuration.
    pub fn transmit(mut self, transmit: TransmitConfig) -> Self {
        self.config.transmit = transmit;
        self
    }

    /// Set logging configuration.
    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.config.logging = logging;
        self
    }

    /// Set the receive timeout.
    pub fn rx_timeout(mut self, timeout: Duration) -> Self {
        self.config.receive.timeout = timeout;
        self
    }

    /// Set the receive packet threshold.
    pub fn min_packets_to_copy(mut self, min_packets: u32) -> Self {
        self.config.receive.min_packets_to_copy = min_packets;
        self
    }

    /// Set the receive direction.
    pub fn direction(mut self, direction: Direction) -> Self {
        self.config.receive.direction = direction;
        self
    }

    /// Validate and build the final configuration.
    pub fn build(self) -> Result<CaptureConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = CaptureConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.receive.direction, Direction::Both);
        assert_eq!(config.receive.timeout, Duration::from_millis(10));
        assert_eq!(config.receive.queue_size, 4096);
        assert_eq!(config.transmit.queue_size, 512);
        assert_eq!(config.receive.timestamp_mode, TimestampMode::SystemLowPrec);
        assert_eq!(config.transmit.timestamp_mode, TimestampMode::None);
        assert!(!config.receive.vlan_tagging);
    }

    #[test]
    fn presets_validate() {
        let low = CaptureConfig::low_latency();
        assert!(low.validate().is_ok());
        assert_eq!(low.receive.min_packets_to_copy, 1);

        let high = CaptureConfig::high_throughput();
        assert!(high.validate().is_ok());
        assert_eq!(high.receive.queue_size, RX_QUEUE_SIZE_MAX);

        let dev = CaptureConfig::development();
        assert!(dev.validate().is_ok());
        assert!(dev.logging.enabled);
        assert!(dev.logging.metrics);
        assert_eq!(dev.logging.level, LogLevel::Debug);
    }

    #[test]
    fn validation_rejects_out_of_range() {
        let mut config = CaptureConfig::default();
        config.receive.timeout = Duration::from_millis(5001);
        assert!(matches!(
            config.validate(),
            Err(RawcapError::OutOfRange { .. })
        ));

        let mut config = CaptureConfig::default();
        config.receive.queue_size = RX_QUEUE_SIZE_MAX + 1;
        assert!(config.validate().is_err());

        let mut config = CaptureConfig::default();
        config.transmit.queue_size = TX_QUEUE_SIZE_MIN - 1;
        assert!(config.validate().is_err());

        let mut config = CaptureConfig::default();
        config.receive.min_packets_to_copy = BUFFER_PACKETS_MAX + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_queue_and_timeout_are_valid() {
        let mut config = CaptureConfig::default();
        config.receive.queue_size = 0;
        config.receive.timeout = Duration::ZERO;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder() {
        let config = ConfigBuilder::new()
            .rx_timeout(Duration::from_millis(50))
            .min_packets_to_copy(8)
            .direction(Direction::In)
            .transmit(TransmitConfig {
                queue_size: 1024,
                ..Default::default()
            })
            .build()
            .unwrap();

        assert_eq!(config.receive.timeout, Duration::from_millis(50));
        assert_eq!(config.receive.min_packets_to_copy, 8);
        assert_eq!(config.receive.direction, Direction::In);
        assert_eq!(config.transmit.queue_size, 1024);

        assert!(ConfigBuilder::new()
            .rx_timeout(Duration::from_secs(6))
            .build()
            .is_err());
    }
}
