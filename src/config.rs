//! Communicator configuration.

use std::time::Duration;

use crate::ble::advertising::AdvertisementFilter;
use crate::ble::uuids::TAPPY_NAME_MARKER;
use crate::error::{Error, Result};

/// Default chunk size in bytes, the payload of a BLE 4.0 characteristic write.
pub const DEFAULT_PACKET_SIZE: usize = 20;

/// How chunks are written to the write characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WriteMode {
    /// Wait for the peripheral to acknowledge each write.
    #[default]
    WithResponse,
    /// Fire-and-forget writes.
    WithoutResponse,
}

impl From<WriteMode> for btleplug::api::WriteType {
    fn from(mode: WriteMode) -> Self {
        match mode {
            WriteMode::WithResponse => Self::WithResponse,
            WriteMode::WithoutResponse => Self::WithoutResponse,
        }
    }
}

/// Optional deadlines for each suspension point.
///
/// `None` means wait indefinitely, which is the default for every phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhaseTimeouts {
    /// Radio-level connect.
    pub connect: Option<Duration>,
    /// Service and characteristic discovery.
    pub discovery: Option<Duration>,
    /// Enabling notifications.
    pub subscribe: Option<Duration>,
    /// A single chunk write.
    pub write: Option<Duration>,
    /// Radio-level disconnect.
    pub disconnect: Option<Duration>,
}

impl PhaseTimeouts {
    /// Apply the same deadline to every phase.
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            connect: Some(timeout),
            discovery: Some(timeout),
            subscribe: Some(timeout),
            write: Some(timeout),
            disconnect: Some(timeout),
        }
    }
}

/// Configuration for a [`Communicator`](crate::Communicator).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CommunicatorConfig {
    /// Maximum number of bytes per characteristic write.
    pub packet_size: usize,
    /// Write type used for every chunk.
    pub write_mode: WriteMode,
    /// Substring identifying compatible peripherals in scan results.
    pub name_marker: String,
    /// Per-phase deadlines.
    pub timeouts: PhaseTimeouts,
}

impl Default for CommunicatorConfig {
    fn default() -> Self {
        Self {
            packet_size: DEFAULT_PACKET_SIZE,
            write_mode: WriteMode::default(),
            name_marker: TAPPY_NAME_MARKER.to_string(),
            timeouts: PhaseTimeouts::default(),
        }
    }
}

impl CommunicatorConfig {
    /// Create a new configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the chunk size.
    pub fn with_packet_size(mut self, size: usize) -> Self {
        self.packet_size = size;
        self
    }

    /// Set the write type.
    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    /// Set the advertised-name marker.
    pub fn with_name_marker(mut self, marker: impl Into<String>) -> Self {
        self.name_marker = marker.into();
        self
    }

    /// Set the per-phase deadlines.
    pub fn with_timeouts(mut self, timeouts: PhaseTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Scan filter matching the configured name marker.
    pub fn advertisement_filter(&self) -> AdvertisementFilter {
        AdvertisementFilter::new(self.name_marker.clone())
    }

    /// Check the configuration for values the transport cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.packet_size == 0 {
            return Err(Error::InvalidParameter {
                name: "packet_size".to_string(),
                value: self.packet_size.to_string(),
            });
        }

        if self.name_marker.is_empty() {
            return Err(Error::InvalidParameter {
                name: "name_marker".to_string(),
                value: String::new(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CommunicatorConfig::default();
        assert_eq!(config.packet_size, 20);
        assert_eq!(config.write_mode, WriteMode::WithResponse);
        assert_eq!(config.name_marker, "TAPPY");
        assert_eq!(config.timeouts, PhaseTimeouts::default());
        assert!(config.timeouts.connect.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = CommunicatorConfig::new()
            .with_packet_size(17)
            .with_write_mode(WriteMode::WithoutResponse)
            .with_name_marker("READER")
            .with_timeouts(PhaseTimeouts::uniform(Duration::from_secs(3)));

        assert_eq!(config.packet_size, 17);
        assert_eq!(config.write_mode, WriteMode::WithoutResponse);
        assert_eq!(config.name_marker, "READER");
        assert_eq!(config.advertisement_filter().marker(), "READER");
        assert_eq!(config.timeouts.write, Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_zero_packet_size_rejected() {
        let err = CommunicatorConfig::new()
            .with_packet_size(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { ref name, .. } if name == "packet_size"));
    }

    #[test]
    fn test_empty_marker_rejected() {
        assert!(CommunicatorConfig::new()
            .with_name_marker("")
            .validate()
            .is_err());
    }

    #[test]
    fn test_write_mode_conversion() {
        use btleplug::api::WriteType;

        assert!(matches!(
            WriteType::from(WriteMode::WithResponse),
            WriteType::WithResponse
        ));
        assert!(matches!(
            WriteType::from(WriteMode::WithoutResponse),
            WriteType::WithoutResponse
        ));
    }
}
