//! Error types for the tappy-ble crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// Operation requires a connection but the Tappy is not connected.
    #[error("Tappy not connected")]
    NotConnected,

    /// Failed to establish the radio-level connection.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
        /// The error reported by the BLE stack.
        #[source]
        source: Option<Box<Error>>,
    },

    /// Service or characteristic discovery failed.
    #[error("Failed to discover characteristics: {reason}")]
    DiscoveryFailed {
        /// Description of what went wrong during discovery.
        reason: String,
        /// The error reported by the BLE stack, if any.
        #[source]
        source: Option<Box<Error>>,
    },

    /// A required characteristic was missing from the discovered set.
    #[error("Missing required characteristic: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// Enabling notifications on the notify characteristic failed.
    #[error("Failed to enable notification")]
    SubscribeFailed {
        /// The error reported by the BLE stack.
        #[source]
        source: Box<Error>,
    },

    /// Writing a chunk to the write characteristic failed.
    ///
    /// Any bytes still queued at that point were discarded.
    #[error("Write failed, {discarded} queued bytes discarded")]
    WriteFailed {
        /// Number of queued bytes dropped along with the failed chunk.
        discarded: usize,
        /// The error reported by the BLE stack.
        #[source]
        source: Box<Error>,
    },

    /// The peripheral dropped the connection on its own.
    #[error("Tappy disconnected")]
    Disconnected,

    /// Asking the peripheral to disconnect failed.
    #[error("Disconnect failed")]
    DisconnectFailed {
        /// The error reported by the BLE stack.
        #[source]
        source: Box<Error>,
    },

    /// Teardown was requested while the connection was still being established.
    #[error("Connection still in the process of being established")]
    StillConnecting,

    /// A phase did not complete before its configured deadline.
    #[error("{phase} timed out")]
    Timeout {
        /// The phase that timed out.
        phase: &'static str,
    },

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error is the peripheral-initiated disconnect report.
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected)
    }

    /// Check if this error came from an expired phase deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
