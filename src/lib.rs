// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # tappy-ble
//!
//! A Rust transport for TapTrack's TappyBLE NFC readers over Bluetooth Low
//! Energy.
//!
//! The Tappy exposes a serial-style GATT service: the host writes bytes to
//! one characteristic and receives bytes as notifications from another. This
//! crate turns that into a plain byte-stream session. It does not know about
//! the Tappy command protocol layered on top.
//!
//! ## Features
//!
//! - **Discovery**: Recognise Tappy readers by their advertised name
//! - **Session lifecycle**: Connect, discover, subscribe and disconnect with
//!   guarded, race-free state transitions
//! - **Chunked sends**: Outbound data is split into characteristic-sized
//!   writes, one in flight at a time, in exact order
//! - **Callbacks**: Inbound data and asynchronous errors delivered to
//!   application callbacks
//! - **Testable backend**: All BLE access goes through the [`BlePeripheral`]
//!   trait
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tappy_ble::{Communicator, Result, TappyScanner};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let scanner = TappyScanner::new().await?;
//!     let mut discoveries = scanner.subscribe();
//!     scanner.start_scanning().await?;
//!
//!     // Take the first Tappy that shows up
//!     let Ok(found) = discoveries.recv().await else {
//!         return Ok(());
//!     };
//!     scanner.stop_scanning().await?;
//!
//!     let comm = Communicator::new(Arc::new(scanner.peripheral(&found)));
//!     comm.set_data_callback(|data| println!("Received {:02X?}", data));
//!     comm.set_error_callback(|e| eprintln!("Tappy error: {}", e));
//!
//!     comm.connect().await?;
//!     comm.send(&[0x00, 0x01, 0x02]).await?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(2)).await;
//!     comm.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod callbacks;
pub mod communicator;
pub mod config;
pub mod error;
pub mod transfer;

// Re-exports for convenience
pub use callbacks::{CallbackHandle, DataCallback, ErrorCallback};
pub use communicator::Communicator;
pub use config::{CommunicatorConfig, PhaseTimeouts, WriteMode, DEFAULT_PACKET_SIZE};
pub use error::{Error, Result};

// Re-export commonly used types from submodules
pub use ble::advertising::{is_advertisement_for_tappy, Advertisement, AdvertisementFilter};
pub use ble::characteristics::{CharacteristicRef, NotificationEvent};
pub use ble::connection::{ConnectOutcome, ConnectionEvent, ConnectionState};
pub use ble::peripheral::{BlePeripheral, BtleplugPeripheral, DisconnectStream, NotificationStream};
pub use ble::scanner::{TappyDiscoveryEvent, TappyScanner};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        // Verify that key types are exported
        let _ = std::any::TypeId::of::<Communicator>();
        let _ = std::any::TypeId::of::<TappyScanner>();
        let _ = std::any::TypeId::of::<Error>();
        let _ = std::any::TypeId::of::<CommunicatorConfig>();
        let _ = std::any::TypeId::of::<ConnectionState>();
        let _ = std::any::TypeId::of::<Advertisement>();
    }

    #[test]
    fn test_tappy_predicate() {
        assert!(is_advertisement_for_tappy(&Advertisement::with_local_name("TAPPYBLE")));
        assert!(!is_advertisement_for_tappy(&Advertisement::default()));
        assert_eq!(DEFAULT_PACKET_SIZE, 20);
    }
}
