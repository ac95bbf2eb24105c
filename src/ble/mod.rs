//! BLE communication module.
//!
//! This module provides the Bluetooth Low Energy side of the transport:
//! recognising TappyBLE readers, the serial service layout, the connection
//! state machine and the backend abstraction over btleplug.

pub mod advertising;
pub mod characteristics;
pub mod connection;
pub mod peripheral;
pub mod scanner;
pub mod uuids;

pub use advertising::{is_advertisement_for_tappy, Advertisement, AdvertisementFilter};
pub use characteristics::{CharacteristicPair, CharacteristicRef, CharacteristicRole, NotificationEvent};
pub use connection::{ConnectOutcome, ConnectionEvent, ConnectionMachine, ConnectionState};
pub use peripheral::{BlePeripheral, BtleplugPeripheral, DisconnectStream, NotificationStream};
pub use scanner::{TappyDiscoveryEvent, TappyScanner};
pub use uuids::*;
