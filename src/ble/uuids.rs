//! BLE Service and Characteristic UUIDs.
//!
//! Contains all UUID constants used for TappyBLE communication.
//! The characteristics are named from the Tappy's perspective: the host
//! writes to the Tappy's RX characteristic and receives notifications
//! from its TX characteristic.

use uuid::Uuid;

/// TappyBLE serial service UUID.
pub const SERIAL_SERVICE_UUID: Uuid = Uuid::from_u128(0x175f8f23_a570_49bd_9627_815a6a27de2a);

/// Tappy TX characteristic UUID (Notify, data from the Tappy).
pub const TX_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0xcacc07ff_ffff_4c48_8fae_a9ef71b75e26);

/// Tappy RX characteristic UUID (Write, data to the Tappy).
pub const RX_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x1cce1ea8_bd34_4813_a00a_c76e028fadcb);

/// Characteristic the host writes outbound chunks to.
pub const WRITE_CHARACTERISTIC_UUID: Uuid = RX_CHARACTERISTIC_UUID;

/// Characteristic the host subscribes to for inbound data.
pub const NOTIFY_CHARACTERISTIC_UUID: Uuid = TX_CHARACTERISTIC_UUID;

/// Substring a Tappy puts in its advertised local name.
pub const TAPPY_NAME_MARKER: &str = "TAPPY";
