//! The BLE stack as seen by the transport.
//!
//! [`BlePeripheral`] is everything the session needs from a BLE backend.
//! [`BtleplugPeripheral`] implements it on top of btleplug.

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Characteristic, Peripheral as _};
use btleplug::platform::{Adapter, Peripheral};
use futures::future;
use futures::stream::{Stream, StreamExt};
use parking_lot::RwLock;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::ble::characteristics::{CharacteristicRef, NotificationEvent};
use crate::config::WriteMode;
use crate::error::{Error, Result};

/// Stream of notification payloads from a peripheral.
pub type NotificationStream = Pin<Box<dyn Stream<Item = NotificationEvent> + Send>>;

/// Stream that yields once for every peripheral-initiated disconnect.
pub type DisconnectStream = Pin<Box<dyn Stream<Item = ()> + Send>>;

/// Operations the transport needs from the underlying BLE stack.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlePeripheral: Send + Sync {
    /// Identifier used in log output.
    fn id(&self) -> String;

    /// Establish the radio-level connection.
    async fn connect(&self) -> Result<()>;

    /// Tear down the radio-level connection.
    async fn disconnect(&self) -> Result<()>;

    /// Discover `characteristics` within `service`.
    ///
    /// Returns the subset that was found; missing ones are simply absent.
    async fn discover(
        &self,
        service: Uuid,
        characteristics: &[Uuid],
    ) -> Result<Vec<CharacteristicRef>>;

    /// Enable notifications on a characteristic.
    async fn subscribe(&self, characteristic: &CharacteristicRef) -> Result<()>;

    /// Write one payload to a characteristic.
    async fn write(
        &self,
        characteristic: &CharacteristicRef,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<()>;

    /// Stream of notifications from every subscribed characteristic.
    async fn notifications(&self) -> Result<NotificationStream>;

    /// Stream of disconnects the peripheral initiates.
    async fn disconnections(&self) -> Result<DisconnectStream>;
}

/// [`BlePeripheral`] backed by a btleplug peripheral.
pub struct BtleplugPeripheral {
    /// Adapter the peripheral was found on; source of disconnect events.
    adapter: Adapter,
    /// The peripheral to communicate with.
    peripheral: Peripheral,
    /// Characteristics found by the last discovery, by UUID.
    characteristics: RwLock<HashMap<Uuid, Characteristic>>,
}

impl BtleplugPeripheral {
    /// Wrap a peripheral discovered on `adapter`.
    pub fn new(adapter: Adapter, peripheral: Peripheral) -> Self {
        Self {
            adapter,
            peripheral,
            characteristics: RwLock::new(HashMap::new()),
        }
    }

    /// Get the underlying btleplug peripheral.
    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }

    fn characteristic(&self, uuid: &Uuid) -> Result<Characteristic> {
        self.characteristics
            .read()
            .get(uuid)
            .cloned()
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })
    }
}

#[async_trait]
impl BlePeripheral for BtleplugPeripheral {
    fn id(&self) -> String {
        self.peripheral.id().to_string()
    }

    async fn connect(&self) -> Result<()> {
        self.peripheral.connect().await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }

    async fn discover(
        &self,
        service: Uuid,
        characteristics: &[Uuid],
    ) -> Result<Vec<CharacteristicRef>> {
        self.peripheral.discover_services().await?;

        let mut found = Vec::new();
        let mut cache = self.characteristics.write();
        cache.clear();

        for discovered in self.peripheral.services() {
            if discovered.uuid != service {
                continue;
            }

            for characteristic in discovered.characteristics {
                if !characteristics.contains(&characteristic.uuid) {
                    continue;
                }

                debug!(
                    "Found characteristic {}, properties: {:?}",
                    characteristic.uuid, characteristic.properties
                );
                found.push(CharacteristicRef::new(characteristic.uuid, discovered.uuid));
                cache.insert(characteristic.uuid, characteristic);
            }
        }

        debug!("Discovered {} characteristics", found.len());

        Ok(found)
    }

    async fn subscribe(&self, characteristic: &CharacteristicRef) -> Result<()> {
        let target = self.characteristic(&characteristic.uuid)?;
        self.peripheral.subscribe(&target).await?;

        debug!(
            "Subscribed to notifications from {}",
            characteristic.uuid
        );

        Ok(())
    }

    async fn write(
        &self,
        characteristic: &CharacteristicRef,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<()> {
        let target = self.characteristic(&characteristic.uuid)?;
        self.peripheral.write(&target, data, mode.into()).await?;

        trace!(
            "Wrote {} bytes to characteristic {}",
            data.len(),
            characteristic.uuid
        );

        Ok(())
    }

    async fn notifications(&self) -> Result<NotificationStream> {
        let notifications = self.peripheral.notifications().await?;

        Ok(Box::pin(notifications.map(|notification| {
            NotificationEvent {
                characteristic_uuid: notification.uuid,
                data: notification.value,
            }
        })))
    }

    async fn disconnections(&self) -> Result<DisconnectStream> {
        let events = self.adapter.events().await?;
        let id = self.peripheral.id();

        Ok(Box::pin(events.filter_map(move |event| {
            future::ready(match event {
                CentralEvent::DeviceDisconnected(disconnected) if disconnected == id => Some(()),
                _ => None,
            })
        })))
    }
}

impl std::fmt::Debug for BtleplugPeripheral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleplugPeripheral")
            .field("id", &self.peripheral.id())
            .field("characteristics", &self.characteristics.read().len())
            .finish()
    }
}
