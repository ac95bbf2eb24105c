//! GATT characteristic references.
//!
//! Discovery hands back opaque references tagged by UUID; this module picks
//! out the write and notify characteristics from that set.

use tracing::debug;
use uuid::Uuid;

use crate::ble::uuids::{NOTIFY_CHARACTERISTIC_UUID, WRITE_CHARACTERISTIC_UUID};
use crate::error::{Error, Result};

/// Role a characteristic plays in the serial link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CharacteristicRole {
    /// Outbound data is written here.
    Write,
    /// Inbound data arrives here as notifications.
    Notify,
}

impl CharacteristicRole {
    /// The fixed UUID of the characteristic with this role.
    pub fn uuid(&self) -> Uuid {
        match self {
            Self::Write => WRITE_CHARACTERISTIC_UUID,
            Self::Notify => NOTIFY_CHARACTERISTIC_UUID,
        }
    }

    /// Identify the role of a characteristic UUID, if it has one.
    pub fn from_uuid(uuid: &Uuid) -> Option<Self> {
        if *uuid == WRITE_CHARACTERISTIC_UUID {
            Some(Self::Write)
        } else if *uuid == NOTIFY_CHARACTERISTIC_UUID {
            Some(Self::Notify)
        } else {
            None
        }
    }
}

/// Handle to a discovered GATT characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicRef {
    /// UUID of the characteristic.
    pub uuid: Uuid,
    /// UUID of the service it belongs to.
    pub service_uuid: Uuid,
}

impl CharacteristicRef {
    /// Create a reference to a characteristic within a service.
    pub fn new(uuid: Uuid, service_uuid: Uuid) -> Self {
        Self { uuid, service_uuid }
    }

    /// The role of this characteristic, if it is one of the serial pair.
    pub fn role(&self) -> Option<CharacteristicRole> {
        CharacteristicRole::from_uuid(&self.uuid)
    }
}

/// The write and notify characteristics of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicPair {
    /// Characteristic outbound chunks are written to.
    pub write: CharacteristicRef,
    /// Characteristic inbound notifications come from.
    pub notify: CharacteristicRef,
}

impl CharacteristicPair {
    /// Pick the write and notify characteristics out of a discovery result.
    ///
    /// Fails with [`Error::DiscoveryFailed`] when fewer than two
    /// characteristics were discovered and with
    /// [`Error::CharacteristicNotFound`] when either role is missing.
    pub fn resolve(discovered: &[CharacteristicRef]) -> Result<Self> {
        if discovered.len() < 2 {
            return Err(Error::DiscoveryFailed {
                reason: format!("expected 2 characteristics, found {}", discovered.len()),
                source: None,
            });
        }

        let mut write = None;
        let mut notify = None;

        for characteristic in discovered {
            debug!(
                "Found characteristic: {} in service {}",
                characteristic.uuid, characteristic.service_uuid
            );
            match characteristic.role() {
                Some(CharacteristicRole::Write) => write = Some(*characteristic),
                Some(CharacteristicRole::Notify) => notify = Some(*characteristic),
                None => {}
            }
        }

        let write = write.ok_or_else(|| Error::CharacteristicNotFound {
            uuid: WRITE_CHARACTERISTIC_UUID.to_string(),
        })?;
        let notify = notify.ok_or_else(|| Error::CharacteristicNotFound {
            uuid: NOTIFY_CHARACTERISTIC_UUID.to_string(),
        })?;

        Ok(Self { write, notify })
    }
}

/// Notification event from a characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    /// UUID of the characteristic that sent the notification.
    pub characteristic_uuid: Uuid,
    /// The notification data.
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::SERIAL_SERVICE_UUID;

    fn serial(uuid: Uuid) -> CharacteristicRef {
        CharacteristicRef::new(uuid, SERIAL_SERVICE_UUID)
    }

    #[test]
    fn test_role_from_uuid() {
        assert_eq!(
            CharacteristicRole::from_uuid(&WRITE_CHARACTERISTIC_UUID),
            Some(CharacteristicRole::Write)
        );
        assert_eq!(
            CharacteristicRole::from_uuid(&NOTIFY_CHARACTERISTIC_UUID),
            Some(CharacteristicRole::Notify)
        );
        assert_eq!(CharacteristicRole::from_uuid(&SERIAL_SERVICE_UUID), None);
        assert_eq!(CharacteristicRole::Write.uuid(), WRITE_CHARACTERISTIC_UUID);
    }

    #[test]
    fn test_resolve_in_any_order() {
        let pair = CharacteristicPair::resolve(&[
            serial(NOTIFY_CHARACTERISTIC_UUID),
            serial(WRITE_CHARACTERISTIC_UUID),
        ])
        .unwrap();

        assert_eq!(pair.write.uuid, WRITE_CHARACTERISTIC_UUID);
        assert_eq!(pair.notify.uuid, NOTIFY_CHARACTERISTIC_UUID);
    }

    #[test]
    fn test_resolve_too_few() {
        let err = CharacteristicPair::resolve(&[serial(WRITE_CHARACTERISTIC_UUID)]).unwrap_err();
        assert!(matches!(err, Error::DiscoveryFailed { .. }));
    }

    #[test]
    fn test_resolve_missing_role() {
        let err = CharacteristicPair::resolve(&[
            serial(WRITE_CHARACTERISTIC_UUID),
            serial(Uuid::from_u128(0x2a00)),
        ])
        .unwrap_err();

        match err {
            Error::CharacteristicNotFound { uuid } => {
                assert_eq!(uuid, NOTIFY_CHARACTERISTIC_UUID.to_string())
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_notification_event_clone() {
        let event = NotificationEvent {
            characteristic_uuid: NOTIFY_CHARACTERISTIC_UUID,
            data: vec![1, 2, 3],
        };
        let cloned = event.clone();
        assert_eq!(event.characteristic_uuid, cloned.characteristic_uuid);
        assert_eq!(event.data, cloned.data);
    }
}
