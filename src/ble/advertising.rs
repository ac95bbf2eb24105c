//! Advertisement identification.
//!
//! Decides whether a scan result belongs to a TappyBLE reader. A Tappy
//! advertises a local name containing `TAPPY` (e.g. `TAPPYBLE-1A2B`); nothing
//! else in the advertisement is needed to recognise it.

use btleplug::api::PeripheralProperties;
use uuid::Uuid;

use crate::ble::uuids::TAPPY_NAME_MARKER;

/// The parts of a BLE advertisement this crate looks at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Advertisement {
    /// Advertised local name, if the advertisement carried one.
    pub local_name: Option<String>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
    /// Advertised service UUIDs.
    pub services: Vec<Uuid>,
}

impl Advertisement {
    /// Create an advertisement carrying only a local name.
    pub fn with_local_name(name: impl Into<String>) -> Self {
        Self {
            local_name: Some(name.into()),
            ..Self::default()
        }
    }
}

impl From<&PeripheralProperties> for Advertisement {
    fn from(properties: &PeripheralProperties) -> Self {
        Self {
            local_name: properties.local_name.clone(),
            rssi: properties.rssi,
            services: properties.services.clone(),
        }
    }
}

/// Predicate over advertisements, matching on a local-name substring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementFilter {
    marker: String,
}

impl Default for AdvertisementFilter {
    fn default() -> Self {
        Self::new(TAPPY_NAME_MARKER)
    }
}

impl AdvertisementFilter {
    /// Create a filter matching names that contain `marker` (case-sensitive).
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    /// The substring this filter looks for.
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Check if an advertisement comes from a compatible peripheral.
    ///
    /// Returns `false` when the advertisement has no local name. Otherwise
    /// the marker may appear anywhere in the name, not only as a prefix.
    pub fn matches(&self, advertisement: &Advertisement) -> bool {
        advertisement
            .local_name
            .as_deref()
            .map(|name| name.contains(self.marker.as_str()))
            .unwrap_or(false)
    }
}

/// Check if an advertisement belongs to a Tappy, using the default marker.
pub fn is_advertisement_for_tappy(advertisement: &Advertisement) -> bool {
    AdvertisementFilter::default().matches(advertisement)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifies_tappy() {
        assert!(is_advertisement_for_tappy(&Advertisement::with_local_name(
            "TAPPY123"
        )));
    }

    #[test]
    fn test_marker_anywhere_in_name() {
        assert!(is_advertisement_for_tappy(&Advertisement::with_local_name(
            "XTAPPYX"
        )));
    }

    #[test]
    fn test_rejects_other_devices() {
        assert!(!is_advertisement_for_tappy(&Advertisement::with_local_name(
            "POWERMETER"
        )));
    }

    #[test]
    fn test_rejects_missing_name() {
        assert!(!is_advertisement_for_tappy(&Advertisement::default()));
    }

    #[test]
    fn test_case_sensitive() {
        assert!(!is_advertisement_for_tappy(&Advertisement::with_local_name(
            "tappy123"
        )));
    }

    #[test]
    fn test_custom_marker() {
        let filter = AdvertisementFilter::new("NFC");
        assert_eq!(filter.marker(), "NFC");
        assert!(filter.matches(&Advertisement::with_local_name("MY-NFC-READER")));
        assert!(!filter.matches(&Advertisement::with_local_name("TAPPY123")));
    }

    #[test]
    fn test_from_properties() {
        let properties = PeripheralProperties {
            local_name: Some("TAPPYBLE".to_string()),
            rssi: Some(-58),
            ..PeripheralProperties::default()
        };

        let advertisement = Advertisement::from(&properties);
        assert_eq!(advertisement.local_name.as_deref(), Some("TAPPYBLE"));
        assert_eq!(advertisement.rssi, Some(-58));
        assert!(is_advertisement_for_tappy(&advertisement));
    }
}
