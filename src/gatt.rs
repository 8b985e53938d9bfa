//! Standardized identifiers of the Heart Rate service.

use uuid::Uuid;

pub const HEART_RATE_SERVICE: Uuid = Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb);
pub const HEART_RATE_MEASUREMENT: Uuid = Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);
pub const BODY_SENSOR_LOCATION: Uuid = Uuid::from_u128(0x00002a38_0000_1000_8000_00805f9b34fb);

/// ATT status reported by the transport alongside a characteristic update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AttStatus(pub u8);

impl AttStatus {
    pub const SUCCESS: AttStatus = AttStatus(0);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }
}

/// Value of the Body Sensor Location characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum BodySensorLocation {
    Other,
    Chest,
    Wrist,
    Finger,
    Hand,
    EarLobe,
    Foot,
    Unknown(u8),
}

impl BodySensorLocation {
    pub fn from_bytes(value: &[u8]) -> Option<Self> {
        let location = match *value.first()? {
            0 => BodySensorLocation::Other,
            1 => BodySensorLocation::Chest,
            2 => BodySensorLocation::Wrist,
            3 => BodySensorLocation::Finger,
            4 => BodySensorLocation::Hand,
            5 => BodySensorLocation::EarLobe,
            6 => BodySensorLocation::Foot,
            other => BodySensorLocation::Unknown(other),
        };

        Some(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuids_use_bluetooth_base() {
        assert_eq!(
            HEART_RATE_SERVICE.to_string(),
            "0000180d-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            HEART_RATE_MEASUREMENT.to_string(),
            "00002a37-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn body_sensor_location_values() {
        assert_eq!(BodySensorLocation::from_bytes(&[1]), Some(BodySensorLocation::Chest));
        assert_eq!(BodySensorLocation::from_bytes(&[5, 0xff]), Some(BodySensorLocation::EarLobe));
        assert_eq!(
            BodySensorLocation::from_bytes(&[0x42]),
            Some(BodySensorLocation::Unknown(0x42))
        );
        assert_eq!(BodySensorLocation::from_bytes(&[]), None);
    }

    #[test]
    fn only_zero_status_is_success() {
        assert!(AttStatus::SUCCESS.is_success());
        assert!(!AttStatus(0x0e).is_success());
    }
}
