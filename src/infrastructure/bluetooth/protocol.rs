//! GATT Protocol Constants
//!
//! Descriptor payloads, status codes and identifier helpers shared by the
//! serializer, the correlator and platform implementations.

use crate::domain::models::NotifyMode;

/// Client Characteristic Configuration Descriptor (0x2902)
pub const CCCD_UUID: &str = "00002902-0000-1000-8000-00805f9b34fb";

pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];
pub const ENABLE_INDICATION_VALUE: [u8; 2] = [0x02, 0x00];
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

/// GATT status codes as reported in completion callbacks
pub type GattStatus = i32;

pub const GATT_SUCCESS: GattStatus = 0;
pub const GATT_WRITE_NOT_PERMITTED: GattStatus = 0x03;
pub const GATT_ERROR: GattStatus = 133;
pub const GATT_FAILURE: GattStatus = 0x101;

/// Default ATT MTU before any exchange
pub const DEFAULT_ATT_MTU: u16 = 23;
/// Largest ATT MTU a peer may negotiate
pub const MAX_ATT_MTU: u16 = 517;

/// CCCD payload written for a notification mode.
pub fn descriptor_value(mode: NotifyMode) -> [u8; 2] {
    match mode {
        NotifyMode::Notification => ENABLE_NOTIFICATION_VALUE,
        NotifyMode::Indication => ENABLE_INDICATION_VALUE,
        NotifyMode::Disable => DISABLE_NOTIFICATION_VALUE,
    }
}

/// Suffix of the Bluetooth base UUID; 16-bit ids expand to `0000xxxx` + suffix.
const BASE_UUID_SUFFIX: &str = "-0000-1000-8000-00805f9b34fb";

/// Canonical form used to compare service, characteristic and descriptor ids.
///
/// Lowercases, and expands 16-bit short ids (`"180D"`) to the full 128-bit form.
pub fn normalize_uuid(uuid: &str) -> String {
    let uuid = uuid.trim().to_ascii_lowercase();
    if uuid.len() == 4 && uuid.chars().all(|c| c.is_ascii_hexdigit()) {
        format!("0000{}{}", uuid, BASE_UUID_SUFFIX)
    } else {
        uuid
    }
}

pub fn uuid_eq(a: &str, b: &str) -> bool {
    normalize_uuid(a) == normalize_uuid(b)
}

pub fn is_cccd(descriptor_uuid: &str) -> bool {
    uuid_eq(descriptor_uuid, CCCD_UUID)
}

/// Encode the first manufacturer-specific data entry of an advertisement
///
/// ```text
/// [0-1] : Company identifier (u16 little-endian)
/// [2..] : Manufacturer payload
/// ```
///
/// Advertisements without manufacturer data produce an empty head.
pub fn manufacturer_data_head(manufacturer_data: Option<(u16, &[u8])>) -> Vec<u8> {
    match manufacturer_data {
        Some((company_id, payload)) => {
            let mut head = Vec::with_capacity(2 + payload.len());
            head.extend_from_slice(&company_id.to_le_bytes());
            head.extend_from_slice(payload);
            head
        }
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_values() {
        assert_eq!(descriptor_value(NotifyMode::Notification), [0x01, 0x00]);
        assert_eq!(descriptor_value(NotifyMode::Indication), [0x02, 0x00]);
        assert_eq!(descriptor_value(NotifyMode::Disable), [0x00, 0x00]);
    }

    #[test]
    fn test_cccd_match_ignores_case() {
        assert!(is_cccd("00002902-0000-1000-8000-00805F9B34FB"));
        assert!(!is_cccd("00002901-0000-1000-8000-00805f9b34fb"));
    }

    #[test]
    fn test_manufacturer_data_head() {
        let head = manufacturer_data_head(Some((0x004C, &[0x02, 0x15][..])));
        assert_eq!(head, vec![0x4C, 0x00, 0x02, 0x15]);
        assert!(manufacturer_data_head(None).is_empty());
    }

    #[test]
    fn test_normalize_uuid() {
        assert_eq!(
            normalize_uuid(" 180D "),
            "0000180d-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(normalize_uuid("not-a-uuid"), "not-a-uuid");
        assert!(uuid_eq("2A37", "2a37"));
        assert!(uuid_eq("2a37", "00002A37-0000-1000-8000-00805F9B34FB"));
        assert!(is_cccd("2902"));
    }
}
