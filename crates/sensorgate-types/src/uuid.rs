//! Bluetooth UUIDs and GATT constants for the gateway's sensor peripherals.
//!
//! The peripherals are DFRobot Bluno boards exposing a serial-over-BLE
//! service: one characteristic pushes notifications, the other accepts
//! AT-style command writes.

use uuid::{Uuid, uuid};

// --- Bluno Serial Service ---

/// Bluno serial service UUID.
pub const BLUNO_SERVICE: Uuid = uuid!("0000dfb0-0000-1000-8000-00805f9b34fb");

/// Serial data characteristic (notify endpoint).
pub const BLUNO_SERIAL: Uuid = uuid!("0000dfb1-0000-1000-8000-00805f9b34fb");

/// Command characteristic (accepts AT commands such as `AT+PASSWORD=...`).
pub const BLUNO_COMMAND: Uuid = uuid!("0000dfb2-0000-1000-8000-00805f9b34fb");

// --- Standard GATT descriptors ---

/// Client Characteristic Configuration Descriptor (0x2902).
pub const CLIENT_CHARACTERISTIC_CONFIG: Uuid = uuid!("00002902-0000-1000-8000-00805f9b34fb");

/// CCCD value enabling notifications.
pub const CCCD_NOTIFY: [u8; 2] = [0x01, 0x00];

/// CCCD value enabling both indications and notifications.
pub const CCCD_INDICATE_NOTIFY: [u8; 2] = [0x03, 0x00];

/// Number of handles past the characteristic value handle scanned for the CCCD.
pub const CCCD_SCAN_SPAN: u16 = 12;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bluno_uuids() {
        assert_eq!(
            BLUNO_SERIAL.to_string(),
            "0000dfb1-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            BLUNO_COMMAND.to_string(),
            "0000dfb2-0000-1000-8000-00805f9b34fb"
        );
        assert_ne!(BLUNO_SERIAL, BLUNO_COMMAND);
    }

    #[test]
    fn test_cccd_uuid_is_standard_base() {
        let s = CLIENT_CHARACTERISTIC_CONFIG.to_string();
        assert!(s.starts_with("00002902"));
        assert!(s.ends_with("-0000-1000-8000-00805f9b34fb"));
    }

    #[test]
    fn test_cccd_values_little_endian() {
        assert_eq!(u16::from_le_bytes(CCCD_NOTIFY), 0x0001);
        assert_eq!(u16::from_le_bytes(CCCD_INDICATE_NOTIFY), 0x0003);
    }
}
