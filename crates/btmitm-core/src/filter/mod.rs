// Btmitm Spoofing Filter
// Relabels generic HID controllers as first-party hardware
//
// The filter only ever touches a caller's copy of the payload, never the
// stored original.

mod device_class;
mod names;

pub use device_class::{
    is_controller, CANONICAL_CONTROLLER_CLASS, COD_MAJOR_PERIPHERAL, COD_MINOR_GAMEPAD,
    COD_MINOR_JOYSTICK,
};
pub use names::{is_native_controller_name, CANONICAL_CONTROLLER_NAME, NATIVE_CONTROLLER_NAMES};

use crate::event::record::{DEVICE_FOUND_LAYOUT, PIN_REQUEST_LAYOUT, SSP_REQUEST_LAYOUT};
use crate::event::{BluetoothName, DeviceClass, EventType, IdentityLayout};

/// What the filter did to a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    /// Payload left as-is
    Unchanged,
    /// Name and class were rewritten
    Spoofed,
}

/// Check if a device should be relabelled.
///
/// True for a generic controller class reported under a non-native name.
pub fn should_spoof(name: &BluetoothName, class: DeviceClass) -> bool {
    is_controller(class) && !is_native_controller_name(name)
}

/// Rewrite the identity fields at `layout` if the device qualifies
pub fn spoof_identity(layout: &IdentityLayout, bytes: &mut [u8]) -> FilterOutcome {
    if bytes.len() < layout.size {
        log::warn!(
            "Skipping spoof: payload has {} bytes, record needs {}",
            bytes.len(),
            layout.size
        );
        return FilterOutcome::Unchanged;
    }

    let name = layout.name(bytes);
    let class = layout.class(bytes);
    if !should_spoof(&name, class) {
        return FilterOutcome::Unchanged;
    }

    log::debug!(
        "Spoofing controller {:?} (cod {}) as {:?}",
        name.to_string_lossy(),
        class,
        CANONICAL_CONTROLLER_NAME
    );
    layout.write_name(bytes, &BluetoothName::new(CANONICAL_CONTROLLER_NAME));
    layout.write_class(bytes, CANONICAL_CONTROLLER_CLASS);
    FilterOutcome::Spoofed
}

/// Rewrites the device-found record's own class field at 0x10F.
///
/// The reserved bytes at 0xFF (where a pin record keeps its class) are left
/// alone.
pub fn handle_device_found(bytes: &mut [u8]) -> FilterOutcome {
    spoof_identity(&DEVICE_FOUND_LAYOUT, bytes)
}

pub fn handle_pin_request(bytes: &mut [u8]) -> FilterOutcome {
    spoof_identity(&PIN_REQUEST_LAYOUT, bytes)
}

/// Rewrites the SSP record's own class field.
pub fn handle_ssp_request(bytes: &mut [u8]) -> FilterOutcome {
    spoof_identity(&SSP_REQUEST_LAYOUT, bytes)
}

/// Apply the filter matching `kind` to a payload copy
pub fn apply(kind: EventType, bytes: &mut [u8]) -> FilterOutcome {
    match kind {
        EventType::DeviceFound => handle_device_found(bytes),
        EventType::PinRequest => handle_pin_request(bytes),
        EventType::SspRequest => handle_ssp_request(bytes),
        EventType::DiscoveryStateChanged
        | EventType::BondStateChanged
        | EventType::Unknown(_) => FilterOutcome::Unchanged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{DeviceIdentity, EventRecord, SspRequest};
    use crate::version::DriverRevision;

    fn identity(name: &str, class: [u8; 3]) -> DeviceIdentity {
        DeviceIdentity {
            name: BluetoothName::new(name),
            address: "01:02:03:04:05:06".parse().unwrap(),
            class: DeviceClass(class),
        }
    }

    fn decode(kind: EventType, bytes: &[u8]) -> EventRecord {
        EventRecord::decode(kind, DriverRevision::Current, bytes).unwrap()
    }

    #[test]
    fn test_should_spoof() {
        let gamepad = DeviceClass([0x00, 0x05, 0x08]);
        assert!(should_spoof(&BluetoothName::new("Wireless Controller"), gamepad));
        assert!(!should_spoof(&BluetoothName::new("Pro Controller"), gamepad));
        assert!(!should_spoof(
            &BluetoothName::new("Wireless Controller"),
            DeviceClass([0x00, 0x05, 0x40])
        ));
    }

    #[test]
    fn test_device_found_spoofed() {
        let mut bytes = EventRecord::DeviceFound(identity("Wireless Controller", [0x00, 0x05, 0x08])).encode();
        assert_eq!(apply(EventType::DeviceFound, &mut bytes), FilterOutcome::Spoofed);

        let record = decode(EventType::DeviceFound, &bytes);
        let device = record.identity().unwrap();
        assert!(device.name.matches(CANONICAL_CONTROLLER_NAME));
        assert_eq!(device.class, CANONICAL_CONTROLLER_CLASS);
        // Address is untouched
        assert_eq!(device.address.to_string(), "01:02:03:04:05:06");
    }

    #[test]
    fn test_device_found_class_written_at_record_offset() {
        let mut bytes = EventRecord::DeviceFound(identity("Wireless Controller", [0x00, 0x05, 0x08])).encode();
        assert_eq!(handle_device_found(&mut bytes), FilterOutcome::Spoofed);

        assert_eq!(&bytes[0xFF..0x102], &[0x00, 0x00, 0x00]);
        assert_eq!(&bytes[0x10F..0x112], &[0x00, 0x25, 0x08]);
    }

    #[test]
    fn test_pin_request_spoofed() {
        let mut bytes = EventRecord::PinRequest(identity("Gamepad-XYZ", [0x00, 0x05, 0x04])).encode();
        assert_eq!(apply(EventType::PinRequest, &mut bytes), FilterOutcome::Spoofed);
        let device = *decode(EventType::PinRequest, &bytes).identity().unwrap();
        assert!(device.name.matches(CANONICAL_CONTROLLER_NAME));
        assert_eq!(device.class, CANONICAL_CONTROLLER_CLASS);
    }

    #[test]
    fn test_ssp_request_spoofs_own_fields() {
        let original = EventRecord::SspRequest(SspRequest {
            device: identity("Wireless Controller", [0x00, 0x05, 0x08]),
            variant: 1,
            passkey: 4242,
        });
        let mut bytes = original.encode();
        assert_eq!(apply(EventType::SspRequest, &mut bytes), FilterOutcome::Spoofed);

        match decode(EventType::SspRequest, &bytes) {
            EventRecord::SspRequest(ssp) => {
                assert!(ssp.device.name.matches(CANONICAL_CONTROLLER_NAME));
                assert_eq!(ssp.device.class, CANONICAL_CONTROLLER_CLASS);
                assert_eq!(ssp.variant, 1);
                assert_eq!(ssp.passkey, 4242);
            }
            other => panic!("unexpected record: {:?}", other),
        }
    }

    #[test]
    fn test_native_name_untouched() {
        let original = EventRecord::DeviceFound(identity("Joy-Con (R)", [0x00, 0x05, 0x08])).encode();
        let mut bytes = original.clone();
        assert_eq!(apply(EventType::DeviceFound, &mut bytes), FilterOutcome::Unchanged);
        assert_eq!(bytes, original);
    }

    #[test]
    fn test_non_controller_untouched() {
        let original = EventRecord::PinRequest(identity("Headset", [0x04, 0x04, 0x20])).encode();
        let mut bytes = original.clone();
        assert_eq!(apply(EventType::PinRequest, &mut bytes), FilterOutcome::Unchanged);
        assert_eq!(bytes, original);
    }

    #[test]
    fn test_other_kinds_pass_through() {
        let mut bytes = vec![0x5A; 64];
        for kind in [
            EventType::DiscoveryStateChanged,
            EventType::BondStateChanged,
            EventType::Unknown(12),
        ] {
            assert_eq!(apply(kind, &mut bytes), FilterOutcome::Unchanged);
        }
        assert!(bytes.iter().all(|&b| b == 0x5A));
    }

    #[test]
    fn test_short_payload_is_left_alone() {
        let mut bytes = vec![0u8; 16];
        assert_eq!(apply(EventType::DeviceFound, &mut bytes), FilterOutcome::Unchanged);
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_spoofed_name_is_zero_padded() {
        let long_name = "A Very Long Third Party Wireless Controller Name";
        let mut bytes = EventRecord::DeviceFound(identity(long_name, [0x00, 0x05, 0x08])).encode();
        apply(EventType::DeviceFound, &mut bytes);

        let canonical_len = CANONICAL_CONTROLLER_NAME.len();
        assert_eq!(&bytes[..canonical_len], CANONICAL_CONTROLLER_NAME.as_bytes());
        assert!(bytes[canonical_len..long_name.len()].iter().all(|&b| b == 0));
    }
}
