// Btmitm Spoofing Filter - Device Class Detection
// Class-of-device analysis for generic HID controllers

use crate::event::DeviceClass;

/// Major device class: peripheral (keyboard, pointing device, gamepad, ...)
pub const COD_MAJOR_PERIPHERAL: u8 = 0x05;
/// Peripheral minor class: gamepad
pub const COD_MINOR_GAMEPAD: u8 = 0x08;
/// Peripheral minor class: joystick
pub const COD_MINOR_JOYSTICK: u8 = 0x04;

/// Class reported for first-party controllers
pub const CANONICAL_CONTROLLER_CLASS: DeviceClass = DeviceClass([0x00, 0x25, 0x08]);

/// Determine if a device class describes a game controller.
///
/// A device is considered a controller if:
/// 1. Its major class is peripheral
/// 2. Its minor class is gamepad or joystick
pub fn is_controller(class: DeviceClass) -> bool {
    if class.major() != COD_MAJOR_PERIPHERAL {
        return false;
    }

    matches!(class.minor(), COD_MINOR_GAMEPAD | COD_MINOR_JOYSTICK)
}
