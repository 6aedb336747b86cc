// Btmitm Spoofing Filter - Native Controller Names
// Names the privileged consumer already recognizes as first-party hardware

use crate::event::BluetoothName;

/// Name written over foreign controllers
pub const CANONICAL_CONTROLLER_NAME: &str = "Lic Pro Controller";

/// Names reported by first-party controllers
pub const NATIVE_CONTROLLER_NAMES: &[&str] = &[
    "Joy-Con (L)",
    "Joy-Con (R)",
    "Pro Controller",
    "Lic Pro Controller",
    "NES Controller",
    "HVC Controller",
    "SNES Controller",
    "NintendoGamepad",
];

/// Check if a device name is one the privileged consumer accepts as-is.
///
/// Comparison is exact up to the name's terminator.
pub fn is_native_controller_name(name: &BluetoothName) -> bool {
    NATIVE_CONTROLLER_NAMES
        .iter()
        .any(|native| name.matches(native))
}
