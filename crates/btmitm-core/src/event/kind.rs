// Btmitm Event Kinds
// Driver event type tags and their raw wire values

use std::fmt;

/// Tag identifying the shape of the payload currently held by the driver.
///
/// The numeric values mirror the driver's own event type enumeration.
/// Anything the core does not know how to interpret is kept as `Unknown`
/// so it can still be forwarded untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum EventType {
    /// A device was found during discovery
    DeviceFound,
    /// Discovery started or stopped
    DiscoveryStateChanged,
    /// Legacy pairing PIN request
    PinRequest,
    /// Secure simple pairing request
    SspRequest,
    /// Bond state of a device changed
    BondStateChanged,
    /// Any other driver event
    Unknown(u32),
}

impl EventType {
    pub const DEVICE_FOUND: u32 = 3;
    pub const DISCOVERY_STATE_CHANGED: u32 = 4;
    pub const PIN_REQUEST: u32 = 5;
    pub const SSP_REQUEST: u32 = 6;
    pub const BOND_STATE_CHANGED: u32 = 7;

    /// Raw value as reported by the driver
    pub fn raw(self) -> u32 {
        match self {
            EventType::DeviceFound => Self::DEVICE_FOUND,
            EventType::DiscoveryStateChanged => Self::DISCOVERY_STATE_CHANGED,
            EventType::PinRequest => Self::PIN_REQUEST,
            EventType::SspRequest => Self::SSP_REQUEST,
            EventType::BondStateChanged => Self::BOND_STATE_CHANGED,
            EventType::Unknown(raw) => raw,
        }
    }

    /// Short lowercase name, used in logs and replay scripts
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Parse a replay script name (e.g. "device_found") into a known kind
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "device_found" => Some(EventType::DeviceFound),
            "discovery_state_changed" => Some(EventType::DiscoveryStateChanged),
            "pin_request" => Some(EventType::PinRequest),
            "ssp_request" => Some(EventType::SspRequest),
            "bond_state_changed" => Some(EventType::BondStateChanged),
            _ => None,
        }
    }
}

impl From<u32> for EventType {
    fn from(raw: u32) -> Self {
        match raw {
            Self::DEVICE_FOUND => EventType::DeviceFound,
            Self::DISCOVERY_STATE_CHANGED => EventType::DiscoveryStateChanged,
            Self::PIN_REQUEST => EventType::PinRequest,
            Self::SSP_REQUEST => EventType::SspRequest,
            Self::BOND_STATE_CHANGED => EventType::BondStateChanged,
            other => EventType::Unknown(other),
        }
    }
}

impl From<EventType> for u32 {
    fn from(kind: EventType) -> Self {
        kind.raw()
    }
}

impl Default for EventType {
    fn default() -> Self {
        EventType::Unknown(0)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
