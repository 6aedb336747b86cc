// Btmitm Event Records
// Fixed-layout driver event records and the canonical size table
//
// All layouts are packed little-endian mirrors of the driver's own event
// records. Offsets below must stay byte-for-byte identical to the driver.

use std::fmt;
use std::str::FromStr;

use crate::event::EventType;
use crate::version::DriverRevision;

/// Capacity of the driver event buffer
pub const EVENT_BUFFER_SIZE: usize = 0x400;

/// Size of a device name field (NUL-terminated)
pub const NAME_SIZE: usize = 0xF9;
pub const ADDRESS_SIZE: usize = 6;
pub const DEVICE_CLASS_SIZE: usize = 3;

pub const DEVICE_FOUND_SIZE: usize = 0x212;
pub const DISCOVERY_STATE_SIZE: usize = 4;
pub const PIN_REQUEST_SIZE: usize = 0x102;
pub const SSP_REQUEST_SIZE: usize = 0x10A;
pub const BOND_STATE_V1_SIZE: usize = 0x0E;
pub const BOND_STATE_V2_SIZE: usize = 0x10;

/// Errors raised while decoding a record from raw bytes
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("{kind} record needs {required} bytes, got {provided}")]
    Truncated {
        kind: EventType,
        required: usize,
        provided: usize,
    },
}

/// Canonical record size for an event kind under a driver revision.
///
/// Every copy, validation, filter and log length goes through this table.
pub fn record_size(kind: EventType, revision: DriverRevision) -> usize {
    match kind {
        EventType::DeviceFound => DEVICE_FOUND_SIZE,
        EventType::DiscoveryStateChanged => DISCOVERY_STATE_SIZE,
        EventType::PinRequest => PIN_REQUEST_SIZE,
        EventType::SspRequest => SSP_REQUEST_SIZE,
        EventType::BondStateChanged => match revision {
            DriverRevision::Legacy => BOND_STATE_V1_SIZE,
            DriverRevision::Current => BOND_STATE_V2_SIZE,
        },
        EventType::Unknown(_) => EVENT_BUFFER_SIZE,
    }
}

/// Bluetooth device address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BluetoothAddress(pub [u8; ADDRESS_SIZE]);

impl fmt::Display for BluetoothAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a[0], a[1], a[2], a[3], a[4], a[5]
        )
    }
}

impl FromStr for BluetoothAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split(':').collect();
        if parts.len() != ADDRESS_SIZE {
            return Err(format!("Invalid Bluetooth address: {}", s));
        }

        let mut address = [0u8; ADDRESS_SIZE];
        for (byte, part) in address.iter_mut().zip(parts) {
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| format!("Invalid Bluetooth address: {}", s))?;
        }
        Ok(Self(address))
    }
}

/// Class of device (3 bytes, as reported by the driver)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceClass(pub [u8; DEVICE_CLASS_SIZE]);

impl DeviceClass {
    /// Major device class (low nibble of the middle byte)
    pub fn major(self) -> u8 {
        self.0[1] & 0x0F
    }

    /// Minor device class bits used for peripheral subtypes
    pub fn minor(self) -> u8 {
        self.0[2] & 0x0F
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}{:02x}{:02x}", self.0[0], self.0[1], self.0[2])
    }
}

/// Fixed-size, NUL-terminated device name field
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BluetoothName([u8; NAME_SIZE]);

impl BluetoothName {
    /// Longest name that still leaves room for the terminator
    pub const MAX_LEN: usize = NAME_SIZE - 1;

    /// Build a name field, truncating rather than overflowing
    pub fn new(name: &str) -> Self {
        let mut raw = [0u8; NAME_SIZE];
        let bytes = name.as_bytes();
        let len = bytes.len().min(Self::MAX_LEN);
        raw[..len].copy_from_slice(&bytes[..len]);
        Self(raw)
    }

    fn from_field(field: &[u8]) -> Self {
        let mut raw = [0u8; NAME_SIZE];
        raw.copy_from_slice(&field[..NAME_SIZE]);
        Self(raw)
    }

    /// Bytes up to (not including) the first NUL
    pub fn as_bytes(&self) -> &[u8] {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE);
        &self.0[..end]
    }

    /// Whole field, terminator and padding included
    pub fn raw(&self) -> &[u8; NAME_SIZE] {
        &self.0
    }

    /// C-string style comparison against `other`
    pub fn matches(&self, other: &str) -> bool {
        let other = other.as_bytes();
        let other = &other[..other.len().min(NAME_SIZE)];
        self.as_bytes() == other
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self.as_bytes()).into_owned()
    }
}

impl Default for BluetoothName {
    fn default() -> Self {
        Self([0u8; NAME_SIZE])
    }
}

impl fmt::Debug for BluetoothName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_string_lossy())
    }
}

impl fmt::Display for BluetoothName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_lossy())
    }
}

/// Offsets of the name/class/address fields inside an identity-bearing record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityLayout {
    pub name: usize,
    pub class: usize,
    pub address: usize,
    /// Record size, all offsets fall inside it
    pub size: usize,
}

/// Device-found class lives at 0x10F, past the 0x10 reserved bytes at 0xFF.
pub const DEVICE_FOUND_LAYOUT: IdentityLayout = IdentityLayout {
    name: 0x000,
    address: 0x0F9,
    class: 0x10F,
    size: DEVICE_FOUND_SIZE,
};

pub const PIN_REQUEST_LAYOUT: IdentityLayout = IdentityLayout {
    address: 0x000,
    name: 0x006,
    class: 0x0FF,
    size: PIN_REQUEST_SIZE,
};

pub const SSP_REQUEST_LAYOUT: IdentityLayout = IdentityLayout {
    address: 0x000,
    name: 0x006,
    class: 0x0FF,
    size: SSP_REQUEST_SIZE,
};

const SSP_VARIANT_OFFSET: usize = 0x102;
const SSP_PASSKEY_OFFSET: usize = 0x106;

impl IdentityLayout {
    pub fn name(&self, bytes: &[u8]) -> BluetoothName {
        BluetoothName::from_field(&bytes[self.name..self.name + NAME_SIZE])
    }

    pub fn class(&self, bytes: &[u8]) -> DeviceClass {
        let mut class = [0u8; DEVICE_CLASS_SIZE];
        class.copy_from_slice(&bytes[self.class..self.class + DEVICE_CLASS_SIZE]);
        DeviceClass(class)
    }

    pub fn address(&self, bytes: &[u8]) -> BluetoothAddress {
        read_address(bytes, self.address)
    }

    pub fn write_name(&self, bytes: &mut [u8], name: &BluetoothName) {
        bytes[self.name..self.name + NAME_SIZE].copy_from_slice(name.raw());
    }

    pub fn write_class(&self, bytes: &mut [u8], class: DeviceClass) {
        bytes[self.class..self.class + DEVICE_CLASS_SIZE].copy_from_slice(&class.0);
    }

    pub fn write_address(&self, bytes: &mut [u8], address: BluetoothAddress) {
        bytes[self.address..self.address + ADDRESS_SIZE].copy_from_slice(&address.0);
    }
}

/// Identity fields shared by device-found, pin and SSP records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceIdentity {
    pub name: BluetoothName,
    pub address: BluetoothAddress,
    pub class: DeviceClass,
}

/// Secure simple pairing request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SspRequest {
    pub device: DeviceIdentity,
    pub variant: u32,
    pub passkey: u32,
}

/// Bond state change (fields common to both layouts)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BondState {
    pub address: BluetoothAddress,
    pub status: u32,
    pub state: u32,
}

/// Decoded driver event, one variant per record shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventRecord {
    DeviceFound(DeviceIdentity),
    DiscoveryState { state: u32 },
    PinRequest(DeviceIdentity),
    SspRequest(SspRequest),
    /// Bond state as reported by pre-9.0.0 drivers
    BondStateV1(BondState),
    /// Bond state as reported by 9.0.0+ drivers
    BondStateV2(BondState),
    Unknown { raw: u32, data: Vec<u8> },
}

impl EventRecord {
    /// Decode the record for `kind` from the front of `bytes`
    pub fn decode(
        kind: EventType,
        revision: DriverRevision,
        bytes: &[u8],
    ) -> Result<Self, RecordError> {
        let required = record_size(kind, revision);
        if bytes.len() < required {
            return Err(RecordError::Truncated {
                kind,
                required,
                provided: bytes.len(),
            });
        }

        let record = match kind {
            EventType::DeviceFound => {
                EventRecord::DeviceFound(read_identity(&DEVICE_FOUND_LAYOUT, bytes))
            }
            EventType::DiscoveryStateChanged => EventRecord::DiscoveryState {
                state: read_u32(bytes, 0),
            },
            EventType::PinRequest => {
                EventRecord::PinRequest(read_identity(&PIN_REQUEST_LAYOUT, bytes))
            }
            EventType::SspRequest => EventRecord::SspRequest(SspRequest {
                device: read_identity(&SSP_REQUEST_LAYOUT, bytes),
                variant: read_u32(bytes, SSP_VARIANT_OFFSET),
                passkey: read_u32(bytes, SSP_PASSKEY_OFFSET),
            }),
            EventType::BondStateChanged => match revision {
                DriverRevision::Legacy => EventRecord::BondStateV1(BondState {
                    address: read_address(bytes, 0),
                    status: read_u32(bytes, 6),
                    state: read_u32(bytes, 10),
                }),
                DriverRevision::Current => EventRecord::BondStateV2(BondState {
                    status: read_u32(bytes, 0),
                    address: read_address(bytes, 4),
                    state: read_u32(bytes, 12),
                }),
            },
            EventType::Unknown(raw) => EventRecord::Unknown {
                raw,
                data: bytes[..required].to_vec(),
            },
        };

        Ok(record)
    }

    /// Event kind this record belongs to
    pub fn kind(&self) -> EventType {
        match self {
            EventRecord::DeviceFound(_) => EventType::DeviceFound,
            EventRecord::DiscoveryState { .. } => EventType::DiscoveryStateChanged,
            EventRecord::PinRequest(_) => EventType::PinRequest,
            EventRecord::SspRequest(_) => EventType::SspRequest,
            EventRecord::BondStateV1(_) | EventRecord::BondStateV2(_) => {
                EventType::BondStateChanged
            }
            EventRecord::Unknown { raw, .. } => EventType::Unknown(*raw),
        }
    }

    /// Declared size of this variant's layout
    pub fn size(&self) -> usize {
        match self {
            EventRecord::DeviceFound(_) => DEVICE_FOUND_SIZE,
            EventRecord::DiscoveryState { .. } => DISCOVERY_STATE_SIZE,
            EventRecord::PinRequest(_) => PIN_REQUEST_SIZE,
            EventRecord::SspRequest(_) => SSP_REQUEST_SIZE,
            EventRecord::BondStateV1(_) => BOND_STATE_V1_SIZE,
            EventRecord::BondStateV2(_) => BOND_STATE_V2_SIZE,
            EventRecord::Unknown { .. } => EVENT_BUFFER_SIZE,
        }
    }

    /// Device identity, for the kinds that carry one
    pub fn identity(&self) -> Option<&DeviceIdentity> {
        match self {
            EventRecord::DeviceFound(device) | EventRecord::PinRequest(device) => Some(device),
            EventRecord::SspRequest(ssp) => Some(&ssp.device),
            _ => None,
        }
    }

    /// Encode into the driver layout. Reserved bytes are zeroed.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.size()];
        match self {
            EventRecord::DeviceFound(device) => {
                write_identity(&DEVICE_FOUND_LAYOUT, &mut bytes, device)
            }
            EventRecord::DiscoveryState { state } => write_u32(&mut bytes, 0, *state),
            EventRecord::PinRequest(device) => {
                write_identity(&PIN_REQUEST_LAYOUT, &mut bytes, device)
            }
            EventRecord::SspRequest(ssp) => {
                write_identity(&SSP_REQUEST_LAYOUT, &mut bytes, &ssp.device);
                write_u32(&mut bytes, SSP_VARIANT_OFFSET, ssp.variant);
                write_u32(&mut bytes, SSP_PASSKEY_OFFSET, ssp.passkey);
            }
            EventRecord::BondStateV1(bond) => {
                bytes[..ADDRESS_SIZE].copy_from_slice(&bond.address.0);
                write_u32(&mut bytes, 6, bond.status);
                write_u32(&mut bytes, 10, bond.state);
            }
            EventRecord::BondStateV2(bond) => {
                write_u32(&mut bytes, 0, bond.status);
                bytes[4..4 + ADDRESS_SIZE].copy_from_slice(&bond.address.0);
                write_u32(&mut bytes, 12, bond.state);
            }
            EventRecord::Unknown { data, .. } => {
                let len = data.len().min(EVENT_BUFFER_SIZE);
                bytes[..len].copy_from_slice(&data[..len]);
            }
        }
        bytes
    }
}

impl fmt::Display for EventRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventRecord::DeviceFound(d) | EventRecord::PinRequest(d) => write!(
                f,
                "{} addr={} cod={} name={:?}",
                self.kind(),
                d.address,
                d.class,
                d.name.to_string_lossy()
            ),
            EventRecord::SspRequest(ssp) => write!(
                f,
                "ssp_request addr={} cod={} name={:?} variant={} passkey={:06}",
                ssp.device.address,
                ssp.device.class,
                ssp.device.name.to_string_lossy(),
                ssp.variant,
                ssp.passkey
            ),
            EventRecord::DiscoveryState { state } => {
                write!(f, "discovery_state_changed state={}", state)
            }
            EventRecord::BondStateV1(b) | EventRecord::BondStateV2(b) => write!(
                f,
                "bond_state_changed addr={} status={} state={}",
                b.address, b.status, b.state
            ),
            EventRecord::Unknown { raw, .. } => write!(f, "unknown event type {}", raw),
        }
    }
}

fn read_identity(layout: &IdentityLayout, bytes: &[u8]) -> DeviceIdentity {
    DeviceIdentity {
        name: layout.name(bytes),
        address: layout.address(bytes),
        class: layout.class(bytes),
    }
}

fn write_identity(layout: &IdentityLayout, bytes: &mut [u8], device: &DeviceIdentity) {
    layout.write_name(bytes, &device.name);
    layout.write_address(bytes, device.address);
    layout.write_class(bytes, device.class);
}

fn read_address(bytes: &[u8], offset: usize) -> BluetoothAddress {
    let mut address = [0u8; ADDRESS_SIZE];
    address.copy_from_slice(&bytes[offset..offset + ADDRESS_SIZE]);
    BluetoothAddress(address)
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
