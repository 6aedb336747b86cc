// Btmitm Driver Revision Probe
// Firmware version handling and bond-state layout selection

use std::fmt;
use std::str::FromStr;

/// Running system firmware version (major.minor.micro)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub micro: u8,
}

impl FirmwareVersion {
    /// First firmware whose driver reports the relaid bond-state record
    pub const BOND_STATE_V2: FirmwareVersion = FirmwareVersion::new(9, 0, 0);

    pub const fn new(major: u8, minor: u8, micro: u8) -> Self {
        Self {
            major,
            minor,
            micro,
        }
    }

    /// Driver event layout revision used by this firmware
    pub fn driver_revision(self) -> DriverRevision {
        if self < Self::BOND_STATE_V2 {
            DriverRevision::Legacy
        } else {
            DriverRevision::Current
        }
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)
    }
}

impl FromStr for FirmwareVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split('.');
        let mut next = |label: &str, required: bool| -> Result<u8, String> {
            match parts.next() {
                Some(p) => p
                    .parse::<u8>()
                    .map_err(|_| format!("Invalid {} component in version '{}'", label, s)),
                None if required => Err(format!("Missing {} component in version '{}'", label, s)),
                None => Ok(0),
            }
        };

        let major = next("major", true)?;
        let minor = next("minor", false)?;
        let micro = next("micro", false)?;

        if parts.next().is_some() {
            return Err(format!("Too many components in version '{}'", s));
        }

        Ok(Self::new(major, minor, micro))
    }
}

/// Driver event record layout revision.
///
/// Only the bond-state record differs between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverRevision {
    /// Drivers before 9.0.0
    Legacy,
    /// Drivers from 9.0.0 on
    Current,
}

/// Source of the running firmware version.
///
/// Queried every time a size-dependent decision is made, never cached by
/// the core.
pub trait VersionProbe: Send + Sync {
    fn firmware_version(&self) -> FirmwareVersion;

    fn driver_revision(&self) -> DriverRevision {
        self.firmware_version().driver_revision()
    }
}

/// Probe reporting a fixed version (settings value or tests)
#[derive(Debug, Clone, Copy)]
pub struct FixedVersion(pub FirmwareVersion);

impl VersionProbe for FixedVersion {
    fn firmware_version(&self) -> FirmwareVersion {
        self.0
    }
}
