// Btmitm Program Identities
// Caller identities passed to the event accessor

use std::fmt;
use std::str::FromStr;

/// Identity of a program calling into the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u64);

impl ProgramId {
    /// Bluetooth driver service
    pub const BLUETOOTH: ProgramId = ProgramId(0x010000000000000B);
    /// Bluetooth manager, the privileged consumer
    pub const BTM: ProgramId = ProgramId(0x010000000000002A);

    /// Whether event reads by this program are subject to spoofing
    pub fn is_privileged(self) -> bool {
        self == Self::BTM
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for ProgramId {
    type Err = String;

    /// Parse a hex id, with or without a `0x` prefix
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        u64::from_str_radix(digits, 16)
            .map(ProgramId)
            .map_err(|_| format!("Invalid program id: {}", s))
    }
}
