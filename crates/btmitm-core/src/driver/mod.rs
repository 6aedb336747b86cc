// Btmitm Driver Transport
// Seam to the Bluetooth driver that owns the real event source

pub mod replay;

use crate::event::EventType;

pub use replay::{EventScript, RawEvent, ReplayDriver, ScriptError, ScriptEvent};

/// Errors reported by the driver transport
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    #[error("Driver transport error: {0}")]
    Transport(String),

    #[error("No event pending in driver")]
    NoEvent,

    #[error("Event payload of {required} bytes does not fit buffer of {provided}")]
    BufferTooSmall { required: usize, provided: usize },
}

/// Driver transport collaborator.
///
/// The driver signals its own readiness event when a new event is
/// available; `fetch_event` then writes that event's payload into `buffer`
/// (never more than `buffer.len()` bytes) and returns its type.
pub trait Driver: Send + Sync {
    fn fetch_event(&self, buffer: &mut [u8]) -> Result<EventType, DriverError>;
}
