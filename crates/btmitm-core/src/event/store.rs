// Btmitm Event Store
// Most recently captured driver event (type tag + raw payload)

use crate::event::record::EVENT_BUFFER_SIZE;
use crate::event::EventType;

/// Latest event captured from the driver.
///
/// Holds the raw payload exactly as the driver wrote it. The store is
/// never cleared; each capture overwrites it. Synchronization is the
/// owner's job (the core keeps it behind a single mutex).
pub struct EventStore {
    kind: EventType,
    buffer: Box<[u8; EVENT_BUFFER_SIZE]>,
}

impl EventStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            kind: EventType::default(),
            buffer: Box::new([0u8; EVENT_BUFFER_SIZE]),
        }
    }

    /// Type tag of the stored event
    pub fn kind(&self) -> EventType {
        self.kind
    }

    /// Full payload buffer
    pub fn payload(&self) -> &[u8; EVENT_BUFFER_SIZE] {
        &self.buffer
    }

    /// Overwrite the store in one step.
    ///
    /// `fill` receives the whole buffer and returns the new type tag. If it
    /// fails the previous tag is kept; the buffer may have been written.
    pub fn capture<E, F>(&mut self, fill: F) -> Result<EventType, E>
    where
        F: FnOnce(&mut [u8]) -> Result<EventType, E>,
    {
        let kind = fill(&mut self.buffer[..])?;
        self.kind = kind;
        Ok(kind)
    }

    /// Replace the stored event with a known kind and payload prefix.
    ///
    /// Bytes past `payload` are zeroed.
    pub fn store(&mut self, kind: EventType, payload: &[u8]) {
        let len = payload.len().min(EVENT_BUFFER_SIZE);
        self.buffer[..len].copy_from_slice(&payload[..len]);
        self.buffer[len..].fill(0);
        self.kind = kind;
    }

    /// Copy the stored kind and up to `out.len()` payload bytes.
    ///
    /// Returns the kind and the number of bytes copied.
    pub fn copy_out(&self, out: &mut [u8]) -> (EventType, usize) {
        let len = out.len().min(EVENT_BUFFER_SIZE);
        out[..len].copy_from_slice(&self.buffer[..len]);
        (self.kind, len)
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
