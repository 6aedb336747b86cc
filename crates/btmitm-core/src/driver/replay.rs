// Btmitm Replay Driver
// Scripted driver transport for tests and the replay CLI

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;

use crate::driver::{Driver, DriverError};
use crate::event::{
    BluetoothAddress, BluetoothName, BondState, DeviceClass, DeviceIdentity, EventRecord,
    EventType, SspRequest,
};
use crate::signal::SystemEvent;
use crate::version::DriverRevision;

/// Event as the driver would hand it out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: EventType,
    pub payload: Vec<u8>,
}

impl RawEvent {
    pub fn new(kind: EventType, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }

    /// Encode a decoded record into its driver layout
    pub fn from_record(record: &EventRecord) -> Self {
        Self::new(record.kind(), record.encode())
    }
}

/// Driver transport backed by an in-memory queue.
///
/// Each queued event is announced through the driver's readiness event.
/// Fetching an event re-signals readiness while more are queued, so every
/// event gets its own wake-up even if signals collapse.
pub struct ReplayDriver {
    readiness: Arc<SystemEvent>,
    queue: Mutex<VecDeque<RawEvent>>,
    fail_next: AtomicBool,
    fetches: AtomicUsize,
}

impl ReplayDriver {
    pub fn new() -> Self {
        Self {
            readiness: Arc::new(SystemEvent::auto_clear()),
            queue: Mutex::new(VecDeque::new()),
            fail_next: AtomicBool::new(false),
            fetches: AtomicUsize::new(0),
        }
    }

    /// The driver-owned "new event ready" event
    pub fn readiness_event(&self) -> Arc<SystemEvent> {
        Arc::clone(&self.readiness)
    }

    /// Queue an event and signal readiness.
    ///
    /// Readiness is only ever set while the queue lock is held and the
    /// queue is non-empty.
    pub fn push(&self, event: RawEvent) {
        let mut queue = self.queue.lock();
        queue.push_back(event);
        self.readiness.signal();
    }

    pub fn push_record(&self, record: &EventRecord) {
        self.push(RawEvent::from_record(record));
    }

    /// Make the next fetch fail with a transport error
    pub fn fail_next_fetch(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Number of events still queued
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Number of successful fetches so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl Default for ReplayDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for ReplayDriver {
    fn fetch_event(&self, buffer: &mut [u8]) -> Result<EventType, DriverError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(DriverError::Transport("injected fetch failure".to_string()));
        }

        let mut queue = self.queue.lock();
        let event = queue.front().ok_or(DriverError::NoEvent)?;
        if event.payload.len() > buffer.len() {
            return Err(DriverError::BufferTooSmall {
                required: event.payload.len(),
                provided: buffer.len(),
            });
        }

        let len = event.payload.len();
        buffer[..len].copy_from_slice(&event.payload);
        buffer[len..].fill(0);
        let kind = event.kind;

        queue.pop_front();
        if !queue.is_empty() {
            self.readiness.signal();
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);

        Ok(kind)
    }
}

/// Errors raised while loading replay scripts
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("Invalid event #{index}: {reason}")]
    InvalidEvent { index: usize, reason: String },
}

/// One scripted driver event (TOML `[[event]]` table)
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ScriptEvent {
    /// Event kind name (e.g. "device_found") or raw number for unknown kinds
    pub kind: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub class: Option<[u8; 3]>,
    /// SSP variant
    #[serde(default)]
    pub variant: Option<u32>,
    #[serde(default)]
    pub passkey: Option<u32>,
    /// Discovery or bond state
    #[serde(default)]
    pub state: Option<u32>,
    /// Bond status
    #[serde(default)]
    pub status: Option<u32>,
    /// Hex payload for unknown kinds
    #[serde(default)]
    pub data: Option<String>,
}

impl ScriptEvent {
    /// Encode into a driver event for the given layout revision
    pub fn to_raw(&self, revision: DriverRevision) -> Result<RawEvent, String> {
        let kind = match EventType::from_name(&self.kind) {
            Some(kind) => kind,
            None => self
                .kind
                .trim()
                .parse::<u32>()
                .map(EventType::from)
                .map_err(|_| format!("Unknown event kind '{}'", self.kind))?,
        };

        let record = match kind {
            EventType::DeviceFound => EventRecord::DeviceFound(self.identity()?),
            EventType::PinRequest => EventRecord::PinRequest(self.identity()?),
            EventType::SspRequest => EventRecord::SspRequest(SspRequest {
                device: self.identity()?,
                variant: self.variant.unwrap_or(0),
                passkey: self.passkey.unwrap_or(0),
            }),
            EventType::DiscoveryStateChanged => EventRecord::DiscoveryState {
                state: self.state.unwrap_or(0),
            },
            EventType::BondStateChanged => {
                let bond = BondState {
                    address: self.address()?,
                    status: self.status.unwrap_or(0),
                    state: self.state.unwrap_or(0),
                };
                match revision {
                    DriverRevision::Legacy => EventRecord::BondStateV1(bond),
                    DriverRevision::Current => EventRecord::BondStateV2(bond),
                }
            }
            EventType::Unknown(raw) => {
                let data = match &self.data {
                    Some(hex_data) => hex::decode(hex_data.trim())
                        .map_err(|e| format!("Invalid hex payload: {}", e))?,
                    None => Vec::new(),
                };
                EventRecord::Unknown { raw, data }
            }
        };

        Ok(RawEvent::from_record(&record))
    }

    fn identity(&self) -> Result<DeviceIdentity, String> {
        Ok(DeviceIdentity {
            name: BluetoothName::new(self.name.as_deref().unwrap_or("")),
            address: self.address()?,
            class: DeviceClass(self.class.unwrap_or([0, 0, 0])),
        })
    }

    fn address(&self) -> Result<BluetoothAddress, String> {
        match &self.address {
            Some(address) => address.parse(),
            None => Ok(BluetoothAddress::default()),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ScriptToml {
    #[serde(default)]
    event: Vec<ScriptEvent>,
}

/// Ordered list of scripted driver events
#[derive(Debug, Clone, Default)]
pub struct EventScript {
    pub events: Vec<ScriptEvent>,
}

impl EventScript {
    pub fn from_toml(content: &str) -> Result<Self, ScriptError> {
        let parsed: ScriptToml =
            toml::from_str(content).map_err(|e| ScriptError::TomlParse(e.to_string()))?;
        Ok(Self {
            events: parsed.event,
        })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScriptError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Encode every event, reporting the first invalid one
    pub fn to_raw_events(&self, revision: DriverRevision) -> Result<Vec<RawEvent>, ScriptError> {
        self.events
            .iter()
            .enumerate()
            .map(|(index, event)| {
                event
                    .to_raw(revision)
                    .map_err(|reason| ScriptError::InvalidEvent { index, reason })
            })
            .collect()
    }
}
