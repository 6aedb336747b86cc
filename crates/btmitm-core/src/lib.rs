// Btmitm Core Library
// Bluetooth driver event interception: capture, spoofing and dispatch

pub mod bluetooth;
pub mod dispatch;
pub mod driver;
pub mod event;
pub mod filter;
pub mod identity;
pub mod logging;
pub mod settings;
pub mod signal;
pub mod version;

pub use bluetooth::{BluetoothCore, CoreConfig, CoreError, CoreResult, FatalHandler, ModeFlags};
pub use dispatch::{route, Route};
pub use driver::{Driver, DriverError, EventScript, RawEvent, ReplayDriver, ScriptError};
pub use event::{
    record_size, BluetoothAddress, BluetoothName, DeviceClass, DeviceIdentity, EventRecord,
    EventStore, EventType, RecordError, EVENT_BUFFER_SIZE,
};
pub use filter::FilterOutcome;
pub use identity::ProgramId;
pub use settings::{default_settings_content, Settings, SettingsError};
pub use signal::{ClearMode, SystemEvent};
pub use version::{DriverRevision, FirmwareVersion, FixedVersion, VersionProbe};
