// Btmitm Event Model
// Event kinds, record layouts and the shared event store

mod kind;
pub mod record;
mod store;

pub use kind::EventType;
pub use record::{
    record_size, BluetoothAddress, BluetoothName, BondState, DeviceClass, DeviceIdentity,
    EventRecord, IdentityLayout, RecordError, SspRequest, EVENT_BUFFER_SIZE,
};
pub use store::EventStore;
