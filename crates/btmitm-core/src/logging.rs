// Btmitm Event Logging
// Structured log lines and payload dumps for captured events

use crate::event::{record_size, EventRecord, EventType};
use crate::filter::FilterOutcome;
use crate::identity::ProgramId;
use crate::version::DriverRevision;

/// Bytes per hex dump line
const DUMP_LINE_BYTES: usize = 16;

/// Log a freshly captured driver event (type only, no payload)
pub fn log_captured(kind: EventType) {
    log::debug!("[{:02}] Bluetooth Core Event ({})", kind.raw(), kind);
}

/// Log an event handed out by the accessor.
///
/// Exactly `record_size(kind, revision)` bytes are dumped, or fewer if
/// `bytes` is shorter.
pub fn log_event(
    requester: ProgramId,
    kind: EventType,
    revision: DriverRevision,
    bytes: &[u8],
    outcome: FilterOutcome,
) {
    let size = record_size(kind, revision).min(bytes.len());
    let payload = &bytes[..size];

    match EventRecord::decode(kind, revision, payload) {
        Ok(record) => log::debug!(
            "[{:02}] event for {}: {}{}",
            kind.raw(),
            requester,
            record,
            spoof_suffix(outcome)
        ),
        Err(e) => log::debug!("[{:02}] event for {}: {}", kind.raw(), requester, e),
    }

    if log::log_enabled!(log::Level::Trace) {
        for line in dump_lines(payload) {
            log::trace!("{}", line);
        }
    }
}

fn spoof_suffix(outcome: FilterOutcome) -> &'static str {
    match outcome {
        FilterOutcome::Spoofed => " [spoofed]",
        FilterOutcome::Unchanged => "",
    }
}

/// Format a payload as offset-prefixed hex lines
pub fn dump_lines(bytes: &[u8]) -> Vec<String> {
    bytes
        .chunks(DUMP_LINE_BYTES)
        .enumerate()
        .map(|(i, chunk)| format!("{:04x}: {}", i * DUMP_LINE_BYTES, hex::encode(chunk)))
        .collect()
}
