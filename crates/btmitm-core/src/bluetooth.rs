// Btmitm Bluetooth Core
// Event capture, dispatch and consumer access around the driver event
//
// One waiter thread is the only writer of the event store. Any number of
// callers read it through `get_event_info`. Both sides go through the same
// store lock; the waiter blocks on the driver signal outside of it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::dispatch::{self, Route};
use crate::driver::{Driver, DriverError};
use crate::event::{record_size, EventStore, EventType};
use crate::filter::{self, FilterOutcome};
use crate::identity::ProgramId;
use crate::logging;
use crate::settings::Settings;
use crate::signal::{ClearMode, SystemEvent};
use crate::version::VersionProbe;

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the Bluetooth core
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Bluetooth core is already initialized")]
    AlreadyInitialized,

    #[error("Bluetooth core has been finalized")]
    Finalized,

    #[error("Bluetooth core is not initialized")]
    NotInitialized,

    #[error("Driver system event is closed and cannot be bound")]
    SignalBind,

    #[error("Failed to start event waiter thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    #[error("Driver event read failed: {0}")]
    DriverRead(#[from] DriverError),

    #[error("Event buffer too small: {required} bytes required, {provided} provided")]
    BufferTooSmall { required: usize, provided: usize },
}

/// Called by the waiter thread when a capture cycle fails
pub type FatalHandler = Arc<dyn Fn(&CoreError) + Send + Sync>;

/// Process-wide mode flags.
///
/// Owned by the configuration side; the core only reads them, once per
/// capture cycle.
#[derive(Debug, Default)]
pub struct ModeFlags {
    redirect_events: AtomicBool,
    preparing_for_sleep: AtomicBool,
}

impl ModeFlags {
    pub fn new(redirect_events: bool, preparing_for_sleep: bool) -> Self {
        Self {
            redirect_events: AtomicBool::new(redirect_events),
            preparing_for_sleep: AtomicBool::new(preparing_for_sleep),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.redirect_events(), settings.preparing_for_sleep())
    }

    pub fn redirect_events(&self) -> bool {
        self.redirect_events.load(Ordering::Relaxed)
    }

    pub fn set_redirect_events(&self, value: bool) {
        self.redirect_events.store(value, Ordering::Relaxed);
    }

    pub fn preparing_for_sleep(&self) -> bool {
        self.preparing_for_sleep.load(Ordering::Relaxed)
    }

    pub fn set_preparing_for_sleep(&self, value: bool) {
        self.preparing_for_sleep.store(value, Ordering::Relaxed);
    }
}

/// Waiter thread configuration
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Upper bound on how long the waiter goes without checking for shutdown
    pub poll_interval: Duration,
    pub thread_name: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(Settings::DEFAULT_POLL_INTERVAL_MS),
            thread_name: Settings::DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

impl From<&Settings> for CoreConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            poll_interval: settings.poll_interval(),
            thread_name: settings.thread_name().to_string(),
        }
    }
}

/// The driver signal plus the two outbound channels
#[derive(Clone)]
struct Channels {
    system: Arc<SystemEvent>,
    forward: Arc<SystemEvent>,
    user_forward: Arc<SystemEvent>,
}

struct Running {
    channels: Channels,
    stop: Arc<AtomicBool>,
    waiter: Option<JoinHandle<()>>,
}

enum Lifecycle {
    Uninitialized,
    Running(Running),
    Stopped,
}

/// State shared with the waiter thread
struct Shared {
    store: Mutex<EventStore>,
    driver: Arc<dyn Driver>,
    flags: Arc<ModeFlags>,
}

impl Shared {
    /// One capture-and-dispatch cycle
    fn handle_event(&self, channels: &Channels) -> CoreResult<Route> {
        let mut store = self.store.lock();

        let kind = store.capture(|buffer| self.driver.fetch_event(buffer))?;
        logging::log_captured(kind);

        let route = dispatch::route(
            self.flags.redirect_events(),
            self.flags.preparing_for_sleep(),
        );
        match route {
            Route::Forward => channels.forward.signal(),
            Route::UserForward => channels.user_forward.signal(),
        }

        Ok(route)
    }
}

/// Bluetooth event interception core.
///
/// Lifecycle is `Uninitialized -> Running -> Stopped`; a stopped core
/// cannot be started again.
pub struct BluetoothCore {
    shared: Arc<Shared>,
    version: Arc<dyn VersionProbe>,
    config: CoreConfig,
    fatal: FatalHandler,
    lifecycle: Mutex<Lifecycle>,
    initialized: AtomicBool,
}

impl BluetoothCore {
    /// Create an uninitialized core
    pub fn new(
        driver: Arc<dyn Driver>,
        flags: Arc<ModeFlags>,
        version: Arc<dyn VersionProbe>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store: Mutex::new(EventStore::new()),
                driver,
                flags,
            }),
            version,
            config: CoreConfig::default(),
            fatal: Arc::new(|_: &CoreError| std::process::abort()),
            lifecycle: Mutex::new(Lifecycle::Uninitialized),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn with_config(mut self, config: CoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default fatal handler (process abort)
    pub fn with_fatal_handler(mut self, fatal: FatalHandler) -> Self {
        self.fatal = fatal;
        self
    }

    /// Mode flags read by the dispatch router
    pub fn mode_flags(&self) -> &Arc<ModeFlags> {
        &self.shared.flags
    }

    /// Whether `initialize` succeeded and `finalize` has not run yet
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Driver-owned "new event ready" signal
    pub fn system_event(&self) -> Option<Arc<SystemEvent>> {
        self.channels().map(|c| c.system)
    }

    /// Unfiltered forward channel
    pub fn forward_event(&self) -> Option<Arc<SystemEvent>> {
        self.channels().map(|c| c.forward)
    }

    /// User/redirected forward channel
    pub fn user_forward_event(&self) -> Option<Arc<SystemEvent>> {
        self.channels().map(|c| c.user_forward)
    }

    fn channels(&self) -> Option<Channels> {
        match &*self.lifecycle.lock() {
            Lifecycle::Running(running) => Some(running.channels.clone()),
            _ => None,
        }
    }

    /// Bind the driver signal, create the outbound channels and start the
    /// waiter thread.
    ///
    /// On any failure nothing is left running and the core stays
    /// uninitialized.
    pub fn initialize(&self, system_event: Arc<SystemEvent>) -> CoreResult<()> {
        let mut lifecycle = self.lifecycle.lock();
        match *lifecycle {
            Lifecycle::Uninitialized => {}
            Lifecycle::Running(_) => return Err(CoreError::AlreadyInitialized),
            Lifecycle::Stopped => return Err(CoreError::Finalized),
        }

        if system_event.is_closed() {
            return Err(CoreError::SignalBind);
        }

        let channels = Channels {
            system: system_event,
            forward: Arc::new(SystemEvent::new(ClearMode::AutoClear, true)),
            user_forward: Arc::new(SystemEvent::new(ClearMode::AutoClear, true)),
        };
        let stop = Arc::new(AtomicBool::new(false));

        let waiter = {
            let shared = Arc::clone(&self.shared);
            let channels = channels.clone();
            let stop = Arc::clone(&stop);
            let fatal = Arc::clone(&self.fatal);
            let poll_interval = self.config.poll_interval;
            thread::Builder::new()
                .name(self.config.thread_name.clone())
                .spawn(move || run_waiter(shared, channels, stop, poll_interval, fatal))
                .map_err(CoreError::ThreadSpawn)?
        };

        *lifecycle = Lifecycle::Running(Running {
            channels,
            stop,
            waiter: Some(waiter),
        });
        self.initialized.store(true, Ordering::SeqCst);

        log::info!("Bluetooth core initialized");
        Ok(())
    }

    /// Stop the waiter thread and destroy the outbound channels.
    ///
    /// The driver signal is not closed; it belongs to the driver. Calling
    /// this on a core that is not running does nothing.
    pub fn finalize(&self) {
        let mut running = {
            let mut lifecycle = self.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
                Lifecycle::Running(running) => running,
                other => {
                    *lifecycle = other;
                    log::debug!("finalize called on a core that is not running");
                    return;
                }
            }
        };
        self.initialized.store(false, Ordering::SeqCst);

        running.stop.store(true, Ordering::SeqCst);
        if let Some(waiter) = running.waiter.take() {
            if waiter.thread().id() == thread::current().id() {
                log::warn!("finalize called from the waiter thread; not joining");
            } else if waiter.join().is_err() {
                log::warn!("Event waiter thread panicked");
            }
        }

        running.channels.user_forward.close();
        running.channels.forward.close();

        log::info!("Bluetooth core finalized");
    }

    /// Run one capture-and-dispatch cycle.
    ///
    /// Normally only the waiter thread calls this, after the driver signal
    /// fired.
    pub fn handle_event(&self) -> CoreResult<Route> {
        let channels = self.channels().ok_or(CoreError::NotInitialized)?;
        self.shared.handle_event(&channels)
    }

    /// Copy the latest event out for `requester`.
    ///
    /// `buffer` must hold at least the record size of the stored event
    /// type; up to `buffer.len()` bytes are copied. The privileged consumer
    /// gets a spoofed copy, the stored event is never modified.
    pub fn get_event_info(&self, requester: ProgramId, buffer: &mut [u8]) -> CoreResult<EventType> {
        let revision = self.version.driver_revision();

        let (kind, copied) = {
            let store = self.shared.store.lock();
            let required = record_size(store.kind(), revision);
            if buffer.len() < required {
                return Err(CoreError::BufferTooSmall {
                    required,
                    provided: buffer.len(),
                });
            }
            store.copy_out(buffer)
        };

        let outcome = if requester.is_privileged() {
            filter::apply(kind, &mut buffer[..copied])
        } else {
            FilterOutcome::Unchanged
        };

        logging::log_event(requester, kind, revision, &buffer[..copied], outcome);
        Ok(kind)
    }
}

/// Drop implementation for BluetoothCore
///
/// A running core owns a thread; dropping it stops that thread and closes
/// the outbound channels so nobody stays parked on them.
impl Drop for BluetoothCore {
    fn drop(&mut self) {
        self.finalize();
    }
}

fn run_waiter(
    shared: Arc<Shared>,
    channels: Channels,
    stop: Arc<AtomicBool>,
    poll_interval: Duration,
    fatal: FatalHandler,
) {
    log::debug!("Event waiter started");

    while !stop.load(Ordering::SeqCst) {
        if !channels.system.wait_timeout(poll_interval) {
            if channels.system.is_closed() {
                log::warn!("Driver system event closed, event waiter exiting");
                break;
            }
            continue;
        }

        if let Err(e) = shared.handle_event(&channels) {
            log::error!("Bluetooth core event handling failed: {}", e);
            fatal(&e);
            break;
        }
    }

    log::debug!("Event waiter stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{RawEvent, ReplayDriver};
    use crate::event::EVENT_BUFFER_SIZE;
    use crate::version::{FirmwareVersion, FixedVersion};

    fn make_core(driver: &Arc<ReplayDriver>) -> BluetoothCore {
        let driver: Arc<dyn Driver> = driver.clone();
        BluetoothCore::new(
            driver,
            Arc::new(ModeFlags::default()),
            Arc::new(FixedVersion(FirmwareVersion::new(9, 1, 0))),
        )
        .with_config(CoreConfig {
            poll_interval: Duration::from_millis(5),
            thread_name: "test-waiter".to_string(),
        })
        .with_fatal_handler(Arc::new(|_: &CoreError| {}))
    }

    #[test]
    fn test_mode_flags() {
        let flags = ModeFlags::new(true, false);
        assert!(flags.redirect_events());
        flags.set_preparing_for_sleep(true);
        assert!(flags.preparing_for_sleep());
        flags.set_redirect_events(false);
        assert!(!flags.redirect_events());
    }

    #[test]
    fn test_channels_unavailable_before_initialize() {
        let driver = Arc::new(ReplayDriver::new());
        let core = make_core(&driver);
        assert!(!core.is_initialized());
        assert!(core.system_event().is_none());
        assert!(core.forward_event().is_none());
        assert!(core.user_forward_event().is_none());
    }

    #[test]
    fn test_handle_event_requires_initialize() {
        let driver = Arc::new(ReplayDriver::new());
        let core = make_core(&driver);
        assert!(matches!(core.handle_event(), Err(CoreError::NotInitialized)));
    }

    #[test]
    fn test_closed_signal_fails_to_bind() {
        let driver = Arc::new(ReplayDriver::new());
        let core = make_core(&driver);
        let signal = driver.readiness_event();
        signal.close();
        assert!(matches!(core.initialize(signal), Err(CoreError::SignalBind)));
        assert!(!core.is_initialized());
        assert!(core.forward_event().is_none());
    }

    #[test]
    fn test_double_initialize_rejected() {
        let driver = Arc::new(ReplayDriver::new());
        let core = make_core(&driver);
        core.initialize(driver.readiness_event()).unwrap();
        assert!(matches!(
            core.initialize(driver.readiness_event()),
            Err(CoreError::AlreadyInitialized)
        ));
        core.finalize();
        assert!(matches!(
            core.initialize(driver.readiness_event()),
            Err(CoreError::Finalized)
        ));
    }

    #[test]
    fn test_finalize_closes_outbound_but_not_driver_signal() {
        let driver = Arc::new(ReplayDriver::new());
        let core = make_core(&driver);
        core.initialize(driver.readiness_event()).unwrap();

        let forward = core.forward_event().unwrap();
        let user = core.user_forward_event().unwrap();
        let system = core.system_event().unwrap();
        assert!(forward.is_inter_process());

        core.finalize();
        assert!(!core.is_initialized());
        assert!(forward.is_closed());
        assert!(user.is_closed());
        assert!(!system.is_closed());

        // Second finalize is a no-op
        core.finalize();
        assert!(!core.is_initialized());
    }

    #[test]
    fn test_driver_failure_reaches_fatal_handler() {
        let driver = Arc::new(ReplayDriver::new());
        let (tx, rx) = std::sync::mpsc::channel::<String>();
        let tx = Mutex::new(tx);
        let core = make_core(&driver).with_fatal_handler(Arc::new(move |e: &CoreError| {
            let _ = tx.lock().send(e.to_string());
        }));
        core.initialize(driver.readiness_event()).unwrap();

        driver.fail_next_fetch();
        driver.push(RawEvent::new(EventType::DiscoveryStateChanged, vec![1, 0, 0, 0]));

        let message = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(message.contains("injected fetch failure"));
        core.finalize();
    }

    #[test]
    fn test_accessor_rejects_small_buffer() {
        let driver = Arc::new(ReplayDriver::new());
        let core = make_core(&driver);
        let mut buffer = [0u8; 16];
        // Empty store holds an unknown event, which needs the whole buffer
        match core.get_event_info(ProgramId::BTM, &mut buffer) {
            Err(CoreError::BufferTooSmall { required, provided }) => {
                assert_eq!(required, EVENT_BUFFER_SIZE);
                assert_eq!(provided, 16);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
