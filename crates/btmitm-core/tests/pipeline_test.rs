// Btmitm Pipeline Integration Tests
//
// These tests verify the complete capture pipeline:
// driver signal -> waiter thread -> event store -> dispatch -> accessor

use std::sync::Arc;
use std::time::Duration;

use btmitm_core::event::record::{BOND_STATE_V1_SIZE, BOND_STATE_V2_SIZE, DEVICE_FOUND_SIZE};
use btmitm_core::event::{BondState, SspRequest};
use btmitm_core::filter::{CANONICAL_CONTROLLER_CLASS, CANONICAL_CONTROLLER_NAME};
use btmitm_core::{
    BluetoothAddress, BluetoothCore, BluetoothName, CoreConfig, CoreError, DeviceClass,
    DeviceIdentity, Driver, DriverRevision, EventRecord, EventType, FirmwareVersion, FixedVersion,
    ModeFlags, ProgramId, ReplayDriver, Route, EVENT_BUFFER_SIZE,
};

const WAIT: Duration = Duration::from_secs(5);
const OTHER_PROGRAM: ProgramId = ProgramId(0x0100000000001000);

struct Harness {
    driver: Arc<ReplayDriver>,
    flags: Arc<ModeFlags>,
    core: BluetoothCore,
}

impl Harness {
    fn new(version: FirmwareVersion) -> Self {
        let driver = Arc::new(ReplayDriver::new());
        let flags = Arc::new(ModeFlags::default());
        let transport: Arc<dyn Driver> = driver.clone();
        let core = BluetoothCore::new(
            transport,
            Arc::clone(&flags),
            Arc::new(FixedVersion(version)),
        )
        .with_config(CoreConfig {
            poll_interval: Duration::from_millis(5),
            thread_name: "pipeline-waiter".to_string(),
        });
        core.initialize(driver.readiness_event()).unwrap();
        Self { driver, flags, core }
    }

    /// Push a record and wait until the waiter has dispatched it
    fn capture(&self, record: &EventRecord) -> Route {
        let forward = self.core.forward_event().unwrap();
        let user = self.core.user_forward_event().unwrap();
        self.driver.push_record(record);

        let deadline = std::time::Instant::now() + WAIT;
        loop {
            if forward.try_wait() {
                assert!(!user.is_signaled(), "both channels signalled");
                return Route::Forward;
            }
            if user.try_wait() {
                assert!(!forward.is_signaled(), "both channels signalled");
                return Route::UserForward;
            }
            assert!(std::time::Instant::now() < deadline, "event was never dispatched");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn read(&self, requester: ProgramId) -> (EventType, Vec<u8>) {
        let mut buffer = vec![0u8; EVENT_BUFFER_SIZE];
        let kind = self.core.get_event_info(requester, &mut buffer).unwrap();
        (kind, buffer)
    }
}

fn controller(name: &str) -> DeviceIdentity {
    DeviceIdentity {
        name: BluetoothName::new(name),
        address: "98:B6:E9:12:34:56".parse().unwrap(),
        class: DeviceClass([0x00, 0x05, 0x08]),
    }
}

fn current() -> FirmwareVersion {
    FirmwareVersion::new(10, 0, 0)
}

#[test]
fn test_lifecycle_transitions() {
    let driver = Arc::new(ReplayDriver::new());
    let transport: Arc<dyn Driver> = driver.clone();
    let core = BluetoothCore::new(
        transport,
        Arc::new(ModeFlags::default()),
        Arc::new(FixedVersion(current())),
    );

    assert!(!core.is_initialized());
    core.initialize(driver.readiness_event()).unwrap();
    assert!(core.is_initialized());
    assert!(core.system_event().is_some());
    core.finalize();
    assert!(!core.is_initialized());
    assert!(core.forward_event().is_none());
}

#[test]
fn test_non_privileged_read_is_byte_identical() {
    let harness = Harness::new(current());
    let record = EventRecord::DeviceFound(controller("Wireless Controller"));
    harness.capture(&record);

    let (kind, bytes) = harness.read(OTHER_PROGRAM);
    assert_eq!(kind, EventType::DeviceFound);
    assert_eq!(&bytes[..DEVICE_FOUND_SIZE], record.encode().as_slice());
}

#[test]
fn test_privileged_read_is_spoofed_and_store_untouched() {
    let harness = Harness::new(current());
    let record = EventRecord::DeviceFound(controller("Wireless Controller"));
    harness.capture(&record);

    let (kind, bytes) = harness.read(ProgramId::BTM);
    assert_eq!(kind, EventType::DeviceFound);
    let spoofed = EventRecord::decode(kind, DriverRevision::Current, &bytes).unwrap();
    let device = spoofed.identity().unwrap();
    assert!(device.name.matches(CANONICAL_CONTROLLER_NAME));
    assert_eq!(device.class, CANONICAL_CONTROLLER_CLASS);

    // The stored original is still intact for everybody else
    let (_, raw) = harness.read(OTHER_PROGRAM);
    assert_eq!(&raw[..DEVICE_FOUND_SIZE], record.encode().as_slice());
}

#[test]
fn test_pin_and_ssp_requests_spoofed_for_privileged() {
    let harness = Harness::new(current());

    harness.capture(&EventRecord::PinRequest(controller("Gamepad")));
    let (kind, bytes) = harness.read(ProgramId::BTM);
    assert_eq!(kind, EventType::PinRequest);
    let device = *EventRecord::decode(kind, DriverRevision::Current, &bytes)
        .unwrap()
        .identity()
        .unwrap();
    assert!(device.name.matches(CANONICAL_CONTROLLER_NAME));
    assert_eq!(device.class, CANONICAL_CONTROLLER_CLASS);

    harness.capture(&EventRecord::SspRequest(SspRequest {
        device: controller("Gamepad"),
        variant: 0,
        passkey: 999999,
    }));
    let (kind, bytes) = harness.read(ProgramId::BTM);
    assert_eq!(kind, EventType::SspRequest);
    match EventRecord::decode(kind, DriverRevision::Current, &bytes).unwrap() {
        EventRecord::SspRequest(ssp) => {
            assert!(ssp.device.name.matches(CANONICAL_CONTROLLER_NAME));
            assert_eq!(ssp.device.class, CANONICAL_CONTROLLER_CLASS);
            assert_eq!(ssp.passkey, 999999);
        }
        other => panic!("unexpected record: {:?}", other),
    }
}

#[test]
fn test_native_controller_never_rewritten() {
    let harness = Harness::new(current());
    let record = EventRecord::DeviceFound(controller("Pro Controller"));
    harness.capture(&record);

    for requester in [ProgramId::BTM, OTHER_PROGRAM] {
        let (_, bytes) = harness.read(requester);
        assert_eq!(&bytes[..DEVICE_FOUND_SIZE], record.encode().as_slice());
    }
}

#[test]
fn test_discovery_and_bond_state_pass_through() {
    let harness = Harness::new(current());

    let discovery = EventRecord::DiscoveryState { state: 1 };
    harness.capture(&discovery);
    let (kind, bytes) = harness.read(ProgramId::BTM);
    assert_eq!(kind, EventType::DiscoveryStateChanged);
    assert_eq!(&bytes[..4], discovery.encode().as_slice());

    let bond = EventRecord::BondStateV2(BondState {
        address: BluetoothAddress([1, 2, 3, 4, 5, 6]),
        status: 0,
        state: 2,
    });
    harness.capture(&bond);
    let (kind, bytes) = harness.read(ProgramId::BTM);
    assert_eq!(kind, EventType::BondStateChanged);
    assert_eq!(&bytes[..BOND_STATE_V2_SIZE], bond.encode().as_slice());
}

#[test]
fn test_dispatch_follows_mode_flags_each_cycle() {
    let harness = Harness::new(current());
    let record = EventRecord::DiscoveryState { state: 0 };

    harness.flags.set_redirect_events(false);
    harness.flags.set_preparing_for_sleep(false);
    assert_eq!(harness.capture(&record), Route::Forward);

    harness.flags.set_redirect_events(true);
    assert_eq!(harness.capture(&record), Route::UserForward);

    harness.flags.set_preparing_for_sleep(true);
    assert_eq!(harness.capture(&record), Route::Forward);

    harness.flags.set_preparing_for_sleep(false);
    assert_eq!(harness.capture(&record), Route::UserForward);
}

#[test]
fn test_every_queued_event_gets_a_cycle() {
    let harness = Harness::new(current());
    let forward = harness.core.forward_event().unwrap();

    for state in 0..5u32 {
        harness
            .driver
            .push_record(&EventRecord::DiscoveryState { state });
    }

    let deadline = std::time::Instant::now() + WAIT;
    while harness.driver.fetch_count() < 5 {
        assert!(std::time::Instant::now() < deadline, "events were not all fetched");
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(forward.wait_timeout(WAIT));

    let (_, bytes) = harness.read(OTHER_PROGRAM);
    assert_eq!(&bytes[..4], &4u32.to_le_bytes());
}

#[test]
fn test_bond_state_size_follows_firmware() {
    let bond = BondState {
        address: BluetoothAddress([0xA, 0xB, 0xC, 0xD, 0xE, 0xF]),
        status: 0,
        state: 1,
    };

    let legacy = Harness::new(FirmwareVersion::new(8, 1, 0));
    legacy.capture(&EventRecord::BondStateV1(bond));
    let mut exact = vec![0u8; BOND_STATE_V1_SIZE];
    assert_eq!(
        legacy.core.get_event_info(OTHER_PROGRAM, &mut exact).unwrap(),
        EventType::BondStateChanged
    );
    assert_eq!(exact, EventRecord::BondStateV1(bond).encode());

    let modern = Harness::new(current());
    modern.capture(&EventRecord::BondStateV2(bond));
    let mut short = vec![0u8; BOND_STATE_V1_SIZE];
    match modern.core.get_event_info(OTHER_PROGRAM, &mut short) {
        Err(CoreError::BufferTooSmall { required, provided }) => {
            assert_eq!(required, BOND_STATE_V2_SIZE);
            assert_eq!(provided, BOND_STATE_V1_SIZE);
        }
        other => panic!("unexpected result: {:?}", other),
    }
    let mut exact = vec![0u8; BOND_STATE_V2_SIZE];
    modern.core.get_event_info(OTHER_PROGRAM, &mut exact).unwrap();
    assert_eq!(exact, EventRecord::BondStateV2(bond).encode());
}

#[test]
fn test_handle_event_reports_driver_failure() {
    let driver = Arc::new(ReplayDriver::new());
    let transport: Arc<dyn Driver> = driver.clone();
    let core = BluetoothCore::new(
        transport,
        Arc::new(ModeFlags::default()),
        Arc::new(FixedVersion(current())),
    );
    // Nobody signals this event, so the waiter stays idle
    let parked = Arc::new(btmitm_core::SystemEvent::auto_clear());
    core.initialize(parked).unwrap();

    assert!(matches!(
        core.handle_event(),
        Err(CoreError::DriverRead(btmitm_core::DriverError::NoEvent))
    ));

    driver.push_record(&EventRecord::DiscoveryState { state: 1 });
    assert_eq!(core.handle_event().unwrap(), Route::Forward);
    assert!(core.forward_event().unwrap().try_wait());
}
