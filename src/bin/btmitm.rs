// Btmitm CLI
// Replays scripted Bluetooth driver events through the interception core

#![cfg_attr(not(feature = "cli"), allow(unused_imports))]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "cli")]
use clap::Parser;

#[cfg(feature = "cli")]
use btmitm_core::{
    BluetoothCore, CoreConfig, Driver, EventRecord, EventScript, FixedVersion, ModeFlags,
    ProgramId, RawEvent, ReplayDriver, Route, Settings, EVENT_BUFFER_SIZE,
};

/// How long one replayed event may take to reach a channel
#[cfg(feature = "cli")]
const DISPATCH_TIMEOUT: Duration = Duration::from_secs(2);

/// Bluetooth event interception replay tool
#[cfg(feature = "cli")]
#[derive(Parser, Debug)]
#[command(name = "btmitm")]
#[command(version = "0.3.0")]
#[command(about = "Replay Bluetooth driver events through the interception core", long_about = None)]
struct Args {
    /// TOML settings file
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// TOML event script to replay
    #[arg(short, long, value_name = "SCRIPT")]
    script: Option<PathBuf>,

    /// Program id reading the events (hex)
    #[arg(short, long, value_name = "PROGRAM_ID", default_value = "010000000000002a")]
    requester: String,

    /// Route events to the user forward channel
    #[arg(long)]
    redirect: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Validate settings and script, then exit
    #[arg(long)]
    check_config: bool,
}

/// Main application state
#[cfg(feature = "cli")]
struct Application {
    settings: Settings,
    script: EventScript,
    requester: ProgramId,
    args: Args,
    /// Flag to signal the replay loop to stop
    running: Arc<AtomicBool>,
}

#[cfg(feature = "cli")]
impl Application {
    fn new(args: Args) -> Result<Self, Box<dyn std::error::Error>> {
        let mut settings = match args.config {
            Some(ref path) => Settings::from_file(path)?,
            None => Settings::load_default()?,
        };
        if args.redirect {
            settings.set_redirect_events(true);
        }

        let script = match args.script {
            Some(ref path) => EventScript::from_file(path)?,
            None => EventScript::default(),
        };

        let requester: ProgramId = args
            .requester
            .parse()
            .map_err(|e| format!("Invalid requester '{}': {}", args.requester, e))?;

        Ok(Self {
            settings,
            script,
            requester,
            args,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Encode the script against the configured firmware and report
    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        let revision = self.settings.firmware_version().driver_revision();
        let events = self.script.to_raw_events(revision)?;
        match self.settings.source_path() {
            Some(path) => println!("Settings: {}", path.display()),
            None => println!("Settings: defaults"),
        }
        println!(
            "Firmware {} ({:?} driver layout)",
            self.settings.firmware_version(),
            revision
        );
        println!("Script is valid ({} event(s))", events.len());
        Ok(())
    }

    fn install_signal_handler(&self) {
        use signal_hook::iterator::Signals;
        let running = self.running.clone();

        std::thread::spawn(move || {
            if let Ok(mut signals) =
                Signals::new(&[signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM])
            {
                if signals.forever().next().is_some() {
                    println!("\nReceived signal, shutting down gracefully...");
                    running.store(false, Ordering::SeqCst);
                }
            }
        });
    }

    fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let version = self.settings.firmware_version();
        let revision = version.driver_revision();
        let events = self.script.to_raw_events(revision)?;

        let driver = Arc::new(ReplayDriver::new());
        let transport: Arc<dyn Driver> = driver.clone();
        let flags = Arc::new(ModeFlags::from_settings(&self.settings));
        let core = BluetoothCore::new(transport, flags, Arc::new(FixedVersion(version)))
            .with_config(CoreConfig::from(&self.settings));
        core.initialize(driver.readiness_event())?;

        let forward = core.forward_event().ok_or("forward channel missing")?;
        let user_forward = core.user_forward_event().ok_or("user forward channel missing")?;

        self.install_signal_handler();
        log::info!(
            "Replaying {} event(s) as {} (firmware {})",
            events.len(),
            self.requester,
            version
        );

        let mut buffer = vec![0u8; EVENT_BUFFER_SIZE];
        for (index, event) in events.into_iter().enumerate() {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            let route = replay_one(&driver, event, &forward, &user_forward)
                .ok_or_else(|| format!("Event #{} was not dispatched", index))?;

            let kind = core.get_event_info(self.requester, &mut buffer)?;
            let size = btmitm_core::record_size(kind, revision);
            match EventRecord::decode(kind, revision, &buffer[..size]) {
                Ok(record) => println!("[{}] {:?}: {}", index, route, record),
                Err(e) => println!("[{}] {:?}: {} ({})", index, route, kind, e),
            }
            if self.args.verbose {
                for line in btmitm_core::logging::dump_lines(&buffer[..size]) {
                    println!("    {}", line);
                }
            }
        }

        core.finalize();
        Ok(())
    }
}

/// Push one event and wait until the core dispatched it
#[cfg(feature = "cli")]
fn replay_one(
    driver: &ReplayDriver,
    event: RawEvent,
    forward: &btmitm_core::SystemEvent,
    user_forward: &btmitm_core::SystemEvent,
) -> Option<Route> {
    driver.push(event);

    let deadline = std::time::Instant::now() + DISPATCH_TIMEOUT;
    while std::time::Instant::now() < deadline {
        if forward.wait_timeout(Duration::from_millis(5)) {
            return Some(Route::Forward);
        }
        if user_forward.try_wait() {
            return Some(Route::UserForward);
        }
    }
    None
}

#[cfg(feature = "cli")]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let app = Application::new(args)?;

    if app.args.check_config {
        return app.validate();
    }

    app.run()
}

// Stub for when cli feature is not enabled
#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("Error: btmitm binary requires the 'cli' feature to be enabled.");
    eprintln!("Please build with: cargo build --release --features cli --bin btmitm");
    std::process::exit(1);
}
