// Btmitm Settings Module
// User-configurable settings for the interception core and replay tool

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::version::FirmwareVersion;

/// Settings for the interception core
///
/// These settings are loaded from a TOML file (default: ~/.config/btmitm/settings.toml).
#[derive(Debug, Clone)]
pub struct Settings {
    /// Initial value of the redirect-events mode flag
    redirect_events: bool,

    /// Initial value of the preparing-for-sleep mode flag
    preparing_for_sleep: bool,

    /// Firmware version reported by the fixed version probe
    firmware_version: FirmwareVersion,

    /// How often the waiter re-checks for shutdown while idle
    poll_interval_ms: u64,

    /// Name of the waiter thread
    thread_name: String,

    /// Path the settings were loaded from, if any
    source_path: Option<PathBuf>,
}

/// Errors that can occur when loading settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("Invalid setting value: {0}")]
    InvalidValue(String),
}

/// TOML representation for deserializing settings
#[derive(Debug, Clone, serde::Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SettingsToml {
    #[serde(default)]
    modes: Option<ModeSettings>,

    #[serde(default)]
    firmware: Option<FirmwareSettings>,

    #[serde(default)]
    core: Option<CoreSettings>,
}

#[derive(Debug, Clone, serde::Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ModeSettings {
    #[serde(default)]
    redirect_events: Option<toml::Value>,
    #[serde(default)]
    preparing_for_sleep: Option<toml::Value>,
}

#[derive(Debug, Clone, serde::Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct FirmwareSettings {
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Clone, serde::Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CoreSettings {
    #[serde(default)]
    poll_interval_ms: Option<u64>,
    #[serde(default)]
    thread_name: Option<String>,
}

impl Settings {
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;
    pub const DEFAULT_THREAD_NAME: &'static str = "bt-event-waiter";
    pub const DEFAULT_FIRMWARE: FirmwareVersion = FirmwareVersion::new(9, 1, 0);

    /// Create settings with default values
    pub fn new() -> Self {
        Self {
            redirect_events: false,
            preparing_for_sleep: false,
            firmware_version: Self::DEFAULT_FIRMWARE,
            poll_interval_ms: Self::DEFAULT_POLL_INTERVAL_MS,
            thread_name: Self::DEFAULT_THREAD_NAME.to_string(),
            source_path: None,
        }
    }

    /// Load settings from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(&path)?;
        let mut settings = Self::from_toml(&content)?;
        settings.source_path = Some(path.as_ref().to_path_buf());
        Ok(settings)
    }

    /// Load settings from TOML string
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let toml_settings: SettingsToml =
            toml::from_str(content).map_err(|e| SettingsError::TomlParse(e.to_string()))?;

        let mut settings = Self::new();

        if let Some(modes) = toml_settings.modes {
            if let Some(value) = modes.redirect_events {
                settings.redirect_events = parse_bool_value(&value)?;
            }
            if let Some(value) = modes.preparing_for_sleep {
                settings.preparing_for_sleep = parse_bool_value(&value)?;
            }
        }

        if let Some(firmware) = toml_settings.firmware {
            if let Some(version) = firmware.version {
                settings.firmware_version = version
                    .parse()
                    .map_err(SettingsError::InvalidValue)?;
            }
        }

        if let Some(core) = toml_settings.core {
            if let Some(interval) = core.poll_interval_ms {
                if interval == 0 {
                    return Err(SettingsError::InvalidValue(
                        "poll_interval_ms must be greater than zero".to_string(),
                    ));
                }
                settings.poll_interval_ms = interval;
            }
            if let Some(name) = core.thread_name {
                if name.trim().is_empty() {
                    return Err(SettingsError::InvalidValue(
                        "thread_name must not be empty".to_string(),
                    ));
                }
                settings.thread_name = name;
            }
        }

        Ok(settings)
    }

    /// Get the default settings path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("btmitm").join("settings.toml"))
    }

    /// Load from default location (~/.config/btmitm/settings.toml)
    pub fn load_default() -> Result<Self, SettingsError> {
        if let Some(path) = Self::default_path() {
            if path.exists() {
                return Self::from_file(path);
            }
        }
        // Return default settings if file doesn't exist
        Ok(Self::new())
    }

    pub fn redirect_events(&self) -> bool {
        self.redirect_events
    }

    pub fn set_redirect_events(&mut self, value: bool) {
        self.redirect_events = value;
    }

    pub fn preparing_for_sleep(&self) -> bool {
        self.preparing_for_sleep
    }

    pub fn firmware_version(&self) -> FirmwareVersion {
        self.firmware_version
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a TOML value as a boolean
fn parse_bool_value(value: &toml::Value) -> Result<bool, SettingsError> {
    match value {
        toml::Value::Boolean(b) => Ok(*b),
        toml::Value::Integer(1) => Ok(true),
        toml::Value::Integer(0) => Ok(false),
        toml::Value::String(s) => match s.to_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(true),
            "false" | "no" | "off" | "0" => Ok(false),
            _ => Err(SettingsError::InvalidValue(format!(
                "Cannot convert '{}' to boolean",
                s
            ))),
        },
        _ => Err(SettingsError::InvalidValue(format!(
            "Cannot convert {:?} to boolean",
            value
        ))),
    }
}

/// Create default settings content for a new installation
pub fn default_settings_content() -> &'static str {
    r#"# Btmitm Settings
# Place this file at: ~/.config/btmitm/settings.toml

[modes]
# Route captured events to the user forward channel
redirect_events = false
# Forces the unfiltered forward channel while set
preparing_for_sleep = false

[firmware]
# Firmware version reported to the core (selects the bond-state layout)
version = "9.1.0"

[core]
# Shutdown check interval of the waiter thread
poll_interval_ms = 50
thread_name = "bt-event-waiter"
"#
}
